use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use coderoom::allowlist::Allowlist;
use coderoom::error::GatewayError;
use coderoom::jobs::dispatcher::{Dispatcher, SubmitRequest};
use coderoom::jobs::queue::WorkQueue;
use coderoom::jobs::store::{JobStore, SqliteJobStore};
use coderoom::jobs::{JobState, Plot};
use uuid::Uuid;

const MAX_PAYLOAD: usize = 50 * 1024;

fn harness(ttl: Duration) -> (Dispatcher, Arc<SqliteJobStore>, Arc<WorkQueue>) {
    let store = Arc::new(SqliteJobStore::in_memory().unwrap());
    let queue = Arc::new(WorkQueue::new());
    let allowlist = Arc::new(Allowlist::parse("numpy|arrays\npandas|frames\n"));
    let dispatcher = Dispatcher::new(
        store.clone(),
        queue.clone(),
        allowlist,
        MAX_PAYLOAD,
        ttl,
    );
    (dispatcher, store, queue)
}

fn request(files: BTreeMap<String, String>, packages: Vec<&str>) -> SubmitRequest {
    SubmitRequest {
        files: Some(files),
        code: None,
        entrypoint: None,
        packages: packages.into_iter().map(String::from).collect(),
        room_id: None,
    }
}

fn one_file(content: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("main.py".to_string(), content.to_string())])
}

#[tokio::test]
async fn submit_stores_pending_then_enqueues() {
    let (dispatcher, store, queue) = harness(Duration::from_secs(600));

    let job_id = dispatcher
        .submit(request(one_file("print(1)"), vec!["numpy"]))
        .await
        .unwrap();

    let record = store.get(job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobState::Pending);
    assert!(record.completed_at.is_none());

    let job = queue.try_dequeue().unwrap();
    assert_eq!(job.job_id, job_id);
    assert_eq!(job.entrypoint, "main.py");
    assert_eq!(job.room_id, "default-room");
    assert_eq!(job.language, "python");
}

#[tokio::test]
async fn empty_submission_is_rejected() {
    let (dispatcher, _, queue) = harness(Duration::from_secs(600));
    let err = dispatcher
        .submit(request(BTreeMap::new(), vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Validation(_)));
    assert!(queue.is_empty());
}

#[tokio::test]
async fn legacy_code_field_becomes_main_py() {
    let (dispatcher, _, queue) = harness(Duration::from_secs(600));
    let req = SubmitRequest {
        files: None,
        code: Some("print('legacy')".to_string()),
        entrypoint: None,
        packages: vec![],
        room_id: Some("room-7".to_string()),
    };
    dispatcher.submit(req).await.unwrap();
    let job = queue.try_dequeue().unwrap();
    assert_eq!(job.files.get("main.py").unwrap(), "print('legacy')");
    assert_eq!(job.room_id, "room-7");
}

#[tokio::test]
async fn size_boundary_is_exact() {
    let (dispatcher, _, _) = harness(Duration::from_secs(600));

    // Exactly 50 KB across two files succeeds.
    let mut files = BTreeMap::new();
    files.insert("a.py".to_string(), "x".repeat(MAX_PAYLOAD - 10));
    files.insert("b.py".to_string(), "y".repeat(10));
    dispatcher.submit(request(files.clone(), vec![])).await.unwrap();

    // One more byte fails with a size error.
    files.insert("b.py".to_string(), "y".repeat(11));
    let err = dispatcher.submit(request(files, vec![])).await.unwrap_err();
    assert!(matches!(err, GatewayError::SizeExceeded(_)));
}

#[tokio::test]
async fn disallowed_packages_are_named_in_the_error() {
    let (dispatcher, _, queue) = harness(Duration::from_secs(600));

    dispatcher
        .submit(request(one_file("import numpy"), vec!["numpy"]))
        .await
        .unwrap();

    let err = dispatcher
        .submit(request(one_file("import nope"), vec!["not-a-real-pkg"]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not-a-real-pkg"));
    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn status_record_expires_after_ttl() {
    let (dispatcher, store, _) = harness(Duration::from_millis(50));

    let job_id = dispatcher
        .submit(request(one_file("print(1)"), vec![]))
        .await
        .unwrap();
    assert!(store.get(job_id).await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(store.get(job_id).await.unwrap().is_none());

    // And the purger can reclaim it.
    assert_eq!(store.purge_expired().await.unwrap(), 1);
}

#[tokio::test]
async fn terminal_write_happens_once() {
    let store = SqliteJobStore::in_memory().unwrap();
    let job_id = Uuid::new_v4();
    store
        .put_pending(job_id, 0, Duration::from_secs(600))
        .await
        .unwrap();

    let plots = vec![Plot {
        name: "fig1.png".to_string(),
        data: "aGk=".to_string(),
    }];
    assert!(store
        .complete(job_id, "done".to_string(), plots)
        .await
        .unwrap());

    // A second terminal write of either kind is refused.
    assert!(!store.fail(job_id, "late error".to_string()).await.unwrap());
    assert!(!store
        .complete(job_id, "again".to_string(), Vec::new())
        .await
        .unwrap());

    let record = store.get(job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobState::Completed);
    assert_eq!(record.output.as_deref(), Some("done"));
    assert!(record.completed_at.is_some());
    assert_eq!(record.plots.as_ref().unwrap().len(), 1);
}

#[tokio::test]
async fn failing_an_unknown_job_is_a_noop() {
    let store = SqliteJobStore::in_memory().unwrap();
    assert!(!store
        .fail(Uuid::new_v4(), "boom".to_string())
        .await
        .unwrap());
}

#[tokio::test]
async fn queue_is_fifo_and_delivers_each_job_once() {
    let (dispatcher, _, queue) = harness(Duration::from_secs(600));

    let mut submitted = Vec::new();
    for i in 0..20 {
        let id = dispatcher
            .submit(request(one_file(&format!("print({i})")), vec![]))
            .await
            .unwrap();
        submitted.push(id);
    }

    // Four workers race on the shared queue; each job must be delivered to
    // exactly one of them.
    let mut handles = Vec::new();
    for _ in 0..4 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            let mut taken = Vec::new();
            while let Some(job) = queue.try_dequeue() {
                taken.push(job.job_id);
                tokio::task::yield_now().await;
            }
            taken
        }));
    }

    let mut delivered = Vec::new();
    for handle in handles {
        delivered.extend(handle.await.unwrap());
    }
    delivered.sort();
    let mut expected = submitted.clone();
    expected.sort();
    assert_eq!(delivered, expected);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn fifo_order_for_a_single_consumer() {
    let (dispatcher, _, queue) = harness(Duration::from_secs(600));
    let first = dispatcher
        .submit(request(one_file("print(1)"), vec![]))
        .await
        .unwrap();
    let second = dispatcher
        .submit(request(one_file("print(2)"), vec![]))
        .await
        .unwrap();

    assert_eq!(queue.dequeue().await.job_id, first);
    assert_eq!(queue.dequeue().await.job_id, second);
}
