//! Job submission: validation, record creation, enqueue.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use super::queue::WorkQueue;
use super::store::JobStore;
use super::Job;
use crate::allowlist::Allowlist;
use crate::error::{GatewayError, Result};

/// The language every job currently runs as.
const LANGUAGE: &str = "python";

/// Body of `POST /execute`. A bare `code` string is the legacy single-file
/// form, treated as `{"main.py": code}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    #[serde(default)]
    pub files: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub entrypoint: Option<String>,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub room_id: Option<String>,
}

/// Validates submissions and hands them to the worker pool: status record
/// first, then enqueue, so the `pending` record always exists before any
/// worker can see the job.
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    queue: Arc<WorkQueue>,
    allowlist: Arc<Allowlist>,
    max_payload_bytes: usize,
    job_ttl: Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<WorkQueue>,
        allowlist: Arc<Allowlist>,
        max_payload_bytes: usize,
        job_ttl: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            allowlist,
            max_payload_bytes,
            job_ttl,
        }
    }

    /// Validate and enqueue a submission, returning the fresh job id.
    pub async fn submit(&self, req: SubmitRequest) -> Result<Uuid> {
        let files = match (req.files, req.code) {
            (Some(files), _) => files,
            (None, Some(code)) => {
                let mut files = BTreeMap::new();
                files.insert("main.py".to_string(), code);
                files
            }
            (None, None) => BTreeMap::new(),
        };

        if files.is_empty() {
            return Err(GatewayError::Validation(
                "code files are required".to_string(),
            ));
        }

        let total_bytes: usize = files.values().map(|content| content.len()).sum();
        if total_bytes > self.max_payload_bytes {
            return Err(GatewayError::SizeExceeded(format!(
                "total code size exceeds maximum of {} KB",
                self.max_payload_bytes / 1024
            )));
        }

        self.allowlist.validate(&req.packages)?;

        let job = Job {
            job_id: Uuid::new_v4(),
            entrypoint: req.entrypoint.unwrap_or_else(|| "main.py".to_string()),
            packages: req.packages,
            room_id: req
                .room_id
                .unwrap_or_else(|| "default-room".to_string()),
            language: LANGUAGE.to_string(),
            submitted_at: Utc::now().timestamp_millis(),
            files,
        };

        // Record strictly before enqueue: once a worker can dequeue the job,
        // its pending record is already readable.
        self.store
            .put_pending(job.job_id, job.submitted_at, self.job_ttl)
            .await?;
        let job_id = job.job_id;
        let file_count = job.files.len();
        let entrypoint = job.entrypoint.clone();
        self.queue.push(job);

        info!(%job_id, file_count, entrypoint, "job submitted");
        Ok(job_id)
    }
}
