//! The shared FIFO work queue.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

use super::Job;

/// Single global FIFO of submitted jobs. Any number of workers may call
/// [`WorkQueue::dequeue`] concurrently; the pop happens under one lock, so
/// each job is delivered to exactly one worker.
#[derive(Default)]
pub struct WorkQueue {
    jobs: Mutex<VecDeque<Job>>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, job: Job) {
        self.jobs.lock().unwrap().push_back(job);
        self.notify.notify_one();
    }

    /// Pop the oldest job without waiting.
    pub fn try_dequeue(&self) -> Option<Job> {
        self.jobs.lock().unwrap().pop_front()
    }

    /// Wait until a job is available and take it.
    pub async fn dequeue(&self) -> Job {
        loop {
            if let Some(job) = self.try_dequeue() {
                return job;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().unwrap().is_empty()
    }
}
