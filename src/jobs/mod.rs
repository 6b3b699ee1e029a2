//! The execution job pipeline: dispatcher, durable status store, shared
//! work queue, and the client-side polling contract.

pub mod dispatcher;
pub mod poll;
pub mod queue;
pub mod store;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A plot produced by an execution, as base64-encoded image data. Opaque to
/// the gateway; the worker produces it and clients render it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plot {
    pub name: String,
    pub data: String,
}

/// One code-execution request. Built once by the dispatcher, immutable
/// thereafter; the worker consumes it verbatim from the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: Uuid,
    pub files: BTreeMap<String, String>,
    pub entrypoint: String,
    pub packages: Vec<String>,
    pub room_id: String,
    pub language: String,
    pub submitted_at: i64,
}

/// Job lifecycle states: `pending` then exactly one terminal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Completed,
    Error,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobState::Pending)
    }
}

/// The status record polled by clients, keyed by job id in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusRecord {
    pub status: JobState,
    pub submitted_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plots: Option<Vec<Plot>>,
}

impl JobStatusRecord {
    pub fn pending(submitted_at: i64) -> Self {
        Self {
            status: JobState::Pending,
            submitted_at,
            completed_at: None,
            output: None,
            error: None,
            plots: None,
        }
    }
}
