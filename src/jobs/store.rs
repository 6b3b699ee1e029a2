//! Durable, expiring job status store.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{JobState, JobStatusRecord, Plot};
use crate::error::Result;

/// Key/value store of job status records. Records expire a fixed interval
/// after creation regardless of outcome; an expired record reads as absent.
/// The only mutation after creation is the worker's single terminal write.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create the `pending` record. Must complete before the job is
    /// enqueued, so a worker can never finish a job whose record is missing.
    async fn put_pending(&self, job_id: Uuid, submitted_at: i64, ttl: Duration) -> Result<()>;

    /// Read a record. None if it was never created or has expired.
    async fn get(&self, job_id: Uuid) -> Result<Option<JobStatusRecord>>;

    /// Terminal write: mark completed with output and plots. Returns false
    /// if the record is missing, expired, or already terminal.
    async fn complete(&self, job_id: Uuid, output: String, plots: Vec<Plot>) -> Result<bool>;

    /// Terminal write: mark failed with an error message.
    async fn fail(&self, job_id: Uuid, error: String) -> Result<bool>;

    /// Delete expired records. Returns how many were removed.
    async fn purge_expired(&self) -> Result<usize>;
}

/// SQLite-backed store. `":memory:"` gives a process-local store; a file
/// path survives restarts.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS job_status (
                job_id TEXT PRIMARY KEY,
                record TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn now_millis() -> i64 {
        Utc::now().timestamp_millis()
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn put_pending(&self, job_id: Uuid, submitted_at: i64, ttl: Duration) -> Result<()> {
        let record = serde_json::to_string(&JobStatusRecord::pending(submitted_at))
            .expect("status record serializes");
        let expires_at = Self::now_millis() + ttl.as_millis() as i64;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO job_status (job_id, record, expires_at) VALUES (?1, ?2, ?3)",
            params![job_id.to_string(), record, expires_at],
        )?;
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<JobStatusRecord>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT record, expires_at FROM job_status WHERE job_id = ?1",
                params![job_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            Some((_, expires_at)) if expires_at <= Self::now_millis() => Ok(None),
            Some((record, _)) => Ok(serde_json::from_str(&record).ok()),
            None => Ok(None),
        }
    }

    async fn complete(&self, job_id: Uuid, output: String, plots: Vec<Plot>) -> Result<bool> {
        self.finish(job_id, |record| {
            record.status = JobState::Completed;
            record.output = Some(output);
            record.plots = if plots.is_empty() { None } else { Some(plots) };
        })
    }

    async fn fail(&self, job_id: Uuid, error: String) -> Result<bool> {
        self.finish(job_id, |record| {
            record.status = JobState::Error;
            record.error = Some(error);
        })
    }

    async fn purge_expired(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM job_status WHERE expires_at <= ?1",
            params![Self::now_millis()],
        )?;
        Ok(removed)
    }
}

impl SqliteJobStore {
    fn finish(&self, job_id: Uuid, write: impl FnOnce(&mut JobStatusRecord)) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT record, expires_at FROM job_status WHERE job_id = ?1",
                params![job_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((json, expires_at)) = row else {
            return Ok(false);
        };
        if expires_at <= Self::now_millis() {
            return Ok(false);
        }
        let Ok(mut record) = serde_json::from_str::<JobStatusRecord>(&json) else {
            return Ok(false);
        };
        if record.status.is_terminal() {
            return Ok(false);
        }
        write(&mut record);
        record.completed_at = Some(Self::now_millis());
        let json = serde_json::to_string(&record).expect("status record serializes");
        conn.execute(
            "UPDATE job_status SET record = ?1 WHERE job_id = ?2",
            params![json, job_id.to_string()],
        )?;
        Ok(true)
    }
}
