//! Client-side polling contract for job completion.
//!
//! There is no server push for completion; callers poll the status record
//! until it turns terminal or the attempt budget runs out.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use super::JobStatusRecord;
use crate::error::{GatewayError, Result};

/// Delay between polls.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Attempt budget (~30 seconds at the default interval).
pub const MAX_POLL_ATTEMPTS: usize = 60;

/// Poll `fetch` until the record is terminal. A missing record is surfaced
/// as not-found; a record still `pending` after `max_attempts` polls is a
/// timeout. Cancellable by dropping the future.
pub async fn poll_status<F, Fut>(
    fetch: F,
    interval: Duration,
    max_attempts: usize,
) -> Result<JobStatusRecord>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Option<JobStatusRecord>>>,
{
    for attempt in 0..max_attempts {
        let record = fetch()
            .await?
            .ok_or_else(|| GatewayError::NotFound("job not found".to_string()))?;
        if record.status.is_terminal() {
            return Ok(record);
        }
        if attempt + 1 < max_attempts {
            sleep(interval).await;
        }
    }
    Err(GatewayError::Timeout)
}
