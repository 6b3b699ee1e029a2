//! Shared application state.

use std::sync::Arc;

use crate::allowlist::Allowlist;
use crate::config::Config;
use crate::jobs::dispatcher::Dispatcher;
use crate::jobs::queue::WorkQueue;
use crate::jobs::store::JobStore;
use crate::ratelimit::RateLimiter;
use crate::room::registry::RoomRegistry;
use crate::uploads::UploadStore;

/// Everything a handler needs, cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rooms: Arc<RoomRegistry>,
    pub allowlist: Arc<Allowlist>,
    pub limiter: Arc<RateLimiter>,
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<WorkQueue>,
    pub dispatcher: Arc<Dispatcher>,
    pub uploads: Arc<UploadStore>,
}

impl AppState {
    pub fn new(config: Config, allowlist: Allowlist, store: Arc<dyn JobStore>) -> Self {
        let config = Arc::new(config);
        let allowlist = Arc::new(allowlist);
        let queue = Arc::new(WorkQueue::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::clone(&allowlist),
            config.max_payload_bytes,
            config.job_ttl,
        ));
        let uploads = Arc::new(UploadStore::new(
            config.upload_dir.clone(),
            config.max_upload_bytes,
            config.allowed_upload_exts.clone(),
        ));
        Self {
            rooms: Arc::new(RoomRegistry::new(config.room_ttl)),
            limiter: Arc::new(RateLimiter::new(
                config.rate_limit_window,
                config.rate_limit_max,
            )),
            allowlist,
            store,
            queue,
            dispatcher,
            uploads,
            config,
        }
    }
}
