//! Registry of live rooms.
//!
//! Rooms are created lazily on first attach and evicted by a background
//! sweeper once no connection has referenced them for the configured TTL.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, RwLock};
use tokio::time::interval;
use tracing::info;
use uuid::Uuid;

use super::document::RoomDocument;
use super::PresenceState;

const FRAME_CAPACITY: usize = 256;
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A serialized relay frame tagged with the originating connection, so the
/// fan-out can skip echoing a frame back to its sender.
pub type Outbound = (Uuid, String);

/// One live room: the authoritative server replica of its document, the
/// presence of currently connected clients, and the broadcast channel every
/// connection in the room subscribes to.
pub struct Room {
    pub id: String,
    pub doc: RwLock<RoomDocument>,
    pub presence: RwLock<HashMap<Uuid, PresenceState>>,
    pub frames: broadcast::Sender<Outbound>,
    connections: AtomicUsize,
    detached_at: Mutex<Option<Instant>>,
}

impl Room {
    fn new(id: String) -> Self {
        let (frames, _) = broadcast::channel(FRAME_CAPACITY);
        Self {
            id,
            doc: RwLock::new(RoomDocument::generate()),
            presence: RwLock::new(HashMap::new()),
            frames,
            connections: AtomicUsize::new(0),
            detached_at: Mutex::new(None),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Creates rooms on first reference and reclaims them after the eviction
/// TTL. Rooms are fully independent; nothing is shared across room ids.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    evict_after: Duration,
}

impl RoomRegistry {
    pub fn new(evict_after: Duration) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            evict_after,
        }
    }

    /// Attach a connection to a room, creating it if needed.
    ///
    /// The count increment happens under the registry write lock. The
    /// sweeper holds the same lock, so an expired room can never be removed
    /// between being handed out and being marked attached.
    pub async fn attach(&self, room_id: &str) -> Arc<Room> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(room_id.to_string())
            .or_insert_with(|| {
                info!(room_id, "creating room");
                Arc::new(Room::new(room_id.to_string()))
            })
            .clone();
        room.connections.fetch_add(1, Ordering::SeqCst);
        *room.detached_at.lock().unwrap() = None;
        room
    }

    /// Detach a connection. The last detach starts the eviction clock.
    pub fn detach(&self, room: &Room) {
        if room.connections.fetch_sub(1, Ordering::SeqCst) == 1 {
            *room.detached_at.lock().unwrap() = Some(Instant::now());
        }
    }

    pub async fn get(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Drop rooms that have had no connection for the eviction TTL.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let evict_after = self.evict_after;
        let mut rooms = self.rooms.write().await;
        let before = rooms.len();
        rooms.retain(|id, room| {
            if room.connections.load(Ordering::SeqCst) > 0 {
                return true;
            }
            let keep = match *room.detached_at.lock().unwrap() {
                Some(detached) => now.duration_since(detached) < evict_after,
                None => true,
            };
            if !keep {
                info!(room_id = %id, "evicting idle room");
            }
            keep
        });
        before - rooms.len()
    }

    /// Periodic eviction task, spawned once at server start.
    pub fn spawn_sweeper(self: &Arc<Self>) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = interval(SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                registry.sweep().await;
            }
        });
    }
}
