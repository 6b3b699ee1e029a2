//! Room state: the replicated document and the registry of live rooms.

pub mod document;
pub mod registry;

use serde::{Deserialize, Serialize};

/// Ephemeral per-connection identity. Supplied by the client on join,
/// relayed to peers, cleared the moment the connection drops. Never merged
/// into the room document and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceState {
    pub display_name: String,
    pub color: String,
}
