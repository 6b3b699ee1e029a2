//! Collaborative code-room gateway.
//!
//! Two subsystems: the room-scoped state synchronizer (a replicated
//! document relayed over WebSocket, converging under reordering and
//! reconnection) and the execution job pipeline (admission control,
//! validation, a durable expiring status store, and a shared work queue
//! consumed by external workers).

pub mod allowlist;
pub mod config;
pub mod crdt;
pub mod error;
pub mod http;
pub mod jobs;
pub mod ratelimit;
pub mod relay;
pub mod room;
pub mod state;
pub mod uploads;
