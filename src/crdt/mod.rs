//! Conflict-free merge primitives for room state.
//!
//! Every replicated field in a room document is built from one of these
//! types. Each operation carries a [`Stamp`] (a Lamport timestamp plus the
//! issuing replica's id), which gives a total order used for last-writer-wins
//! tie-breaking and for the causal ordering of append-only sequences.

pub mod lww;
pub mod sequence;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Identifies one replica of a room document.
pub type ReplicaId = u64;

/// A Lamport timestamp. Totally ordered: counter first, replica id breaks
/// ties, so two distinct replicas can never produce equal stamps.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Stamp {
    pub counter: u64,
    pub replica: ReplicaId,
}

/// Per-replica logical clock issuing [`Stamp`]s.
///
/// `observe` must be called for every remote stamp applied, so that stamps
/// issued after observing an operation always sort after it.
#[derive(Debug, Clone)]
pub struct LamportClock {
    replica: ReplicaId,
    counter: u64,
}

impl LamportClock {
    pub fn new(replica: ReplicaId) -> Self {
        Self { replica, counter: 0 }
    }

    /// A clock with a randomly drawn replica id.
    pub fn generate() -> Self {
        Self::new(rand::random::<u64>())
    }

    pub fn replica(&self) -> ReplicaId {
        self.replica
    }

    /// Issue a stamp for a new local operation.
    pub fn tick(&mut self) -> Stamp {
        self.counter += 1;
        Stamp {
            counter: self.counter,
            replica: self.replica,
        }
    }

    /// Fold a remote stamp into the clock.
    pub fn observe(&mut self, stamp: Stamp) {
        self.counter = self.counter.max(stamp.counter);
    }
}

/// Compact descriptor of which operations a replica has seen: the highest
/// counter observed per replica. Exchanged during the join protocol so each
/// side can send only the operations the other is missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VersionVector(HashMap<ReplicaId, u64>);

// JSON object keys are strings, and the internally tagged relay frames
// buffer their content before deserializing, which bypasses serde_json's
// native string-to-integer map-key conversion. Accept string keys directly
// so the vector roundtrips through `{"<replica>": counter}`.
impl<'de> Deserialize<'de> for VersionVector {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = HashMap::<String, u64>::deserialize(deserializer)?;
        let mut map = HashMap::with_capacity(raw.len());
        for (key, counter) in raw {
            let replica: ReplicaId = key.parse().map_err(serde::de::Error::custom)?;
            map.insert(replica, counter);
        }
        Ok(VersionVector(map))
    }
}

impl VersionVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `stamp` is at or below this vector's high-water mark for the
    /// issuing replica. Safe as a delta-sync filter because each connection
    /// delivers a replica's operations in issue order.
    pub fn covers(&self, stamp: Stamp) -> bool {
        self.0
            .get(&stamp.replica)
            .is_some_and(|&seen| seen >= stamp.counter)
    }

    pub fn record(&mut self, stamp: Stamp) {
        let entry = self.0.entry(stamp.replica).or_insert(0);
        *entry = (*entry).max(stamp.counter);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
