//! The replicated room document and its operation set.
//!
//! A document is composed of independently mergeable fields:
//!
//! - `files`: filename -> content, last-writer-wins per key
//! - `uploads`: append-only causal sequence of upload metadata
//! - `packages`: append-only causal sequence, deduplicated by name on read
//! - `output`: whole-value last-writer-wins register of the shared output
//!
//! [`RoomDocument::apply`] is idempotent and commutative: replaying an
//! already-applied operation is a no-op, and any two replicas that apply the
//! same set of operations converge regardless of order or duplication.

use std::collections::HashSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::crdt::lww::{LwwMap, LwwRegister};
use crate::crdt::sequence::Sequence;
use crate::crdt::{LamportClock, ReplicaId, Stamp, VersionVector};
use crate::error::{GatewayError, Result};
use crate::jobs::Plot;

/// Hard cap on the number of code files a room may hold.
pub const MAX_FILES: usize = 10;

const EVENT_CAPACITY: usize = 64;

/// Metadata for a file uploaded to the room's storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub name: String,
    pub size: u64,
    pub uploaded_at: i64,
}

/// One installed package, normalized at the boundary: bare names become
/// `{name, version: "installed"}` before they reach the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    pub version: String,
}

/// The most recently shared execution output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedOutput {
    pub output: String,
    #[serde(default)]
    pub plots: Vec<Plot>,
    pub shared_by: String,
    pub shared_at: i64,
}

/// One replicated mutation. The stamp is the operation's identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoomOp {
    SetFile {
        name: String,
        content: String,
        stamp: Stamp,
    },
    RemoveFile {
        name: String,
        stamp: Stamp,
    },
    AddUpload {
        record: UploadedFile,
        stamp: Stamp,
    },
    RemoveUpload {
        target: Stamp,
        stamp: Stamp,
    },
    AddPackage {
        record: PackageRecord,
        stamp: Stamp,
    },
    ShareOutput {
        payload: SharedOutput,
        stamp: Stamp,
    },
}

impl RoomOp {
    pub fn stamp(&self) -> Stamp {
        match self {
            RoomOp::SetFile { stamp, .. }
            | RoomOp::RemoveFile { stamp, .. }
            | RoomOp::AddUpload { stamp, .. }
            | RoomOp::RemoveUpload { stamp, .. }
            | RoomOp::AddPackage { stamp, .. }
            | RoomOp::ShareOutput { stamp, .. } => *stamp,
        }
    }

    fn field(&self) -> Field {
        match self {
            RoomOp::SetFile { .. } | RoomOp::RemoveFile { .. } => Field::Files,
            RoomOp::AddUpload { .. } | RoomOp::RemoveUpload { .. } => Field::UploadedFiles,
            RoomOp::AddPackage { .. } => Field::InstalledPackages,
            RoomOp::ShareOutput { .. } => Field::SharedOutput,
        }
    }
}

/// Which document field a change notification refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Files,
    UploadedFiles,
    InstalledPackages,
    SharedOutput,
}

/// Typed change notification delivered to subscribers.
#[derive(Debug, Clone, Copy)]
pub struct FieldChange {
    pub field: Field,
}

/// One replica's copy of a room's shared state.
pub struct RoomDocument {
    clock: LamportClock,
    files: LwwMap<String>,
    uploads: Sequence<UploadedFile>,
    packages: Sequence<PackageRecord>,
    output: LwwRegister<SharedOutput>,
    applied: HashSet<Stamp>,
    log: Vec<RoomOp>,
    version: VersionVector,
    events: broadcast::Sender<FieldChange>,
}

impl RoomDocument {
    pub fn new(replica: ReplicaId) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            clock: LamportClock::new(replica),
            files: LwwMap::new(),
            uploads: Sequence::new(),
            packages: Sequence::new(),
            output: LwwRegister::new(),
            applied: HashSet::new(),
            log: Vec::new(),
            version: VersionVector::new(),
            events,
        }
    }

    /// A document with a randomly drawn replica id.
    pub fn generate() -> Self {
        Self::new(rand::random::<u64>())
    }

    pub fn replica(&self) -> ReplicaId {
        self.clock.replica()
    }

    /// Register for change notifications on this document. The subscription
    /// ends when the returned receiver is dropped, so teardown paths release
    /// it without any explicit unregister call.
    pub fn subscribe(&self) -> broadcast::Receiver<FieldChange> {
        self.events.subscribe()
    }

    /// Apply an operation, local or remote. Returns false if it was already
    /// applied (idempotent no-op).
    pub fn apply(&mut self, op: RoomOp) -> bool {
        let stamp = op.stamp();
        if self.applied.contains(&stamp) {
            return false;
        }
        self.clock.observe(stamp);
        self.applied.insert(stamp);
        self.version.record(stamp);

        match &op {
            RoomOp::SetFile { name, content, stamp } => {
                self.files.merge(name.clone(), *stamp, Some(content.clone()));
            }
            RoomOp::RemoveFile { name, stamp } => {
                self.files.merge(name.clone(), *stamp, None);
            }
            RoomOp::AddUpload { record, stamp } => {
                self.uploads.insert(*stamp, record.clone());
            }
            RoomOp::RemoveUpload { target, .. } => {
                self.uploads.remove(*target);
            }
            RoomOp::AddPackage { record, stamp } => {
                self.packages.insert(*stamp, record.clone());
            }
            RoomOp::ShareOutput { payload, stamp } => {
                self.output.merge(*stamp, payload.clone());
            }
        }

        let field = op.field();
        self.log.push(op);
        let _ = self.events.send(FieldChange { field });
        true
    }

    /// Operations this replica holds that `vv` does not cover, for the join
    /// protocol's delta sync.
    pub fn ops_since(&self, vv: &VersionVector) -> Vec<RoomOp> {
        self.log
            .iter()
            .filter(|op| !vv.covers(op.stamp()))
            .cloned()
            .collect()
    }

    pub fn version(&self) -> &VersionVector {
        &self.version
    }

    // --- local mutations -------------------------------------------------
    //
    // These validate, stamp, and apply in one step, returning the operation
    // to broadcast. Validation happens only here: remote operations always
    // merge, since rejecting them would break convergence.

    /// Create or overwrite a code file.
    pub fn set_file(&mut self, name: &str, content: String) -> Result<RoomOp> {
        if !valid_file_name(name) {
            return Err(GatewayError::Validation(format!(
                "invalid file name: {name}"
            )));
        }
        if !self.files.contains_key(name) && self.files.len() >= MAX_FILES {
            return Err(GatewayError::Validation(format!(
                "room already holds the maximum of {MAX_FILES} files"
            )));
        }
        let stamp = self.clock.tick();
        let op = RoomOp::SetFile {
            name: name.to_string(),
            content,
            stamp,
        };
        self.apply(op.clone());
        Ok(op)
    }

    /// Remove a code file. Returns None if it does not exist.
    pub fn remove_file(&mut self, name: &str) -> Option<RoomOp> {
        if !self.files.contains_key(name) {
            return None;
        }
        let stamp = self.clock.tick();
        let op = RoomOp::RemoveFile {
            name: name.to_string(),
            stamp,
        };
        self.apply(op.clone());
        Some(op)
    }

    /// Append an uploaded-file record.
    pub fn add_upload(&mut self, record: UploadedFile) -> RoomOp {
        let stamp = self.clock.tick();
        let op = RoomOp::AddUpload { record, stamp };
        self.apply(op.clone());
        op
    }

    /// Remove the first uploaded-file record with the given name.
    pub fn remove_upload(&mut self, name: &str) -> Option<RoomOp> {
        let target = self.uploads.find(|r| r.name == name)?;
        let stamp = self.clock.tick();
        let op = RoomOp::RemoveUpload { target, stamp };
        self.apply(op.clone());
        Some(op)
    }

    /// Record installed packages, skipping names already present.
    pub fn record_packages(&mut self, records: Vec<PackageRecord>) -> Vec<RoomOp> {
        let mut ops = Vec::new();
        for record in records {
            if self.packages.find(|r| r.name == record.name).is_some() {
                continue;
            }
            let stamp = self.clock.tick();
            let op = RoomOp::AddPackage { record, stamp };
            self.apply(op.clone());
            ops.push(op);
        }
        ops
    }

    /// Replace the shared output wholesale.
    pub fn share_output(
        &mut self,
        output: String,
        plots: Vec<Plot>,
        shared_by: String,
    ) -> RoomOp {
        let stamp = self.clock.tick();
        let op = RoomOp::ShareOutput {
            payload: SharedOutput {
                output,
                plots,
                shared_by,
                shared_at: Utc::now().timestamp_millis(),
            },
            stamp,
        };
        self.apply(op.clone());
        op
    }

    // --- reads -----------------------------------------------------------

    pub fn file_content(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    pub fn file_names(&self) -> Vec<String> {
        self.files.iter().map(|(k, _)| k.to_string()).collect()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Uploaded-file records in causal order.
    pub fn uploads(&self) -> Vec<UploadedFile> {
        self.uploads.iter().map(|(_, r)| r.clone()).collect()
    }

    /// Installed packages in causal order, deduplicated by name. Dedup on
    /// read keeps convergence trivial: replicas hold the same element set in
    /// the same order, so they dedup identically.
    pub fn packages(&self) -> Vec<PackageRecord> {
        let mut seen = HashSet::new();
        self.packages
            .iter()
            .filter(|(_, r)| seen.insert(r.name.clone()))
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn shared_output(&self) -> Option<&SharedOutput> {
        self.output.get()
    }
}

/// Filenames must match `[A-Za-z0-9_-]+\.py`.
fn valid_file_name(name: &str) -> bool {
    match name.strip_suffix(".py") {
        Some(stem) if !stem.is_empty() => stem
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_pattern() {
        assert!(valid_file_name("main.py"));
        assert!(valid_file_name("my_mod-2.py"));
        assert!(!valid_file_name(".py"));
        assert!(!valid_file_name("main.txt"));
        assert!(!valid_file_name("pkg/mod.py"));
        assert!(!valid_file_name("sneaky.py.py.txt"));
    }
}
