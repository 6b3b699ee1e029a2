//! Last-writer-wins register and map.

use std::collections::HashMap;

use super::Stamp;

/// A whole-value register: the write with the highest stamp wins, losers are
/// discarded wholesale. Merge order does not matter.
#[derive(Debug, Clone, Default)]
pub struct LwwRegister<T> {
    slot: Option<(Stamp, T)>,
}

impl<T> LwwRegister<T> {
    pub fn new() -> Self {
        Self { slot: None }
    }

    /// Merge a write. Returns true if it became the current value.
    pub fn merge(&mut self, stamp: Stamp, value: T) -> bool {
        match &self.slot {
            Some((current, _)) if *current >= stamp => false,
            _ => {
                self.slot = Some((stamp, value));
                true
            }
        }
    }

    pub fn get(&self) -> Option<&T> {
        self.slot.as_ref().map(|(_, v)| v)
    }

    pub fn stamp(&self) -> Option<Stamp> {
        self.slot.as_ref().map(|(s, _)| *s)
    }
}

/// A keyed map where each key is an independent LWW register. Removal is a
/// tombstone write, so a remove and a concurrent set resolve by stamp like
/// any other pair of writes.
#[derive(Debug, Clone, Default)]
pub struct LwwMap<V> {
    entries: HashMap<String, (Stamp, Option<V>)>,
}

impl<V> LwwMap<V> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Merge a write for `key`. Returns true if it won.
    pub fn merge(&mut self, key: String, stamp: Stamp, value: Option<V>) -> bool {
        match self.entries.get(&key) {
            Some((current, _)) if *current >= stamp => false,
            _ => {
                self.entries.insert(key, (stamp, value));
                true
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key).and_then(|(_, v)| v.as_ref())
    }

    /// True if `key` currently holds a live (non-tombstone) value.
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.values().filter(|(_, v)| v.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        let mut live: Vec<_> = self
            .entries
            .iter()
            .filter_map(|(k, (_, v))| v.as_ref().map(|v| (k.as_str(), v)))
            .collect();
        live.sort_by_key(|(k, _)| *k);
        live.into_iter()
    }
}
