//! Causal append-only sequence.

use std::collections::{BTreeMap, HashSet};

use super::Stamp;

/// An ordered collection where elements are identified by their insertion
/// stamp and ordered by it. An element inserted after observing another
/// carries a larger Lamport counter, so it sorts after it on every replica.
/// Deletion tombstones the element's stamp, never an index, so a delete and
/// a concurrent append cannot corrupt the sequence.
#[derive(Debug, Clone, Default)]
pub struct Sequence<T> {
    elements: BTreeMap<Stamp, T>,
    tombstones: HashSet<Stamp>,
}

impl<T> Sequence<T> {
    pub fn new() -> Self {
        Self {
            elements: BTreeMap::new(),
            tombstones: HashSet::new(),
        }
    }

    /// Merge an insert. Returns true if the element was not already present.
    pub fn insert(&mut self, stamp: Stamp, value: T) -> bool {
        if self.tombstones.contains(&stamp) || self.elements.contains_key(&stamp) {
            return false;
        }
        self.elements.insert(stamp, value);
        true
    }

    /// Merge a removal of the element identified by `target`. Safe to apply
    /// before the insert arrives; the tombstone then suppresses it.
    pub fn remove(&mut self, target: Stamp) -> bool {
        let newly = self.tombstones.insert(target);
        self.elements.remove(&target);
        newly
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Live elements in causal (stamp) order.
    pub fn iter(&self) -> impl Iterator<Item = (Stamp, &T)> {
        self.elements.iter().map(|(s, v)| (*s, v))
    }

    /// Stamp of the first live element matching `pred`.
    pub fn find(&self, mut pred: impl FnMut(&T) -> bool) -> Option<Stamp> {
        self.elements
            .iter()
            .find(|(_, v)| pred(v))
            .map(|(s, _)| *s)
    }
}
