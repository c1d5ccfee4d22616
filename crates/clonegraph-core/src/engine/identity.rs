//! Original -> clone table for one clone operation.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::models::RecordRef;

#[derive(Clone, Debug)]
struct Entry {
    original: RecordRef,
    clone: RecordRef,
}

/// Maps each original record (by allocation identity) to its clone.
///
/// The map holds a handle to every original it has seen, so an address
/// cannot be freed and reused by another record while the map is alive.
#[derive(Clone, Debug, Default)]
pub struct IdentityMap {
    entries: IndexMap<usize, Entry>,
    /// Identities of every registered clone.
    clones: HashSet<usize>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, original: &RecordRef) -> Option<RecordRef> {
        self.entries
            .get(&original.identity())
            .map(|e| e.clone.clone())
    }

    pub fn contains(&self, original: &RecordRef) -> bool {
        self.entries.contains_key(&original.identity())
    }

    /// Register `clone` for `original`, returning a previously registered
    /// clone if there was one.
    pub fn put(&mut self, original: &RecordRef, clone: &RecordRef) -> Option<RecordRef> {
        self.clones.insert(clone.identity());
        let previous = self
            .entries
            .insert(
                original.identity(),
                Entry {
                    original: original.clone(),
                    clone: clone.clone(),
                },
            )
            .map(|e| e.clone)?;
        if !self.entries.values().any(|e| e.clone.ptr_eq(&previous)) {
            self.clones.remove(&previous.identity());
        }
        Some(previous)
    }

    /// Drop every pair whose clone was never persisted. Returns how many
    /// were dropped.
    pub fn forget_unsaved(&mut self) -> usize {
        let before = self.entries.len();
        let clones = &mut self.clones;
        self.entries.retain(|_, e| {
            let saved = e.clone.pk().is_some();
            if !saved {
                clones.remove(&e.clone.identity());
            }
            saved
        });
        before - self.entries.len()
    }

    /// True when `record` is one of the clones in this map.
    pub fn is_clone(&self, record: &RecordRef) -> bool {
        self.clones.contains(&record.identity())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(original, clone)` pairs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&RecordRef, &RecordRef)> {
        self.entries.values().map(|e| (&e.original, &e.clone))
    }

    /// Clones of the given model, in registration order.
    pub fn clones_of<'a>(&'a self, model: &'a str) -> impl Iterator<Item = &'a RecordRef> + 'a {
        self.entries
            .values()
            .filter(move |e| e.clone.borrow().model() == model)
            .map(|e| &e.clone)
    }
}
