//! Persistence seam and its reference implementations.
//!
//! The engine talks only to [`Store`]. [`memory::MemoryStore`] keeps
//! snapshots in process; [`sqlite::SqliteStore`] persists to SQLite with the
//! DDL and migrations in [`schema`].

pub mod memory;
pub mod schema;
pub mod sqlite;

use crate::errors::CloneResult;
use crate::models::{RecordRef, Value};
use crate::reflect::RelationDescriptor;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Synchronous persistence used by the clone engine.
///
/// Implementations must hand out one [`RecordRef`] per persisted row for the
/// lifetime of the store, so that object identity can stand in for row
/// identity inside one clone operation.
pub trait Store {
    /// Whether a persisted record of `model` has `field == value`.
    fn exists(&self, model: &str, field: &str, value: &Value) -> CloneResult<bool>;

    /// Insert the record (assigning its `pk`) or update it when it already
    /// has one.
    fn save(&mut self, record: &RecordRef) -> CloneResult<()>;

    /// Records reachable from `record` through `relation`, in stable
    /// (creation) order.
    fn related(
        &self,
        record: &RecordRef,
        relation: &RelationDescriptor,
    ) -> CloneResult<Vec<RecordRef>>;

    /// Add many-to-many associations between `record` and `targets`.
    fn associate(
        &mut self,
        record: &RecordRef,
        relation: &RelationDescriptor,
        targets: &[RecordRef],
    ) -> CloneResult<()>;

    /// Number of persisted records of `model`.
    fn count(&self, model: &str) -> CloneResult<usize>;

    fn begin(&mut self) -> CloneResult<()> {
        Ok(())
    }

    fn commit(&mut self) -> CloneResult<()> {
        Ok(())
    }

    fn rollback(&mut self) -> CloneResult<()> {
        Ok(())
    }
}

/// Key of a many-to-many link, identical from both sides.
///
/// `Compilation.songs` and `Song.compilation_set` describe the same
/// association, so the pair is ordered before use.
pub(crate) fn link_key(model: &str, relation: &RelationDescriptor) -> (String, bool) {
    let here = format!("{}.{}", model, relation.name);
    match relation.reverse() {
        Some(rev) => {
            let there = format!("{}.{}", relation.target, rev);
            if here <= there {
                (format!("{here}|{there}"), true)
            } else {
                (format!("{there}|{here}"), false)
            }
        }
        None => (here, true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_key_is_symmetric() {
        let forward = RelationDescriptor::many_to_many("songs", "Song", "compilation_set");
        let backward = RelationDescriptor::many_to_many("compilation_set", "Compilation", "songs");
        let (k1, left1) = link_key("Compilation", &forward);
        let (k2, left2) = link_key("Song", &backward);
        assert_eq!(k1, k2);
        assert_ne!(left1, left2);
    }
}
