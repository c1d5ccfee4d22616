//! Rewrites references that point at already-cloned originals.

use tracing::debug;

use crate::engine::identity::IdentityMap;
use crate::models::{FieldAccess, Record, RecordRef, Value};

/// Point every reference field of `record` that targets a mapped original
/// at that original's clone. Returns the number of fields rewritten.
pub fn relink(record: &mut Record, map: &IdentityMap) -> usize {
    let mut rewritten = 0;
    for (field, target) in record.references() {
        match map.get(&target) {
            Some(clone) if !clone.ptr_eq(&target) => {
                record.set(&field, Value::Ref(clone));
                rewritten += 1;
            }
            _ => {}
        }
    }
    if rewritten > 0 {
        debug!(model = record.model(), rewritten, "relinked references");
    }
    rewritten
}

/// [`relink`] for a record that is already shared behind a handle.
pub fn relink_shared(record: &RecordRef, map: &IdentityMap) -> usize {
    // Collect first: a field may point back at `record` itself.
    let references = record.borrow().references();
    let mut rewritten = 0;
    for (field, target) in references {
        if let Some(clone) = map.get(&target) {
            if !clone.ptr_eq(&target) {
                record.set(&field, clone);
                rewritten += 1;
            }
        }
    }
    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_only_mapped_references() {
        let artist = RecordRef::new(Record::new("Artist").with("name", "Les"));
        let label = RecordRef::new(Record::new("Label").with("name", "Prawn"));
        let artist_clone = RecordRef::new(artist.snapshot());

        let mut map = IdentityMap::new();
        map.put(&artist, &artist_clone);

        let mut album = Record::new("Album")
            .with("artist", &artist)
            .with("label", &label)
            .with("title", "Frizzle Fry");
        assert_eq!(relink(&mut album, &map), 1);
        assert_eq!(album.get("artist"), Some(&Value::from(&artist_clone)));
        assert_eq!(album.get("label"), Some(&Value::from(&label)));
        assert_eq!(relink(&mut album, &map), 0);
    }

    #[test]
    fn shared_records_can_point_at_themselves() {
        let node = RecordRef::new(Record::new("Node"));
        node.set("next", &node);
        let copy = RecordRef::new(Record::new("Node"));
        let mut map = IdentityMap::new();
        map.put(&node, &copy);

        copy.set("next", &node);
        assert_eq!(relink_shared(&copy, &map), 1);
        assert!(copy.target("next").unwrap().ptr_eq(&copy));
    }
}
