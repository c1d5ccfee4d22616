//! Makes declared-unique fields of a clone collision free.

use tracing::{debug, info};

use crate::config::UniqueStrategy;
use crate::errors::{CloneError, CloneResult};
use crate::models::{FieldAccess, Record, RecordRef, Value};
use crate::reflect::Reflect;
use crate::store::Store;

/// Rewrite every unique, non-null field of `record` that already exists in
/// the store or on one of the `queued` records waiting to be saved. Returns
/// the number of fields changed.
///
/// Candidates are always derived from the value the field had on entry, so
/// with the counter strategy `"X"` becomes `"X1"`, then `"X2"`, never
/// `"X12"`.
pub fn repair(
    record: &mut Record,
    schema: &dyn Reflect,
    store: &dyn Store,
    queued: &[RecordRef],
    strategy: &UniqueStrategy,
) -> CloneResult<usize> {
    let taken = Taken { store, queued };
    let model = record.model().to_string();
    let mut changed = 0;

    for field in schema.unique_fields(&model) {
        let value = match record.get(&field.name) {
            Some(v) if !v.is_null() => v.clone(),
            _ => continue,
        };
        if !taken.contains(&model, &field.name, &value)? {
            continue;
        }
        let base = match &value {
            Value::Text(s) => s.clone(),
            _ => {
                return Err(CloneError::UniquenessExhausted {
                    model,
                    field: field.name.clone(),
                    attempts: 0,
                })
            }
        };

        let repaired = next_free(&model, &field.name, &base, &taken, strategy)?;
        info!(model = %model, field = %field.name, from = %base, to = %repaired, "repaired unique value");
        record.set(&field.name, Value::Text(repaired));
        changed += 1;
    }

    Ok(changed)
}

/// Values in use: persisted rows plus records queued for a deferred save.
struct Taken<'a> {
    store: &'a dyn Store,
    queued: &'a [RecordRef],
}

impl Taken<'_> {
    fn contains(&self, model: &str, field: &str, value: &Value) -> CloneResult<bool> {
        if self.store.exists(model, field, value)? {
            return Ok(true);
        }
        Ok(self.queued.iter().any(|r| {
            let r = r.borrow();
            r.model() == model && r.get(field) == Some(value)
        }))
    }
}

fn next_free(
    model: &str,
    field: &str,
    base: &str,
    taken: &Taken<'_>,
    strategy: &UniqueStrategy,
) -> CloneResult<String> {
    let limit = strategy.max_attempts();
    let mut attempt = 1;
    loop {
        if limit.is_some_and(|max| attempt > max) {
            return Err(CloneError::UniquenessExhausted {
                model: model.to_string(),
                field: field.to_string(),
                attempts: attempt - 1,
            });
        }
        let candidate = strategy.candidate(base, attempt);
        if !taken.contains(model, field, &Value::Text(candidate.clone()))? {
            return Ok(candidate);
        }
        debug!(model, field, candidate = %candidate, "unique candidate taken");
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::store::MemoryStore;

    fn instrument(serial: &str) -> Record {
        Record::new("Instrument")
            .with("name", "Bass")
            .with("serial_number", serial)
    }

    #[test]
    fn free_values_are_left_alone() {
        let store = MemoryStore::new();
        let mut record = instrument("X");
        let schema = fixtures::music();
        let n = repair(&mut record, &schema, &store, &[], &UniqueStrategy::default()).unwrap();
        assert_eq!(n, 0);
        assert_eq!(record.get("serial_number"), Some(&Value::from("X")));
    }

    #[test]
    fn counter_is_derived_from_the_original_value() {
        let mut store = MemoryStore::new();
        store.insert(instrument("X")).unwrap();
        let schema = fixtures::music();

        let mut first = instrument("X");
        repair(&mut first, &schema, &store, &[], &UniqueStrategy::default()).unwrap();
        assert_eq!(first.get("serial_number"), Some(&Value::from("X1")));
        store.insert(first).unwrap();

        let mut second = instrument("X");
        repair(&mut second, &schema, &store, &[], &UniqueStrategy::default()).unwrap();
        assert_eq!(second.get("serial_number"), Some(&Value::from("X2")));
    }

    #[test]
    fn suffix_strategy_repeats_the_suffix() {
        let mut store = MemoryStore::new();
        store.insert(instrument("X")).unwrap();
        store.insert(instrument("X-copy")).unwrap();
        let mut record = instrument("X");
        let strategy = UniqueStrategy::suffix("-copy");
        repair(&mut record, &fixtures::music(), &store, &[], &strategy).unwrap();
        assert_eq!(record.get("serial_number"), Some(&Value::from("X-copy-copy")));
    }

    #[test]
    fn bounded_strategy_runs_out() {
        let mut store = MemoryStore::new();
        for serial in ["X", "X1", "X2"] {
            store.insert(instrument(serial)).unwrap();
        }
        let strategy = UniqueStrategy::Counter {
            max_attempts: Some(2),
        };
        let mut record = instrument("X");
        let err = repair(&mut record, &fixtures::music(), &store, &[], &strategy).unwrap_err();
        match err {
            CloneError::UniquenessExhausted {
                model,
                field,
                attempts,
            } => {
                assert_eq!(model, "Instrument");
                assert_eq!(field, "serial_number");
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn non_text_collisions_cannot_be_repaired() {
        let mut store = MemoryStore::new();
        store.insert(Record::new("Instrument").with("serial_number", 7)).unwrap();
        let mut record = Record::new("Instrument").with("serial_number", 7);
        let err = repair(&mut record, &fixtures::music(), &store, &[], &UniqueStrategy::default())
            .unwrap_err();
        assert!(matches!(
            err,
            CloneError::UniquenessExhausted { attempts: 0, .. }
        ));
    }

    #[test]
    fn queued_records_count_as_taken() {
        let mut store = MemoryStore::new();
        store.insert(instrument("X")).unwrap();
        let queued = vec![
            RecordRef::new(instrument("S")),
            RecordRef::new(instrument("X1")),
        ];
        let schema = fixtures::music();

        let mut fresh = instrument("S");
        repair(&mut fresh, &schema, &store, &queued, &UniqueStrategy::default()).unwrap();
        assert_eq!(fresh.get("serial_number"), Some(&Value::from("S1")));

        let mut copy = instrument("X");
        repair(&mut copy, &schema, &store, &queued, &UniqueStrategy::default()).unwrap();
        assert_eq!(copy.get("serial_number"), Some(&Value::from("X2")));
    }

    #[test]
    fn null_unique_values_are_skipped() {
        let mut store = MemoryStore::new();
        store.insert(Record::new("Instrument").with("serial_number", Value::Null)).unwrap();
        let mut record = Record::new("Instrument").with("serial_number", Value::Null);
        let schema = fixtures::music();
        let n = repair(&mut record, &schema, &store, &[], &UniqueStrategy::default()).unwrap();
        assert_eq!(n, 0);
    }
}
