//! Builds the field values of a fresh clone from its source and a plan.

use tracing::debug;

use crate::engine::identity::IdentityMap;
use crate::errors::{CloneError, CloneResult};
use crate::models::{FieldAccess, Record, RecordRef, Value};
use crate::plan::{ClonePlan, OverrideValue};
use crate::reflect::Reflect;

/// Output of [`resolve`]: the unsaved copy plus the `Lookup` overrides that
/// still have to be read off it.
#[derive(Debug)]
pub struct Resolved {
    pub record: Record,
    /// `(field, dotted path)` pairs, in plan order.
    pub deferred: Vec<(String, String)>,
}

/// Shallow-copy `source` and apply the plan's overrides and exclusions.
///
/// Overrides for fields neither the record nor the schema knows are
/// skipped. The copy never carries the source's primary key.
pub fn resolve(
    source: &RecordRef,
    plan: &ClonePlan,
    schema: &dyn Reflect,
    map: &IdentityMap,
) -> CloneResult<Resolved> {
    let overlap = plan.overlap();
    if !overlap.is_empty() {
        return Err(CloneError::configuration(format!(
            "fields both overridden and excluded: {}",
            overlap.join(", ")
        )));
    }

    let mut record = source.borrow().detached();
    let model = record.model().to_string();
    let mut deferred = Vec::new();

    for (field, value) in &plan.attrs {
        if !record.has(field) && schema.field(&model, field).is_none() {
            debug!(model = %model, field = %field, "ignoring override for unknown field");
            continue;
        }
        match value {
            OverrideValue::Literal(v) => {
                record.set(field, v.clone());
            }
            OverrideValue::Computed(producer) => {
                record.set(field, producer());
            }
            OverrideValue::Cloned(name) => {
                record.set(field, cloned_reference(source, name, map));
            }
            OverrideValue::Lookup(path) => deferred.push((field.clone(), path.clone())),
        }
    }

    for field in &plan.exclude {
        let descriptor = schema.field(&model, field).ok_or_else(|| {
            CloneError::configuration(format!("cannot exclude unknown field {model}.{field}"))
        })?;
        record.set(field, descriptor.default_or_null());
    }

    Ok(Resolved { record, deferred })
}

/// The source's `name` reference swapped for its clone when it has one.
fn cloned_reference(source: &RecordRef, name: &str, map: &IdentityMap) -> Value {
    match source.get(name) {
        Some(Value::Ref(target)) => match map.get(&target) {
            Some(clone) => Value::Ref(clone),
            None => Value::Ref(target),
        },
        Some(other) => other,
        None => Value::Null,
    }
}

/// Apply deferred `Lookup` overrides. Paths that cannot be followed yield
/// `Null`.
pub fn apply_lookups(record: &mut Record, deferred: &[(String, String)]) {
    for (field, path) in deferred {
        let value = record.lookup(path);
        record.set(field, value);
    }
}
