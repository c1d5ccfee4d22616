//! Declarative clone plans.
//!
//! A [`ClonePlan`] says how one record is copied (`attrs`, `exclude`) and
//! which relations are followed from it (`relations`), each with its own
//! nested plan. Plans are plain values; build one per call.

use std::fmt;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};

use crate::errors::{CloneError, CloneResult};
use crate::models::{RecordRef, Value};
use crate::reflect::{RelationDescriptor, RelationKind};

/// Value assigned to a field of the copy.
#[derive(Clone)]
pub enum OverrideValue {
    Literal(Value),
    /// Invoked once per cloned record.
    Computed(Rc<dyn Fn() -> Value>),
    /// Read a dotted path off the clone once its other fields, reverse link
    /// and relinked references are in place.
    Lookup(String),
    /// Take the source's reference in the named field and substitute the
    /// clone produced for it earlier in the same operation.
    Cloned(String),
}

impl OverrideValue {
    pub fn computed(producer: impl Fn() -> Value + 'static) -> Self {
        OverrideValue::Computed(Rc::new(producer))
    }

    pub fn lookup(path: &str) -> Self {
        OverrideValue::Lookup(path.to_string())
    }

    pub fn cloned(field: &str) -> Self {
        OverrideValue::Cloned(field.to_string())
    }
}

impl fmt::Debug for OverrideValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverrideValue::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
            OverrideValue::Computed(_) => f.write_str("Computed(..)"),
            OverrideValue::Lookup(p) => f.debug_tuple("Lookup").field(p).finish(),
            OverrideValue::Cloned(n) => f.debug_tuple("Cloned").field(n).finish(),
        }
    }
}

macro_rules! literal_from {
    ($($t:ty),* $(,)?) => {
        $(
            impl From<$t> for OverrideValue {
                fn from(v: $t) -> Self {
                    OverrideValue::Literal(v.into())
                }
            }
        )*
    };
}

literal_from!(Value, bool, i32, i64, f64, &str, String, RecordRef, &RecordRef);

/// Copy semantics for one record plus the relations to follow from it.
#[derive(Clone, Debug, Default)]
pub struct ClonePlan {
    pub attrs: IndexMap<String, OverrideValue>,
    pub exclude: IndexSet<String>,
    pub relations: Vec<RelationPlan>,
}

impl ClonePlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attr(mut self, field: &str, value: impl Into<OverrideValue>) -> Self {
        self.attrs.insert(field.to_string(), value.into());
        self
    }

    pub fn exclude(mut self, field: &str) -> Self {
        self.exclude.insert(field.to_string());
        self
    }

    pub fn relation(mut self, relation: RelationPlan) -> Self {
        self.relations.push(relation);
        self
    }

    /// Fields named both in `attrs` and in `exclude`.
    pub fn overlap(&self) -> Vec<&str> {
        self.attrs
            .keys()
            .filter(|k| self.exclude.contains(k.as_str()))
            .map(String::as_str)
            .collect()
    }

    /// Reject self-contradictory plans, recursively.
    pub fn check(&self) -> CloneResult<()> {
        let overlap = self.overlap();
        if !overlap.is_empty() {
            return Err(CloneError::configuration(format!(
                "fields both overridden and excluded: {}",
                overlap.join(", ")
            )));
        }
        for rel in &self.relations {
            rel.check()?;
        }
        Ok(())
    }
}

/// A relation to follow, with the plan for the related records.
#[derive(Clone, Debug)]
pub struct RelationPlan {
    pub descriptor: RelationDescriptor,
    pub plan: ClonePlan,
}

impl RelationPlan {
    pub fn new(descriptor: RelationDescriptor) -> Self {
        Self {
            descriptor,
            plan: ClonePlan::default(),
        }
    }

    pub fn many_to_one(name: &str, target: &str) -> Self {
        Self::new(RelationDescriptor::many_to_one(name, target))
    }

    pub fn one_to_one(name: &str, target: &str, reverse_name: &str) -> Self {
        Self::new(RelationDescriptor::one_to_one(name, target, reverse_name))
    }

    pub fn one_to_many(name: &str, target: &str, reverse_name: &str) -> Self {
        Self::new(RelationDescriptor::one_to_many(name, target, reverse_name))
    }

    pub fn many_to_many(name: &str, target: &str, reverse_name: &str) -> Self {
        Self::new(RelationDescriptor::many_to_many(name, target, reverse_name))
    }

    pub fn with_plan(mut self, plan: ClonePlan) -> Self {
        self.plan = plan;
        self
    }

    pub fn attr(mut self, field: &str, value: impl Into<OverrideValue>) -> Self {
        self.plan = self.plan.attr(field, value);
        self
    }

    pub fn exclude(mut self, field: &str) -> Self {
        self.plan = self.plan.exclude(field);
        self
    }

    pub fn relation(mut self, relation: RelationPlan) -> Self {
        self.plan = self.plan.relation(relation);
        self
    }

    pub fn kind(&self) -> RelationKind {
        self.descriptor.kind
    }

    pub fn check(&self) -> CloneResult<()> {
        if self.descriptor.kind.requires_reverse() && self.descriptor.reverse().is_none() {
            return Err(CloneError::configuration(format!(
                "relation '{}' ({:?}) must name its reverse field",
                self.descriptor.name, self.descriptor.kind
            )));
        }
        self.plan.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlapping_attrs_and_exclude_are_rejected() {
        let plan = ClonePlan::new().attr("name", "x").exclude("name").exclude("age");
        assert_eq!(plan.overlap(), vec!["name"]);
        let err = plan.check().unwrap_err();
        assert!(matches!(err, CloneError::Configuration(ref m) if m.contains("name")));
    }

    #[test]
    fn nested_plans_are_checked() {
        let plan = ClonePlan::new().relation(
            RelationPlan::one_to_many("album_set", "Album", "artist")
                .attr("title", "t")
                .exclude("title"),
        );
        assert!(matches!(plan.check(), Err(CloneError::Configuration(_))));
    }

    #[test]
    fn directed_relations_need_reverse_names() {
        let missing = RelationPlan::new(RelationDescriptor::new(
            "album_set",
            RelationKind::OneToMany,
            "Album",
            None,
        ));
        assert!(matches!(missing.check(), Err(CloneError::Configuration(_))));

        let one = RelationPlan::new(RelationDescriptor::new(
            "passport",
            RelationKind::OneToOne,
            "Passport",
            Some(""),
        ));
        assert!(one.check().is_err());

        assert!(RelationPlan::many_to_one("album", "Album").check().is_ok());
    }

    #[test]
    fn computed_values_are_called_on_demand() {
        let plan = ClonePlan::new().attr("n", OverrideValue::computed(|| Value::Int(3)));
        match plan.attrs.get("n") {
            Some(OverrideValue::Computed(f)) => assert_eq!(f(), Value::Int(3)),
            other => panic!("unexpected {other:?}"),
        }
    }
}
