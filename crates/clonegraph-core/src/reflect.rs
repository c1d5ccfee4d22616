//! Schema reflection: what fields and relations a model has.
//!
//! The engine only consumes the [`Reflect`] trait. [`Registry`] is a plain
//! in-memory implementation that hosts without their own schema layer can
//! build by hand.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::models::Value;

// ---------------------------------------------------------------------------
// Fields
// ---------------------------------------------------------------------------

/// Storage type of a field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldType {
    Bool,
    Int,
    Float,
    Text,
    /// Pointer to a record of the named model.
    Ref(String),
}

/// Declared default of a field.
#[derive(Clone, Debug)]
pub enum FieldDefault {
    Value(Value),
    Func(fn() -> Value),
}

impl FieldDefault {
    pub fn produce(&self) -> Value {
        match self {
            FieldDefault::Value(v) => v.clone(),
            FieldDefault::Func(f) => f(),
        }
    }
}

/// One field of a model.
#[derive(Clone, Debug)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
    /// Whether an empty string is acceptable for text fields.
    pub blank: bool,
    pub unique: bool,
    pub max_length: Option<usize>,
    pub default: Option<FieldDefault>,
}

impl FieldDescriptor {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            nullable: false,
            blank: false,
            unique: false,
            max_length: None,
            default: None,
        }
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, FieldType::Text)
    }

    pub fn int(name: &str) -> Self {
        Self::new(name, FieldType::Int)
    }

    pub fn float(name: &str) -> Self {
        Self::new(name, FieldType::Float)
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, FieldType::Bool)
    }

    pub fn reference(name: &str, target: &str) -> Self {
        Self::new(name, FieldType::Ref(target.to_string()))
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn blank(mut self) -> Self {
        self.blank = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(FieldDefault::Value(value.into()));
        self
    }

    pub fn default_fn(mut self, producer: fn() -> Value) -> Self {
        self.default = Some(FieldDefault::Func(producer));
        self
    }

    /// Value an excluded field falls back to. `Null` when nothing is
    /// declared; validation decides whether that is acceptable.
    pub fn default_or_null(&self) -> Value {
        self.default
            .as_ref()
            .map(FieldDefault::produce)
            .unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// Relations
// ---------------------------------------------------------------------------

/// How a relation is navigated and who owns the pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// The source record holds the pointer (`song.album`).
    ManyToOne,
    /// A single related record, owned by either side.
    OneToOne,
    /// A collection owned by the related model through a foreign key.
    OneToMany,
    /// A shared association set.
    ManyToMany,
}

impl RelationKind {
    /// Whether cloning along this relation must repoint a field on the
    /// related clone.
    pub fn requires_reverse(self) -> bool {
        matches!(self, RelationKind::OneToOne | RelationKind::OneToMany)
    }
}

/// One navigable relation from a model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDescriptor {
    /// Accessor name on the source model (`album_set`, `passport`, `songs`).
    pub name: String,
    pub kind: RelationKind,
    /// Model of the related records.
    pub target: String,
    /// Field on the related record that points back at the source.
    #[serde(default)]
    pub reverse_name: Option<String>,
}

impl RelationDescriptor {
    pub fn new(name: &str, kind: RelationKind, target: &str, reverse_name: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            target: target.to_string(),
            reverse_name: reverse_name.map(str::to_string),
        }
    }

    pub fn many_to_one(name: &str, target: &str) -> Self {
        Self::new(name, RelationKind::ManyToOne, target, None)
    }

    pub fn one_to_one(name: &str, target: &str, reverse_name: &str) -> Self {
        Self::new(name, RelationKind::OneToOne, target, Some(reverse_name))
    }

    pub fn one_to_many(name: &str, target: &str, reverse_name: &str) -> Self {
        Self::new(name, RelationKind::OneToMany, target, Some(reverse_name))
    }

    pub fn many_to_many(name: &str, target: &str, reverse_name: &str) -> Self {
        Self::new(name, RelationKind::ManyToMany, target, Some(reverse_name))
    }

    /// The reverse field name, treating an empty string as absent.
    pub fn reverse(&self) -> Option<&str> {
        self.reverse_name.as_deref().filter(|s| !s.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Reflect
// ---------------------------------------------------------------------------

/// Schema questions the engine asks about a model.
pub trait Reflect {
    /// Whether the schema describes `model` at all.
    fn knows(&self, model: &str) -> bool;

    fn fields_of(&self, model: &str) -> &[FieldDescriptor];

    fn relations_of(&self, model: &str) -> &[RelationDescriptor];

    fn field(&self, model: &str, name: &str) -> Option<&FieldDescriptor> {
        self.fields_of(model).iter().find(|f| f.name == name)
    }

    fn default_of(&self, model: &str, field: &str) -> Option<Value> {
        self.field(model, field).map(FieldDescriptor::default_or_null)
    }

    fn unique_fields(&self, model: &str) -> Vec<&FieldDescriptor> {
        self.fields_of(model).iter().filter(|f| f.unique).collect()
    }
}

/// Fields and relations of one model.
#[derive(Clone, Debug)]
pub struct ModelSchema {
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
    pub relations: Vec<RelationDescriptor>,
}

impl ModelSchema {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn relation(mut self, relation: RelationDescriptor) -> Self {
        self.relations.push(relation);
        self
    }
}

/// In-memory schema registry.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    models: IndexMap<String, ModelSchema>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, model: ModelSchema) -> Self {
        self.models.insert(model.name.clone(), model);
        self
    }

    pub fn model(&self, name: &str) -> Option<&ModelSchema> {
        self.models.get(name)
    }

    /// Look up a declared relation, for building plans from the schema.
    pub fn relation(&self, model: &str, name: &str) -> Option<RelationDescriptor> {
        self.relations_of(model)
            .iter()
            .find(|r| r.name == name)
            .cloned()
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelSchema> {
        self.models.values()
    }
}

impl Reflect for Registry {
    fn knows(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }

    fn fields_of(&self, model: &str) -> &[FieldDescriptor] {
        self.models
            .get(model)
            .map(|m| m.fields.as_slice())
            .unwrap_or(&[])
    }

    fn relations_of(&self, model: &str) -> &[RelationDescriptor] {
        self.models
            .get(model)
            .map(|m| m.relations.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn next_serial() -> Value {
        Value::from("SN-0")
    }

    fn registry() -> Registry {
        Registry::new().register(
            ModelSchema::new("Instrument")
                .field(FieldDescriptor::text("name").max_length(100))
                .field(FieldDescriptor::text("serial_number").unique().default_fn(next_serial))
                .field(FieldDescriptor::int("strings").default_value(4))
                .relation(RelationDescriptor::many_to_one("owner", "Artist")),
        )
    }

    #[test]
    fn defaults_fall_back_to_null() {
        let reg = registry();
        assert_eq!(reg.default_of("Instrument", "name"), Some(Value::Null));
        assert_eq!(reg.default_of("Instrument", "strings"), Some(Value::Int(4)));
        assert_eq!(
            reg.default_of("Instrument", "serial_number"),
            Some(Value::from("SN-0"))
        );
        assert_eq!(reg.default_of("Instrument", "colour"), None);
    }

    #[test]
    fn unique_fields_are_enumerated() {
        let reg = registry();
        let unique: Vec<&str> = reg
            .unique_fields("Instrument")
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(unique, vec!["serial_number"]);
        assert!(reg.unique_fields("Nope").is_empty());
    }

    #[test]
    fn relation_lookup_by_name() {
        let reg = registry();
        let rel = reg.relation("Instrument", "owner").unwrap();
        assert_eq!(rel.kind, RelationKind::ManyToOne);
        assert_eq!(rel.target, "Artist");
        assert!(reg.relation("Instrument", "strings").is_none());
        assert!(reg.knows("Instrument"));
        assert!(!reg.knows("Artist"));
    }

    #[test]
    fn empty_reverse_name_counts_as_missing() {
        let rel = RelationDescriptor::new("album_set", RelationKind::OneToMany, "Album", Some(""));
        assert_eq!(rel.reverse(), None);
        assert!(rel.kind.requires_reverse());
        assert!(!RelationKind::ManyToMany.requires_reverse());
    }

    #[test]
    fn relation_descriptor_deserializes() {
        let rel: RelationDescriptor = serde_json::from_str(
            r#"{"name": "album_set", "kind": "one_to_many", "target": "Album", "reverse_name": "artist"}"#,
        )
        .unwrap();
        assert_eq!(rel, RelationDescriptor::one_to_many("album_set", "Album", "artist"));
    }
}
