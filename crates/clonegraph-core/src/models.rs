//! Shared record models used across the engine, the schema layer, and the
//! stores.
//!
//! A [`Record`] is a dynamic bag of named fields belonging to one model. The
//! engine never reaches into it directly; it goes through [`FieldAccess`] so
//! any host representation can be adapted. Records are shared through
//! [`RecordRef`], whose equality is the identity of the in-memory allocation:
//! two handles are the same record only if they point at the same cell.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use indexmap::IndexMap;

// ---------------------------------------------------------------------------
// Field access
// ---------------------------------------------------------------------------

/// Read/write a field by runtime name.
pub trait FieldAccess {
    fn get(&self, name: &str) -> Option<&Value>;

    /// Set `name` to `value`, returning the previous value if there was one.
    fn set(&mut self, name: &str, value: Value) -> Option<Value>;

    fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

// ---------------------------------------------------------------------------
// 1. Value
// ---------------------------------------------------------------------------

/// A single field value.
///
/// `Ref` holds a handle to another record (a many-to-one or one-to-one
/// pointer). Two `Ref` values are equal only when they point at the same
/// in-memory record.
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Ref(RecordRef),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&RecordRef> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Ref(_) => "ref",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Ref(a), Value::Ref(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<RecordRef> for Value {
    fn from(v: RecordRef) -> Self {
        Value::Ref(v)
    }
}

impl From<&RecordRef> for Value {
    fn from(v: &RecordRef) -> Self {
        Value::Ref(v.clone())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// 2. Record
// ---------------------------------------------------------------------------

/// One persisted (or about to be persisted) entity.
#[derive(Clone, Debug)]
pub struct Record {
    model: String,
    pk: Option<i64>,
    fields: IndexMap<String, Value>,
}

impl Record {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            pk: None,
            fields: IndexMap::new(),
        }
    }

    /// Builder-style field assignment.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn pk(&self) -> Option<i64> {
        self.pk
    }

    pub fn set_pk(&mut self, pk: Option<i64>) {
        self.pk = pk;
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Copy of this record with no identity.
    pub fn detached(&self) -> Record {
        Record {
            model: self.model.clone(),
            pk: None,
            fields: self.fields.clone(),
        }
    }

    /// Every reference-valued field as `(name, target)`.
    pub fn references(&self) -> Vec<(String, RecordRef)> {
        self.fields
            .iter()
            .filter_map(|(name, value)| value.as_record().map(|r| (name.clone(), r.clone())))
            .collect()
    }

    /// Follow a dotted path (`"artist.name"`) through reference fields.
    ///
    /// Returns `Null` when any segment is missing or a non-final segment is
    /// not a reference.
    pub fn lookup(&self, path: &str) -> Value {
        let mut segments = path.split('.');
        let first = match segments.next() {
            Some(s) => s,
            None => return Value::Null,
        };
        let mut current = match self.fields.get(first) {
            Some(v) => v.clone(),
            None => return Value::Null,
        };
        for segment in segments {
            current = match &current {
                Value::Ref(r) => r.get(segment).unwrap_or(Value::Null),
                _ => return Value::Null,
            };
        }
        current
    }
}

impl FieldAccess for Record {
    fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    fn set(&mut self, name: &str, value: Value) -> Option<Value> {
        self.fields.insert(name.to_string(), value)
    }

    fn has(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }
}

// ---------------------------------------------------------------------------
// 3. RecordRef
// ---------------------------------------------------------------------------

/// Shared handle to a record.
///
/// Equality and hashing are by allocation, never by primary key.
#[derive(Clone)]
pub struct RecordRef(Rc<RefCell<Record>>);

impl RecordRef {
    pub fn new(record: Record) -> Self {
        RecordRef(Rc::new(RefCell::new(record)))
    }

    pub fn borrow(&self) -> Ref<'_, Record> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Record> {
        self.0.borrow_mut()
    }

    pub fn ptr_eq(&self, other: &RecordRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Address of the shared cell. Stable for as long as any handle lives.
    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub fn model(&self) -> String {
        self.0.borrow().model.clone()
    }

    pub fn pk(&self) -> Option<i64> {
        self.0.borrow().pk
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.borrow().fields.get(name).cloned()
    }

    pub fn set(&self, name: &str, value: impl Into<Value>) -> Option<Value> {
        self.0.borrow_mut().set(name, value.into())
    }

    pub fn has(&self, name: &str) -> bool {
        self.0.borrow().has(name)
    }

    /// Follow a reference field and return its target, if any.
    pub fn target(&self, name: &str) -> Option<RecordRef> {
        self.get(name).and_then(|v| v.as_record().cloned())
    }

    pub fn snapshot(&self) -> Record {
        self.0.borrow().clone()
    }
}

impl PartialEq for RecordRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for RecordRef {}

impl Hash for RecordRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Debug for RecordRef {
    // Records may reference each other in cycles, so only the head is shown.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(rec) => match rec.pk {
                Some(pk) => write!(f, "RecordRef({}#{})", rec.model, pk),
                None => write!(f, "RecordRef({}#new@{:x})", rec.model, self.identity()),
            },
            Err(_) => write!(f, "RecordRef(<borrowed>@{:x})", self.identity()),
        }
    }
}
