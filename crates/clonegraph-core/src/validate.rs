//! Record-level validation run before a clone is persisted.

use crate::errors::ValidationError;
use crate::models::{FieldAccess, Record, Value};
use crate::reflect::{FieldType, Reflect};

/// Checks a record before it is saved.
pub trait Validator {
    fn validate(&self, record: &Record, schema: &dyn Reflect) -> Result<(), ValidationError>;
}

impl<F> Validator for F
where
    F: Fn(&Record) -> Result<(), ValidationError>,
{
    fn validate(&self, record: &Record, _schema: &dyn Reflect) -> Result<(), ValidationError> {
        self(record)
    }
}

/// Validator driven by the declared field constraints.
///
/// Checks, per declared field: null on a non-nullable field, empty text on a
/// non-blank field, text longer than `max_length`, and a value whose type
/// does not match the declared type. Fields the record lacks are treated as
/// null.
#[derive(Clone, Copy, Debug, Default)]
pub struct SchemaValidator;

impl Validator for SchemaValidator {
    fn validate(&self, record: &Record, schema: &dyn Reflect) -> Result<(), ValidationError> {
        let mut err = ValidationError::new(record.model());
        for field in schema.fields_of(record.model()) {
            let value = record.get(&field.name).unwrap_or(&Value::Null);
            match (value, &field.field_type) {
                (Value::Null, _) => {
                    if !field.nullable {
                        err.push(&field.name, "this field cannot be null");
                    }
                }
                (Value::Text(s), FieldType::Text) => {
                    if s.is_empty() && !field.blank {
                        err.push(&field.name, "this field cannot be blank");
                    }
                    if let Some(max) = field.max_length {
                        let len = s.chars().count();
                        if len > max {
                            err.push(
                                &field.name,
                                format!("ensure this value has at most {max} characters (it has {len})"),
                            );
                        }
                    }
                }
                (Value::Bool(_), FieldType::Bool)
                | (Value::Int(_), FieldType::Int)
                | (Value::Float(_), FieldType::Float)
                | (Value::Int(_), FieldType::Float) => {}
                (Value::Ref(target), FieldType::Ref(model)) => {
                    let actual = target.model();
                    if &actual != model {
                        err.push(
                            &field.name,
                            format!("expected a {model} reference, got {actual}"),
                        );
                    }
                }
                (other, expected) => {
                    err.push(
                        &field.name,
                        format!("expected {:?}, got {}", expected, other.type_name()),
                    );
                }
            }
        }
        err.into_result()
    }
}

/// Runs several validators and merges their field errors.
#[derive(Default)]
pub struct ValidatorChain {
    validators: Vec<Box<dyn Validator>>,
}

impl ValidatorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, validator: impl Validator + 'static) -> Self {
        self.validators.push(Box::new(validator));
        self
    }
}

impl Validator for ValidatorChain {
    fn validate(&self, record: &Record, schema: &dyn Reflect) -> Result<(), ValidationError> {
        let mut merged = ValidationError::new(record.model());
        for validator in &self.validators {
            if let Err(e) = validator.validate(record, schema) {
                merged.errors.extend(e.errors);
            }
        }
        merged.into_result()
    }
}
