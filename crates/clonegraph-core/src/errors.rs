//! Error types for the clonegraph core library.

use std::fmt;

/// A single failed field check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Raised when a would-be clone fails its record-level checks.
///
/// Carries every failing field of the record rather than stopping at the
/// first one, so callers can report the whole record at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub model: String,
    pub errors: Vec<FieldError>,
}

impl ValidationError {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            errors: Vec::new(),
        }
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Return `Err(self)` when at least one field failed.
    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// True when `field` is among the failing fields.
    pub fn has_field(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is invalid:", self.model)?;
        for err in &self.errors {
            write!(f, " {}: {};", err.field, err.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Top-level error enum for the clonegraph core library.
#[derive(Debug, thiserror::Error)]
pub enum CloneError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Uniqueness repair exhausted for {model}.{field} after {attempts} attempts")]
    UniquenessExhausted {
        model: String,
        field: String,
        attempts: usize,
    },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloneError {
    pub fn configuration(message: impl Into<String>) -> Self {
        CloneError::Configuration(message.into())
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        CloneError::Persistence(message.into())
    }
}

pub type CloneResult<T> = Result<T, CloneError>;
