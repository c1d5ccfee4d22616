//! clonegraph core library: clones a persisted record graph.
//!
//! Given a root record and a [`ClonePlan`], [`Cloner`] produces an
//! independently persisted copy of the root and of the related records the
//! plan names, rewriting references so the copy forms a self-consistent
//! subgraph. Persistence, validation and schema questions go through the
//! [`Store`], [`Validator`] and [`Reflect`] traits; in-memory and SQLite
//! stores, a schema registry and a schema validator are provided.

pub mod config;
pub mod engine;
pub mod errors;
pub mod models;
pub mod plan;
pub mod reflect;
pub mod store;
pub mod validate;

#[cfg(test)]
mod fixtures;

pub use config::{EngineConfig, UniqueStrategy};
pub use engine::{Cloner, CommitMode, IdentityMap};
pub use errors::{CloneError, CloneResult, ValidationError};
pub use models::{FieldAccess, Record, RecordRef, Value};
pub use plan::{ClonePlan, OverrideValue, RelationPlan};
pub use reflect::{
    FieldDescriptor, FieldType, ModelSchema, Reflect, Registry, RelationDescriptor, RelationKind,
};
pub use store::{MemoryStore, SqliteStore, Store};
pub use validate::{SchemaValidator, Validator, ValidatorChain};
