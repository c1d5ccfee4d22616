//! Engine configuration.
//!
//! An [`EngineConfig`] is an immutable value handed to a
//! [`Cloner`](crate::engine::Cloner); nothing here is process-wide.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::CloneResult;

/// How a colliding unique text value is altered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum UniqueStrategy {
    /// Append 1, 2, 3, ... to the original value until it is free.
    Counter {
        #[serde(default)]
        max_attempts: Option<usize>,
    },
    /// Append `suffix` again on every attempt.
    Suffix {
        suffix: String,
        #[serde(default)]
        max_attempts: Option<usize>,
    },
}

impl Default for UniqueStrategy {
    fn default() -> Self {
        UniqueStrategy::Counter { max_attempts: None }
    }
}

impl UniqueStrategy {
    pub fn suffix(suffix: &str) -> Self {
        UniqueStrategy::Suffix {
            suffix: suffix.to_string(),
            max_attempts: None,
        }
    }

    pub fn max_attempts(&self) -> Option<usize> {
        match self {
            UniqueStrategy::Counter { max_attempts } => *max_attempts,
            UniqueStrategy::Suffix { max_attempts, .. } => *max_attempts,
        }
    }

    /// Candidate value for the given 1-based attempt.
    pub fn candidate(&self, base: &str, attempt: usize) -> String {
        match self {
            UniqueStrategy::Counter { .. } => format!("{base}{attempt}"),
            UniqueStrategy::Suffix { suffix, .. } => {
                let mut out = String::with_capacity(base.len() + suffix.len() * attempt);
                out.push_str(base);
                for _ in 0..attempt {
                    out.push_str(suffix);
                }
                out
            }
        }
    }
}

fn default_true() -> bool {
    true
}

/// Options for one clone operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Persist each record as it is cloned. When false, work is queued until
    /// [`Cloner::flush`](crate::engine::Cloner::flush).
    #[serde(default = "default_true")]
    pub commit: bool,

    /// Wrap [`Cloner::clone_atomic`](crate::engine::Cloner::clone_atomic) in
    /// a store transaction.
    #[serde(default)]
    pub atomic: bool,

    /// Skip plan relations the schema does not declare instead of failing.
    #[serde(default = "default_true")]
    pub skip_unknown_relations: bool,

    #[serde(default)]
    pub default_unique: UniqueStrategy,

    /// Per-model overrides of `default_unique`.
    #[serde(default)]
    pub unique: IndexMap<String, UniqueStrategy>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            commit: true,
            atomic: false,
            skip_unknown_relations: true,
            default_unique: UniqueStrategy::default(),
            unique: IndexMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(text: &str) -> CloneResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn with_commit(mut self, commit: bool) -> Self {
        self.commit = commit;
        self
    }

    pub fn with_atomic(mut self, atomic: bool) -> Self {
        self.atomic = atomic;
        self
    }

    pub fn with_unique(mut self, model: &str, strategy: UniqueStrategy) -> Self {
        self.unique.insert(model.to_string(), strategy);
        self
    }

    pub fn unique_strategy(&self, model: &str) -> &UniqueStrategy {
        self.unique.get(model).unwrap_or(&self.default_unique)
    }
}
