//! Validation and persistence of clones, now or on [`CommitBoundary::flush`].

use std::collections::HashSet;

use tracing::debug;

use crate::errors::CloneResult;
use crate::models::RecordRef;
use crate::reflect::{Reflect, RelationDescriptor};
use crate::store::Store;
use crate::validate::Validator;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitMode {
    /// Validate and save each record as it is produced.
    Immediate,
    /// Validate now, queue the write until `flush`.
    Deferred,
}

impl CommitMode {
    pub fn from_flag(commit: bool) -> Self {
        if commit {
            CommitMode::Immediate
        } else {
            CommitMode::Deferred
        }
    }
}

#[derive(Debug)]
enum PendingOp {
    Save(RecordRef),
    Associate {
        record: RecordRef,
        relation: RelationDescriptor,
        targets: Vec<RecordRef>,
    },
}

/// Write path shared by every record of one clone operation.
#[derive(Debug)]
pub struct CommitBoundary {
    mode: CommitMode,
    pending: Vec<PendingOp>,
}

impl CommitBoundary {
    pub fn new(mode: CommitMode) -> Self {
        Self {
            mode,
            pending: Vec::new(),
        }
    }

    pub fn mode(&self) -> CommitMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: CommitMode) {
        self.mode = mode;
    }

    /// Number of queued writes.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Records whose save is queued, in queue order.
    pub fn queued_saves(&self) -> Vec<RecordRef> {
        self.pending
            .iter()
            .filter_map(|op| match op {
                PendingOp::Save(r) => Some(r.clone()),
                PendingOp::Associate { .. } => None,
            })
            .collect()
    }

    /// Drop queued writes without applying them.
    pub fn discard(&mut self) -> usize {
        let n = self.pending.len();
        self.pending.clear();
        n
    }

    /// Drop writes queued after the first `len`.
    pub fn truncate(&mut self, len: usize) {
        self.pending.truncate(len);
    }

    /// Validate `record`, then save it or queue the save.
    pub fn save(
        &mut self,
        record: &RecordRef,
        store: &mut dyn Store,
        schema: &dyn Reflect,
        validator: &dyn Validator,
    ) -> CloneResult<()> {
        validator.validate(&record.borrow(), schema)?;
        match self.mode {
            CommitMode::Immediate => store.save(record),
            CommitMode::Deferred => {
                self.pending.push(PendingOp::Save(record.clone()));
                Ok(())
            }
        }
    }

    pub fn associate(
        &mut self,
        record: &RecordRef,
        relation: &RelationDescriptor,
        targets: Vec<RecordRef>,
        store: &mut dyn Store,
    ) -> CloneResult<()> {
        match self.mode {
            CommitMode::Immediate => store.associate(record, relation, &targets),
            CommitMode::Deferred => {
                self.pending.push(PendingOp::Associate {
                    record: record.clone(),
                    relation: relation.clone(),
                    targets,
                });
                Ok(())
            }
        }
    }

    /// Replay queued writes in order. Returns how many were applied.
    ///
    /// A queued record that references another queued, still unsaved record
    /// is saved after it, so stores that need a key for every reference see
    /// one.
    pub fn flush(&mut self, store: &mut dyn Store) -> CloneResult<usize> {
        let queued: HashSet<RecordRef> = self.queued_saves().into_iter().collect();
        let ops = std::mem::take(&mut self.pending);

        let mut applied = 0;
        for op in &ops {
            match op {
                PendingOp::Save(record) => {
                    let mut visiting = HashSet::new();
                    save_after_dependencies(record, &queued, &mut visiting, store)?;
                }
                PendingOp::Associate {
                    record,
                    relation,
                    targets,
                } => store.associate(record, relation, targets)?,
            }
            applied += 1;
        }
        debug!(applied, "flushed deferred writes");
        Ok(applied)
    }
}

fn save_after_dependencies(
    record: &RecordRef,
    queued: &HashSet<RecordRef>,
    visiting: &mut HashSet<RecordRef>,
    store: &mut dyn Store,
) -> CloneResult<()> {
    if !visiting.insert(record.clone()) {
        return Ok(());
    }
    let references = record.borrow().references();
    for (_, target) in references {
        if target.pk().is_none() && queued.contains(&target) {
            save_after_dependencies(&target, queued, visiting, store)?;
        }
    }
    store.save(record)
}
