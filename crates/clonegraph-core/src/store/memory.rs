//! In-process store.
//!
//! Each saved record is kept twice: the live handle the caller mutates and a
//! snapshot taken at save time. Queries (`exists`, reverse lookups, counts)
//! only ever look at snapshots, so unsaved edits to a handle are invisible
//! to the store just as they would be to a database.
//!
//! A rollback puts the stored snapshots back and also resets every handle
//! saved inside the transaction, so handles and store agree afterwards.

use indexmap::IndexMap;
use tracing::debug;

use crate::errors::{CloneError, CloneResult};
use crate::models::{FieldAccess, Record, RecordRef, Value};
use crate::reflect::{RelationDescriptor, RelationKind};
use crate::store::{link_key, Store};

#[derive(Clone)]
struct StoredRow {
    handle: RecordRef,
    data: Record,
}

#[derive(Clone)]
struct LinkRow {
    key: String,
    left: RecordRef,
    right: RecordRef,
}

#[derive(Clone)]
struct Checkpoint {
    rows: IndexMap<String, Vec<StoredRow>>,
    links: Vec<LinkRow>,
    next_pk: i64,
    /// Pre-existing handles re-saved since the checkpoint.
    updated: Vec<RecordRef>,
}

/// Snapshot-based in-memory [`Store`].
pub struct MemoryStore {
    rows: IndexMap<String, Vec<StoredRow>>,
    links: Vec<LinkRow>,
    next_pk: i64,
    checkpoints: Vec<Checkpoint>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            rows: IndexMap::new(),
            links: Vec::new(),
            next_pk: 1,
            checkpoints: Vec::new(),
        }
    }

    /// Persist a new record and return its handle.
    pub fn insert(&mut self, record: Record) -> CloneResult<RecordRef> {
        let handle = RecordRef::new(record.detached());
        self.save(&handle)?;
        Ok(handle)
    }

    /// Every persisted handle of `model`, in creation order.
    pub fn all(&self, model: &str) -> Vec<RecordRef> {
        self.rows
            .get(model)
            .map(|rows| rows.iter().map(|r| r.handle.clone()).collect())
            .unwrap_or_default()
    }

    pub fn find(&self, model: &str, pk: i64) -> Option<RecordRef> {
        self.rows
            .get(model)?
            .iter()
            .find(|r| r.data.pk() == Some(pk))
            .map(|r| r.handle.clone())
    }

    /// The record as last saved, ignoring unsaved edits to its handle.
    pub fn persisted(&self, record: &RecordRef) -> Option<Record> {
        let model = record.model();
        self.rows
            .get(&model)?
            .iter()
            .find(|r| r.handle.ptr_eq(record))
            .map(|r| r.data.clone())
    }

    /// Total number of many-to-many links.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    fn rows_pointing_at<'a>(
        &'a self,
        model: &str,
        field: &'a str,
        record: &'a RecordRef,
    ) -> impl Iterator<Item = RecordRef> + 'a {
        self.rows
            .get(model)
            .into_iter()
            .flatten()
            .filter(move |row| {
                matches!(row.data.get(field), Some(Value::Ref(r)) if r.ptr_eq(record))
            })
            .map(|row| row.handle.clone())
    }
}

impl Store for MemoryStore {
    fn exists(&self, model: &str, field: &str, value: &Value) -> CloneResult<bool> {
        Ok(self
            .rows
            .get(model)
            .map(|rows| rows.iter().any(|r| r.data.get(field) == Some(value)))
            .unwrap_or(false))
    }

    fn save(&mut self, record: &RecordRef) -> CloneResult<()> {
        let model = record.model();
        match record.pk() {
            None => {
                let pk = self.next_pk;
                self.next_pk += 1;
                record.borrow_mut().set_pk(Some(pk));
                let data = record.snapshot();
                self.rows.entry(model).or_default().push(StoredRow {
                    handle: record.clone(),
                    data,
                });
                debug!(pk, "memory store inserted record");
            }
            Some(pk) => {
                let row = self
                    .rows
                    .get_mut(&model)
                    .and_then(|rows| rows.iter_mut().find(|r| r.handle.ptr_eq(record)))
                    .ok_or_else(|| {
                        CloneError::persistence(format!("{model}#{pk} is not stored here"))
                    })?;
                row.data = record.snapshot();
                if let Some(open) = self.checkpoints.last_mut() {
                    if !open.updated.iter().any(|h| h.ptr_eq(record)) {
                        open.updated.push(record.clone());
                    }
                }
            }
        }
        Ok(())
    }

    fn related(
        &self,
        record: &RecordRef,
        relation: &RelationDescriptor,
    ) -> CloneResult<Vec<RecordRef>> {
        let reverse = relation.reverse().unwrap_or_default();
        let found: Vec<RecordRef> = match relation.kind {
            RelationKind::ManyToOne => record.target(&relation.name).into_iter().collect(),
            RelationKind::OneToOne if record.has(&relation.name) => {
                record.target(&relation.name).into_iter().collect()
            }
            RelationKind::OneToOne => self
                .rows_pointing_at(&relation.target, reverse, record)
                .take(1)
                .collect(),
            RelationKind::OneToMany => self
                .rows_pointing_at(&relation.target, reverse, record)
                .collect(),
            RelationKind::ManyToMany => {
                let (key, is_left) = link_key(&record.model(), relation);
                self.links
                    .iter()
                    .filter(|l| l.key == key)
                    .filter_map(|l| {
                        if is_left && l.left.ptr_eq(record) {
                            Some(l.right.clone())
                        } else if !is_left && l.right.ptr_eq(record) {
                            Some(l.left.clone())
                        } else {
                            None
                        }
                    })
                    .collect()
            }
        };
        Ok(found)
    }

    fn associate(
        &mut self,
        record: &RecordRef,
        relation: &RelationDescriptor,
        targets: &[RecordRef],
    ) -> CloneResult<()> {
        if record.pk().is_none() {
            return Err(CloneError::persistence(format!(
                "cannot associate unsaved {} through '{}'",
                record.model(),
                relation.name
            )));
        }
        let (key, is_left) = link_key(&record.model(), relation);
        for target in targets {
            let (left, right) = if is_left {
                (record.clone(), target.clone())
            } else {
                (target.clone(), record.clone())
            };
            let duplicate = self
                .links
                .iter()
                .any(|l| l.key == key && l.left.ptr_eq(&left) && l.right.ptr_eq(&right));
            if !duplicate {
                self.links.push(LinkRow {
                    key: key.clone(),
                    left,
                    right,
                });
            }
        }
        Ok(())
    }

    fn count(&self, model: &str) -> CloneResult<usize> {
        Ok(self.rows.get(model).map(Vec::len).unwrap_or(0))
    }

    fn begin(&mut self) -> CloneResult<()> {
        self.checkpoints.push(Checkpoint {
            rows: self.rows.clone(),
            links: self.links.clone(),
            next_pk: self.next_pk,
            updated: Vec::new(),
        });
        Ok(())
    }

    fn commit(&mut self) -> CloneResult<()> {
        let done = self
            .checkpoints
            .pop()
            .ok_or_else(|| CloneError::persistence("commit without an open transaction"))?;
        if let Some(parent) = self.checkpoints.last_mut() {
            for handle in done.updated {
                if !parent.updated.iter().any(|h| h.ptr_eq(&handle)) {
                    parent.updated.push(handle);
                }
            }
        }
        Ok(())
    }

    fn rollback(&mut self) -> CloneResult<()> {
        let checkpoint = self
            .checkpoints
            .pop()
            .ok_or_else(|| CloneError::persistence("rollback without an open transaction"))?;
        // Handles created after the checkpoint lose the identity they were given.
        for rows in self.rows.values() {
            for row in rows {
                if row.data.pk().is_some_and(|pk| pk >= checkpoint.next_pk) {
                    row.handle.borrow_mut().set_pk(None);
                }
            }
        }
        for handle in &checkpoint.updated {
            let before = checkpoint
                .rows
                .get(&handle.model())
                .and_then(|rows| rows.iter().find(|r| r.handle.ptr_eq(handle)));
            if let Some(row) = before {
                *handle.borrow_mut() = row.data.clone();
            }
        }
        self.rows = checkpoint.rows;
        self.links = checkpoint.links;
        self.next_pk = checkpoint.next_pk;
        Ok(())
    }
}
