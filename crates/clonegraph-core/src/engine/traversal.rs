//! Depth-first traversal of a [`ClonePlan`] over a record graph.

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::engine::commit::{CommitBoundary, CommitMode};
use crate::engine::fields::{apply_lookups, resolve};
use crate::engine::identity::IdentityMap;
use crate::engine::relink::{relink, relink_shared};
use crate::engine::unique::repair;
use crate::errors::{CloneError, CloneResult};
use crate::models::{FieldAccess, Record, RecordRef, Value};
use crate::plan::{ClonePlan, RelationPlan};
use crate::reflect::{Reflect, RelationDescriptor, RelationKind};
use crate::store::Store;
use crate::validate::{SchemaValidator, Validator};

/// Last-chance edit of a fresh clone before uniqueness repair and
/// validation. Receives the original and the unsaved copy.
pub type PrepareHook = Box<dyn Fn(&Record, &mut Record)>;

/// Clones records and the relations a plan names.
///
/// A `Cloner` owns the identity map for everything it clones, so records
/// reached twice (diamonds, cycles, repeated calls) are cloned once.
pub struct Cloner<'a> {
    store: &'a mut dyn Store,
    schema: &'a dyn Reflect,
    validator: Box<dyn Validator + 'a>,
    config: EngineConfig,
    map: IdentityMap,
    boundary: CommitBoundary,
    hooks: IndexMap<String, PrepareHook>,
}

impl<'a> Cloner<'a> {
    pub fn new(store: &'a mut dyn Store, schema: &'a dyn Reflect) -> Self {
        let config = EngineConfig::default();
        Self {
            store,
            schema,
            validator: Box::new(SchemaValidator),
            boundary: CommitBoundary::new(CommitMode::from_flag(config.commit)),
            config,
            map: IdentityMap::new(),
            hooks: IndexMap::new(),
        }
    }

    pub fn with_validator(mut self, validator: impl Validator + 'a) -> Self {
        self.validator = Box::new(validator);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.boundary.set_mode(CommitMode::from_flag(config.commit));
        self.config = config;
        self
    }

    /// Start from existing `original -> clone` pairs. Originals in the map
    /// are never cloned again.
    pub fn with_identity_map(mut self, map: IdentityMap) -> Self {
        self.map = map;
        self
    }

    pub fn with_prepare_hook(
        mut self,
        model: &str,
        hook: impl Fn(&Record, &mut Record) + 'static,
    ) -> Self {
        self.hooks.insert(model.to_string(), Box::new(hook));
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn identity_map(&self) -> &IdentityMap {
        &self.map
    }

    pub fn into_identity_map(self) -> IdentityMap {
        self.map
    }

    /// Writes queued by deferred mode and not yet flushed.
    pub fn pending(&self) -> usize {
        self.boundary.pending()
    }

    /// Clone `root` and everything `plan` reaches, committing according to
    /// the configuration.
    pub fn clone(&mut self, root: &RecordRef, plan: &ClonePlan) -> CloneResult<RecordRef> {
        plan.check()?;
        let model = root.model();
        info!(model = %model, pk = ?root.pk(), "clone started");
        let clone = self.clone_node(root, plan, None)?;
        info!(
            model = %model,
            pk = ?clone.pk(),
            cloned = self.map.len(),
            pending = self.boundary.pending(),
            "clone finished"
        );
        Ok(clone)
    }

    /// [`clone`](Self::clone) with an explicit commit flag for this call.
    pub fn clone_with(
        &mut self,
        root: &RecordRef,
        plan: &ClonePlan,
        commit: bool,
    ) -> CloneResult<RecordRef> {
        let previous = self.boundary.mode();
        self.boundary.set_mode(CommitMode::from_flag(commit));
        let result = self.clone(root, plan);
        self.boundary.set_mode(previous);
        result
    }

    /// [`clone`](Self::clone) inside a store transaction when the
    /// configuration asks for atomicity. On failure the store is rolled
    /// back and the identity map returns to its state before the call.
    pub fn clone_atomic(&mut self, root: &RecordRef, plan: &ClonePlan) -> CloneResult<RecordRef> {
        if !self.config.atomic {
            return self.clone(root, plan);
        }
        let checkpoint = self.map.clone();
        let queued = self.boundary.pending();
        self.store.begin()?;
        match self.clone(root, plan) {
            Ok(clone) => {
                self.store.commit()?;
                Ok(clone)
            }
            Err(err) => {
                warn!(error = %err, "clone failed, rolling back");
                self.map = checkpoint;
                self.boundary.truncate(queued);
                self.store.rollback()?;
                Err(err)
            }
        }
    }

    /// Apply writes queued in deferred mode.
    pub fn flush(&mut self) -> CloneResult<usize> {
        self.boundary.flush(self.store)
    }

    /// Abandon writes queued in deferred mode. Clones that were never
    /// persisted leave the identity map, so their originals can be cloned
    /// again. Returns the number of writes dropped.
    pub fn discard(&mut self) -> usize {
        let dropped = self.boundary.discard();
        let forgotten = self.map.forget_unsaved();
        debug!(dropped, forgotten, "discarded deferred writes");
        dropped
    }

    /// Build the unsaved copy of `original`: overrides, relinking, lookups,
    /// the model's prepare hook and uniqueness repair. Relations are not
    /// followed and nothing is persisted.
    pub fn prepare(&mut self, original: &RecordRef, plan: &ClonePlan) -> CloneResult<Record> {
        self.prepare_with(original, plan, None)
    }

    /// Validate and persist (or queue) a prepared copy, then register it as
    /// the clone of `original`.
    pub fn commit(&mut self, original: &RecordRef, record: Record) -> CloneResult<RecordRef> {
        let clone = RecordRef::new(record);
        self.boundary
            .save(&clone, self.store, self.schema, self.validator.as_ref())?;
        self.map.put(original, &clone);
        Ok(clone)
    }

    /// Run every relation of `plan` from `original` onto its `clone`.
    pub fn clone_relations(
        &mut self,
        original: &RecordRef,
        clone: &RecordRef,
        plan: &ClonePlan,
    ) -> CloneResult<()> {
        for relation in &plan.relations {
            self.clone_related(original, clone, relation)?;
        }
        Ok(())
    }

    /// Run one relation plan. Returns the records now attached to `clone`
    /// through it: clones for copied relations, participants for
    /// many-to-many.
    pub fn clone_related(
        &mut self,
        original: &RecordRef,
        clone: &RecordRef,
        relation: &RelationPlan,
    ) -> CloneResult<Vec<RecordRef>> {
        relation.check()?;
        if !self.declares(original, relation)? {
            return Ok(Vec::new());
        }

        let descriptor = &relation.descriptor;
        match descriptor.kind {
            RelationKind::ManyToOne => {
                let Some(related) = original.target(&descriptor.name) else {
                    return Ok(Vec::new());
                };
                let reverse = descriptor.reverse().map(|r| (r, clone));
                let child = self.clone_node(&related, &relation.plan, reverse)?;
                self.point_at(clone, &descriptor.name, &child)?;
                Ok(vec![child])
            }
            RelationKind::OneToOne => {
                let owns_pointer = original.has(&descriptor.name);
                let related = self.related_originals(original, descriptor)?;
                let Some(related) = related.into_iter().next() else {
                    return Ok(Vec::new());
                };
                let reverse = descriptor
                    .reverse()
                    .filter(|r| !owns_pointer || self.has_field(&related, r))
                    .map(|r| (r, clone));
                let child = self.clone_node(&related, &relation.plan, reverse)?;
                if owns_pointer {
                    self.point_at(clone, &descriptor.name, &child)?;
                }
                Ok(vec![child])
            }
            RelationKind::OneToMany => {
                let reverse = descriptor.reverse().map(|r| (r, clone));
                let related = self.related_originals(original, descriptor)?;
                debug!(relation = %descriptor.name, count = related.len(), "cloning collection");
                related
                    .iter()
                    .map(|r| self.clone_node(r, &relation.plan, reverse))
                    .collect()
            }
            RelationKind::ManyToMany => {
                if !relation.plan.attrs.is_empty() || !relation.plan.relations.is_empty() {
                    debug!(relation = %descriptor.name, "many-to-many participants are shared, nested plan ignored");
                }
                let participants: Vec<RecordRef> = self
                    .related_originals(original, descriptor)?
                    .into_iter()
                    .map(|p| self.map.get(&p).unwrap_or(p))
                    .collect();
                self.boundary
                    .associate(clone, descriptor, participants.clone(), self.store)?;
                Ok(participants)
            }
        }
    }

    fn clone_node(
        &mut self,
        original: &RecordRef,
        plan: &ClonePlan,
        reverse: Option<(&str, &RecordRef)>,
    ) -> CloneResult<RecordRef> {
        if let Some(existing) = self.map.get(original) {
            debug!(model = %existing.model(), "reusing clone");
            if relink_shared(&existing, &self.map) > 0 {
                self.boundary
                    .save(&existing, self.store, self.schema, self.validator.as_ref())?;
            }
            return Ok(existing);
        }

        let record = self.prepare_with(original, plan, reverse)?;
        let clone = self.commit(original, record)?;
        self.clone_relations(original, &clone, plan)?;
        Ok(clone)
    }

    fn prepare_with(
        &mut self,
        original: &RecordRef,
        plan: &ClonePlan,
        reverse: Option<(&str, &RecordRef)>,
    ) -> CloneResult<Record> {
        let resolved = resolve(original, plan, self.schema, &self.map)?;
        let mut record = resolved.record;
        if let Some((field, parent)) = reverse {
            record.set(field, Value::Ref(parent.clone()));
        }
        relink(&mut record, &self.map);
        apply_lookups(&mut record, &resolved.deferred);

        if let Some(hook) = self.hooks.get(record.model()) {
            hook(&original.borrow(), &mut record);
        }

        let strategy = self.config.unique_strategy(record.model());
        let queued = self.boundary.queued_saves();
        repair(&mut record, self.schema, &*self.store, &queued, strategy)?;
        Ok(record)
    }

    /// Set `field` of `parent` to `child` and re-persist when it changed.
    fn point_at(&mut self, parent: &RecordRef, field: &str, child: &RecordRef) -> CloneResult<()> {
        if parent.target(field).is_some_and(|t| t.ptr_eq(child)) {
            return Ok(());
        }
        parent.set(field, child);
        self.boundary
            .save(parent, self.store, self.schema, self.validator.as_ref())
    }

    /// Records related to `original`, minus clones this operation already
    /// made. A fresh clone can still point at an original parent, so it
    /// would otherwise come back here and be cloned again.
    fn related_originals(
        &self,
        original: &RecordRef,
        descriptor: &RelationDescriptor,
    ) -> CloneResult<Vec<RecordRef>> {
        let mut related = self.store.related(original, descriptor)?;
        related.retain(|r| !self.map.is_clone(r));
        Ok(related)
    }

    fn has_field(&self, record: &RecordRef, field: &str) -> bool {
        record.has(field) || self.schema.field(&record.model(), field).is_some()
    }

    /// Whether the schema declares `relation` on the original's model.
    /// Models the schema does not describe at all are taken on trust.
    fn declares(&self, original: &RecordRef, relation: &RelationPlan) -> CloneResult<bool> {
        let model = original.model();
        if !self.schema.knows(&model) {
            return Ok(true);
        }
        let name = &relation.descriptor.name;
        if self
            .schema
            .relations_of(&model)
            .iter()
            .any(|r| &r.name == name)
        {
            return Ok(true);
        }
        if self.config.skip_unknown_relations {
            warn!(model = %model, relation = %name, "skipping relation unknown to the schema");
            Ok(false)
        } else {
            Err(CloneError::configuration(format!(
                "{model} has no relation named '{name}'"
            )))
        }
    }
}
