//! In-memory reference engine
//!
//! [`MemoryStore`] is the storage collaborator of the capture pipeline: a
//! schema-less row store with unit-of-work scheduling and the two-phase
//! commit the orchestrator observes. Real deployments adapt their own engine
//! to [`FlushContext`] and drive a [`FlushObserver`]; the in-memory engine is
//! the executable version of that contract, used by the tests and by small
//! hosts.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tracing::{debug, trace};

use crate::capture::{FlushContext, FlushObserver};
use crate::entity::{
    AssociationMeta, EntityId, EntityKind, EntityRef, FieldChanges, FieldMap, Trackable,
};
use crate::entry::LogEntry;
use crate::error::{DaybookError, DaybookResult};
use crate::sink::LogSink;

/// Summary of one commit
#[derive(Debug, Clone, Default)]
pub struct CommitReceipt {
    /// References of created entities, in insertion order
    pub created: Vec<EntityRef>,
    /// Number of rows updated in place
    pub updated: usize,
    /// Number of rows deleted
    pub deleted: usize,
    /// Log entries durably written across both sink cycles
    pub entries_logged: usize,
}

/// A scheduled mutation, waiting for the next commit
#[derive(Debug)]
enum PendingOp {
    Insert { kind: EntityKind, fields: FieldMap },
    Update { target: EntityRef, fields: FieldMap },
    Delete { target: EntityRef },
}

/// The write plan derived from the pending operations at commit time
#[derive(Debug, Default)]
struct WritePlan {
    inserts: Vec<(EntityKind, FieldMap)>,
    updates: Vec<(EntityRef, FieldMap)>,
    deletes: Vec<EntityRef>,
    change_sets: HashMap<EntityRef, FieldChanges>,
    snapshots: HashMap<EntityRef, FieldMap>,
}

/// Schema-less entity store with an owned log sink
///
/// Rows are field maps keyed by kind and sequential identifier. Mutations
/// are scheduled into a unit of work and applied by [`commit`], which drives
/// the observer hooks in contract order.
///
/// [`commit`]: MemoryStore::commit
pub struct MemoryStore<S: LogSink> {
    sink: S,
    rows: HashMap<EntityKind, BTreeMap<EntityId, FieldMap>>,
    associations: HashMap<EntityKind, Vec<AssociationMeta>>,
    pending: Vec<PendingOp>,
    next_id: u64,
}

impl<S: LogSink> MemoryStore<S> {
    /// Create an empty store writing log entries to `sink`
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            rows: HashMap::new(),
            associations: HashMap::new(),
            pending: Vec::new(),
            next_id: 1,
        }
    }

    /// The owned sink
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Register owning-side association metadata for `kind`
    ///
    /// `field` on a `kind` entity holds the identifier of a `target_kind`
    /// parent whose `inverse` collection contains the entity.
    pub fn map_association(
        &mut self,
        kind: EntityKind,
        field: impl Into<String>,
        target_kind: EntityKind,
        inverse: impl Into<String>,
    ) {
        self.associations
            .entry(kind)
            .or_default()
            .push(AssociationMeta::new(field, target_kind, inverse));
    }

    /// Look up the committed field values of an entity
    pub fn get(&self, entity: &EntityRef) -> Option<&FieldMap> {
        self.rows
            .get(&entity.kind)
            .and_then(|rows| rows.get(&entity.id))
    }

    /// Check whether an entity is committed
    pub fn contains(&self, entity: &EntityRef) -> bool {
        self.get(entity).is_some()
    }

    /// Number of committed rows of `kind`
    pub fn count(&self, kind: &EntityKind) -> usize {
        self.rows.get(kind).map_or(0, BTreeMap::len)
    }

    /// Number of scheduled, uncommitted operations
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Schedule a new entity for insertion; its identifier is assigned at
    /// commit time
    pub fn insert(&mut self, entity: &dyn Trackable) {
        self.pending.push(PendingOp::Insert {
            kind: entity.kind(),
            fields: entity.fields(),
        });
    }

    /// Schedule an in-place update of a committed row
    ///
    /// Fails when the row does not exist or is already scheduled for
    /// deletion. Repeated updates of the same entity replace each other.
    pub fn update(&mut self, id: EntityId, entity: &dyn Trackable) -> DaybookResult<()> {
        let target = EntityRef::new(entity.kind(), id);
        if !self.contains(&target) {
            return Err(DaybookError::unknown_entity(target));
        }
        if self
            .pending
            .iter()
            .any(|op| matches!(op, PendingOp::Delete { target: t } if *t == target))
        {
            return Err(DaybookError::Storage(format!(
                "{} is scheduled for deletion",
                target
            )));
        }

        let fields = entity.fields();
        for op in &mut self.pending {
            if let PendingOp::Update { target: t, fields: staged } = op {
                if *t == target {
                    *staged = fields;
                    return Ok(());
                }
            }
        }
        self.pending.push(PendingOp::Update { target, fields });
        Ok(())
    }

    /// Schedule the deletion of a committed row
    ///
    /// Supersedes a pending update of the same entity; duplicate deletes
    /// coalesce.
    pub fn delete(&mut self, target: EntityRef) -> DaybookResult<()> {
        if !self.contains(&target) {
            return Err(DaybookError::unknown_entity(target));
        }

        self.pending
            .retain(|op| !matches!(op, PendingOp::Update { target: t, .. } if *t == target));

        let already_scheduled = self
            .pending
            .iter()
            .any(|op| matches!(op, PendingOp::Delete { target: t } if *t == target));
        if !already_scheduled {
            self.pending.push(PendingOp::Delete { target });
        }
        Ok(())
    }

    /// Apply the unit of work, driving `observer` through the flush contract
    ///
    /// Hook order: `on_pre_commit` with the pending views exposed, then row
    /// writes and the main sink cycle, then `on_entity_created` per assigned
    /// identifier, then `on_post_commit`. `on_flush_end` runs on every exit,
    /// error and unwind included. Any exit short of completion abandons the
    /// unit of work and discards staged log entries.
    pub fn commit(&mut self, observer: &mut dyn FlushObserver) -> DaybookResult<CommitReceipt> {
        let pending = std::mem::take(&mut self.pending);
        debug!("committing unit of work with {} operations", pending.len());
        self.run_flush(pending, observer)
    }

    fn run_flush(
        &mut self,
        pending: Vec<PendingOp>,
        observer: &mut dyn FlushObserver,
    ) -> DaybookResult<CommitReceipt> {
        let mut guard = FlushGuard { observer };
        let plan = self.build_plan(pending)?;
        let mut staged = StageGuard {
            sink: &mut self.sink,
            completed: false,
        };
        let mut receipt = CommitReceipt::default();

        // Pre-commit scan with the pending views exposed
        {
            let mut ctx = StoreFlush {
                rows: &self.rows,
                associations: &self.associations,
                sink: &mut *staged.sink,
                plan: Some(&plan),
                written: &mut receipt.entries_logged,
            };
            guard.observer.on_pre_commit(&mut ctx)?;
        }

        // Apply the main write plan
        let WritePlan {
            inserts,
            updates,
            deletes,
            ..
        } = plan;

        for target in &deletes {
            if let Some(kind_rows) = self.rows.get_mut(&target.kind) {
                kind_rows.remove(&target.id);
            }
            receipt.deleted += 1;
        }
        for (target, fields) in updates {
            if let Some(row) = self
                .rows
                .get_mut(&target.kind)
                .and_then(|rows| rows.get_mut(&target.id))
            {
                *row = fields;
                receipt.updated += 1;
            }
        }

        // Main sink cycle: entries staged during the scan become durable
        // together with the entity writes
        receipt.entries_logged += staged.sink.commit()?;

        // Creations, one hook per assigned identifier
        for (kind, fields) in inserts {
            let id = EntityId::from_raw(self.next_id);
            self.next_id += 1;
            self.rows.entry(kind.clone()).or_default().insert(id, fields);

            let entity = EntityRef::new(kind, id);
            trace!("assigned identifier {}", entity);
            receipt.created.push(entity.clone());

            let mut ctx = StoreFlush {
                rows: &self.rows,
                associations: &self.associations,
                sink: &mut *staged.sink,
                plan: None,
                written: &mut receipt.entries_logged,
            };
            guard.observer.on_entity_created(entity, &mut ctx)?;
        }

        // Post-commit drains whatever the creation hooks staged
        {
            let mut ctx = StoreFlush {
                rows: &self.rows,
                associations: &self.associations,
                sink: &mut *staged.sink,
                plan: None,
                written: &mut receipt.entries_logged,
            };
            guard.observer.on_post_commit(&mut ctx)?;
        }

        staged.completed = true;
        Ok(receipt)
    }

    fn build_plan(&self, pending: Vec<PendingOp>) -> DaybookResult<WritePlan> {
        let mut plan = WritePlan::default();
        for op in pending {
            match op {
                PendingOp::Insert { kind, fields } => plan.inserts.push((kind, fields)),
                PendingOp::Update { target, fields } => {
                    let row = self.get(&target).ok_or_else(|| {
                        DaybookError::Storage(format!(
                            "pending update targets missing row {}",
                            target
                        ))
                    })?;
                    let changes = diff_fields(row, &fields);
                    if changes.is_empty() {
                        trace!("skipping no-op update of {}", target);
                        continue;
                    }
                    plan.change_sets.insert(target.clone(), changes);
                    plan.updates.push((target, fields));
                }
                PendingOp::Delete { target } => {
                    let row = self.get(&target).ok_or_else(|| {
                        DaybookError::Storage(format!(
                            "pending delete targets missing row {}",
                            target
                        ))
                    })?;
                    plan.snapshots.insert(target.clone(), row.clone());
                    plan.deletes.push(target);
                }
            }
        }
        Ok(plan)
    }
}

/// Runs the end-of-flush hook on every exit path, unwinds included
struct FlushGuard<'a> {
    observer: &'a mut dyn FlushObserver,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.observer.on_flush_end();
    }
}

/// Discards staged log entries unless the flush ran to completion; an
/// abandoned unit of work leaves nothing behind to ride a later commit
struct StageGuard<'a> {
    sink: &'a mut dyn LogSink,
    completed: bool,
}

impl Drop for StageGuard<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.sink.discard_staged();
        }
    }
}

/// Engine view handed to the observer hooks
struct StoreFlush<'a> {
    rows: &'a HashMap<EntityKind, BTreeMap<EntityId, FieldMap>>,
    associations: &'a HashMap<EntityKind, Vec<AssociationMeta>>,
    sink: &'a mut dyn LogSink,
    /// Pending views are only exposed during the pre-commit scan
    plan: Option<&'a WritePlan>,
    written: &'a mut usize,
}

impl FlushContext for StoreFlush<'_> {
    fn pending_updates(&self) -> Vec<EntityRef> {
        self.plan
            .map(|plan| plan.updates.iter().map(|(target, _)| target.clone()).collect())
            .unwrap_or_default()
    }

    fn pending_deletes(&self) -> Vec<EntityRef> {
        self.plan.map(|plan| plan.deletes.clone()).unwrap_or_default()
    }

    fn field_changes(&self, entity: &EntityRef) -> Option<&FieldChanges> {
        self.plan.and_then(|plan| plan.change_sets.get(entity))
    }

    fn original_snapshot(&self, entity: &EntityRef) -> Option<&FieldMap> {
        self.plan.and_then(|plan| plan.snapshots.get(entity))
    }

    fn fields(&self, entity: &EntityRef) -> Option<&FieldMap> {
        self.rows
            .get(&entity.kind)
            .and_then(|rows| rows.get(&entity.id))
    }

    fn association_mappings(&self, kind: &EntityKind) -> &[AssociationMeta] {
        self.associations
            .get(kind)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn recompute_change_sets(&mut self) {
        // In-memory rows cannot drift mid-scan; the hook exists for engines
        // with lazy state
        trace!("change sets recomputed");
    }

    fn log(&mut self, entry: LogEntry) -> DaybookResult<()> {
        self.sink.stage(entry)
    }

    fn has_pending_writes(&self) -> bool {
        self.sink.has_staged()
    }

    fn flush(&mut self) -> DaybookResult<()> {
        *self.written += self.sink.commit()?;
        Ok(())
    }
}

/// Per-field changes between a committed row and its staged replacement
///
/// Staged fields are walked in declaration order; fields missing from the
/// staged map are recorded as changed to null.
fn diff_fields(old: &FieldMap, new: &FieldMap) -> FieldChanges {
    let mut changes = FieldChanges::new();
    for (field, new_value) in new {
        match old.get(field) {
            Some(old_value) if old_value == new_value => {}
            Some(old_value) => changes.push(field.clone(), old_value.clone(), new_value.clone()),
            None => changes.push(field.clone(), Value::Null, new_value.clone()),
        }
    }
    for (field, old_value) in old {
        if !new.contains_key(field) {
            changes.push(field.clone(), old_value.clone(), Value::Null);
        }
    }
    changes
}
