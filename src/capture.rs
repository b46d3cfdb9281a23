//! Change-capture orchestration
//!
//! [`ChangeCapture`] observes the two-phase flush of a persistent-entity
//! store and turns pending mutations into log entries. Edits and deletes are
//! logged during the pre-commit scan; creation entries wait until the engine
//! has assigned identifiers and are drained in an extra sink cycle after the
//! main commit. The storage engine drives the [`FlushObserver`] hooks in
//! order and hands each one a [`FlushContext`] view of the running flush.

use tracing::{debug, trace};

use crate::config::CaptureConfig;
use crate::context::CommentContext;
use crate::diff::{ChangeSetBuilder, DiffSource};
use crate::entity::{
    AssociationMeta, EntityId, EntityKind, EntityRef, FieldChanges, FieldMap,
};
use crate::entry::{LogEntry, LogEntryKind};
use crate::error::{DaybookError, DaybookResult};
use crate::policy::{AssociationTriggers, RedactionPolicy};

/// Where the orchestrator is inside one flush cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushPhase {
    /// Pre-commit scan over pending updates and deletes
    Scanning,
    /// Write plan is fixed; creation hooks fire as identifiers are assigned
    AwaitingIdentifiers,
    /// Main commit done; deferred entries are drained
    DrainingDeferred,
    /// Resting state between flushes
    #[default]
    Done,
}

/// Engine-side view of one flush, handed to every observer hook
///
/// Implemented by the storage collaborator; [`MemoryStore`] ships the
/// reference implementation. The pending lists are only populated during the
/// pre-commit scan and read as empty afterwards.
///
/// [`MemoryStore`]: crate::store::MemoryStore
pub trait FlushContext {
    /// Entities scheduled for an in-place update
    fn pending_updates(&self) -> Vec<EntityRef>;

    /// Entities scheduled for deletion
    fn pending_deletes(&self) -> Vec<EntityRef>;

    /// Per-field changeset of an entity scheduled for update
    fn field_changes(&self, entity: &EntityRef) -> Option<&FieldChanges>;

    /// Full original values of an entity scheduled for deletion
    fn original_snapshot(&self, entity: &EntityRef) -> Option<&FieldMap>;

    /// Current field values of a stored entity
    fn fields(&self, entity: &EntityRef) -> Option<&FieldMap>;

    /// Owning-side association metadata registered for a kind
    fn association_mappings(&self, kind: &EntityKind) -> &[AssociationMeta];

    /// Recompute pending changesets after scan reads may have touched state
    fn recompute_change_sets(&mut self);

    /// Hand a finished entry to the sink; it stays staged until a sink commit
    fn log(&mut self, entry: LogEntry) -> DaybookResult<()>;

    /// Check whether staged entries await an extra sink cycle
    fn has_pending_writes(&self) -> bool;

    /// Run one extra sink cycle to drain staged entries
    fn flush(&mut self) -> DaybookResult<()>;
}

/// Hooks the storage engine drives, in order, for every flush
pub trait FlushObserver {
    /// Called before the engine's write plan is final, while pending updates
    /// and deletes are still visible
    fn on_pre_commit(&mut self, ctx: &mut dyn FlushContext) -> DaybookResult<()>;

    /// Called for each created entity once it has received its identifier
    fn on_entity_created(
        &mut self,
        entity: EntityRef,
        ctx: &mut dyn FlushContext,
    ) -> DaybookResult<()>;

    /// Called after the main write plan has been applied
    fn on_post_commit(&mut self, ctx: &mut dyn FlushContext) -> DaybookResult<()>;

    /// Called on every exit from a flush, error exits included
    fn on_flush_end(&mut self) {}
}

/// The change-capture orchestrator
///
/// Holds the capture configuration, the redaction policy, the association
/// trigger table and the per-flush comment context, and implements the
/// [`FlushObserver`] hooks against them.
pub struct ChangeCapture {
    config: CaptureConfig,
    policy: RedactionPolicy,
    triggers: AssociationTriggers,
    comments: CommentContext,
    actor: Option<String>,
    phase: FlushPhase,
}

impl ChangeCapture {
    /// Create an orchestrator from its three static tables
    pub fn new(
        config: CaptureConfig,
        policy: RedactionPolicy,
        triggers: AssociationTriggers,
    ) -> Self {
        Self {
            config,
            policy,
            triggers,
            comments: CommentContext::new(),
            actor: None,
            phase: FlushPhase::Done,
        }
    }

    /// Set the reason-for-change for the next flush
    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.comments.set(comment);
    }

    /// The per-flush comment context
    pub fn comments(&self) -> &CommentContext {
        &self.comments
    }

    /// Set the acting user recorded on every entry
    pub fn set_actor(&mut self, actor: impl Into<String>) {
        self.actor = Some(actor.into());
    }

    /// Drop the acting user
    pub fn clear_actor(&mut self) {
        self.actor = None;
    }

    /// Current flush phase
    pub fn phase(&self) -> FlushPhase {
        self.phase
    }

    /// Compute the redacted old-value mapping for `entry`'s target and
    /// attach it under the old-data payload key
    ///
    /// # Panics
    ///
    /// Panics when `entry` is not an `Edited` or `Deleted` entry; attaching
    /// old data to any other kind is a bug in the caller, not a runtime
    /// condition.
    pub fn save_change_set(&self, entry: &mut LogEntry, source: DiffSource<'_>) {
        assert!(
            matches!(entry.kind, LogEntryKind::Edited | LogEntryKind::Deleted),
            "change sets only attach to edited or deleted entries, got {:?}",
            entry.kind
        );
        let change_set = ChangeSetBuilder::new(&self.policy).build(&entry.target_kind, source);
        entry.set_old_data(change_set);
    }

    /// Log entries themselves are never captured
    fn is_loggable(&self, entity: &EntityRef) -> bool {
        !entity.kind.is_log_entry()
    }

    fn decorate(&self, entry: &mut LogEntry) {
        if let Some(comment) = self.comments.get() {
            entry.set_comment(comment);
        }
        if let Some(actor) = &self.actor {
            entry.set_actor(actor.clone());
        }
    }

    fn transition(&mut self, expected: FlushPhase, next: FlushPhase) {
        assert!(
            self.phase == expected,
            "flush hook out of order: entering {next:?} from {:?}",
            self.phase
        );
        self.phase = next;
    }

    fn scan_updates(&self, ctx: &mut dyn FlushContext) -> DaybookResult<()> {
        for entity in ctx.pending_updates() {
            if !self.is_loggable(&entity) {
                trace!("skipping log entry bookkeeping for {}", entity);
                continue;
            }

            let mut entry = LogEntry::edited(entity.clone());
            self.decorate(&mut entry);

            if self.config.save_changed_data {
                let empty = FieldChanges::new();
                let changes = ctx.field_changes(&entity).unwrap_or(&empty);
                self.save_change_set(&mut entry, DiffSource::Changed(changes));
            } else if self.config.save_changed_fields {
                if let Some(changes) = ctx.field_changes(&entity) {
                    entry.set_changed_fields(changes.field_names());
                }
            }

            ctx.log(entry)?;
        }
        Ok(())
    }

    fn scan_deletes(&self, ctx: &mut dyn FlushContext) -> DaybookResult<()> {
        for entity in ctx.pending_deletes() {
            if !self.is_loggable(&entity) {
                trace!("skipping log entry bookkeeping for {}", entity);
                continue;
            }

            let mut entry = LogEntry::deleted(entity.clone());
            self.decorate(&mut entry);

            if self.config.save_removed_data {
                let empty = FieldMap::new();
                let snapshot = ctx.original_snapshot(&entity).unwrap_or(&empty);
                self.save_change_set(&mut entry, DiffSource::Snapshot(snapshot));
            }

            ctx.log(entry)?;

            if self.config.save_changed_data && self.triggers.is_whitelisted(&entity.kind) {
                self.log_association_removals(&entity, ctx)?;
            }
        }
        Ok(())
    }

    /// Emit one collection-removal entry per whitelisted, populated
    /// association of a deleted entity
    ///
    /// A whitelisted field with no registered mapping is a configuration
    /// error and fails the scan. A field absent from the entity's values, or
    /// null, is an empty association and is skipped.
    fn log_association_removals(
        &self,
        entity: &EntityRef,
        ctx: &mut dyn FlushContext,
    ) -> DaybookResult<()> {
        for field in self.triggers.fields(&entity.kind) {
            let mapping = ctx
                .association_mappings(&entity.kind)
                .iter()
                .find(|m| m.field == *field)
                .cloned()
                .ok_or_else(|| {
                    DaybookError::unknown_association(entity.kind.clone(), field.clone())
                })?;

            let parent_id = ctx
                .fields(entity)
                .and_then(|fields| fields.get(&mapping.field))
                .and_then(|value| value.as_u64());

            let Some(parent_id) = parent_id else {
                trace!("association `{}` of {} is empty", mapping.field, entity);
                continue;
            };

            let parent = EntityRef::new(mapping.target_kind.clone(), EntityId::from_raw(parent_id));
            let mut entry =
                LogEntry::collection_element_deleted(entity.clone(), &mapping.inverse, parent);
            self.decorate(&mut entry);
            ctx.log(entry)?;
        }
        Ok(())
    }
}

impl FlushObserver for ChangeCapture {
    fn on_pre_commit(&mut self, ctx: &mut dyn FlushContext) -> DaybookResult<()> {
        self.transition(FlushPhase::Done, FlushPhase::Scanning);
        debug!(
            "scanning unit of work: {} updates, {} deletes",
            ctx.pending_updates().len(),
            ctx.pending_deletes().len()
        );

        self.scan_updates(ctx)?;
        self.scan_deletes(ctx)?;

        // Scan reads may have materialized lazy state on some engines
        ctx.recompute_change_sets();

        self.transition(FlushPhase::Scanning, FlushPhase::AwaitingIdentifiers);
        Ok(())
    }

    fn on_entity_created(
        &mut self,
        entity: EntityRef,
        ctx: &mut dyn FlushContext,
    ) -> DaybookResult<()> {
        self.transition(FlushPhase::AwaitingIdentifiers, FlushPhase::AwaitingIdentifiers);
        if !self.is_loggable(&entity) {
            trace!("skipping log entry bookkeeping for {}", entity);
            return Ok(());
        }

        let mut entry = LogEntry::created(entity.clone());
        self.decorate(&mut entry);

        if let Some(field) = self.config.initial_value_fields.get(&entity.kind) {
            let rendered = ctx
                .fields(&entity)
                .and_then(|fields| fields.get(field))
                .and_then(render_initial_value);
            if let Some(value) = rendered {
                entry.set_initial_value(value);
            }
        }

        ctx.log(entry)?;
        Ok(())
    }

    fn on_post_commit(&mut self, ctx: &mut dyn FlushContext) -> DaybookResult<()> {
        self.transition(FlushPhase::AwaitingIdentifiers, FlushPhase::DrainingDeferred);

        if ctx.has_pending_writes() {
            debug!("draining deferred log entries");
            ctx.flush()?;
        }

        self.comments.clear();
        self.transition(FlushPhase::DrainingDeferred, FlushPhase::Done);
        Ok(())
    }

    fn on_flush_end(&mut self) {
        self.comments.clear();
        self.phase = FlushPhase::Done;
    }
}

/// Render a creation-time field value for the initial-value payload key
///
/// Scalars render to their display form; structured values are not recorded.
fn render_initial_value(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Level;
    use serde_json::json;
    use std::collections::HashMap;

    /// Scripted engine view for exercising the observer hooks directly
    #[derive(Default)]
    struct MockFlush {
        updates: Vec<EntityRef>,
        deletes: Vec<EntityRef>,
        changes: HashMap<EntityRef, FieldChanges>,
        snapshots: HashMap<EntityRef, FieldMap>,
        fields: HashMap<EntityRef, FieldMap>,
        mappings: HashMap<EntityKind, Vec<AssociationMeta>>,
        logged: Vec<LogEntry>,
        staged: usize,
        recompute_calls: usize,
        flush_calls: usize,
    }

    impl MockFlush {
        fn with_update(mut self, entity: EntityRef, changes: FieldChanges) -> Self {
            self.updates.push(entity.clone());
            self.changes.insert(entity, changes);
            self
        }

        fn with_delete(mut self, entity: EntityRef, snapshot: FieldMap) -> Self {
            self.deletes.push(entity.clone());
            self.snapshots.insert(entity, snapshot);
            self
        }

        fn with_fields(mut self, entity: EntityRef, fields: FieldMap) -> Self {
            self.fields.insert(entity, fields);
            self
        }

        fn with_mapping(mut self, kind: EntityKind, mapping: AssociationMeta) -> Self {
            self.mappings.entry(kind).or_default().push(mapping);
            self
        }
    }

    impl FlushContext for MockFlush {
        fn pending_updates(&self) -> Vec<EntityRef> {
            self.updates.clone()
        }

        fn pending_deletes(&self) -> Vec<EntityRef> {
            self.deletes.clone()
        }

        fn field_changes(&self, entity: &EntityRef) -> Option<&FieldChanges> {
            self.changes.get(entity)
        }

        fn original_snapshot(&self, entity: &EntityRef) -> Option<&FieldMap> {
            self.snapshots.get(entity)
        }

        fn fields(&self, entity: &EntityRef) -> Option<&FieldMap> {
            self.fields.get(entity)
        }

        fn association_mappings(&self, kind: &EntityKind) -> &[AssociationMeta] {
            self.mappings.get(kind).map(Vec::as_slice).unwrap_or_default()
        }

        fn recompute_change_sets(&mut self) {
            self.recompute_calls += 1;
        }

        fn log(&mut self, entry: LogEntry) -> DaybookResult<()> {
            self.logged.push(entry);
            self.staged += 1;
            Ok(())
        }

        fn has_pending_writes(&self) -> bool {
            self.staged > 0
        }

        fn flush(&mut self) -> DaybookResult<()> {
            self.staged = 0;
            self.flush_calls += 1;
            Ok(())
        }
    }

    fn part(id: u64) -> EntityRef {
        EntityRef::new(EntityKind::of("part"), EntityId::from_raw(id))
    }

    fn lot(id: u64) -> EntityRef {
        EntityRef::new(EntityKind::of("part_lot"), EntityId::from_raw(id))
    }

    fn user(id: u64) -> EntityRef {
        EntityRef::new(EntityKind::of("user"), EntityId::from_raw(id))
    }

    fn policy() -> RedactionPolicy {
        RedactionPolicy::builder()
            .redact(EntityKind::of("user"), ["password"])
            .build()
            .unwrap()
    }

    fn lot_triggers() -> AssociationTriggers {
        AssociationTriggers::new().trigger(EntityKind::of("part_lot"), "part")
    }

    fn capture(config: CaptureConfig) -> ChangeCapture {
        ChangeCapture::new(config, policy(), lot_triggers())
    }

    fn name_change() -> FieldChanges {
        let mut changes = FieldChanges::new();
        changes.push("name", json!("resistor"), json!("capacitor"));
        changes
    }

    #[test]
    fn test_edit_emits_entry_with_old_data() {
        let mut cap = capture(CaptureConfig::default());
        let mut ctx = MockFlush::default().with_update(part(1), name_change());

        cap.on_pre_commit(&mut ctx).unwrap();

        assert_eq!(ctx.logged.len(), 1);
        let entry = &ctx.logged[0];
        assert_eq!(entry.kind, LogEntryKind::Edited);
        assert_eq!(entry.target(), part(1));
        let old = entry.old_data().unwrap();
        assert_eq!(old.get("name"), Some(&json!("resistor")));
        assert_eq!(old.len(), 1);
        assert!(entry.changed_fields().is_none());
    }

    #[test]
    fn test_changed_fields_mode_lists_names_unfiltered() {
        let mut config = CaptureConfig::default();
        config.save_changed_data = false;
        let mut cap = capture(config);

        let mut changes = FieldChanges::new();
        changes.push("name", json!("a"), json!("b"));
        changes.push("password", json!("old"), json!("new"));
        let mut ctx = MockFlush::default().with_update(user(4), changes);

        cap.on_pre_commit(&mut ctx).unwrap();

        let entry = &ctx.logged[0];
        assert!(entry.old_data().is_none());
        // The name list is not a value leak, so redaction does not apply
        assert_eq!(entry.changed_fields(), Some(vec!["name", "password"]));
    }

    #[test]
    fn test_edit_without_flags_logs_bare_entry() {
        let mut config = CaptureConfig::default();
        config.save_changed_data = false;
        config.save_changed_fields = false;
        let mut cap = capture(config);
        let mut ctx = MockFlush::default().with_update(part(1), name_change());

        cap.on_pre_commit(&mut ctx).unwrap();

        let entry = &ctx.logged[0];
        assert!(entry.old_data().is_none());
        assert!(entry.changed_fields().is_none());
    }

    #[test]
    fn test_fully_redacted_edit_keeps_empty_old_data() {
        let mut cap = capture(CaptureConfig::default());
        let mut changes = FieldChanges::new();
        changes.push("password", json!("old"), json!("new"));
        let mut ctx = MockFlush::default().with_update(user(2), changes);

        cap.on_pre_commit(&mut ctx).unwrap();

        let entry = &ctx.logged[0];
        assert!(entry.old_data().unwrap().is_empty());
    }

    #[test]
    fn test_delete_emits_snapshot_old_data() {
        let mut cap = capture(CaptureConfig::default());
        let mut snapshot = FieldMap::new();
        snapshot.insert("name".to_string(), json!("resistor"));
        snapshot.insert("comment".to_string(), json!(null));
        let mut ctx = MockFlush::default().with_delete(part(3), snapshot);

        cap.on_pre_commit(&mut ctx).unwrap();

        let entry = &ctx.logged[0];
        assert_eq!(entry.kind, LogEntryKind::Deleted);
        let old = entry.old_data().unwrap();
        assert_eq!(old.get("name"), Some(&json!("resistor")));
        assert!(!old.contains_key("comment"));
    }

    #[test]
    fn test_delete_without_removed_data_flag() {
        let mut config = CaptureConfig::default();
        config.save_removed_data = false;
        let mut cap = capture(config);
        let mut snapshot = FieldMap::new();
        snapshot.insert("name".to_string(), json!("resistor"));
        let mut ctx = MockFlush::default().with_delete(part(3), snapshot);

        cap.on_pre_commit(&mut ctx).unwrap();

        assert!(ctx.logged[0].old_data().is_none());
    }

    #[test]
    fn test_association_removal_entry_targets_parent() {
        let mut cap = capture(CaptureConfig::default());
        let mut lot_fields = FieldMap::new();
        lot_fields.insert("part".to_string(), json!(2));
        let mut ctx = MockFlush::default()
            .with_delete(lot(9), FieldMap::new())
            .with_fields(lot(9), lot_fields)
            .with_mapping(
                EntityKind::of("part_lot"),
                AssociationMeta::new("part", EntityKind::of("part"), "part_lots"),
            );

        cap.on_pre_commit(&mut ctx).unwrap();

        assert_eq!(ctx.logged.len(), 2);
        assert_eq!(ctx.logged[0].kind, LogEntryKind::Deleted);

        let removal = &ctx.logged[1];
        assert_eq!(removal.kind, LogEntryKind::CollectionElementDeleted);
        assert_eq!(removal.target(), part(2));
        assert_eq!(removal.association(), Some("part_lots"));
        assert_eq!(removal.child_kind(), Some("part_lot"));
        assert_eq!(removal.child_id(), Some(EntityId::from_raw(9)));
        assert_eq!(removal.level, Level::Info);
    }

    #[test]
    fn test_empty_association_is_skipped() {
        let mut cap = capture(CaptureConfig::default());
        let mut lot_fields = FieldMap::new();
        lot_fields.insert("part".to_string(), json!(null));
        let mut ctx = MockFlush::default()
            .with_delete(lot(9), FieldMap::new())
            .with_fields(lot(9), lot_fields)
            .with_mapping(
                EntityKind::of("part_lot"),
                AssociationMeta::new("part", EntityKind::of("part"), "part_lots"),
            );

        cap.on_pre_commit(&mut ctx).unwrap();

        assert_eq!(ctx.logged.len(), 1);
        assert_eq!(ctx.logged[0].kind, LogEntryKind::Deleted);
    }

    #[test]
    fn test_unmapped_whitelist_entry_is_config_error() {
        let triggers = AssociationTriggers::new().trigger(EntityKind::of("part_lot"), "owner");
        let mut cap = ChangeCapture::new(CaptureConfig::default(), policy(), triggers);
        let mut ctx = MockFlush::default().with_delete(lot(9), FieldMap::new());

        let err = cap.on_pre_commit(&mut ctx).unwrap_err();
        assert!(matches!(
            err,
            DaybookError::UnknownAssociation { ref field, .. } if field == "owner"
        ));
    }

    #[test]
    fn test_association_removals_gated_by_save_changed_data() {
        let mut config = CaptureConfig::default();
        config.save_changed_data = false;
        let mut cap = capture(config);
        let mut lot_fields = FieldMap::new();
        lot_fields.insert("part".to_string(), json!(2));
        let mut ctx = MockFlush::default()
            .with_delete(lot(9), FieldMap::new())
            .with_fields(lot(9), lot_fields)
            .with_mapping(
                EntityKind::of("part_lot"),
                AssociationMeta::new("part", EntityKind::of("part"), "part_lots"),
            );

        cap.on_pre_commit(&mut ctx).unwrap();

        assert_eq!(ctx.logged.len(), 1);
    }

    #[test]
    fn test_log_entries_are_never_captured() {
        let mut cap = capture(CaptureConfig::default());
        let bookkeeping = EntityRef::new(EntityKind::LOG_ENTRY, EntityId::from_raw(77));
        let mut ctx = MockFlush::default()
            .with_update(bookkeeping.clone(), name_change())
            .with_delete(bookkeeping.clone(), FieldMap::new());

        cap.on_pre_commit(&mut ctx).unwrap();
        cap.on_entity_created(bookkeeping, &mut ctx).unwrap();

        assert!(ctx.logged.is_empty());
    }

    #[test]
    fn test_recompute_runs_once_per_scan() {
        let mut cap = capture(CaptureConfig::default());
        let mut ctx = MockFlush::default().with_update(part(1), name_change());

        cap.on_pre_commit(&mut ctx).unwrap();

        assert_eq!(ctx.recompute_calls, 1);
    }

    #[test]
    fn test_comment_shared_across_flush_then_cleared() {
        let mut cap = capture(CaptureConfig::default());
        cap.set_comment("stock correction");
        let mut ctx = MockFlush::default().with_update(part(1), name_change());

        cap.on_pre_commit(&mut ctx).unwrap();
        cap.on_entity_created(part(5), &mut ctx).unwrap();
        cap.on_post_commit(&mut ctx).unwrap();

        assert_eq!(ctx.logged.len(), 2);
        assert_eq!(ctx.logged[0].comment(), Some("stock correction"));
        assert_eq!(ctx.logged[1].comment(), Some("stock correction"));
        assert!(cap.comments().is_empty());
    }

    #[test]
    fn test_created_entry_with_initial_value() {
        let config = CaptureConfig::default()
            .with_initial_value_field(EntityKind::of("part_lot"), "amount");
        let mut cap = capture(config);
        let mut fields = FieldMap::new();
        fields.insert("amount".to_string(), json!(42));
        let mut ctx = MockFlush::default().with_fields(lot(6), fields);

        cap.on_pre_commit(&mut ctx).unwrap();
        cap.on_entity_created(lot(6), &mut ctx).unwrap();

        let entry = &ctx.logged[0];
        assert_eq!(entry.kind, LogEntryKind::Created);
        assert_eq!(entry.initial_value(), Some("42"));
    }

    #[test]
    fn test_created_entry_without_initial_field() {
        let config = CaptureConfig::default()
            .with_initial_value_field(EntityKind::of("part_lot"), "amount");
        let mut cap = capture(config);
        let mut ctx = MockFlush::default().with_fields(lot(6), FieldMap::new());

        cap.on_pre_commit(&mut ctx).unwrap();
        cap.on_entity_created(lot(6), &mut ctx).unwrap();

        assert!(!ctx.logged[0].has_initial_value());
    }

    #[test]
    fn test_actor_attached_to_entries() {
        let mut cap = capture(CaptureConfig::default());
        cap.set_actor("mika");
        let mut ctx = MockFlush::default().with_update(part(1), name_change());

        cap.on_pre_commit(&mut ctx).unwrap();

        assert_eq!(ctx.logged[0].actor.as_deref(), Some("mika"));
    }

    #[test]
    fn test_actor_persists_until_cleared() {
        let mut cap = capture(CaptureConfig::default());
        cap.set_actor("mika");

        // Unlike the comment, the actor survives the end of a flush
        let mut ctx = MockFlush::default().with_update(part(1), name_change());
        cap.on_pre_commit(&mut ctx).unwrap();
        cap.on_post_commit(&mut ctx).unwrap();
        assert_eq!(ctx.logged[0].actor.as_deref(), Some("mika"));

        let mut ctx = MockFlush::default().with_update(part(1), name_change());
        cap.on_pre_commit(&mut ctx).unwrap();
        cap.on_post_commit(&mut ctx).unwrap();
        assert_eq!(ctx.logged[0].actor.as_deref(), Some("mika"));

        cap.clear_actor();
        let mut ctx = MockFlush::default().with_update(part(1), name_change());
        cap.on_pre_commit(&mut ctx).unwrap();
        assert!(ctx.logged[0].actor.is_none());
    }

    #[test]
    fn test_post_commit_drains_deferred_entries() {
        let mut cap = capture(CaptureConfig::default());
        let mut ctx = MockFlush::default();

        cap.on_pre_commit(&mut ctx).unwrap();
        cap.on_entity_created(part(1), &mut ctx).unwrap();
        assert_eq!(ctx.staged, 1);

        cap.on_post_commit(&mut ctx).unwrap();
        assert_eq!(ctx.flush_calls, 1);
        assert_eq!(ctx.staged, 0);
    }

    #[test]
    fn test_post_commit_without_staged_entries_skips_flush() {
        let mut cap = capture(CaptureConfig::default());
        let mut ctx = MockFlush::default();

        cap.on_pre_commit(&mut ctx).unwrap();
        cap.on_post_commit(&mut ctx).unwrap();

        assert_eq!(ctx.flush_calls, 0);
    }

    #[test]
    fn test_phase_transitions() {
        let mut cap = capture(CaptureConfig::default());
        assert_eq!(cap.phase(), FlushPhase::Done);

        let mut ctx = MockFlush::default();
        cap.on_pre_commit(&mut ctx).unwrap();
        assert_eq!(cap.phase(), FlushPhase::AwaitingIdentifiers);

        cap.on_post_commit(&mut ctx).unwrap();
        assert_eq!(cap.phase(), FlushPhase::Done);
    }

    #[test]
    #[should_panic(expected = "flush hook out of order")]
    fn test_created_hook_before_scan_panics() {
        let mut cap = capture(CaptureConfig::default());
        let mut ctx = MockFlush::default();
        let _ = cap.on_entity_created(part(1), &mut ctx);
    }

    #[test]
    #[should_panic(expected = "flush hook out of order")]
    fn test_post_commit_before_scan_panics() {
        let mut cap = capture(CaptureConfig::default());
        let mut ctx = MockFlush::default();
        let _ = cap.on_post_commit(&mut ctx);
    }

    #[test]
    #[should_panic(expected = "only attach to edited or deleted")]
    fn test_save_change_set_rejects_created_entries() {
        let cap = capture(CaptureConfig::default());
        let mut entry = LogEntry::created(part(1));
        let changes = FieldChanges::new();
        cap.save_change_set(&mut entry, DiffSource::Changed(&changes));
    }

    #[test]
    fn test_flush_end_clears_comment_and_resets_phase() {
        let mut cap = capture(CaptureConfig::default());
        cap.set_comment("will be dropped");
        let mut ctx = MockFlush::default();
        cap.on_pre_commit(&mut ctx).unwrap();

        cap.on_flush_end();

        assert!(cap.comments().is_empty());
        assert_eq!(cap.phase(), FlushPhase::Done);
    }

    #[test]
    fn test_save_change_set_usable_directly() {
        let cap = capture(CaptureConfig::default());
        let mut entry = LogEntry::deleted(user(1));
        let mut snapshot = FieldMap::new();
        snapshot.insert("name".to_string(), json!("mika"));
        snapshot.insert("password".to_string(), json!("hunter2"));

        cap.save_change_set(&mut entry, DiffSource::Snapshot(&snapshot));

        let old = entry.old_data().unwrap();
        assert_eq!(old.get("name"), Some(&json!("mika")));
        assert!(!old.contains_key("password"));
    }
}
