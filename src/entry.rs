//! Log entry data structures
//!
//! Defines the persisted log entry format for tracking entity modifications.
//! Every entry is a fixed envelope (kind, target, severity, actor) plus a
//! kind-specific payload stored under compact single-letter keys to keep the
//! per-row footprint small. Payload access goes through accessors; unknown
//! keys survive a read/write cycle untouched.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::diff::ChangeSet;
use crate::entity::{EntityId, EntityKind, EntityRef, FieldMap};

/// Payload key for the reason-for-change comment
const KEY_COMMENT: &str = "m";
/// Payload key for the initial value captured at creation
const KEY_INITIAL_VALUE: &str = "i";
/// Payload key for the list of changed field names
const KEY_CHANGED_FIELDS: &str = "f";
/// Payload key for the redacted old-value mapping
const KEY_OLD_DATA: &str = "d";
/// Payload key for the inverse collection name on removal entries
const KEY_ASSOCIATION: &str = "n";
/// Payload key for the removed element's kind on removal entries
const KEY_CHILD_KIND: &str = "c";

/// Severity of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Error,
    Warning,
    Notice,
    #[default]
    Info,
    Debug,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Error => write!(f, "ERROR"),
            Level::Warning => write!(f, "WARNING"),
            Level::Notice => write!(f, "NOTICE"),
            Level::Info => write!(f, "INFO"),
            Level::Debug => write!(f, "DEBUG"),
        }
    }
}

/// Kind of change a log entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogEntryKind {
    /// A new entity was stored
    Created,
    /// A stored entity was edited in place
    Edited,
    /// A stored entity was deleted
    Deleted,
    /// An element disappeared from a parent's collection because the owning
    /// entity was deleted
    CollectionElementDeleted,
}

impl fmt::Display for LogEntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogEntryKind::Created => write!(f, "CREATED"),
            LogEntryKind::Edited => write!(f, "EDITED"),
            LogEntryKind::Deleted => write!(f, "DELETED"),
            LogEntryKind::CollectionElementDeleted => write!(f, "COLLECTION_ELEMENT_DELETED"),
        }
    }
}

/// A single log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Record identifier, assigned by the sink at persist time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    /// When the entry became durable (UTC), assigned by the sink
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// What kind of change this entry records
    pub kind: LogEntryKind,
    /// Kind of the affected entity
    pub target_kind: EntityKind,
    /// Identifier of the affected entity
    pub target_id: EntityId,
    /// Severity of the entry
    #[serde(default)]
    pub level: Level,
    /// Acting user, when the host supplies one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    /// Kind-specific data under compact keys
    #[serde(default, skip_serializing_if = "FieldMap::is_empty")]
    payload: FieldMap,
}

impl LogEntry {
    fn with_kind(kind: LogEntryKind, target: EntityRef) -> Self {
        Self {
            id: None,
            timestamp: None,
            kind,
            target_kind: target.kind,
            target_id: target.id,
            level: Level::Info,
            actor: None,
            payload: FieldMap::new(),
        }
    }

    /// Create an entry recording that `target` was stored
    pub fn created(target: EntityRef) -> Self {
        Self::with_kind(LogEntryKind::Created, target)
    }

    /// Create an entry recording an in-place edit of `target`
    pub fn edited(target: EntityRef) -> Self {
        Self::with_kind(LogEntryKind::Edited, target)
    }

    /// Create an entry recording the deletion of `target`
    pub fn deleted(target: EntityRef) -> Self {
        Self::with_kind(LogEntryKind::Deleted, target)
    }

    /// Create an entry recording that `child` disappeared from the `inverse`
    /// collection of `parent` when `child`'s owning entity was deleted
    ///
    /// The entry targets the parent; the removed element is described in the
    /// payload so the parent's history shows the collection change.
    pub fn collection_element_deleted(child: EntityRef, inverse: &str, parent: EntityRef) -> Self {
        let mut entry = Self::with_kind(LogEntryKind::CollectionElementDeleted, parent);
        entry
            .payload
            .insert(KEY_ASSOCIATION.to_string(), Value::String(inverse.to_string()));
        entry.payload.insert(
            KEY_CHILD_KIND.to_string(),
            Value::String(child.kind.as_str().to_string()),
        );
        entry.payload.insert(
            KEY_INITIAL_VALUE.to_string(),
            Value::Number(child.id.as_u64().into()),
        );
        entry
    }

    /// Reference to the affected entity
    pub fn target(&self) -> EntityRef {
        EntityRef::new(self.target_kind.clone(), self.target_id)
    }

    /// Set the severity
    pub fn set_level(&mut self, level: Level) {
        self.level = level;
    }

    /// Set the acting user
    pub fn set_actor(&mut self, actor: impl Into<String>) {
        self.actor = Some(actor.into());
    }

    /// Attach a reason-for-change comment
    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.payload
            .insert(KEY_COMMENT.to_string(), Value::String(comment.into()));
    }

    /// Check whether a comment is attached
    pub fn has_comment(&self) -> bool {
        self.payload.contains_key(KEY_COMMENT)
    }

    /// Get the attached comment, if any
    pub fn comment(&self) -> Option<&str> {
        self.payload.get(KEY_COMMENT).and_then(Value::as_str)
    }

    /// Attach the rendered initial value captured at creation
    pub fn set_initial_value(&mut self, value: impl Into<String>) {
        self.payload
            .insert(KEY_INITIAL_VALUE.to_string(), Value::String(value.into()));
    }

    /// Check whether an initial value is attached
    pub fn has_initial_value(&self) -> bool {
        self.payload.contains_key(KEY_INITIAL_VALUE)
    }

    /// Get the attached initial value, if any
    pub fn initial_value(&self) -> Option<&str> {
        self.payload.get(KEY_INITIAL_VALUE).and_then(Value::as_str)
    }

    /// Attach the list of changed field names
    pub fn set_changed_fields<I, S>(&mut self, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<Value> = fields
            .into_iter()
            .map(|f| Value::String(f.into()))
            .collect();
        self.payload
            .insert(KEY_CHANGED_FIELDS.to_string(), Value::Array(names));
    }

    /// Get the attached changed field names, if any
    pub fn changed_fields(&self) -> Option<Vec<&str>> {
        self.payload
            .get(KEY_CHANGED_FIELDS)
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
    }

    /// Attach the redacted old-value mapping
    pub fn set_old_data(&mut self, change_set: ChangeSet) {
        self.payload.insert(
            KEY_OLD_DATA.to_string(),
            Value::Object(change_set.into_map()),
        );
    }

    /// Get the attached old-value mapping, if any
    pub fn old_data(&self) -> Option<&FieldMap> {
        self.payload.get(KEY_OLD_DATA).and_then(Value::as_object)
    }

    /// Get the inverse collection name on a removal entry, if any
    pub fn association(&self) -> Option<&str> {
        self.payload.get(KEY_ASSOCIATION).and_then(Value::as_str)
    }

    /// Get the removed element's kind on a removal entry, if any
    pub fn child_kind(&self) -> Option<&str> {
        self.payload.get(KEY_CHILD_KIND).and_then(Value::as_str)
    }

    /// Get the removed element's identifier on a removal entry, if any
    pub fn child_id(&self) -> Option<EntityId> {
        self.payload
            .get(KEY_INITIAL_VALUE)
            .and_then(Value::as_u64)
            .map(EntityId::from_raw)
    }

    /// Raw payload view for diagnostics
    pub fn payload(&self) -> &FieldMap {
        &self.payload
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let timestamp = self
            .timestamp
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "pending".to_string());
        write!(
            f,
            "[{}] {} {} {}:{}",
            timestamp, self.level, self.kind, self.target_kind, self.target_id
        )?;
        if let Some(actor) = &self.actor {
            write!(f, " by {actor}")?;
        }
        if let Some(comment) = self.comment() {
            write!(f, " ({comment})")?;
        }
        Ok(())
    }
}
