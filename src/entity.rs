//! Entity identity and field access
//!
//! The capture pipeline never sees concrete domain types. It works against
//! kind tags, engine-assigned identifiers, and a readable-field capability
//! that hands over a point-in-time mapping of field name to value.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Mapping of field name to value, in declaration order
pub type FieldMap = serde_json::Map<String, Value>;

/// Tag identifying a kind of tracked entity (e.g. `part`, `part_lot`, `user`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKind(Cow<'static, str>);

impl EntityKind {
    /// Reserved kind for persisted log entries themselves. Entities of this
    /// kind are excluded from capture so the log never describes itself.
    pub const LOG_ENTRY: EntityKind = EntityKind(Cow::Borrowed("log_entry"));

    /// Create a kind tag from a static name
    pub const fn of(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Create a kind tag from a runtime name
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// Get the kind name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether this is the reserved log-entry kind
    pub fn is_log_entry(&self) -> bool {
        *self == Self::LOG_ENTRY
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Engine-assigned entity identifier
///
/// Identifiers come from the storage engine's sequence at commit time; an
/// entity scheduled for insertion does not have one yet.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// Wrap a raw identifier value
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw identifier value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Polymorphic reference to a stored entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    /// Kind of the referenced entity
    pub kind: EntityKind,
    /// Engine-assigned identifier
    pub id: EntityId,
}

impl EntityRef {
    /// Create a reference from a kind and identifier
    pub fn new(kind: EntityKind, id: EntityId) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// One changed field with its value before and after an edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    /// Name of the changed field
    pub field: String,
    /// Value before the edit
    pub old: Value,
    /// Value after the edit
    pub new: Value,
}

/// Ordered per-entity changeset computed by the engine for an in-place edit
///
/// Order follows the entity's field declaration order and is preserved all
/// the way into the persisted payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldChanges {
    changes: Vec<FieldChange>,
}

impl FieldChanges {
    /// Create an empty changeset
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a change for a field
    pub fn push(&mut self, field: impl Into<String>, old: Value, new: Value) {
        self.changes.push(FieldChange {
            field: field.into(),
            old,
            new,
        });
    }

    /// Look up the change recorded for a field
    pub fn get(&self, field: &str) -> Option<&FieldChange> {
        self.changes.iter().find(|c| c.field == field)
    }

    /// Iterate over the changes in order
    pub fn iter(&self) -> impl Iterator<Item = &FieldChange> {
        self.changes.iter()
    }

    /// Names of the changed fields, in order
    pub fn field_names(&self) -> Vec<String> {
        self.changes.iter().map(|c| c.field.clone()).collect()
    }

    /// Number of changed fields
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Check if no fields changed
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Owning-side association metadata the engine exposes per entity kind
///
/// `field` on the owning entity holds the identifier of a `target_kind`
/// parent; `inverse` names the collection on that parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationMeta {
    /// Field on the owning entity holding the parent identifier
    pub field: String,
    /// Kind of the parent entity
    pub target_kind: EntityKind,
    /// Name of the inverse collection on the parent
    pub inverse: String,
}

impl AssociationMeta {
    /// Create association metadata
    pub fn new(
        field: impl Into<String>,
        target_kind: EntityKind,
        inverse: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            target_kind,
            inverse: inverse.into(),
        }
    }
}

/// Readable-field capability for tracked entities
///
/// Implemented by host domain types so the pipeline can capture them without
/// knowing their concrete shape.
pub trait Trackable {
    /// Kind tag for this entity
    fn kind(&self) -> EntityKind;

    /// Current field values, in declaration order
    fn fields(&self) -> FieldMap;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_kind_display() {
        assert_eq!(EntityKind::of("part").to_string(), "part");
        assert_eq!(EntityKind::new(String::from("user")).to_string(), "user");
    }

    #[test]
    fn test_entity_kind_equality_across_constructors() {
        assert_eq!(EntityKind::of("part"), EntityKind::new("part"));
    }

    #[test]
    fn test_reserved_log_entry_kind() {
        assert!(EntityKind::of("log_entry").is_log_entry());
        assert!(!EntityKind::of("part").is_log_entry());
    }

    #[test]
    fn test_entity_ref_display() {
        let entity = EntityRef::new(EntityKind::of("part_lot"), EntityId::from_raw(42));
        assert_eq!(entity.to_string(), "part_lot:42");
    }

    #[test]
    fn test_entity_kind_serde_transparent() {
        let json = serde_json::to_string(&EntityKind::of("part")).unwrap();
        assert_eq!(json, "\"part\"");
        let back: EntityKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EntityKind::of("part"));
    }

    #[test]
    fn test_field_changes_preserve_order() {
        let mut changes = FieldChanges::new();
        changes.push("name", json!("old"), json!("new"));
        changes.push("amount", json!(1), json!(2));
        changes.push("active", json!(true), json!(false));

        assert_eq!(changes.len(), 3);
        assert_eq!(changes.field_names(), vec!["name", "amount", "active"]);
        assert_eq!(changes.get("amount").unwrap().old, json!(1));
        assert!(changes.get("missing").is_none());
    }

    #[test]
    fn test_trackable_field_map() {
        struct Part {
            name: String,
        }

        impl Trackable for Part {
            fn kind(&self) -> EntityKind {
                EntityKind::of("part")
            }

            fn fields(&self) -> FieldMap {
                let mut fields = FieldMap::new();
                fields.insert("name".to_string(), json!(self.name));
                fields
            }
        }

        let part = Part {
            name: "resistor".to_string(),
        };
        assert_eq!(part.kind(), EntityKind::of("part"));
        assert_eq!(part.fields().get("name"), Some(&json!("resistor")));
    }
}
