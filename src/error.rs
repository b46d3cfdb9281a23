//! Custom error types for daybook
//!
//! This module defines the error hierarchy for the capture pipeline using
//! thiserror for ergonomic error definitions. Contract violations (wrong
//! entry kinds, out-of-order flush hooks) are not errors and panic instead.

use thiserror::Error;

use crate::entity::{EntityKind, EntityRef};

/// The main error type for daybook operations
#[derive(Error, Debug)]
pub enum DaybookError {
    /// Configuration-related errors (policy tables, trigger tables)
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors raised by sinks
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// A whitelisted association field has no registered mapping
    #[error("association `{field}` is not mapped for entity kind `{kind}`")]
    UnknownAssociation { kind: EntityKind, field: String },

    /// A unit-of-work operation referenced an entity that is not stored
    #[error("unknown entity: {entity}")]
    UnknownEntity { entity: EntityRef },

    /// Unit-of-work bookkeeping errors from the storage engine
    #[error("Storage error: {0}")]
    Storage(String),
}

impl DaybookError {
    /// Create an "unknown entity" error for a unit-of-work target
    pub fn unknown_entity(entity: EntityRef) -> Self {
        Self::UnknownEntity { entity }
    }

    /// Create an "unknown association" error for a whitelist entry that does
    /// not resolve against the engine's association mappings
    pub fn unknown_association(kind: EntityKind, field: impl Into<String>) -> Self {
        Self::UnknownAssociation {
            kind,
            field: field.into(),
        }
    }

    /// Check if this is a configuration error (policy or trigger tables)
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::UnknownAssociation { .. })
    }
}

// Implement From traits for common error types

impl From<std::io::Error> for DaybookError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for DaybookError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Result type alias for daybook operations
pub type DaybookResult<T> = Result<T, DaybookError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityId;

    #[test]
    fn test_error_display() {
        let err = DaybookError::Config("subtype cycle".into());
        assert_eq!(err.to_string(), "Configuration error: subtype cycle");
    }

    #[test]
    fn test_unknown_association_error() {
        let err = DaybookError::unknown_association(EntityKind::of("part_lot"), "owner");
        assert_eq!(
            err.to_string(),
            "association `owner` is not mapped for entity kind `part_lot`"
        );
        assert!(err.is_config());
    }

    #[test]
    fn test_unknown_entity_error() {
        let entity = EntityRef::new(EntityKind::of("part"), EntityId::from_raw(7));
        let err = DaybookError::unknown_entity(entity);
        assert_eq!(err.to_string(), "unknown entity: part:7");
        assert!(!err.is_config());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let daybook_err: DaybookError = io_err.into();
        assert!(matches!(daybook_err, DaybookError::Io(_)));
    }
}
