//! Capture configuration

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::entity::EntityKind;

/// Behavior flags for the capture pipeline
///
/// serde-derived so hosts can embed it in their own configuration files.
/// Every flag defaults to on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Record the names of changed fields on edits (payload key `f`)
    #[serde(default = "default_true")]
    pub save_changed_fields: bool,

    /// Record the redacted old-value mapping on edits (payload key `d`)
    ///
    /// Takes precedence over `save_changed_fields` and also gates
    /// collection-removal entries.
    #[serde(default = "default_true")]
    pub save_changed_data: bool,

    /// Record the redacted old-value mapping on deletes
    #[serde(default = "default_true")]
    pub save_removed_data: bool,

    /// Per-kind field whose value at creation is recorded (payload key `i`)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub initial_value_fields: HashMap<EntityKind, String>,
}

fn default_true() -> bool {
    true
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            save_changed_fields: true,
            save_changed_data: true,
            save_removed_data: true,
            initial_value_fields: HashMap::new(),
        }
    }
}

impl CaptureConfig {
    /// Record `field` of newly created `kind` entities as their initial value
    pub fn with_initial_value_field(
        mut self,
        kind: EntityKind,
        field: impl Into<String>,
    ) -> Self {
        self.initial_value_fields.insert(kind, field.into());
        self
    }
}
