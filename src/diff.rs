//! Change-set construction
//!
//! Builds the redacted, size-bounded mapping of field name to previous value
//! that edit and delete entries carry. Construction is total: redaction and
//! emptiness never fail, they just shrink the result.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::{EntityKind, FieldChanges, FieldMap};
use crate::policy::RedactionPolicy;

/// Maximum length of a captured string value, in characters
pub const MAX_VALUE_LEN: usize = 2000;

/// Marker appended to string values cut at [`MAX_VALUE_LEN`]
pub const TRUNCATION_MARKER: &str = "...";

/// Redacted, size-bounded mapping of field name to previous value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet(FieldMap);

impl ChangeSet {
    /// Check whether no field survived capture
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of captured fields
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Look up the captured previous value of a field
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Check whether a field was captured
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Iterate over captured fields in order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Consume the changeset, yielding the underlying map
    pub fn into_map(self) -> FieldMap {
        self.0
    }
}

/// Where the previous values of an entity come from
#[derive(Debug, Clone, Copy)]
pub enum DiffSource<'a> {
    /// Engine changeset for an in-place edit; the old halves are captured
    Changed(&'a FieldChanges),
    /// Full original snapshot of a deleted entity
    Snapshot(&'a FieldMap),
}

/// Builds [`ChangeSet`]s against a redaction policy
#[derive(Debug, Clone, Copy)]
pub struct ChangeSetBuilder<'a> {
    policy: &'a RedactionPolicy,
}

impl<'a> ChangeSetBuilder<'a> {
    /// Create a builder backed by `policy`
    pub fn new(policy: &'a RedactionPolicy) -> Self {
        Self { policy }
    }

    /// Build the changeset for an entity of `kind` from `source`
    ///
    /// Null previous values are dropped, forbidden fields are removed, and
    /// surviving string values are truncated. Field order follows the source.
    pub fn build(&self, kind: &EntityKind, source: DiffSource<'_>) -> ChangeSet {
        let candidate: FieldMap = match source {
            DiffSource::Changed(changes) => changes
                .iter()
                .filter(|change| !change.old.is_null())
                .map(|change| (change.field.clone(), change.old.clone()))
                .collect(),
            DiffSource::Snapshot(fields) => fields
                .iter()
                .filter(|(_, value)| !value.is_null())
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect(),
        };

        let mut filtered = self.policy.filter(kind, candidate);
        for (_, value) in filtered.iter_mut() {
            truncate_value(value);
        }
        ChangeSet(filtered)
    }
}

/// Cut a string value at [`MAX_VALUE_LEN`] characters, appending the marker
///
/// Counts characters, not bytes, so the cut never lands inside a multi-byte
/// sequence. Non-string values pass through untouched.
fn truncate_value(value: &mut Value) {
    if let Value::String(s) = value {
        if let Some((idx, _)) = s.char_indices().nth(MAX_VALUE_LEN) {
            s.truncate(idx);
            s.push_str(TRUNCATION_MARKER);
        }
    }
}
