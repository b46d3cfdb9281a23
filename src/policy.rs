//! Redaction policy and association triggers
//!
//! Two static tables consulted during capture. The redaction policy names
//! fields that must never reach a persisted payload, per entity kind, with
//! kind inheritance resolved once at build time. The trigger table names the
//! association fields whose parent gets a collection-removal entry when the
//! owning entity is deleted.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::entity::{EntityKind, FieldMap};
use crate::error::{DaybookError, DaybookResult};

/// Field-level redaction table with subtype closure resolved at build time
///
/// A field forbidden for a kind is forbidden for every kind declared as its
/// subtype, transitively. Lookups after `build` are plain table hits.
#[derive(Debug, Clone, Default)]
pub struct RedactionPolicy {
    restricted: HashMap<EntityKind, HashSet<String>>,
}

impl RedactionPolicy {
    /// Start building a policy
    pub fn builder() -> RedactionPolicyBuilder {
        RedactionPolicyBuilder::default()
    }

    /// Check whether any field of `kind` is forbidden
    pub fn is_restricted(&self, kind: &EntityKind) -> bool {
        self.restricted.contains_key(kind)
    }

    /// Check whether `field` of `kind` may appear in a persisted payload
    pub fn should_field_be_saved(&self, kind: &EntityKind, field: &str) -> bool {
        self.restricted
            .get(kind)
            .map_or(true, |fields| !fields.contains(field))
    }

    /// Drop every forbidden key from `fields`, preserving the order of the
    /// remaining entries
    pub fn filter(&self, kind: &EntityKind, fields: FieldMap) -> FieldMap {
        if !self.is_restricted(kind) {
            return fields;
        }
        fields
            .into_iter()
            .filter(|(field, _)| self.should_field_be_saved(kind, field))
            .collect()
    }
}

/// Builder for [`RedactionPolicy`]
///
/// Collects per-kind forbidden fields and subtype declarations, then resolves
/// the inheritance closure in `build`.
#[derive(Debug, Default)]
pub struct RedactionPolicyBuilder {
    direct: HashMap<EntityKind, BTreeSet<String>>,
    parents: HashMap<EntityKind, EntityKind>,
}

impl RedactionPolicyBuilder {
    /// Forbid `fields` of `kind` from appearing in persisted payloads
    pub fn redact<I, S>(mut self, kind: EntityKind, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self.direct.entry(kind).or_default();
        for field in fields {
            entry.insert(field.into());
        }
        self
    }

    /// Declare `child` a subtype of `parent`, inheriting its forbidden fields
    pub fn subtype(mut self, child: EntityKind, parent: EntityKind) -> Self {
        self.parents.insert(child, parent);
        self
    }

    /// Resolve the subtype closure and produce the policy
    ///
    /// Fails with a configuration error when the subtype declarations form a
    /// cycle.
    pub fn build(self) -> DaybookResult<RedactionPolicy> {
        let mut restricted: HashMap<EntityKind, HashSet<String>> = HashMap::new();

        let kinds: HashSet<&EntityKind> =
            self.direct.keys().chain(self.parents.keys()).collect();

        for kind in kinds {
            let mut fields: HashSet<String> = HashSet::new();
            let mut visited: HashSet<&EntityKind> = HashSet::new();
            let mut current = Some(kind);

            while let Some(k) = current {
                if !visited.insert(k) {
                    return Err(DaybookError::Config(format!(
                        "subtype cycle involving entity kind `{kind}`"
                    )));
                }
                if let Some(direct) = self.direct.get(k) {
                    fields.extend(direct.iter().cloned());
                }
                current = self.parents.get(k);
            }

            if !fields.is_empty() {
                restricted.insert(kind.clone(), fields);
            }
        }

        Ok(RedactionPolicy { restricted })
    }
}

/// Association fields that log a collection removal when their owner is
/// deleted
///
/// Keyed by the deleted entity's kind. Registration order is emission order.
#[derive(Debug, Clone, Default)]
pub struct AssociationTriggers {
    whitelist: HashMap<EntityKind, Vec<String>>,
}

impl AssociationTriggers {
    /// Create an empty trigger table
    pub fn new() -> Self {
        Self::default()
    }

    /// Whitelist `field` of `kind` for collection-removal logging
    pub fn trigger(mut self, kind: EntityKind, field: impl Into<String>) -> Self {
        let field = field.into();
        let fields = self.whitelist.entry(kind).or_default();
        if !fields.contains(&field) {
            fields.push(field);
        }
        self
    }

    /// Check whether any association of `kind` is whitelisted
    pub fn is_whitelisted(&self, kind: &EntityKind) -> bool {
        self.whitelist.contains_key(kind)
    }

    /// Whitelisted association fields of `kind`, in registration order
    pub fn fields(&self, kind: &EntityKind) -> &[String] {
        self.whitelist
            .get(kind)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}
