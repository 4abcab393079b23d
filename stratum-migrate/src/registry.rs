//! Typed registration of revision procedures written in Rust.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{MigrateResult, MigrationError};
use crate::revision::{MigrationScript, Revision, RevisionId};

/// Metadata of a revision declared entirely in code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionSpec {
    /// Revision id.
    pub id: RevisionId,
    /// Parent revisions.
    pub parents: Vec<RevisionId>,
    /// Human-readable label.
    pub label: String,
    /// Authoring date.
    pub create_date: Option<DateTime<Utc>>,
}

impl RevisionSpec {
    /// Declare a root revision.
    pub fn new(id: &str, label: impl Into<String>) -> MigrateResult<Self> {
        Ok(Self {
            id: parse_id(id)?,
            parents: Vec::new(),
            label: label.into(),
            create_date: None,
        })
    }

    /// Add a parent.
    pub fn parent(mut self, id: &str) -> MigrateResult<Self> {
        self.parents.push(parse_id(id)?);
        Ok(self)
    }

    /// Set the authoring date.
    pub fn create_date(mut self, date: DateTime<Utc>) -> Self {
        self.create_date = Some(date);
        self
    }
}

fn parse_id(id: &str) -> MigrateResult<RevisionId> {
    RevisionId::new(id).map_err(|e| MigrationError::parse(registry_path(id), e))
}

/// Pseudo-path naming a registration in error messages.
pub(crate) fn registry_path(id: &str) -> PathBuf {
    PathBuf::from(format!("<registry:{}>", id))
}

/// Procedures registered in code, keyed by revision id.
///
/// ```rust,ignore
/// let mut registry = ScriptRegistry::new();
/// // Attach Rust code to a revision declared in `migrations/`.
/// registry.register("3f2a9c1b7d4e", BackfillAccounts)?;
/// // Or declare a revision without any files.
/// registry.register_revision(
///     RevisionSpec::new("seed_0001", "seed reference data")?.parent("3f2a9c1b7d4e")?,
///     SeedData,
/// )?;
/// let repository = ScriptRepository::new("migrations").with_registry(registry);
/// ```
#[derive(Clone, Default)]
pub struct ScriptRegistry {
    procedures: BTreeMap<RevisionId, Arc<dyn MigrationScript>>,
    revisions: BTreeMap<RevisionId, (RevisionSpec, Arc<dyn MigrationScript>)>,
}

impl ScriptRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a procedure to a revision declared by a script directory.
    pub fn register(
        &mut self,
        id: &str,
        script: impl MigrationScript + 'static,
    ) -> MigrateResult<()> {
        let id = parse_id(id)?;
        if self.procedures.contains_key(&id) || self.revisions.contains_key(&id) {
            return Err(MigrationError::parse(
                registry_path(id.as_str()),
                "a procedure is already registered for this revision",
            ));
        }
        self.procedures.insert(id, Arc::new(script));
        Ok(())
    }

    /// Declare a revision and its procedure in code.
    pub fn register_revision(
        &mut self,
        spec: RevisionSpec,
        script: impl MigrationScript + 'static,
    ) -> MigrateResult<()> {
        if self.procedures.contains_key(&spec.id) || self.revisions.contains_key(&spec.id) {
            return Err(MigrationError::parse(
                registry_path(spec.id.as_str()),
                "the revision is already registered",
            ));
        }
        self.revisions
            .insert(spec.id.clone(), (spec, Arc::new(script)));
        Ok(())
    }

    /// Procedure attached to a file-declared revision.
    pub fn procedure(&self, id: &str) -> Option<&Arc<dyn MigrationScript>> {
        self.procedures.get(id)
    }

    /// Ids with an attached procedure.
    pub fn procedure_ids(&self) -> impl Iterator<Item = &RevisionId> {
        self.procedures.keys()
    }

    /// Revisions declared in code.
    pub fn revisions(&self) -> impl Iterator<Item = Revision> + '_ {
        self.revisions.values().map(|(spec, script)| {
            let revision = Revision::new(
                spec.id.clone(),
                spec.parents.clone(),
                spec.label.clone(),
                Arc::clone(script),
            );
            match spec.create_date {
                Some(date) => revision.with_create_date(date),
                None => revision,
            }
        })
    }

    /// Check if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty() && self.revisions.is_empty()
    }
}

impl std::fmt::Debug for ScriptRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptRegistry")
            .field("procedures", &self.procedures.keys().collect::<Vec<_>>())
            .field("revisions", &self.revisions.keys().collect::<Vec<_>>())
            .finish()
    }
}
