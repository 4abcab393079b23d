//! Script repository: revision directories on disk.
//!
//! ```text
//! migrations/
//! ├── 3f2a9c1b7d4e_create_accounts/
//! │   ├── revision.toml
//! │   ├── up.sql
//! │   └── down.sql
//! └── 8c01d55e2b7a_add_owner/
//!     ├── revision.toml
//!     └── up.sql          # no down.sql: irreversible
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{MigrateResult, MigrationError};
use crate::graph::RevisionGraph;
use crate::registry::{ScriptRegistry, registry_path};
use crate::revision::{Irreversible, MigrationScript, Revision, RevisionId, SqlScript};

/// Metadata file inside each revision directory.
pub const METADATA_FILE: &str = "revision.toml";
/// Upgrade SQL file.
pub const UP_FILE: &str = "up.sql";
/// Downgrade SQL file.
pub const DOWN_FILE: &str = "down.sql";

/// Contents of `revision.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RevisionMetadata {
    /// Revision id.
    pub id: String,
    /// Human-readable label.
    pub label: String,
    /// Parent revision; absent for the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Additional parents of a merge revision.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merge_parents: Vec<String>,
    /// Authoring date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_date: Option<DateTime<Utc>>,
    /// Refuse to downgrade even if `down.sql` exists.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub irreversible: bool,
}

/// Loads revisions from a directory and caches the resulting graph.
#[derive(Debug)]
pub struct ScriptRepository {
    directory: PathBuf,
    registry: ScriptRegistry,
    graph: OnceCell<Arc<RevisionGraph>>,
}

impl ScriptRepository {
    /// Create a repository for `directory`.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            registry: ScriptRegistry::new(),
            graph: OnceCell::new(),
        }
    }

    /// Merge procedures registered in code.
    pub fn with_registry(mut self, registry: ScriptRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// The scripts directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Ensure the scripts directory exists.
    pub async fn ensure_dir(&self) -> MigrateResult<()> {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(MigrationError::Io)
    }

    /// Load and validate the revision graph.
    ///
    /// The graph is parsed once per repository value; later calls return the
    /// cached graph without touching the filesystem.
    pub async fn load(&self) -> MigrateResult<Arc<RevisionGraph>> {
        self.graph
            .get_or_try_init(|| async {
                let revisions = self.scan().await?;
                debug!(
                    directory = %self.directory.display(),
                    revisions = revisions.len(),
                    "Loaded revision scripts"
                );
                RevisionGraph::new(revisions).map(Arc::new)
            })
            .await
            .cloned()
    }

    /// Parse every revision without validating the graph.
    pub async fn scan(&self) -> MigrateResult<Vec<Revision>> {
        if !self.directory.is_dir() {
            return Err(MigrationError::graph(format!(
                "script directory '{}' does not exist; run `stratum init`",
                self.directory.display()
            )));
        }

        let mut entries = tokio::fs::read_dir(&self.directory)
            .await
            .map_err(MigrationError::Io)?;

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(MigrationError::Io)? {
            let path = entry.path();
            if path.is_dir() && !is_ignored(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut revisions: BTreeMap<RevisionId, Revision> = BTreeMap::new();
        for path in paths {
            let revision = self.read_revision(&path).await?;
            if let Some(existing) = revisions.get(&revision.id) {
                return Err(MigrationError::parse(
                    &path,
                    format!(
                        "duplicate revision id '{}' (also declared in {})",
                        revision.id,
                        existing
                            .path
                            .as_deref()
                            .map(|p| p.display().to_string())
                            .unwrap_or_default()
                    ),
                ));
            }
            revisions.insert(revision.id.clone(), revision);
        }

        if let Some(orphan) = self
            .registry
            .procedure_ids()
            .find(|id| !revisions.contains_key(*id))
        {
            return Err(MigrationError::parse(
                registry_path(orphan.as_str()),
                "a procedure is registered for a revision that no script directory declares",
            ));
        }

        for revision in self.registry.revisions() {
            if let Some(existing) = revisions.get(&revision.id) {
                return Err(MigrationError::parse(
                    existing
                        .path
                        .clone()
                        .unwrap_or_else(|| registry_path(revision.id.as_str())),
                    format!(
                        "revision '{}' is declared both in code and on disk",
                        revision.id
                    ),
                ));
            }
            revisions.insert(revision.id.clone(), revision);
        }

        Ok(revisions.into_values().collect())
    }

    async fn read_revision(&self, dir: &Path) -> MigrateResult<Revision> {
        let meta_path = dir.join(METADATA_FILE);
        if !meta_path.is_file() {
            return Err(MigrationError::parse(
                dir,
                format!("missing {}", METADATA_FILE),
            ));
        }

        let content = tokio::fs::read_to_string(&meta_path)
            .await
            .map_err(MigrationError::Io)?;
        let meta: RevisionMetadata = toml::from_str(&content)
            .map_err(|e| MigrationError::parse(&meta_path, e.message().to_string()))?;

        let id = RevisionId::new(&meta.id).map_err(|e| MigrationError::parse(&meta_path, e))?;

        if meta.parent.is_none() && !meta.merge_parents.is_empty() {
            return Err(MigrationError::parse(
                &meta_path,
                "merge_parents requires parent",
            ));
        }

        let parents = meta
            .parent
            .iter()
            .chain(meta.merge_parents.iter())
            .map(|p| RevisionId::new(p).map_err(|e| MigrationError::parse(&meta_path, e)))
            .collect::<MigrateResult<Vec<_>>>()?;

        let up = read_optional(&dir.join(UP_FILE)).await?;
        let down = read_optional(&dir.join(DOWN_FILE)).await?;

        let script: Arc<dyn MigrationScript> = match (self.registry.procedure(id.as_str()), up) {
            (Some(script), _) => Arc::clone(script),
            (None, Some(up)) => Arc::new(SqlScript::new(up, down)),
            (None, None) => {
                return Err(MigrationError::parse(
                    dir,
                    format!(
                        "revision '{}' has no upgrade procedure: add {} or register one in code",
                        id, UP_FILE
                    ),
                ));
            }
        };
        let script: Arc<dyn MigrationScript> = if meta.irreversible {
            Arc::new(Irreversible(script))
        } else {
            script
        };

        let mut revision = Revision::new(id, parents, meta.label, script).with_path(dir);
        if let Some(date) = meta.create_date {
            revision = revision.with_create_date(date);
        }
        Ok(revision)
    }

    /// Write a new revision directory and return its path.
    ///
    /// The id is generated; `parents` may name several revisions to create a
    /// merge. The cached graph, if any, is not refreshed.
    pub async fn create_revision(
        &self,
        label: &str,
        parents: &[RevisionId],
    ) -> MigrateResult<PathBuf> {
        self.ensure_dir().await?;

        let id = RevisionId::generate();
        let slug = slugify(label);
        let dir_name = if slug.is_empty() {
            id.to_string()
        } else {
            format!("{}_{}", id, slug)
        };
        let dir = self.directory.join(dir_name);

        let meta = RevisionMetadata {
            id: id.to_string(),
            label: label.to_string(),
            parent: parents.first().map(ToString::to_string),
            merge_parents: parents.iter().skip(1).map(ToString::to_string).collect(),
            create_date: Some(Utc::now()),
            irreversible: false,
        };
        let toml = toml::to_string(&meta)
            .map_err(|e| MigrationError::parse(&dir, format!("cannot serialize metadata: {}", e)))?;

        let parent_list = if parents.is_empty() {
            "<base>".to_string()
        } else {
            parents
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        let header = format!(
            "-- {}\n-- Revision: {}\n-- Parents: {}\n",
            label, id, parent_list
        );

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(MigrationError::Io)?;
        tokio::fs::write(dir.join(METADATA_FILE), toml)
            .await
            .map_err(MigrationError::Io)?;
        tokio::fs::write(dir.join(UP_FILE), format!("{}\n", header))
            .await
            .map_err(MigrationError::Io)?;
        tokio::fs::write(dir.join(DOWN_FILE), format!("{}\n", header))
            .await
            .map_err(MigrationError::Io)?;

        debug!(revision = %id, path = %dir.display(), "Created revision");
        Ok(dir)
    }
}

async fn read_optional(path: &Path) -> MigrateResult<Option<String>> {
    if !path.is_file() {
        return Ok(None);
    }
    tokio::fs::read_to_string(path)
        .await
        .map(Some)
        .map_err(MigrationError::Io)
}

fn is_ignored(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_none_or(|n| n.starts_with('.') || n.starts_with("__"))
}

/// Turn a label into a directory-name slug.
fn slugify(label: &str) -> String {
    let mut slug = String::new();
    for c in label.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = slug.trim_end_matches('_');
    slug.chars().take(40).collect::<String>().trim_end_matches('_').to_string()
}
