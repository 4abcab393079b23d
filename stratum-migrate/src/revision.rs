//! Revisions, steps and the procedure trait.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MigrateResult, MigrationError};
use crate::ops::Operations;

/// Opaque revision identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RevisionId(String);

impl RevisionId {
    /// Maximum identifier length (matches the version table column).
    pub const MAX_LEN: usize = 64;

    /// Names the target syntax gives a meaning of its own.
    pub const RESERVED: [&'static str; 3] = ["head", "heads", "base"];

    /// Create an identifier, validating its characters.
    pub fn new(id: impl Into<String>) -> Result<Self, String> {
        let id = id.into();
        if id.is_empty() {
            return Err("revision id must not be empty".to_string());
        }
        if id.len() > Self::MAX_LEN {
            return Err(format!(
                "revision id '{}' is longer than {} characters",
                id,
                Self::MAX_LEN
            ));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(format!(
                "revision id '{}' may only contain ASCII letters, digits, '_' and '-'",
                id
            ));
        }
        if id.starts_with(['+', '-']) {
            return Err(format!(
                "revision id '{}' would read as a relative step; it must not start with '+' or '-'",
                id
            ));
        }
        if Self::RESERVED.iter().any(|r| id.eq_ignore_ascii_case(r)) {
            return Err(format!("revision id '{}' is a reserved target name", id));
        }
        Ok(Self(id))
    }

    /// Generate a fresh 12-hex-digit identifier.
    pub fn generate() -> Self {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        Self(hex[..12].to_string())
    }

    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RevisionId {
    type Error = String;

    fn try_from(id: String) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl From<RevisionId> for String {
    fn from(id: RevisionId) -> Self {
        id.0
    }
}

impl AsRef<str> for RevisionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for RevisionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// The upgrade/downgrade procedure of one revision.
///
/// Procedures receive an [`Operations`] handle scoped to the step's
/// transaction. The default `downgrade` reports the revision as irreversible.
#[async_trait::async_trait]
pub trait MigrationScript: Send + Sync {
    /// Apply the revision.
    async fn upgrade(&self, op: &mut Operations<'_>) -> MigrateResult<()>;

    /// Reverse the revision.
    async fn downgrade(&self, op: &mut Operations<'_>) -> MigrateResult<()> {
        Err(MigrationError::Irreversible(op.revision().to_string()))
    }
}

/// A procedure backed by raw SQL text (`up.sql` / `down.sql`).
#[derive(Debug, Clone)]
pub struct SqlScript {
    up: String,
    down: Option<String>,
}

impl SqlScript {
    /// Create a script from upgrade and optional downgrade SQL.
    pub fn new(up: impl Into<String>, down: Option<String>) -> Self {
        Self {
            up: up.into(),
            down,
        }
    }

    /// Whether the script carries downgrade SQL.
    pub fn is_reversible(&self) -> bool {
        self.down.is_some()
    }
}

#[async_trait::async_trait]
impl MigrationScript for SqlScript {
    async fn upgrade(&self, op: &mut Operations<'_>) -> MigrateResult<()> {
        run_sql(op, &self.up).await
    }

    async fn downgrade(&self, op: &mut Operations<'_>) -> MigrateResult<()> {
        match &self.down {
            Some(sql) => run_sql(op, sql).await,
            None => Err(MigrationError::Irreversible(op.revision().to_string())),
        }
    }
}

/// Execute script text, skipping files that hold only comments.
async fn run_sql(op: &mut Operations<'_>, sql: &str) -> MigrateResult<()> {
    if is_blank(sql) {
        return Ok(());
    }
    op.execute(sql).await
}

fn is_blank(sql: &str) -> bool {
    sql.lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with("--"))
}

/// Wraps a procedure so its downgrade always reports irreversibility.
pub(crate) struct Irreversible(pub(crate) Arc<dyn MigrationScript>);

#[async_trait::async_trait]
impl MigrationScript for Irreversible {
    async fn upgrade(&self, op: &mut Operations<'_>) -> MigrateResult<()> {
        self.0.upgrade(op).await
    }
}

/// One versioned schema change.
#[derive(Clone)]
pub struct Revision {
    /// Unique identifier.
    pub id: RevisionId,
    /// Parent revisions; empty for the root, several for a merge.
    pub parents: Vec<RevisionId>,
    /// Human-readable label.
    pub label: String,
    /// When the revision was authored.
    pub create_date: Option<DateTime<Utc>>,
    /// Directory the revision was loaded from, if any.
    pub path: Option<PathBuf>,
    script: Arc<dyn MigrationScript>,
}

impl Revision {
    /// Create a revision.
    pub fn new(
        id: RevisionId,
        parents: Vec<RevisionId>,
        label: impl Into<String>,
        script: Arc<dyn MigrationScript>,
    ) -> Self {
        Self {
            id,
            parents,
            label: label.into(),
            create_date: None,
            path: None,
            script,
        }
    }

    /// Set the creation date.
    pub fn with_create_date(mut self, date: DateTime<Utc>) -> Self {
        self.create_date = Some(date);
        self
    }

    /// Set the source path.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Check if this is the root revision.
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// Check if this revision merges several parents.
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    /// The procedure object.
    pub fn script(&self) -> &Arc<dyn MigrationScript> {
        &self.script
    }
}

impl fmt::Debug for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Revision")
            .field("id", &self.id)
            .field("parents", &self.parents)
            .field("label", &self.label)
            .field("create_date", &self.create_date)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Direction of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Apply the revision.
    Upgrade,
    /// Reverse the revision.
    Downgrade,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upgrade => f.write_str("upgrade"),
            Self::Downgrade => f.write_str("downgrade"),
        }
    }
}

/// A unit of work: one revision in one direction.
#[derive(Debug, Clone)]
pub struct Step {
    /// The revision applied or undone.
    pub revision: Arc<Revision>,
    /// Which procedure runs.
    pub direction: Direction,
}

impl Step {
    /// Revision id of this step.
    pub fn id(&self) -> &RevisionId {
        &self.revision.id
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arrow = match self.direction {
            Direction::Upgrade => "->",
            Direction::Downgrade => "<-",
        };
        write!(f, "{} {}, {}", arrow, self.revision.id, self.revision.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revision_id_validation() {
        assert!(RevisionId::new("ae1027a6acf").is_ok());
        assert!(RevisionId::new("0001_initial").is_ok());
        assert!(RevisionId::new("").is_err());
        assert!(RevisionId::new("bad id").is_err());
        assert!(RevisionId::new("x'; DROP TABLE").is_err());
        assert!(RevisionId::new("a".repeat(65)).is_err());
    }

    #[test]
    fn test_revision_id_rejects_target_keywords() {
        for id in ["head", "heads", "base", "HEAD", "Base", "+1", "-2", "-abc", "+x"] {
            assert!(RevisionId::new(id).is_err(), "{} should be rejected", id);
        }
        assert!(RevisionId::new("head_2").is_ok());
        assert!(RevisionId::new("base-schema").is_ok());
        assert!(RevisionId::new("a-1").is_ok());
    }

    #[test]
    fn test_deserialize_validates_revision_id() {
        let id: RevisionId = serde_json::from_str("\"abc123\"").unwrap();
        assert_eq!(id.as_str(), "abc123");
        assert!(serde_json::from_str::<RevisionId>("\"head\"").is_err());
    }

    #[test]
    fn test_generated_ids_are_short_hex() {
        let a = RevisionId::generate();
        let b = RevisionId::generate();
        assert_eq!(a.as_str().len(), 12);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_comment_only_sql_is_blank() {
        assert!(is_blank("-- merge revision\n\n"));
        assert!(!is_blank("-- comment\nCREATE TABLE t (id INTEGER)"));
    }

    #[test]
    fn test_step_display() {
        let rev = Revision::new(
            RevisionId::new("abc").unwrap(),
            vec![],
            "create users",
            Arc::new(SqlScript::new("SELECT 1", None)),
        );
        let step = Step {
            revision: Arc::new(rev),
            direction: Direction::Downgrade,
        };
        assert_eq!(step.to_string(), "<- abc, create users");
    }
}
