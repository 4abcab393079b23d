//! Version tracking: the applied set stored alongside the schema.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::connection::{Connection, row_str};
use crate::ddl::SqlRenderer;
use crate::error::{MigrateResult, MigrationError};
use crate::revision::RevisionId;

/// Default name of the version table.
pub const DEFAULT_VERSION_TABLE: &str = "stratum_version";

/// A row of the version table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Applied revision.
    pub id: RevisionId,
    /// When it was recorded, if the backend reported it.
    pub applied_at: Option<DateTime<Utc>>,
}

/// Persists the applied set.
///
/// Every method receives the connection explicitly so tracker updates
/// join whatever transaction the runner has open.
#[async_trait::async_trait]
pub trait VersionTracker: Send + Sync {
    /// Create the version storage if it does not exist.
    async fn ensure(&self, conn: &mut dyn Connection) -> MigrateResult<()>;

    /// Applied revision ids.
    async fn current(&self, conn: &mut dyn Connection) -> MigrateResult<BTreeSet<RevisionId>> {
        Ok(self
            .records(conn)
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect())
    }

    /// Applied revisions with their timestamps, oldest first.
    async fn records(&self, conn: &mut dyn Connection) -> MigrateResult<Vec<VersionRecord>>;

    /// Record a revision as applied.
    async fn mark_applied(&self, conn: &mut dyn Connection, id: &RevisionId) -> MigrateResult<()>;

    /// Remove a revision from the applied set.
    async fn mark_unapplied(&self, conn: &mut dyn Connection, id: &RevisionId)
    -> MigrateResult<()>;

    /// Name of the version storage, used to derive the migration lock.
    fn table_name(&self) -> &str;

    /// Schema qualifier of the version storage.
    fn schema(&self) -> Option<&str> {
        None
    }
}

/// Tracks applied revisions in a table, one row per revision.
#[derive(Debug, Clone)]
pub struct TableVersionTracker {
    table: String,
    schema: Option<String>,
}

impl Default for TableVersionTracker {
    fn default() -> Self {
        Self::new(DEFAULT_VERSION_TABLE)
    }
}

impl TableVersionTracker {
    /// Create a tracker for `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            schema: None,
        }
    }

    /// Qualify the table with a schema.
    pub fn with_schema(mut self, schema: Option<&str>) -> Self {
        self.schema = schema.map(String::from);
        self
    }

    fn qualified(&self, conn: &dyn Connection) -> String {
        SqlRenderer::new(conn.dialect(), self.schema.as_deref()).table(&self.table)
    }
}

#[async_trait::async_trait]
impl VersionTracker for TableVersionTracker {
    async fn ensure(&self, conn: &mut dyn Connection) -> MigrateResult<()> {
        let table = self.qualified(conn);
        conn.execute(&format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
             version_num VARCHAR(64) NOT NULL PRIMARY KEY,\n    \
             applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP\n)",
            table
        ))
        .await
    }

    async fn records(&self, conn: &mut dyn Connection) -> MigrateResult<Vec<VersionRecord>> {
        let table = self.qualified(conn);
        let rows = conn
            .query(&format!(
                "SELECT version_num, applied_at FROM {} ORDER BY applied_at, version_num",
                table
            ))
            .await?;

        rows.iter()
            .map(|row| {
                let raw = row_str(row, "version_num").ok_or_else(|| {
                    MigrationError::database(format!("{} holds a NULL version_num", table))
                })?;
                let id = RevisionId::new(raw).map_err(|e| {
                    MigrationError::graph(format!("the version table holds an invalid id: {}", e))
                })?;
                let applied_at = row_str(row, "applied_at").and_then(|s| parse_timestamp(&s));
                Ok(VersionRecord { id, applied_at })
            })
            .collect()
    }

    async fn mark_applied(&self, conn: &mut dyn Connection, id: &RevisionId) -> MigrateResult<()> {
        let table = self.qualified(conn);
        debug!(revision = %id, table = %table, "Recording revision");
        conn.execute(&format!(
            "INSERT INTO {} (version_num) VALUES ({})",
            table,
            SqlRenderer::literal(id.as_str())
        ))
        .await
    }

    async fn mark_unapplied(
        &self,
        conn: &mut dyn Connection,
        id: &RevisionId,
    ) -> MigrateResult<()> {
        let table = self.qualified(conn);
        debug!(revision = %id, table = %table, "Removing revision");
        conn.execute(&format!(
            "DELETE FROM {} WHERE version_num = {}",
            table,
            SqlRenderer::literal(id.as_str())
        ))
        .await
    }

    fn table_name(&self) -> &str {
        &self.table
    }

    fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }
}

/// Parse the textual timestamps the backends return.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let trimmed = raw.split('+').next().unwrap_or(raw).trim();
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Keeps the applied set in memory, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryVersionTracker {
    applied: Mutex<BTreeMap<RevisionId, DateTime<Utc>>>,
}

impl MemoryVersionTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tracker that already records `ids`.
    pub fn with_applied<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = RevisionId>,
    {
        let now = Utc::now();
        Self {
            applied: Mutex::new(ids.into_iter().map(|id| (id, now)).collect()),
        }
    }
}

#[async_trait::async_trait]
impl VersionTracker for MemoryVersionTracker {
    async fn ensure(&self, _conn: &mut dyn Connection) -> MigrateResult<()> {
        Ok(())
    }

    async fn records(&self, _conn: &mut dyn Connection) -> MigrateResult<Vec<VersionRecord>> {
        let applied = self.applied.lock().await;
        let mut records: Vec<VersionRecord> = applied
            .iter()
            .map(|(id, at)| VersionRecord {
                id: id.clone(),
                applied_at: Some(*at),
            })
            .collect();
        records.sort_by(|a, b| a.applied_at.cmp(&b.applied_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn mark_applied(&self, _conn: &mut dyn Connection, id: &RevisionId) -> MigrateResult<()> {
        let mut applied = self.applied.lock().await;
        if applied.insert(id.clone(), Utc::now()).is_some() {
            return Err(MigrationError::database(format!(
                "revision '{}' is already recorded",
                id
            )));
        }
        Ok(())
    }

    async fn mark_unapplied(
        &self,
        _conn: &mut dyn Connection,
        id: &RevisionId,
    ) -> MigrateResult<()> {
        self.applied.lock().await.remove(id);
        Ok(())
    }

    fn table_name(&self) -> &str {
        DEFAULT_VERSION_TABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamps() {
        assert!(parse_timestamp("2024-03-01 12:30:00").is_some());
        assert!(parse_timestamp("2024-03-01 12:30:00.123456").is_some());
        assert!(parse_timestamp("2024-03-01T12:30:00Z").is_some());
        assert!(parse_timestamp("2024-03-01 12:30:00.5+00").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_default_table_name() {
        let tracker = TableVersionTracker::default().with_schema(Some("app"));
        assert_eq!(tracker.table_name(), "stratum_version");
        assert_eq!(tracker.schema(), Some("app"));
    }
}
