//! Migration lock to prevent concurrent runs against one database.

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::connection::{Connection, row_i64};
use crate::ddl::SqlRenderer;
use crate::error::{MigrateResult, MigrationError};

/// Identifies the lock guarding one version table.
///
/// Backends with session locks (PostgreSQL advisory locks, MySQL
/// `GET_LOCK`) use [`key`](Self::key) or [`name`](Self::name); the others
/// claim a row in [`table`](Self::table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationLock {
    key: i64,
    name: String,
    table: String,
    schema: Option<String>,
}

impl MigrationLock {
    /// Derive the lock for a version table.
    pub fn for_version_table(version_table: &str, schema: Option<&str>) -> Self {
        let qualified = match schema {
            Some(schema) => format!("{}.{}", schema, version_table),
            None => version_table.to_string(),
        };
        let digest = Sha256::digest(qualified.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        let key = i64::from_be_bytes(bytes);

        Self {
            key,
            name: format!("stratum_{:016x}", key as u64),
            table: format!("{}_lock", version_table),
            schema: schema.map(String::from),
        }
    }

    /// Numeric key for advisory locks.
    pub fn key(&self) -> i64 {
        self.key
    }

    /// Lock name for named locks (at most 24 characters).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the lock table.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Schema qualifier of the lock table.
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }
}

/// Claim the lock row, failing with `ConcurrentMigration` when it is taken.
pub async fn acquire_table_lock<C>(conn: &mut C, lock: &MigrationLock) -> MigrateResult<()>
where
    C: Connection + ?Sized,
{
    let table = SqlRenderer::new(conn.dialect(), lock.schema()).table(lock.table());

    conn.execute(&format!(
        "CREATE TABLE IF NOT EXISTS {} (id INTEGER NOT NULL PRIMARY KEY, locked_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP)",
        table
    ))
    .await?;

    match conn
        .execute(&format!("INSERT INTO {} (id) VALUES (1)", table))
        .await
    {
        Ok(()) => {
            debug!(table = %table, "Migration lock acquired");
            Ok(())
        }
        Err(err) => {
            let rows = conn
                .query(&format!("SELECT COUNT(*) AS held FROM {}", table))
                .await?;
            let held = rows.first().and_then(|r| row_i64(r, "held")).unwrap_or(0);
            if held > 0 {
                Err(MigrationError::ConcurrentMigration(format!(
                    "lock row present in {}",
                    lock.table()
                )))
            } else {
                Err(err)
            }
        }
    }
}

/// Remove the lock row.
pub async fn release_table_lock<C>(conn: &mut C, lock: &MigrationLock) -> MigrateResult<()>
where
    C: Connection + ?Sized,
{
    let table = SqlRenderer::new(conn.dialect(), lock.schema()).table(lock.table());
    conn.execute(&format!("DELETE FROM {} WHERE id = 1", table))
        .await?;
    debug!(table = %table, "Migration lock released");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_key_is_stable_per_table() {
        let a = MigrationLock::for_version_table("stratum_version", None);
        let b = MigrationLock::for_version_table("stratum_version", None);
        let c = MigrationLock::for_version_table("stratum_version", Some("tenant"));

        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
        assert_eq!(a.table(), "stratum_version_lock");
        assert_eq!(c.schema(), Some("tenant"));
    }

    #[test]
    fn test_lock_name_fits_named_lock_limits() {
        let lock = MigrationLock::for_version_table(&"v".repeat(60), Some("some_schema"));
        assert!(lock.name().len() <= 64);
        assert!(lock.name().starts_with("stratum_"));
    }
}
