//! The connection seam implemented by each backend crate.

use serde_json::Value;

use crate::ddl::TableSchema;
use crate::error::{MigrateResult, MigrationError};
use crate::lock::{self, MigrationLock};

/// A row returned by [`Connection::query`], keyed by column name.
pub type Row = serde_json::Map<String, Value>;

/// What a backend can do with DDL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialect {
    /// Backend name used in messages.
    pub name: &'static str,
    /// Identifier quote character.
    pub quote: char,
    /// DDL participates in transactions.
    pub transactional_ddl: bool,
    /// `ALTER TABLE .. ALTER COLUMN` (type, nullability, default) is supported.
    pub alter_column: bool,
    /// `ALTER TABLE .. RENAME COLUMN` is supported.
    pub rename_column: bool,
    /// `ALTER TABLE .. DROP COLUMN` is supported.
    pub drop_column: bool,
    /// Constraints can be added or dropped after table creation.
    pub alter_constraints: bool,
    /// Named enum types (`CREATE TYPE .. AS ENUM`) exist.
    pub enum_types: bool,
    /// `DROP INDEX` must name the table (`DROP INDEX i ON t`).
    pub drop_index_on_table: bool,
}

impl Dialect {
    /// SQLite: transactional DDL, but most ALTERs need a table rebuild.
    pub const fn sqlite() -> Self {
        Self {
            name: "sqlite",
            quote: '"',
            transactional_ddl: true,
            alter_column: false,
            rename_column: true,
            drop_column: false,
            alter_constraints: false,
            enum_types: false,
            drop_index_on_table: false,
        }
    }

    /// PostgreSQL: everything in place, inside transactions.
    pub const fn postgres() -> Self {
        Self {
            name: "postgres",
            quote: '"',
            transactional_ddl: true,
            alter_column: true,
            rename_column: true,
            drop_column: true,
            alter_constraints: true,
            enum_types: true,
            drop_index_on_table: false,
        }
    }

    /// MySQL: DDL commits implicitly.
    pub const fn mysql() -> Self {
        Self {
            name: "mysql",
            quote: '`',
            transactional_ddl: false,
            alter_column: false,
            rename_column: true,
            drop_column: true,
            alter_constraints: true,
            enum_types: false,
            drop_index_on_table: true,
        }
    }

    /// A backend capability error for `operation` on this dialect.
    pub fn unsupported(&self, operation: impl Into<String>) -> MigrationError {
        MigrationError::capability(self.name, operation)
    }
}

/// An open database connection.
///
/// Implementations run statements on a single session so that `begin`,
/// the statements of a step and `commit` share one transaction.
#[async_trait::async_trait]
pub trait Connection: Send {
    /// Capabilities of the backend.
    fn dialect(&self) -> &Dialect;

    /// Execute one or more statements, discarding results.
    async fn execute(&mut self, sql: &str) -> MigrateResult<()>;

    /// Run a query and collect its rows.
    async fn query(&mut self, sql: &str) -> MigrateResult<Vec<Row>>;

    /// Open a transaction.
    async fn begin(&mut self) -> MigrateResult<()> {
        self.execute("BEGIN").await
    }

    /// Commit the open transaction.
    async fn commit(&mut self) -> MigrateResult<()> {
        self.execute("COMMIT").await
    }

    /// Roll back the open transaction.
    async fn rollback(&mut self) -> MigrateResult<()> {
        self.execute("ROLLBACK").await
    }

    /// Take the migration lock, failing fast if another run holds it.
    ///
    /// The default implementation claims a row in a lock table.
    async fn acquire_lock(&mut self, lock: &MigrationLock) -> MigrateResult<()> {
        lock::acquire_table_lock(self, lock).await
    }

    /// Release the migration lock.
    async fn release_lock(&mut self, lock: &MigrationLock) -> MigrateResult<()> {
        lock::release_table_lock(self, lock).await
    }

    /// Introspect a table for batch rebuilds.
    async fn table_schema(
        &mut self,
        _table: &str,
        _schema: Option<&str>,
    ) -> MigrateResult<TableSchema> {
        Err(self.dialect().unsupported("table introspection"))
    }
}

/// Read a column as a string.
pub fn row_str(row: &Row, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Read a column as an integer, accepting numeric strings.
pub fn row_i64(row: &Row, column: &str) -> Option<i64> {
    match row.get(column)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

/// Read a column as a boolean (`1`, `t`, `true`, `YES` are true).
pub fn row_bool(row: &Row, column: &str) -> Option<bool> {
    match row.get(column)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        Value::String(s) => Some(matches!(
            s.to_ascii_lowercase().as_str(),
            "1" | "t" | "true" | "y" | "yes"
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_row_helpers() {
        let r = row(json!({
            "name": "users",
            "count": "42",
            "n": 7,
            "flag": "t",
            "missing": null
        }));

        assert_eq!(row_str(&r, "name").as_deref(), Some("users"));
        assert_eq!(row_str(&r, "n").as_deref(), Some("7"));
        assert_eq!(row_str(&r, "missing"), None);
        assert_eq!(row_i64(&r, "count"), Some(42));
        assert_eq!(row_i64(&r, "n"), Some(7));
        assert_eq!(row_bool(&r, "flag"), Some(true));
        assert_eq!(row_bool(&r, "n"), Some(true));
        assert_eq!(row_i64(&r, "absent"), None);
    }

    #[test]
    fn test_dialect_capabilities() {
        assert!(!Dialect::sqlite().alter_column);
        assert!(Dialect::postgres().enum_types);
        assert!(!Dialect::mysql().transactional_ddl);
        assert_eq!(Dialect::mysql().quote, '`');

        let err = Dialect::sqlite().unsupported("ALTER COLUMN");
        assert!(err.to_string().contains("sqlite"));
    }
}
