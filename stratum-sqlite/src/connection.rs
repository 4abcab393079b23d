//! SQLite connection wrapper.

use stratum_migrate::{Connection, Dialect, MigrateResult, Row, TableSchema};
use tracing::debug;

use crate::config::{DatabasePath, SqliteConfig};
use crate::error::SqliteResult;
use crate::{introspect, types};

/// A single SQLite connection driven on a background thread.
///
/// Migrations run on one session, so there is no pool: `BEGIN`, the
/// statements of a step and `COMMIT` all go through this connection.
pub struct SqliteConnection {
    conn: tokio_rusqlite::Connection,
    config: SqliteConfig,
    dialect: Dialect,
}

impl SqliteConnection {
    /// Open a connection and apply the configured pragmas.
    pub async fn open(config: SqliteConfig) -> SqliteResult<Self> {
        let conn = match &config.path {
            DatabasePath::Memory => tokio_rusqlite::Connection::open_in_memory().await?,
            DatabasePath::File(path) => tokio_rusqlite::Connection::open(path.clone()).await?,
        };

        let init_sql = config.init_sql();
        conn.call(move |conn| {
            conn.execute_batch(&init_sql)?;
            Ok(())
        })
        .await?;

        debug!(path = %config.path_str(), "SQLite connection opened");
        Ok(Self {
            conn,
            config,
            dialect: Dialect::sqlite(),
        })
    }

    /// Open a connection from a URL such as `sqlite://./app.db`.
    pub async fn connect(url: &str) -> SqliteResult<Self> {
        Self::open(SqliteConfig::from_url(url)?).await
    }

    /// The configuration this connection was opened with.
    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    /// Get the inner connection.
    pub fn inner(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Execute one or more statements.
    pub async fn execute_batch(&self, sql: &str) -> SqliteResult<()> {
        let sql = sql.to_string();
        debug!(sql = %sql, "Executing batch");

        self.conn
            .call(move |conn| Ok(conn.execute_batch(&sql)?))
            .await
            .map_err(Into::into)
    }

    /// Run a query and return its rows keyed by column name.
    pub async fn query_rows(&self, sql: &str) -> SqliteResult<Vec<Row>> {
        let sql = sql.to_string();
        debug!(sql = %sql, "Executing query");

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let columns: Vec<String> = stmt
                    .column_names()
                    .iter()
                    .map(|s| s.to_string())
                    .collect();

                let mut rows = stmt.query([])?;
                let mut results = Vec::new();
                while let Some(row) = rows.next()? {
                    let mut map = Row::new();
                    for (i, col) in columns.iter().enumerate() {
                        map.insert(col.clone(), types::to_json(row.get_ref(i)?));
                    }
                    results.push(map);
                }
                Ok(results)
            })
            .await
            .map_err(Into::into)
    }
}

#[async_trait::async_trait]
impl Connection for SqliteConnection {
    fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    async fn execute(&mut self, sql: &str) -> MigrateResult<()> {
        Ok(self.execute_batch(sql).await?)
    }

    async fn query(&mut self, sql: &str) -> MigrateResult<Vec<Row>> {
        Ok(self.query_rows(sql).await?)
    }

    /// Foreign keys are checked at commit so table rebuilds can drop and
    /// rename referenced tables.
    async fn begin(&mut self) -> MigrateResult<()> {
        Ok(self
            .execute_batch("BEGIN; PRAGMA defer_foreign_keys = ON")
            .await?)
    }

    async fn table_schema(&mut self, table: &str, schema: Option<&str>) -> MigrateResult<TableSchema> {
        Ok(introspect::table_schema(self, table, schema).await?)
    }
}
