//! The operation executor handed to revision procedures.

use tracing::debug;

use crate::batch::BatchAlterTable;
use crate::connection::{Connection, Dialect, Row};
use crate::ddl::{AlterColumn, Column, ForeignKey, Index, SqlRenderer, Table};
use crate::error::MigrateResult;
use crate::revision::RevisionId;

const BATCH_HINT: &str = "use batch_alter_table to rebuild the table instead";

/// Declarative schema operations bound to the step's connection.
///
/// Every operation renders its DDL and executes it immediately. Operations
/// the backend cannot perform in place fail with a `BackendCapability`
/// error; [`batch_alter_table`](Self::batch_alter_table) rebuilds the table
/// for those.
///
/// ```rust,ignore
/// async fn upgrade(&self, op: &mut Operations<'_>) -> MigrateResult<()> {
///     op.create_table(
///         &Table::new("accounts")
///             .column(Column::new("id", "INTEGER").primary_key())
///             .column(Column::new("name", "VARCHAR(50)").not_null()),
///     )
///     .await?;
///     op.batch_alter_table("accounts", |batch| {
///         batch.alter_column(AlterColumn::new("name").set_type("VARCHAR(200)"));
///     })
///     .await
/// }
/// ```
pub struct Operations<'a> {
    conn: &'a mut dyn Connection,
    renderer: SqlRenderer,
    revision: RevisionId,
}

impl<'a> Operations<'a> {
    /// Bind operations to a connection for one revision.
    pub fn new(conn: &'a mut dyn Connection, schema: Option<&str>, revision: RevisionId) -> Self {
        let renderer = SqlRenderer::new(conn.dialect(), schema);
        Self {
            conn,
            renderer,
            revision,
        }
    }

    /// The revision whose procedure is running.
    pub fn revision(&self) -> &RevisionId {
        &self.revision
    }

    /// Capabilities of the backend.
    pub fn dialect(&self) -> &Dialect {
        self.renderer.dialect()
    }

    /// The DDL renderer.
    pub fn renderer(&self) -> &SqlRenderer {
        &self.renderer
    }

    /// Execute a raw statement.
    pub async fn execute(&mut self, sql: &str) -> MigrateResult<()> {
        debug!(revision = %self.revision, sql = %sql, "Executing");
        self.conn.execute(sql).await
    }

    /// Run a raw query, for data migrations.
    pub async fn fetch(&mut self, sql: &str) -> MigrateResult<Vec<Row>> {
        debug!(revision = %self.revision, sql = %sql, "Fetching");
        self.conn.query(sql).await
    }

    async fn execute_all(&mut self, stmts: Vec<String>) -> MigrateResult<()> {
        for sql in stmts {
            self.execute(&sql).await?;
        }
        Ok(())
    }

    /// Create a table.
    pub async fn create_table(&mut self, table: &Table) -> MigrateResult<()> {
        let sql = self.renderer.create_table(table);
        self.execute(&sql).await
    }

    /// Drop a table.
    pub async fn drop_table(&mut self, name: &str) -> MigrateResult<()> {
        let sql = self.renderer.drop_table(name);
        self.execute(&sql).await
    }

    /// Rename a table.
    pub async fn rename_table(&mut self, old: &str, new: &str) -> MigrateResult<()> {
        let sql = self.renderer.rename_table(old, new);
        self.execute(&sql).await
    }

    /// Add a column.
    pub async fn add_column(&mut self, table: &str, column: &Column) -> MigrateResult<()> {
        let sql = self.renderer.add_column(table, column);
        self.execute(&sql).await
    }

    /// Drop a column.
    pub async fn drop_column(&mut self, table: &str, column: &str) -> MigrateResult<()> {
        if !self.dialect().drop_column {
            return Err(self.dialect().unsupported("DROP COLUMN").with_hint(BATCH_HINT));
        }
        let sql = self.renderer.drop_column(table, column);
        self.execute(&sql).await
    }

    /// Rename a column or change its type, nullability or default.
    pub async fn alter_column(&mut self, table: &str, alter: &AlterColumn) -> MigrateResult<()> {
        if alter.changes_definition() && !self.dialect().alter_column {
            return Err(self.dialect().unsupported("ALTER COLUMN").with_hint(BATCH_HINT));
        }
        if alter.new_name.is_some() && !self.dialect().rename_column {
            return Err(self.dialect().unsupported("RENAME COLUMN").with_hint(BATCH_HINT));
        }
        let stmts = self.renderer.alter_column(table, alter);
        self.execute_all(stmts).await
    }

    /// Create an index.
    pub async fn create_index(&mut self, index: &Index) -> MigrateResult<()> {
        let sql = self.renderer.create_index(index);
        self.execute(&sql).await
    }

    /// Drop an index.
    pub async fn drop_index(&mut self, name: &str, table: &str) -> MigrateResult<()> {
        let sql = self.renderer.drop_index(name, table);
        self.execute(&sql).await
    }

    /// Add a foreign key to an existing table.
    pub async fn create_foreign_key(&mut self, table: &str, fk: &ForeignKey) -> MigrateResult<()> {
        if !self.dialect().alter_constraints {
            return Err(self
                .dialect()
                .unsupported("ADD CONSTRAINT")
                .with_hint("declare the foreign key in create_table or rebuild the table"));
        }
        let sql = self.renderer.create_foreign_key(table, fk);
        self.execute(&sql).await
    }

    /// Drop a named constraint.
    pub async fn drop_constraint(&mut self, table: &str, name: &str) -> MigrateResult<()> {
        if !self.dialect().alter_constraints {
            return Err(self.dialect().unsupported("DROP CONSTRAINT"));
        }
        let sql = self.renderer.drop_constraint(table, name);
        self.execute(&sql).await
    }

    /// Create a named enum type.
    pub async fn create_enum(&mut self, name: &str, values: &[&str]) -> MigrateResult<()> {
        if !self.dialect().enum_types {
            return Err(self
                .dialect()
                .unsupported("enum types")
                .with_hint("use a CHECK constraint or an inline ENUM column type"));
        }
        let sql = self.renderer.create_enum(name, values);
        self.execute(&sql).await
    }

    /// Drop a named enum type.
    pub async fn drop_enum(&mut self, name: &str) -> MigrateResult<()> {
        if !self.dialect().enum_types {
            return Err(self.dialect().unsupported("enum types"));
        }
        let sql = self.renderer.drop_enum(name);
        self.execute(&sql).await
    }

    /// Buffer column and index changes for one table and apply them together.
    ///
    /// The table is rebuilt through a shadow copy when the backend cannot
    /// apply a buffered change in place (see [`Recreate`](crate::Recreate)).
    pub async fn batch_alter_table<F>(&mut self, table: &str, build: F) -> MigrateResult<()>
    where
        F: FnOnce(&mut BatchAlterTable) + Send,
    {
        let mut batch = BatchAlterTable::new(table);
        build(&mut batch);
        batch.apply(self).await
    }

    pub(crate) fn connection(&mut self) -> &mut dyn Connection {
        &mut *self.conn
    }

    pub(crate) fn schema_name(&self) -> Option<&str> {
        self.renderer.schema()
    }
}
