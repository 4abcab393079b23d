//! Batch mode: buffered table changes, applied in place or by rebuilding.
//!
//! A rebuild copies the table through a shadow table:
//!
//! ```text
//! introspect ─▶ plan + validate ─▶ CREATE _stratum_tmp_<t> ─▶ INSERT .. SELECT
//!                                   ─▶ DROP <t> ─▶ RENAME shadow ─▶ CREATE INDEX ..
//! ```
//!
//! Every check that can fail runs before the shadow table exists.

use tracing::{debug, info};

use crate::connection::{Dialect, row_i64};
use crate::ddl::{AlterColumn, Column, Index, Table, TableSchema};
use crate::error::{MigrateResult, MigrationError};
use crate::ops::Operations;

/// Prefix of the shadow table used during a rebuild.
pub const SHADOW_PREFIX: &str = "_stratum_tmp_";

/// When a batch rebuilds the table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Recreate {
    /// Rebuild only if some buffered change cannot be applied in place.
    #[default]
    Auto,
    /// Always rebuild.
    Always,
    /// Never rebuild; unsupported changes fail.
    Never,
}

/// A buffered batch operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Add a column.
    AddColumn(Column),
    /// Drop a column.
    DropColumn(String),
    /// Alter a column.
    AlterColumn(AlterColumn),
    /// Create an index.
    CreateIndex(Index),
    /// Drop an index.
    DropIndex(String),
}

/// Buffered changes to one table.
#[derive(Debug, Clone)]
pub struct BatchAlterTable {
    table: String,
    recreate: Recreate,
    ops: Vec<BatchOp>,
}

impl BatchAlterTable {
    /// Start a batch for `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            recreate: Recreate::Auto,
            ops: Vec::new(),
        }
    }

    /// The target table.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Buffered operations in order.
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Choose when to rebuild.
    pub fn recreate(&mut self, mode: Recreate) -> &mut Self {
        self.recreate = mode;
        self
    }

    /// Add a column.
    pub fn add_column(&mut self, column: Column) -> &mut Self {
        self.ops.push(BatchOp::AddColumn(column));
        self
    }

    /// Drop a column.
    pub fn drop_column(&mut self, name: &str) -> &mut Self {
        self.ops.push(BatchOp::DropColumn(name.to_string()));
        self
    }

    /// Alter a column.
    pub fn alter_column(&mut self, alter: AlterColumn) -> &mut Self {
        self.ops.push(BatchOp::AlterColumn(alter));
        self
    }

    /// Create an index on the table.
    pub fn create_index(&mut self, name: &str, columns: &[&str]) -> &mut Self {
        self.ops
            .push(BatchOp::CreateIndex(Index::new(name, &self.table, columns)));
        self
    }

    /// Create a unique index on the table.
    pub fn create_unique_index(&mut self, name: &str, columns: &[&str]) -> &mut Self {
        self.ops.push(BatchOp::CreateIndex(
            Index::new(name, &self.table, columns).unique(),
        ));
        self
    }

    /// Drop an index of the table.
    pub fn drop_index(&mut self, name: &str) -> &mut Self {
        self.ops.push(BatchOp::DropIndex(name.to_string()));
        self
    }

    /// Whether some buffered change cannot be applied in place.
    pub fn needs_recreate(&self, dialect: &Dialect) -> bool {
        self.ops.iter().any(|op| match op {
            BatchOp::AddColumn(c) => {
                ((c.primary_key || c.unique) && !dialect.alter_constraints)
                    || (requires_value(c) && !dialect.alter_column)
            }
            BatchOp::DropColumn(_) => !dialect.drop_column,
            BatchOp::AlterColumn(a) => {
                (a.changes_definition() && !dialect.alter_column)
                    || (a.new_name.is_some() && !dialect.rename_column)
            }
            BatchOp::CreateIndex(_) | BatchOp::DropIndex(_) => false,
        })
    }

    pub(crate) async fn apply(self, op: &mut Operations<'_>) -> MigrateResult<()> {
        if self.ops.is_empty() {
            return Ok(());
        }

        let rebuild = match self.recreate {
            Recreate::Always => true,
            Recreate::Never => false,
            Recreate::Auto => self.needs_recreate(op.dialect()),
        };

        let schema = op.schema_name().map(String::from);
        let current = match op
            .connection()
            .table_schema(&self.table, schema.as_deref())
            .await
        {
            Ok(current) => current,
            Err(MigrationError::BackendCapability { .. }) if !rebuild => {
                return self.apply_unchecked(op).await;
            }
            Err(e) => return Err(e),
        };

        // Validation covers the whole batch before any statement runs.
        let plan = RebuildPlan::new(&self.table, &current, &self.ops)?;
        plan.check_data(op, &self.table).await?;

        if rebuild {
            plan.ensure_rebuildable(&self.table)?;
            self.rebuild(op, plan).await
        } else {
            self.apply_in_place(op).await
        }
    }

    /// In-place path for backends that cannot introspect tables.
    async fn apply_unchecked(self, op: &mut Operations<'_>) -> MigrateResult<()> {
        if let Some(column) = self.ops.iter().find_map(|item| match item {
            BatchOp::AddColumn(c) if requires_value(c) => Some(c.name.clone()),
            _ => None,
        }) {
            let source = op.renderer().table(&self.table);
            ensure_empty(op, &self.table, &source, &column).await?;
        }
        self.apply_in_place(op).await
    }

    async fn apply_in_place(self, op: &mut Operations<'_>) -> MigrateResult<()> {
        let Self { table, ops, .. } = self;
        debug!(table = %table, ops = ops.len(), "Applying batch in place");

        for item in ops {
            match item {
                BatchOp::AddColumn(column) => op.add_column(&table, &column).await?,
                BatchOp::DropColumn(name) => op.drop_column(&table, &name).await?,
                BatchOp::AlterColumn(alter) => op.alter_column(&table, &alter).await?,
                BatchOp::CreateIndex(index) => op.create_index(&index).await?,
                BatchOp::DropIndex(name) => op.drop_index(&name, &table).await?,
            }
        }
        Ok(())
    }

    async fn rebuild(self, op: &mut Operations<'_>, plan: RebuildPlan) -> MigrateResult<()> {
        let renderer = op.renderer().clone();
        let source = renderer.table(&self.table);

        let shadow_name = format!("{}{}", SHADOW_PREFIX, self.table);
        let mut shadow = plan.target.clone();
        shadow.name = shadow_name.clone();
        // Constraint names can be schema-global; let the backend name the copies.
        for fk in &mut shadow.foreign_keys {
            fk.name = None;
        }

        info!(table = %self.table, shadow = %shadow_name, "Rebuilding table");

        op.execute(&renderer.create_table(&shadow)).await?;

        let (targets, sources): (Vec<String>, Vec<String>) = plan
            .copies
            .iter()
            .map(|(target, source)| (renderer.quote(target), renderer.quote(source)))
            .unzip();
        if !targets.is_empty() {
            op.execute(&format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                renderer.table(&shadow_name),
                targets.join(", "),
                sources.join(", "),
                source
            ))
            .await?;
        }

        op.execute(&renderer.drop_table(&self.table)).await?;
        op.execute(&renderer.rename_table(&shadow_name, &self.table))
            .await?;

        for index in &plan.indexes {
            op.create_index(index).await?;
        }

        Ok(())
    }
}

/// A NOT NULL column without a default needs a value for every existing row.
fn requires_value(column: &Column) -> bool {
    !column.nullable && column.default.is_none()
}

async fn ensure_empty(
    op: &mut Operations<'_>,
    table: &str,
    source: &str,
    column: &str,
) -> MigrateResult<()> {
    let rows = count(op, &format!("SELECT COUNT(*) AS n FROM {}", source)).await?;
    if rows > 0 {
        return Err(MigrationError::batch(
            table,
            format!(
                "cannot add NOT NULL column '{}' without a default to a table holding {} rows; \
                 add it as nullable, backfill it, then alter it to NOT NULL",
                column, rows
            ),
        ));
    }
    Ok(())
}

async fn count(op: &mut Operations<'_>, sql: &str) -> MigrateResult<i64> {
    let rows = op.fetch(sql).await?;
    Ok(rows.first().and_then(|r| row_i64(r, "n")).unwrap_or(0))
}

/// The table a rebuild produces and how rows are carried over.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RebuildPlan {
    target: Table,
    /// `(target column, source column)` pairs copied from the old table.
    copies: Vec<(String, String)>,
    indexes: Vec<Index>,
    /// Added NOT NULL columns without a default.
    not_null_added: Vec<String>,
    /// `(source column, target column)` pairs becoming NOT NULL.
    not_null_altered: Vec<(String, String)>,
    /// Surviving indexes the rebuild could not recreate.
    opaque_indexes: Vec<String>,
    /// Table features the rebuild would lose.
    blockers: Vec<String>,
}

impl RebuildPlan {
    fn new(table: &str, current: &TableSchema, ops: &[BatchOp]) -> MigrateResult<Self> {
        let err = |msg: String| MigrationError::batch(table, msg);

        let mut columns: Vec<(Column, Option<String>)> = current
            .table
            .columns
            .iter()
            .map(|c| (c.clone(), Some(c.name.clone())))
            .collect();
        let mut foreign_keys = current.table.foreign_keys.clone();
        let mut indexes = current.indexes.clone();
        let mut opaque_indexes = current.opaque_indexes.clone();
        let mut primary_key_order = current.table.primary_key_order.clone();
        let mut not_null_added: Vec<String> = Vec::new();
        let mut not_null_altered: Vec<(String, String)> = Vec::new();

        let position =
            |columns: &[(Column, Option<String>)], name: &str| columns.iter().position(|(c, _)| c.name == name);

        for item in ops {
            match item {
                BatchOp::AddColumn(column) => {
                    if position(&columns, &column.name).is_some() {
                        return Err(err(format!("column '{}' already exists", column.name)));
                    }
                    if requires_value(column) {
                        not_null_added.push(column.name.clone());
                    }
                    columns.push((column.clone(), None));
                }
                BatchOp::DropColumn(name) => {
                    let idx = position(&columns, name)
                        .ok_or_else(|| err(format!("column '{}' does not exist", name)))?;
                    let (_, source) = columns.remove(idx);

                    indexes.retain(|i| {
                        let keep = !i.columns.contains(name);
                        if !keep {
                            debug!(index = %i.name, column = %name, "Dropping index of removed column");
                        }
                        keep
                    });
                    foreign_keys.retain(|fk| !fk.columns.contains(name));
                    primary_key_order.retain(|c| c != name);
                    not_null_added.retain(|c| c != name);
                    if let Some(source) = source {
                        not_null_altered.retain(|(s, _)| *s != source);
                    }
                }
                BatchOp::AlterColumn(alter) => {
                    let idx = position(&columns, &alter.name)
                        .ok_or_else(|| err(format!("column '{}' does not exist", alter.name)))?;

                    if let Some(new_name) = &alter.new_name {
                        if *new_name != alter.name && position(&columns, new_name).is_some() {
                            return Err(err(format!(
                                "cannot rename column '{}' to '{}': the name is taken",
                                alter.name, new_name
                            )));
                        }
                    }

                    let (column, source) = &mut columns[idx];
                    let was_nullable = column.nullable;
                    alter.apply(column);

                    if alter.nullable == Some(false) && was_nullable {
                        match source {
                            Some(source) => {
                                not_null_altered.push((source.clone(), column.name.clone()))
                            }
                            None if column.default.is_none() => {
                                not_null_added.push(column.name.clone())
                            }
                            None => {}
                        }
                    }

                    if let Some(new_name) = &alter.new_name {
                        rename_in(&mut not_null_added, &alter.name, new_name);
                        for index in &mut indexes {
                            rename_in(&mut index.columns, &alter.name, new_name);
                        }
                        for fk in &mut foreign_keys {
                            rename_in(&mut fk.columns, &alter.name, new_name);
                        }
                        rename_in(&mut primary_key_order, &alter.name, new_name);
                    }
                }
                BatchOp::CreateIndex(index) => {
                    if indexes.iter().any(|i| i.name == index.name)
                        || opaque_indexes.contains(&index.name)
                    {
                        return Err(err(format!("index '{}' already exists", index.name)));
                    }
                    if let Some(missing) = index
                        .columns
                        .iter()
                        .find(|c| position(&columns, c).is_none())
                    {
                        return Err(err(format!(
                            "index '{}' references missing column '{}'",
                            index.name, missing
                        )));
                    }
                    let mut index = index.clone();
                    index.table = table.to_string();
                    indexes.push(index);
                }
                BatchOp::DropIndex(name) => {
                    if let Some(idx) = indexes.iter().position(|i| i.name == *name) {
                        indexes.remove(idx);
                    } else if let Some(idx) = opaque_indexes.iter().position(|i| i == name) {
                        opaque_indexes.remove(idx);
                    } else {
                        return Err(err(format!("index '{}' does not exist", name)));
                    }
                }
            }
        }

        if columns.is_empty() {
            return Err(err("cannot drop every column of the table".to_string()));
        }

        let copies = columns
            .iter()
            .filter_map(|(c, source)| source.as_ref().map(|s| (c.name.clone(), s.clone())))
            .collect();

        Ok(Self {
            target: Table {
                name: table.to_string(),
                columns: columns.into_iter().map(|(c, _)| c).collect(),
                foreign_keys,
                primary_key_order,
            },
            copies,
            indexes,
            not_null_added,
            not_null_altered,
            opaque_indexes,
            blockers: current.rebuild_blockers.clone(),
        })
    }

    /// Check the existing rows against the planned NOT NULL columns.
    async fn check_data(&self, op: &mut Operations<'_>, table: &str) -> MigrateResult<()> {
        let renderer = op.renderer().clone();
        let source = renderer.table(table);

        if let Some(column) = self.not_null_added.first() {
            ensure_empty(op, table, &source, column).await?;
        }

        for (source_column, target_column) in &self.not_null_altered {
            let nulls = count(
                op,
                &format!(
                    "SELECT COUNT(*) AS n FROM {} WHERE {} IS NULL",
                    source,
                    renderer.quote(source_column)
                ),
            )
            .await?;
            if nulls > 0 {
                return Err(MigrationError::batch(
                    table,
                    format!(
                        "column '{}' holds {} NULL values; backfill it before making it NOT NULL",
                        target_column, nulls
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Fail when the rebuilt table would silently differ from the original.
    fn ensure_rebuildable(&self, table: &str) -> MigrateResult<()> {
        let mut reasons = self.blockers.clone();
        reasons.extend(
            self.opaque_indexes
                .iter()
                .map(|name| format!("index '{}' cannot be recreated", name)),
        );
        if reasons.is_empty() {
            return Ok(());
        }
        Err(MigrationError::batch(
            table,
            format!(
                "the table cannot be rebuilt without losing its definition: {}",
                reasons.join("; ")
            ),
        ))
    }
}

fn rename_in(names: &mut [String], old: &str, new: &str) {
    for name in names.iter_mut() {
        if name == old {
            *name = new.to_string();
        }
    }
}
