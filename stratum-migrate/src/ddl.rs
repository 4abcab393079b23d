//! Schema objects and their SQL rendering.

use crate::connection::Dialect;

/// A column definition.
///
/// `default` holds a raw SQL expression (`0`, `'draft'`, `CURRENT_TIMESTAMP`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// SQL type as written in DDL.
    pub sql_type: String,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Default expression.
    pub default: Option<String>,
    /// Part of the primary key.
    pub primary_key: bool,
    /// Carries a column-level UNIQUE constraint.
    pub unique: bool,
}

impl Column {
    /// Create a nullable column.
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            nullable: true,
            default: None,
            primary_key: false,
            unique: false,
        }
    }

    /// Disallow NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Set the default expression.
    pub fn default(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    /// Mark as (part of) the primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Add a UNIQUE constraint.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A foreign key from a table's columns to another table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    /// Constraint name; `None` lets the database choose.
    pub name: Option<String>,
    /// Referencing columns.
    pub columns: Vec<String>,
    /// Referenced table.
    pub ref_table: String,
    /// Referenced columns.
    pub ref_columns: Vec<String>,
    /// `ON DELETE` action (`CASCADE`, `SET NULL`, ...).
    pub on_delete: Option<String>,
}

impl ForeignKey {
    /// Create an unnamed foreign key.
    pub fn new(columns: &[&str], ref_table: impl Into<String>, ref_columns: &[&str]) -> Self {
        Self {
            name: None,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            ref_table: ref_table.into(),
            ref_columns: ref_columns.iter().map(|c| c.to_string()).collect(),
            on_delete: None,
        }
    }

    /// Name the constraint.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the `ON DELETE` action.
    pub fn on_delete(mut self, action: impl Into<String>) -> Self {
        self.on_delete = Some(action.into());
        self
    }
}

/// A table definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    /// Table name.
    pub name: String,
    /// Columns in order.
    pub columns: Vec<Column>,
    /// Foreign keys.
    pub foreign_keys: Vec<ForeignKey>,
    /// Primary key column order; empty means column order.
    pub primary_key_order: Vec<String>,
}

impl Table {
    /// Create an empty table definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            foreign_keys: Vec::new(),
            primary_key_order: Vec::new(),
        }
    }

    /// Append a column.
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Append a foreign key.
    pub fn foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    /// Look up a column.
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Order the primary key columns, for keys whose order differs from
    /// the column order.
    pub fn primary_key_order(mut self, columns: &[&str]) -> Self {
        self.primary_key_order = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Primary key column names in key order.
    pub fn primary_key(&self) -> Vec<&str> {
        let is_key = |name: &str| self.get_column(name).is_some_and(|c| c.primary_key);

        let mut key: Vec<&str> = self
            .primary_key_order
            .iter()
            .map(String::as_str)
            .filter(|name| is_key(name))
            .collect();
        for column in self.columns.iter().filter(|c| c.primary_key) {
            if !key.contains(&column.name.as_str()) {
                key.push(&column.name);
            }
        }
        key
    }
}

/// An index definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    /// Index name.
    pub name: String,
    /// Indexed table.
    pub table: String,
    /// Indexed columns.
    pub columns: Vec<String>,
    /// Whether the index is unique.
    pub unique: bool,
}

impl Index {
    /// Create a non-unique index.
    pub fn new(name: impl Into<String>, table: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
        }
    }

    /// Make the index unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// An introspected table with its indexes.
///
/// Features the model cannot express are listed instead of dropped: a
/// rebuild refuses to run while any remain, changes applied in place do not
/// touch them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Columns, primary key and foreign keys.
    pub table: Table,
    /// Secondary indexes, including those backing UNIQUE constraints.
    pub indexes: Vec<Index>,
    /// Indexes that exist but cannot be recreated (partial, expression,
    /// prefix).
    pub opaque_indexes: Vec<String>,
    /// Table features a rebuild would lose, such as CHECK constraints.
    pub rebuild_blockers: Vec<String>,
}

impl TableSchema {
    /// Wrap a table definition with no indexes.
    pub fn new(table: Table) -> Self {
        Self {
            table,
            indexes: Vec::new(),
            opaque_indexes: Vec::new(),
            rebuild_blockers: Vec::new(),
        }
    }

    /// Record a feature a rebuild would lose.
    pub fn block_rebuild(&mut self, reason: impl Into<String>) {
        self.rebuild_blockers.push(reason.into());
    }
}

/// Changes to an existing column.
///
/// ```rust
/// use stratum_migrate::AlterColumn;
///
/// let alter = AlterColumn::new("email").nullable(false).set_type("VARCHAR(320)");
/// assert!(alter.changes_definition());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlterColumn {
    /// Column to alter.
    pub name: String,
    /// New name.
    pub new_name: Option<String>,
    /// New SQL type.
    pub sql_type: Option<String>,
    /// New nullability.
    pub nullable: Option<bool>,
    /// New default: `Some(None)` drops it.
    pub default: Option<Option<String>>,
}

impl AlterColumn {
    /// Start altering a column.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Rename the column.
    pub fn rename(mut self, new_name: impl Into<String>) -> Self {
        self.new_name = Some(new_name.into());
        self
    }

    /// Change the column type.
    pub fn set_type(mut self, sql_type: impl Into<String>) -> Self {
        self.sql_type = Some(sql_type.into());
        self
    }

    /// Change nullability.
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = Some(nullable);
        self
    }

    /// Set a default expression.
    pub fn default(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(Some(expr.into()));
        self
    }

    /// Drop the default.
    pub fn drop_default(mut self) -> Self {
        self.default = Some(None);
        self
    }

    /// Whether type, nullability or default change.
    pub fn changes_definition(&self) -> bool {
        self.sql_type.is_some() || self.nullable.is_some() || self.default.is_some()
    }

    /// The column name after the change.
    pub fn final_name(&self) -> &str {
        self.new_name.as_deref().unwrap_or(&self.name)
    }

    /// Apply the change to a column definition.
    pub fn apply(&self, column: &mut Column) {
        if let Some(name) = &self.new_name {
            column.name = name.clone();
        }
        if let Some(sql_type) = &self.sql_type {
            column.sql_type = sql_type.clone();
        }
        if let Some(nullable) = self.nullable {
            column.nullable = nullable;
        }
        if let Some(default) = &self.default {
            column.default = default.clone();
        }
    }
}

/// Renders portable DDL for one dialect and optional schema.
#[derive(Debug, Clone)]
pub struct SqlRenderer {
    dialect: Dialect,
    schema: Option<String>,
}

impl SqlRenderer {
    /// Create a renderer.
    pub fn new(dialect: &Dialect, schema: Option<&str>) -> Self {
        Self {
            dialect: dialect.clone(),
            schema: schema.map(String::from),
        }
    }

    /// The dialect rendered for.
    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    /// Schema qualifier, if any.
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Quote an identifier, doubling embedded quote characters.
    pub fn quote(&self, ident: &str) -> String {
        let q = self.dialect.quote;
        let escaped = ident.replace(q, &format!("{}{}", q, q));
        format!("{}{}{}", q, escaped, q)
    }

    /// Quote a schema-qualified object name.
    pub fn table(&self, name: &str) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", self.quote(schema), self.quote(name)),
            None => self.quote(name),
        }
    }

    /// Quote a string literal.
    pub fn literal(value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    fn column_list(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| self.quote(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Render a column definition.
    pub fn column_definition(&self, column: &Column, inline_pk: bool) -> String {
        let mut sql = format!("{} {}", self.quote(&column.name), column.sql_type);
        if !column.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            sql.push_str(&format!(" DEFAULT {}", default));
        }
        if inline_pk && column.primary_key {
            sql.push_str(" PRIMARY KEY");
        } else if column.unique {
            sql.push_str(" UNIQUE");
        }
        sql
    }

    fn foreign_key_clause(&self, fk: &ForeignKey) -> String {
        let mut sql = String::new();
        if let Some(name) = &fk.name {
            sql.push_str(&format!("CONSTRAINT {} ", self.quote(name)));
        }
        sql.push_str(&format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            self.column_list(&fk.columns),
            self.table(&fk.ref_table),
            self.column_list(&fk.ref_columns)
        ));
        if let Some(action) = &fk.on_delete {
            sql.push_str(&format!(" ON DELETE {}", action));
        }
        sql
    }

    /// `CREATE TABLE`; a composite primary key becomes a table constraint.
    pub fn create_table(&self, table: &Table) -> String {
        let pk = table.primary_key();
        let inline_pk = pk.len() == 1;

        let mut parts: Vec<String> = table
            .columns
            .iter()
            .map(|c| self.column_definition(c, inline_pk))
            .collect();

        if pk.len() > 1 {
            let cols: Vec<String> = pk.iter().map(|c| self.quote(c)).collect();
            parts.push(format!("PRIMARY KEY ({})", cols.join(", ")));
        }

        for fk in &table.foreign_keys {
            parts.push(self.foreign_key_clause(fk));
        }

        format!(
            "CREATE TABLE {} (\n    {}\n)",
            self.table(&table.name),
            parts.join(",\n    ")
        )
    }

    /// `DROP TABLE`.
    pub fn drop_table(&self, name: &str) -> String {
        format!("DROP TABLE {}", self.table(name))
    }

    /// `ALTER TABLE .. RENAME TO`.
    pub fn rename_table(&self, old: &str, new: &str) -> String {
        format!("ALTER TABLE {} RENAME TO {}", self.table(old), self.quote(new))
    }

    /// `ALTER TABLE .. ADD COLUMN`.
    pub fn add_column(&self, table: &str, column: &Column) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.table(table),
            self.column_definition(column, true)
        )
    }

    /// `ALTER TABLE .. DROP COLUMN`.
    pub fn drop_column(&self, table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.table(table),
            self.quote(column)
        )
    }

    /// In-place column changes. The rename, if any, comes last.
    pub fn alter_column(&self, table: &str, alter: &AlterColumn) -> Vec<String> {
        let target = self.table(table);
        let column = self.quote(&alter.name);
        let mut stmts = Vec::new();

        if let Some(sql_type) = &alter.sql_type {
            stmts.push(format!(
                "ALTER TABLE {} ALTER COLUMN {} TYPE {}",
                target, column, sql_type
            ));
        }

        match alter.nullable {
            Some(false) => stmts.push(format!(
                "ALTER TABLE {} ALTER COLUMN {} SET NOT NULL",
                target, column
            )),
            Some(true) => stmts.push(format!(
                "ALTER TABLE {} ALTER COLUMN {} DROP NOT NULL",
                target, column
            )),
            None => {}
        }

        match &alter.default {
            Some(Some(expr)) => stmts.push(format!(
                "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {}",
                target, column, expr
            )),
            Some(None) => stmts.push(format!(
                "ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT",
                target, column
            )),
            None => {}
        }

        if let Some(new_name) = &alter.new_name {
            stmts.push(format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                target,
                column,
                self.quote(new_name)
            ));
        }

        stmts
    }

    /// `CREATE [UNIQUE] INDEX`.
    pub fn create_index(&self, index: &Index) -> String {
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            self.quote(&index.name),
            self.table(&index.table),
            self.column_list(&index.columns)
        )
    }

    /// `DROP INDEX`, naming the table where the dialect requires it.
    pub fn drop_index(&self, name: &str, table: &str) -> String {
        if self.dialect.drop_index_on_table {
            format!("DROP INDEX {} ON {}", self.quote(name), self.table(table))
        } else {
            format!("DROP INDEX {}", self.table(name))
        }
    }

    /// `ALTER TABLE .. ADD [CONSTRAINT ..] FOREIGN KEY`.
    pub fn create_foreign_key(&self, table: &str, fk: &ForeignKey) -> String {
        format!(
            "ALTER TABLE {} ADD {}",
            self.table(table),
            self.foreign_key_clause(fk)
        )
    }

    /// `ALTER TABLE .. DROP CONSTRAINT`.
    pub fn drop_constraint(&self, table: &str, name: &str) -> String {
        format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            self.table(table),
            self.quote(name)
        )
    }

    /// `CREATE TYPE .. AS ENUM`.
    pub fn create_enum(&self, name: &str, values: &[&str]) -> String {
        let values: Vec<String> = values.iter().map(|v| Self::literal(v)).collect();
        format!(
            "CREATE TYPE {} AS ENUM ({})",
            self.table(name),
            values.join(", ")
        )
    }

    /// `DROP TYPE`.
    pub fn drop_enum(&self, name: &str) -> String {
        format!("DROP TYPE {}", self.table(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pg() -> SqlRenderer {
        SqlRenderer::new(&Dialect::postgres(), None)
    }

    #[test]
    fn test_create_table() {
        let table = Table::new("accounts")
            .column(Column::new("id", "INTEGER").primary_key())
            .column(Column::new("email", "VARCHAR(255)").not_null().unique())
            .column(Column::new("status", "TEXT").not_null().default("'active'"))
            .foreign_key(ForeignKey::new(&["owner_id"], "users", &["id"]).on_delete("CASCADE"));

        assert_eq!(
            pg().create_table(&table),
            "CREATE TABLE \"accounts\" (\n    \
             \"id\" INTEGER NOT NULL PRIMARY KEY,\n    \
             \"email\" VARCHAR(255) NOT NULL UNIQUE,\n    \
             \"status\" TEXT NOT NULL DEFAULT 'active',\n    \
             FOREIGN KEY (\"owner_id\") REFERENCES \"users\" (\"id\") ON DELETE CASCADE\n)"
        );
    }

    #[test]
    fn test_composite_primary_key() {
        let table = Table::new("memberships")
            .column(Column::new("user_id", "INTEGER").primary_key())
            .column(Column::new("group_id", "INTEGER").primary_key());

        let sql = pg().create_table(&table);
        assert!(sql.contains("PRIMARY KEY (\"user_id\", \"group_id\")"));
        assert!(!sql.contains("NOT NULL PRIMARY KEY"));
    }

    #[test]
    fn test_primary_key_order_overrides_column_order() {
        let table = Table::new("memberships")
            .column(Column::new("user_id", "INTEGER").primary_key())
            .column(Column::new("group_id", "INTEGER").primary_key())
            .column(Column::new("role", "TEXT"))
            .primary_key_order(&["group_id", "user_id"]);

        assert_eq!(table.primary_key(), vec!["group_id", "user_id"]);
        assert!(
            pg().create_table(&table)
                .contains("PRIMARY KEY (\"group_id\", \"user_id\")")
        );
    }

    #[test]
    fn test_schema_qualified_names() {
        let renderer = SqlRenderer::new(&Dialect::postgres(), Some("tenant"));
        assert_eq!(renderer.drop_table("users"), "DROP TABLE \"tenant\".\"users\"");
        assert_eq!(
            renderer.rename_table("users", "people"),
            "ALTER TABLE \"tenant\".\"users\" RENAME TO \"people\""
        );
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(pg().quote("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(SqlRenderer::literal("it's"), "'it''s'");

        let mysql = SqlRenderer::new(&Dialect::mysql(), None);
        assert_eq!(mysql.quote("users"), "`users`");
    }

    #[test]
    fn test_alter_column_renames_last() {
        let alter = AlterColumn::new("mail")
            .set_type("TEXT")
            .nullable(false)
            .drop_default()
            .rename("email");
        let stmts = pg().alter_column("users", &alter);

        assert_eq!(stmts.len(), 4);
        assert_eq!(
            stmts[0],
            "ALTER TABLE \"users\" ALTER COLUMN \"mail\" TYPE TEXT"
        );
        assert!(stmts[1].ends_with("SET NOT NULL"));
        assert!(stmts[2].ends_with("DROP DEFAULT"));
        assert_eq!(
            stmts[3],
            "ALTER TABLE \"users\" RENAME COLUMN \"mail\" TO \"email\""
        );
    }

    #[test]
    fn test_drop_index_per_dialect() {
        assert_eq!(pg().drop_index("ix_a", "t"), "DROP INDEX \"ix_a\"");
        let mysql = SqlRenderer::new(&Dialect::mysql(), None);
        assert_eq!(mysql.drop_index("ix_a", "t"), "DROP INDEX `ix_a` ON `t`");
    }

    #[test]
    fn test_create_enum() {
        assert_eq!(
            pg().create_enum("mood", &["happy", "it's ok"]),
            "CREATE TYPE \"mood\" AS ENUM ('happy', 'it''s ok')"
        );
    }

    #[test]
    fn test_alter_column_apply() {
        let mut column = Column::new("mail", "TEXT");
        AlterColumn::new("mail")
            .rename("email")
            .nullable(false)
            .default("''")
            .apply(&mut column);

        assert_eq!(column.name, "email");
        assert!(!column.nullable);
        assert_eq!(column.default.as_deref(), Some("''"));
    }
}
