//! Table introspection through `pg_catalog` and `information_schema`.

use std::collections::BTreeMap;

use stratum_migrate::{
    Column, Dialect, ForeignKey, Index, Row, SqlRenderer, Table, TableSchema, row_bool, row_i64,
    row_str,
};

use crate::connection::PgConnection;
use crate::error::{PgError, PgResult};

/// Read columns, primary key, foreign keys and indexes of `table`.
pub(crate) async fn table_schema(
    conn: &PgConnection,
    table: &str,
    schema: Option<&str>,
) -> PgResult<TableSchema> {
    let renderer = SqlRenderer::new(&Dialect::postgres(), schema);
    let regclass = format!("{}::regclass", SqlRenderer::literal(&renderer.table(table)));
    let schema_expr = schema
        .map(SqlRenderer::literal)
        .unwrap_or_else(|| "current_schema()".to_string());

    let exists = conn
        .query_rows(&format!(
            "SELECT to_regclass({}) IS NOT NULL AS found",
            SqlRenderer::literal(&renderer.table(table))
        ))
        .await?;
    if !exists.first().and_then(|r| row_bool(r, "found")).unwrap_or(false) {
        return Err(PgError::introspection(format!(
            "table '{}' does not exist",
            table
        )));
    }

    let columns = conn
        .query_rows(&format!(
            "SELECT a.attname AS name, format_type(a.atttypid, a.atttypmod) AS sql_type, \
             a.attnotnull AS not_null, pg_get_expr(d.adbin, d.adrelid) AS default_expr, \
             a.attidentity <> '' AS is_identity, a.attgenerated <> '' AS is_generated, \
             co.collname AS collation \
             FROM pg_attribute a \
             JOIN pg_type t ON t.oid = a.atttypid \
             LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum \
             LEFT JOIN pg_collation co ON co.oid = a.attcollation AND a.attcollation <> t.typcollation \
             WHERE a.attrelid = {reg} AND a.attnum > 0 AND NOT a.attisdropped \
             ORDER BY a.attnum",
            reg = regclass
        ))
        .await?;

    let primary_key = conn
        .query_rows(&format!(
            "SELECT a.attname AS name \
             FROM pg_index i \
             JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey) \
             WHERE i.indrelid = {reg} AND i.indisprimary \
             ORDER BY array_position(i.indkey::int2[], a.attnum)",
            reg = regclass
        ))
        .await?;

    let foreign_keys = conn
        .query_rows(&format!(
            "SELECT tc.constraint_name AS name, kcu.ordinal_position AS position, \
             kcu.column_name AS column_name, ref.table_name AS ref_table, \
             ref.column_name AS ref_column, rc.delete_rule AS delete_rule, \
             rc.update_rule AS update_rule \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON kcu.constraint_schema = tc.constraint_schema AND kcu.constraint_name = tc.constraint_name \
             JOIN information_schema.referential_constraints rc \
               ON rc.constraint_schema = tc.constraint_schema AND rc.constraint_name = tc.constraint_name \
             JOIN information_schema.key_column_usage ref \
               ON ref.constraint_schema = rc.unique_constraint_schema \
              AND ref.constraint_name = rc.unique_constraint_name \
              AND ref.ordinal_position = kcu.position_in_unique_constraint \
             WHERE tc.constraint_type = 'FOREIGN KEY' \
               AND tc.table_schema = {schema} AND tc.table_name = {table} \
             ORDER BY tc.constraint_name, kcu.ordinal_position",
            schema = schema_expr,
            table = SqlRenderer::literal(table)
        ))
        .await?;

    let indexes = conn
        .query_rows(&format!(
            "SELECT c.relname AS name, i.indisunique AS is_unique, \
             i.indpred IS NOT NULL AS partial, k.ord AS position, a.attname AS column_name \
             FROM pg_index i \
             JOIN pg_class c ON c.oid = i.indexrelid \
             CROSS JOIN LATERAL unnest(i.indkey) WITH ORDINALITY AS k(attnum, ord) \
             LEFT JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = k.attnum \
             WHERE i.indrelid = {reg} AND NOT i.indisprimary \
             ORDER BY c.relname, k.ord",
            reg = regclass
        ))
        .await?;

    let constraints = conn
        .query_rows(&format!(
            "SELECT conname AS name, contype AS kind FROM pg_constraint \
             WHERE conrelid = {reg} AND contype IN ('c', 'x') \
             ORDER BY conname",
            reg = regclass
        ))
        .await?;

    let mut result = build_table(table, &columns, &primary_key)?;
    build_foreign_keys(&mut result, &foreign_keys)?;
    build_indexes(&mut result, &indexes)?;
    build_constraints(&mut result, &constraints)?;
    Ok(result)
}

/// CHECK and exclusion constraints have no place in `Table`.
fn build_constraints(schema: &mut TableSchema, rows: &[Row]) -> PgResult<()> {
    for row in rows {
        let kind = match row_str(row, "kind").as_deref() {
            Some("x") => "exclusion",
            _ => "CHECK",
        };
        schema.block_rebuild(format!("{} constraint '{}'", kind, required(row, "name")?));
    }
    Ok(())
}

fn required(row: &Row, column: &str) -> PgResult<String> {
    row_str(row, column)
        .ok_or_else(|| PgError::introspection(format!("catalog row without '{}'", column)))
}

fn build_table(name: &str, columns: &[Row], primary_key: &[Row]) -> PgResult<TableSchema> {
    let pk: Vec<String> = primary_key
        .iter()
        .map(|r| required(r, "name"))
        .collect::<PgResult<_>>()?;
    let renderer = SqlRenderer::new(&Dialect::postgres(), None);

    let mut table = Table::new(name);
    let mut blockers = Vec::new();
    for row in columns {
        let column = required(row, "name")?;
        let default = row_str(row, "default_expr");

        // Sequences are owned by the original table and go away with it.
        if row_bool(row, "is_identity").unwrap_or(false)
            || default.as_deref().is_some_and(|d| d.starts_with("nextval("))
        {
            blockers.push(format!("sequence-backed column '{}'", column));
        }
        if row_bool(row, "is_generated").unwrap_or(false) {
            blockers.push(format!("generated column '{}'", column));
        }

        let mut sql_type = required(row, "sql_type")?;
        if let Some(collation) = row_str(row, "collation") {
            sql_type.push_str(&format!(" COLLATE {}", renderer.quote(&collation)));
        }

        let primary_key = pk.contains(&column);
        table.columns.push(Column {
            sql_type,
            nullable: !row_bool(row, "not_null").unwrap_or(false) && !primary_key,
            default,
            primary_key,
            unique: false,
            name: column,
        });
    }
    table.primary_key_order = pk;

    let mut schema = TableSchema::new(table);
    for blocker in blockers {
        schema.block_rebuild(blocker);
    }
    Ok(schema)
}

/// Rows arrive one per column, ordered by constraint and position.
fn build_foreign_keys(schema: &mut TableSchema, rows: &[Row]) -> PgResult<()> {
    let mut grouped: BTreeMap<String, Vec<&Row>> = BTreeMap::new();
    for row in rows {
        grouped.entry(required(row, "name")?).or_default().push(row);
    }

    for (name, mut rows) in grouped {
        rows.sort_by_key(|r| row_i64(r, "position").unwrap_or(0));
        let first = rows[0];
        if row_str(first, "update_rule").is_some_and(|rule| rule != "NO ACTION") {
            schema.block_rebuild(format!("an ON UPDATE action on foreign key '{}'", name));
        }
        schema.table.foreign_keys.push(ForeignKey {
            columns: rows
                .iter()
                .map(|r| required(r, "column_name"))
                .collect::<PgResult<_>>()?,
            ref_table: required(first, "ref_table")?,
            ref_columns: rows
                .iter()
                .map(|r| required(r, "ref_column"))
                .collect::<PgResult<_>>()?,
            on_delete: row_str(first, "delete_rule").filter(|rule| rule != "NO ACTION"),
            name: Some(name),
        });
    }
    Ok(())
}

/// Partial and expression indexes are kept by name only.
fn build_indexes(schema: &mut TableSchema, rows: &[Row]) -> PgResult<()> {
    let mut grouped: BTreeMap<String, Vec<&Row>> = BTreeMap::new();
    for row in rows {
        grouped.entry(required(row, "name")?).or_default().push(row);
    }

    for (name, mut rows) in grouped {
        rows.sort_by_key(|r| row_i64(r, "position").unwrap_or(0));
        let first = rows[0];
        let columns: Option<Vec<String>> = rows.iter().map(|r| row_str(r, "column_name")).collect();

        match columns {
            Some(columns) if !row_bool(first, "partial").unwrap_or(false) => {
                schema.indexes.push(Index {
                    unique: row_bool(first, "is_unique").unwrap_or(false),
                    table: schema.table.name.clone(),
                    columns,
                    name,
                });
            }
            _ => schema.opaque_indexes.push(name),
        }
    }
    Ok(())
}
