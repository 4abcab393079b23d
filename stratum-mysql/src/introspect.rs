//! Table introspection through `information_schema`.

use std::collections::BTreeMap;

use stratum_migrate::{
    Column, ForeignKey, Index, Row, SqlRenderer, Table, TableSchema, row_i64, row_str,
};

use crate::connection::MysqlConnection;
use crate::error::{MysqlError, MysqlResult};

/// Read columns, primary key, foreign keys and indexes of `table`.
pub(crate) async fn table_schema(
    conn: &mut MysqlConnection,
    table: &str,
    schema: Option<&str>,
) -> MysqlResult<TableSchema> {
    let schema_expr = schema
        .map(SqlRenderer::literal)
        .unwrap_or_else(|| "DATABASE()".to_string());
    let table_lit = SqlRenderer::literal(table);

    let columns = conn
        .query_rows(&format!(
            "SELECT column_name AS name, column_type AS sql_type, is_nullable AS nullable, \
             column_default AS default_value, extra AS extra, column_key AS column_key, \
             collation_name AS collation \
             FROM information_schema.columns \
             WHERE table_schema = {schema} AND table_name = {table} \
             ORDER BY ordinal_position",
            schema = schema_expr,
            table = table_lit
        ))
        .await?;
    if columns.is_empty() {
        return Err(MysqlError::introspection(format!(
            "table '{}' does not exist",
            table
        )));
    }

    let foreign_keys = conn
        .query_rows(&format!(
            "SELECT k.constraint_name AS name, k.ordinal_position AS position, \
             k.column_name AS column_name, k.referenced_table_name AS ref_table, \
             k.referenced_column_name AS ref_column, r.delete_rule AS delete_rule, \
             r.update_rule AS update_rule \
             FROM information_schema.key_column_usage k \
             JOIN information_schema.referential_constraints r \
               ON r.constraint_schema = k.constraint_schema AND r.constraint_name = k.constraint_name \
             WHERE k.table_schema = {schema} AND k.table_name = {table} \
               AND k.referenced_table_name IS NOT NULL \
             ORDER BY k.constraint_name, k.ordinal_position",
            schema = schema_expr,
            table = table_lit
        ))
        .await?;

    let statistics = conn
        .query_rows(&format!(
            "SELECT index_name AS name, non_unique AS non_unique, seq_in_index AS position, \
             column_name AS column_name, sub_part AS sub_part \
             FROM information_schema.statistics \
             WHERE table_schema = {schema} AND table_name = {table} \
             ORDER BY index_name, seq_in_index",
            schema = schema_expr,
            table = table_lit
        ))
        .await?;

    let checks = conn
        .query_rows(&format!(
            "SELECT constraint_name AS name FROM information_schema.table_constraints \
             WHERE table_schema = {schema} AND table_name = {table} \
               AND constraint_type = 'CHECK' \
             ORDER BY constraint_name",
            schema = schema_expr,
            table = table_lit
        ))
        .await?;

    let mut result = build_table(table, &columns, &statistics)?;
    build_foreign_keys(&mut result, &foreign_keys)?;
    build_indexes(&mut result, &statistics)?;
    build_checks(&mut result, &checks)?;
    Ok(result)
}

fn build_checks(schema: &mut TableSchema, rows: &[Row]) -> MysqlResult<()> {
    for row in rows {
        schema.block_rebuild(format!("CHECK constraint '{}'", required(row, "name")?));
    }
    Ok(())
}

fn required(row: &Row, column: &str) -> MysqlResult<String> {
    row_str(row, column).ok_or_else(|| {
        MysqlError::introspection(format!("information_schema row without '{}'", column))
    })
}

fn build_table(name: &str, columns: &[Row], statistics: &[Row]) -> MysqlResult<TableSchema> {
    let mut primary: Vec<(i64, String)> = Vec::new();
    for row in statistics {
        if row_str(row, "name").as_deref() == Some("PRIMARY") {
            primary.push((row_i64(row, "position").unwrap_or(0), required(row, "column_name")?));
        }
    }
    primary.sort();
    let pk: Vec<String> = primary.into_iter().map(|(_, c)| c).collect();

    let mut table = Table::new(name);
    let mut blockers = Vec::new();
    for row in columns {
        let column = required(row, "name")?;
        let extra = row_str(row, "extra").unwrap_or_default();
        let mut sql_type = required(row, "sql_type")?;
        let lower = extra.to_ascii_lowercase();

        if let Some(collation) = row_str(row, "collation") {
            sql_type.push_str(" COLLATE ");
            sql_type.push_str(&collation);
        }

        // Column attributes MySQL reports in `extra` travel with the type.
        if lower.contains("auto_increment") {
            sql_type.push_str(" AUTO_INCREMENT");
        }
        if let Some(pos) = lower.find("on update ") {
            sql_type.push(' ');
            sql_type.push_str(extra[pos..].trim());
        }
        if lower.contains("virtual generated") || lower.contains("stored generated") {
            blockers.push(format!("generated column '{}'", column));
        }

        let primary_key = pk.contains(&column);
        table.columns.push(Column {
            default: row_str(row, "default_value")
                .map(|value| render_default(&sql_type, &value, &lower)),
            nullable: row_str(row, "nullable").as_deref() == Some("YES") && !primary_key,
            primary_key,
            unique: false,
            sql_type,
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

/// `column_default` holds raw values for literals and bare text for
/// expression defaults.
fn render_default(sql_type: &str, value: &str, extra: &str) -> String {
    let upper = value.to_ascii_uppercase();
    if upper.starts_with("CURRENT_TIMESTAMP") || upper == "NULL" {
        return value.to_string();
    }
    if extra.contains("default_generated") {
        return format!("({})", value);
    }

    let base = sql_type
        .split(|c: char| c == '(' || c.is_whitespace())
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    let numeric = matches!(
        base.as_str(),
        "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "decimal"
            | "numeric" | "float" | "double" | "real"
    );
    if numeric || (base == "bit" && value.starts_with("b'")) {
        value.to_string()
    } else {
        SqlRenderer::literal(value)
    }
}

fn build_foreign_keys(schema: &mut TableSchema, rows: &[Row]) -> MysqlResult<()> {
    let mut grouped: BTreeMap<String, Vec<&Row>> = BTreeMap::new();
    for row in rows {
        grouped.entry(required(row, "name")?).or_default().push(row);
    }

    for (name, mut rows) in grouped {
        rows.sort_by_key(|r| row_i64(r, "position").unwrap_or(0));
        let first = rows[0];
        let update_rule = row_str(first, "update_rule");
        if update_rule.is_some_and(|rule| rule != "NO ACTION" && rule != "RESTRICT") {
            schema.block_rebuild(format!("an ON UPDATE action on foreign key '{}'", name));
        }
        schema.table.foreign_keys.push(ForeignKey {
            columns: rows
                .iter()
                .map(|r| required(r, "column_name"))
                .collect::<MysqlResult<_>>()?,
            ref_table: required(first, "ref_table")?,
            ref_columns: rows
                .iter()
                .map(|r| required(r, "ref_column"))
                .collect::<MysqlResult<_>>()?,
            on_delete: row_str(first, "delete_rule")
                .filter(|rule| rule != "NO ACTION" && rule != "RESTRICT"),
            name: Some(name),
        });
    }
    Ok(())
}

/// Prefix and functional indexes are kept by name only.
fn build_indexes(schema: &mut TableSchema, rows: &[Row]) -> MysqlResult<()> {
    let mut grouped: BTreeMap<String, Vec<&Row>> = BTreeMap::new();
    for row in rows {
        let name = required(row, "name")?;
        if name != "PRIMARY" {
            grouped.entry(name).or_default().push(row);
        }
    }

    for (name, mut rows) in grouped {
        rows.sort_by_key(|r| row_i64(r, "position").unwrap_or(0));
        let columns: Option<Vec<String>> = rows
            .iter()
            .map(|row| {
                row_i64(row, "sub_part")
                    .is_none()
                    .then(|| row_str(row, "column_name"))
                    .flatten()
            })
            .collect();

        match columns {
            Some(columns) => schema.indexes.push(Index {
                unique: row_i64(rows[0], "non_unique").unwrap_or(1) == 0,
                table: schema.table.name.clone(),
                columns,
                name,
            }),
            None => schema.opaque_indexes.push(name),
        }
    }
    Ok(())
}
