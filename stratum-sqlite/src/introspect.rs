//! Table introspection through SQLite's schema pragmas.

use std::collections::{BTreeMap, BTreeSet};

use stratum_migrate::{
    Column, Dialect, ForeignKey, Index, Row, SqlRenderer, Table, TableSchema, row_i64, row_str,
};

use crate::connection::SqliteConnection;
use crate::error::{SqliteError, SqliteResult};

/// Clauses of the stored `CREATE TABLE` that the pragmas do not report.
const UNREPORTED_CLAUSES: &[(&str, &str)] = &[
    ("CHECK", "CHECK constraints"),
    ("AUTOINCREMENT", "an AUTOINCREMENT key"),
    ("COLLATE", "column collations"),
];

/// Read columns, primary key, foreign keys and indexes of `table`.
pub(crate) async fn table_schema(
    conn: &SqliteConnection,
    table: &str,
    schema: Option<&str>,
) -> SqliteResult<TableSchema> {
    let renderer = SqlRenderer::new(&Dialect::sqlite(), None);
    let prefix = schema
        .map(|s| format!("{}.", renderer.quote(s)))
        .unwrap_or_default();
    let pragma = |name: &str, arg: &str| format!("PRAGMA {}{}({})", prefix, name, renderer.quote(arg));

    let columns = conn.query_rows(&pragma("table_xinfo", table)).await?;
    if columns.is_empty() {
        return Err(SqliteError::introspection(format!(
            "table '{}' does not exist",
            table
        )));
    }
    let foreign_keys = conn.query_rows(&pragma("foreign_key_list", table)).await?;
    let mut result = build_table(table, &columns, &foreign_keys)?;

    let definition = conn
        .query_rows(&format!(
            "SELECT sql FROM {}sqlite_master WHERE type = 'table' AND name = {}",
            prefix,
            SqlRenderer::literal(table)
        ))
        .await?;
    if let Some(sql) = definition.first().and_then(|r| row_str(r, "sql")) {
        let keywords = keywords(&sql);
        for (keyword, feature) in UNREPORTED_CLAUSES {
            if keywords.contains(*keyword) {
                result.block_rebuild(*feature);
            }
        }
    }

    let index_list = conn.query_rows(&pragma("index_list", table)).await?;
    for entry in &index_list {
        let origin = row_str(entry, "origin").unwrap_or_default();
        if origin == "pk" {
            continue;
        }
        let name = required(entry, "name")?;
        if row_i64(entry, "partial").unwrap_or(0) != 0 {
            result.opaque_indexes.push(name);
            continue;
        }
        let info = conn.query_rows(&pragma("index_info", &name)).await?;
        match build_index(table, &name, &origin, entry, &info) {
            Some(index) => result.indexes.push(index),
            None => result.opaque_indexes.push(name),
        }
    }

    Ok(result)
}

fn required(row: &Row, column: &str) -> SqliteResult<String> {
    row_str(row, column)
        .ok_or_else(|| SqliteError::introspection(format!("pragma row without '{}'", column)))
}

/// Columns from `table_xinfo`, foreign keys from `foreign_key_list`.
fn build_table(name: &str, columns: &[Row], foreign_keys: &[Row]) -> SqliteResult<TableSchema> {
    let mut table = Table::new(name);
    let mut blockers = Vec::new();
    let mut key: Vec<(i64, String)> = Vec::new();

    for row in columns {
        let column = required(row, "name")?;
        // 2 and 3 mark generated columns; 1 only occurs in virtual tables.
        if row_i64(row, "hidden").unwrap_or(0) != 0 {
            blockers.push(format!("generated column '{}'", column));
        }
        let pk = row_i64(row, "pk").unwrap_or(0);
        if pk > 0 {
            key.push((pk, column.clone()));
        }
        table.columns.push(Column {
            sql_type: row_str(row, "type").unwrap_or_default(),
            nullable: row_i64(row, "notnull").unwrap_or(0) == 0 && pk == 0,
            default: row_str(row, "dflt_value"),
            primary_key: pk > 0,
            unique: false,
            name: column,
        });
    }

    // `pk` holds the 1-based position within the key.
    key.sort();
    table.primary_key_order = key.into_iter().map(|(_, c)| c).collect();

    // One constraint spans several rows, ordered by `seq`.
    let mut grouped: BTreeMap<i64, Vec<&Row>> = BTreeMap::new();
    for row in foreign_keys {
        grouped
            .entry(row_i64(row, "id").unwrap_or(0))
            .or_default()
            .push(row);
    }
    for rows in grouped.into_values() {
        let mut rows = rows;
        rows.sort_by_key(|r| row_i64(r, "seq").unwrap_or(0));
        let first = rows[0];
        let ref_table = required(first, "table")?;
        if row_str(first, "on_update").is_some_and(|a| a != "NO ACTION") {
            blockers.push(format!("an ON UPDATE action on the foreign key to '{}'", ref_table));
        }
        table.foreign_keys.push(ForeignKey {
            name: None,
            columns: rows.iter().map(|r| required(r, "from")).collect::<SqliteResult<_>>()?,
            ref_table,
            ref_columns: rows.iter().map(|r| required(r, "to")).collect::<SqliteResult<_>>()?,
            on_delete: row_str(first, "on_delete").filter(|a| a != "NO ACTION"),
        });
    }

    let mut schema = TableSchema::new(table);
    for blocker in blockers {
        schema.block_rebuild(blocker);
    }
    Ok(schema)
}

/// An index from `index_list` / `index_info`, or `None` for an expression
/// index.
///
/// Indexes backing a `UNIQUE` constraint carry reserved `sqlite_autoindex_`
/// names, so they come back as named unique indexes.
fn build_index(table: &str, name: &str, origin: &str, entry: &Row, info: &[Row]) -> Option<Index> {
    let mut info: Vec<&Row> = info.iter().collect();
    info.sort_by_key(|r| row_i64(r, "seqno").unwrap_or(0));

    let columns: Vec<String> = info
        .iter()
        .map(|r| row_str(r, "name"))
        .collect::<Option<_>>()?;

    let name = if origin == "u" {
        format!("uq_{}_{}", table, columns.join("_"))
    } else {
        name.to_string()
    };

    Some(Index {
        name,
        table: table.to_string(),
        columns,
        unique: row_i64(entry, "unique").unwrap_or(0) != 0,
    })
}

/// Upper-cased bare words of `sql`, skipping literals, quoted identifiers
/// and comments.
fn keywords(sql: &str) -> BTreeSet<String> {
    let mut words = BTreeSet::new();
    let mut chars = sql.chars().peekable();
    let mut word = String::new();

    while let Some(c) = chars.next() {
        if c.is_ascii_alphanumeric() || c == '_' {
            word.push(c.to_ascii_uppercase());
            continue;
        }
        if !word.is_empty() {
            words.insert(std::mem::take(&mut word));
        }
        match c {
            '\'' | '"' | '`' => {
                while let Some(next) = chars.next() {
                    if next == c {
                        // A doubled quote is an escaped quote.
                        if chars.peek() == Some(&c) {
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }
            }
            '[' => {
                for next in chars.by_ref() {
                    if next == ']' {
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            _ => {}
        }
    }
    if !word.is_empty() {
        words.insert(word);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        match value {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_build_table_from_pragmas() {
        let columns = vec![
            row(json!({"cid": 0, "name": "id", "type": "INTEGER", "notnull": 0, "dflt_value": null, "pk": 1})),
            row(json!({"cid": 1, "name": "status", "type": "TEXT", "notnull": 1, "dflt_value": "'draft'", "pk": 0})),
            row(json!({"cid": 2, "name": "owner_id", "type": "INTEGER", "notnull": 0, "dflt_value": null, "pk": 0})),
        ];
        let fks = vec![row(json!({
            "id": 0, "seq": 0, "table": "users", "from": "owner_id", "to": "id",
            "on_update": "NO ACTION", "on_delete": "CASCADE", "match": "NONE"
        }))];

        let schema = build_table("posts", &columns, &fks).unwrap();
        let table = schema.table;

        assert_eq!(table.primary_key(), vec!["id"]);
        assert!(!table.columns[0].nullable);
        assert_eq!(table.columns[1].default.as_deref(), Some("'draft'"));
        assert!(!table.columns[1].nullable);
        assert_eq!(table.foreign_keys.len(), 1);
        assert_eq!(table.foreign_keys[0].ref_table, "users");
        assert_eq!(table.foreign_keys[0].on_delete.as_deref(), Some("CASCADE"));
    }

    #[test]
    fn test_unique_constraint_index_is_renamed() {
        let entry = row(json!({"seq": 0, "name": "sqlite_autoindex_users_1", "unique": 1, "origin": "u", "partial": 0}));
        let info = vec![row(json!({"seqno": 0, "cid": 1, "name": "email"}))];

        let index = build_index("users", "sqlite_autoindex_users_1", "u", &entry, &info).unwrap();
        assert_eq!(index.name, "uq_users_email");
        assert!(index.unique);
    }

    #[test]
    fn test_expression_index_is_rejected() {
        let entry = row(json!({"seq": 0, "name": "ix_lower", "unique": 0, "origin": "c", "partial": 0}));
        let info = vec![row(json!({"seqno": 0, "cid": -2, "name": null}))];

        assert!(build_index("users", "ix_lower", "c", &entry, &info).is_none());
    }

    #[test]
    fn test_composite_key_follows_pk_ordinal() {
        let columns = vec![
            row(json!({"cid": 0, "name": "user_id", "type": "INTEGER", "notnull": 1, "dflt_value": null, "pk": 2, "hidden": 0})),
            row(json!({"cid": 1, "name": "group_id", "type": "INTEGER", "notnull": 1, "dflt_value": null, "pk": 1, "hidden": 0})),
        ];

        let schema = build_table("memberships", &columns, &[]).unwrap();
        assert_eq!(schema.table.primary_key(), vec!["group_id", "user_id"]);
        assert!(schema.rebuild_blockers.is_empty());
    }

    #[test]
    fn test_generated_column_and_on_update_block_rebuild() {
        let columns = vec![
            row(json!({"cid": 0, "name": "id", "type": "INTEGER", "notnull": 0, "dflt_value": null, "pk": 1, "hidden": 0})),
            row(json!({"cid": 1, "name": "total", "type": "INTEGER", "notnull": 0, "dflt_value": null, "pk": 0, "hidden": 3})),
        ];
        let fks = vec![row(json!({
            "id": 0, "seq": 0, "table": "users", "from": "id", "to": "id",
            "on_update": "CASCADE", "on_delete": "NO ACTION", "match": "NONE"
        }))];

        let schema = build_table("orders", &columns, &fks).unwrap();
        assert_eq!(schema.rebuild_blockers.len(), 2);
        assert!(schema.rebuild_blockers[0].contains("total"));
        assert!(schema.rebuild_blockers[1].contains("ON UPDATE"));
    }

    #[test]
    fn test_keywords_skip_quoted_text() {
        let words = keywords(
            "CREATE TABLE \"check\" (id INTEGER PRIMARY KEY AUTOINCREMENT, \
             note TEXT DEFAULT 'CHECK it''s' -- COLLATE\n, [collate] INT /* CHECK */)",
        );
        assert!(words.contains("AUTOINCREMENT"));
        assert!(!words.contains("CHECK"));
        assert!(!words.contains("COLLATE"));

        let words = keywords("CREATE TABLE t (qty INTEGER CHECK (qty > 0))");
        assert!(words.contains("CHECK"));
    }
}
