//! Type conversion utilities for SQLite.

use rusqlite::types::ValueRef;
use serde_json::Value as JsonValue;

/// Convert a SQLite value to JSON.
///
/// Text stays text: version ids and default expressions must not be
/// reinterpreted as numbers or JSON documents.
pub fn to_json(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(i) => JsonValue::Number(i.into()),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            JsonValue::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}
