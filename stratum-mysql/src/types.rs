//! Conversion of MySQL values into row values.

use mysql_async::Value;
use serde_json::Value as JsonValue;

/// Convert a MySQL Value to a JSON Value.
///
/// Text protocol results arrive as bytes; they stay strings so callers can
/// parse them as they need.
pub fn from_mysql_value(value: Value) -> JsonValue {
    match value {
        Value::NULL => JsonValue::Null,
        Value::Bytes(bytes) => JsonValue::String(String::from_utf8_lossy(&bytes).into_owned()),
        Value::Int(i) => JsonValue::Number(i.into()),
        Value::UInt(u) => JsonValue::Number(u.into()),
        Value::Float(f) => serde_json::Number::from_f64(f64::from(f))
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Value::Double(d) => serde_json::Number::from_f64(d)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Value::Date(year, month, day, hour, minute, second, micro) => JsonValue::String(format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}",
            year, month, day, hour, minute, second, micro
        )),
        Value::Time(is_neg, days, hours, minutes, seconds, micro) => {
            let sign = if is_neg { "-" } else { "" };
            JsonValue::String(format!(
                "{}{}:{:02}:{:02}.{:06}",
                sign,
                days * 24 + u32::from(hours),
                minutes,
                seconds,
                micro
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_mysql_value_null() {
        assert_eq!(from_mysql_value(Value::NULL), JsonValue::Null);
    }

    #[test]
    fn test_from_mysql_value_numbers() {
        assert_eq!(from_mysql_value(Value::Int(-4)), JsonValue::Number((-4).into()));
        assert_eq!(from_mysql_value(Value::UInt(100)), JsonValue::Number(100u64.into()));
    }

    #[test]
    fn test_from_mysql_value_bytes_stay_text() {
        assert_eq!(
            from_mysql_value(Value::Bytes(b"42".to_vec())),
            JsonValue::String("42".to_string())
        );
        assert_eq!(
            from_mysql_value(Value::Bytes(b"{\"a\":1}".to_vec())),
            JsonValue::String("{\"a\":1}".to_string())
        );
    }

    #[test]
    fn test_from_mysql_value_date() {
        assert_eq!(
            from_mysql_value(Value::Date(2024, 3, 9, 14, 5, 0, 0)),
            JsonValue::String("2024-03-09 14:05:00.000000".to_string())
        );
    }
}
