//! Coercion of raw JSON values into declared field types

use crate::catalog::FieldType;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Number, Value};

/// Coerce a non-null raw value into `field_type`.
///
/// Returns `None` when the value has no sensible representation in that type.
pub(crate) fn coerce(value: &Value, field_type: FieldType) -> Option<Value> {
    match field_type {
        FieldType::String => match value {
            Value::String(_) => Some(value.clone()),
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        },
        FieldType::Integer => to_integer(value).map(Value::from),
        FieldType::Number => match value {
            Value::Number(_) => Some(value.clone()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number),
            _ => None,
        },
        FieldType::Boolean => match value {
            Value::Bool(_) => Some(value.clone()),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Some(Value::Bool(true)),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Some(Value::Bool(false)),
            _ => None,
        },
        FieldType::DateTime => value
            .as_str()
            .and_then(parse_timestamp)
            .map(|ts| Value::String(format_timestamp(&ts))),
        FieldType::Object => value.is_object().then(|| value.clone()),
        FieldType::Array => value.is_array().then(|| value.clone()),
    }
}

fn to_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Canonical UTC rendering used for records and bookmarks.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_integer() {
        assert_eq!(coerce(&json!(42), FieldType::Integer), Some(json!(42)));
        assert_eq!(coerce(&json!("42"), FieldType::Integer), Some(json!(42)));
        assert_eq!(coerce(&json!(3.0), FieldType::Integer), Some(json!(3)));
        assert_eq!(coerce(&json!(3.5), FieldType::Integer), None);
        assert_eq!(coerce(&json!("abc"), FieldType::Integer), None);
        assert_eq!(coerce(&json!(true), FieldType::Integer), None);
    }

    #[test]
    fn test_number() {
        assert_eq!(coerce(&json!("25.00"), FieldType::Number), Some(json!(25.0)));
        assert_eq!(coerce(&json!(7), FieldType::Number), Some(json!(7)));
        assert_eq!(coerce(&json!("NaN"), FieldType::Number), None);
        assert_eq!(coerce(&json!([]), FieldType::Number), None);
    }

    #[test]
    fn test_boolean_and_string() {
        assert_eq!(coerce(&json!("TRUE"), FieldType::Boolean), Some(json!(true)));
        assert_eq!(coerce(&json!("no"), FieldType::Boolean), None);
        assert_eq!(coerce(&json!(12), FieldType::String), Some(json!("12")));
        assert_eq!(coerce(&json!({"a": 1}), FieldType::String), None);
    }

    #[test]
    fn test_datetime_is_normalized_to_utc() {
        assert_eq!(
            coerce(&json!("2024-01-02T10:00:00-05:00"), FieldType::DateTime),
            Some(json!("2024-01-02T15:00:00Z"))
        );
        assert_eq!(coerce(&json!("yesterday"), FieldType::DateTime), None);
        assert_eq!(coerce(&json!(1700000000), FieldType::DateTime), None);
    }

    #[test]
    fn test_object_and_array() {
        assert!(coerce(&json!({"src": "x"}), FieldType::Object).is_some());
        assert!(coerce(&json!([1]), FieldType::Object).is_none());
        assert!(coerce(&json!([1]), FieldType::Array).is_some());
    }
}
