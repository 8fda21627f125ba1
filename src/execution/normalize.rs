//! Result Value Normalization
//!
//! Canonical shape for raw backend values: nulls pass through,
//! timestamp-like strings become RFC 3339, non-integer numbers are
//! rounded to 4 decimal places, and 64-bit integers are narrowed where
//! exact. Normalization is idempotent.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Number, Value};

/// Normalize one value into its canonical representation.
pub fn normalize_value(value: Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::String(s) => match parse_timestamp(&s) {
            Some(ts) => Value::String(ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
            None => Value::String(s),
        },
        Value::Number(n) => normalize_number(n),
        Value::Array(values) => Value::Array(values.into_iter().map(normalize_value).collect()),
        Value::Object(map) => Value::Object(normalize_row(map)),
        other => other,
    }
}

/// Normalize every column of a row.
pub fn normalize_row(row: Map<String, Value>) -> Map<String, Value> {
    row.into_iter()
        .map(|(column, value)| (column, normalize_value(value)))
        .collect()
}

/// Normalize a batch of rows.
pub fn normalize_rows(rows: Vec<Map<String, Value>>) -> Vec<Map<String, Value>> {
    rows.into_iter().map(normalize_row).collect()
}

fn normalize_number(n: Number) -> Value {
    if n.is_i64() || n.is_u64() {
        // 64-bit integers stay exact; JSON numbers already carry them
        return Value::Number(n);
    }
    match n.as_f64() {
        Some(f) => {
            let rounded = (f * 10_000.0).round() / 10_000.0;
            match Number::from_f64(rounded) {
                Some(rounded) => Value::Number(rounded),
                None => Value::Number(n),
            }
        }
        None => Value::Number(n),
    }
}

/// Accepts RFC 3339 timestamps, naive `YYYY-MM-DD HH:MM:SS` stamps,
/// and bare dates.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(ts.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_passthrough() {
        assert_eq!(normalize_value(Value::Null), Value::Null);
    }

    #[test]
    fn test_date_strings_become_rfc3339() {
        assert_eq!(
            normalize_value(json!("2024-01-15")),
            json!("2024-01-15T00:00:00Z")
        );
        assert_eq!(
            normalize_value(json!("2024-01-15 10:30:00")),
            json!("2024-01-15T10:30:00Z")
        );
        assert_eq!(
            normalize_value(json!("2024-01-15T10:30:00+02:00")),
            json!("2024-01-15T08:30:00Z")
        );
    }

    #[test]
    fn test_non_timestamp_strings_untouched() {
        assert_eq!(normalize_value(json!("hello")), json!("hello"));
        assert_eq!(normalize_value(json!("12-34")), json!("12-34"));
    }

    #[test]
    fn test_decimal_rounding() {
        assert_eq!(normalize_value(json!(3.141592653)), json!(3.1416));
        assert_eq!(normalize_value(json!(2.5)), json!(2.5));
        assert_eq!(normalize_value(json!(100)), json!(100));
        assert_eq!(normalize_value(json!(i64::MAX)), json!(i64::MAX));
    }

    #[test]
    fn test_idempotence() {
        let row = json!({
            "ts": "2024-01-15",
            "amount": 10.123456,
            "label": null,
            "count": 42
        });
        let once = normalize_value(row);
        let twice = normalize_value(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_nested_structures() {
        let value = json!({"outer": {"inner": [1.00006, "2024-06-01"]}});
        assert_eq!(
            normalize_value(value),
            json!({"outer": {"inner": [1.0001, "2024-06-01T00:00:00Z"]}})
        );
    }
}
