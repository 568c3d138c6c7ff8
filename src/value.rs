//! Typed leaf values flowing through presenters
//!
//! Records carry their attributes as [`Value`]s so that dates and timestamps
//! keep their type until the final JSON conversion, where they are normalised:
//! dates become `YYYY-MM-DD` strings and timestamps become Unix epoch integers.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value as JsonValue;

use crate::db::Record;

/// A value produced by a record attribute, a dynamic block, or a lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Calendar date without a time component
    Date(NaiveDate),
    /// Instant with its original offset
    Time(DateTime<FixedOffset>),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// Another record (e.g. an association read through `via`)
    Record(Arc<Record>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer view of the value; numeric strings are accepted because
    /// foreign keys and request arguments often arrive as text.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::String(s) => s.trim().parse().ok(),
            Value::Record(record) => Some(record.id()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Arc<Record>> {
        match self {
            Value::Record(record) => Some(record),
            _ => None,
        }
    }

    /// Ruby-style truthiness: only `Null` and `false` are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Null | Value::Bool(false))
    }

    /// Render this value as JSON, normalising every nested date and time.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Date(date) => JsonValue::String(date.format("%Y-%m-%d").to_string()),
            Value::Time(time) => JsonValue::from(time.timestamp()),
            Value::Array(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => JsonValue::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
            Value::Record(record) => JsonValue::String(record.id().to_string()),
        }
    }

    /// Parse a `YYYY-MM-DD` string.
    pub fn parse_date(raw: &str) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
    }

    /// Parse an RFC 3339 timestamp or a naive `YYYY-MM-DD HH:MM:SS[.f]`
    /// timestamp (taken as UTC).
    pub fn parse_time(raw: &str) -> Option<DateTime<FixedOffset>> {
        let raw = raw.trim();
        if let Ok(time) = DateTime::parse_from_rfc3339(raw) {
            return Some(time);
        }

        ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"]
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
            .map(|naive| naive.and_utc().fixed_offset())
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Time(v.and_utc().fixed_offset())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Time(v.fixed_offset())
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Value::Time(v)
    }
}

impl From<Arc<Record>> for Value {
    fn from(v: Arc<Record>) -> Self {
        Value::Record(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<BTreeMap<String, T>> for Value {
    fn from(v: BTreeMap<String, T>) -> Self {
        Value::Map(v.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl From<JsonValue> for Value {
    fn from(v: JsonValue) -> Self {
        match v {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .or_else(|| n.as_f64().map(Value::Float))
                .unwrap_or(Value::Null),
            JsonValue::String(s) => Value::String(s),
            JsonValue::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            JsonValue::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_dates_render_as_iso_strings() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(Value::from(date).to_json(), json!("2024-03-09"));
    }

    #[test]
    fn test_times_render_as_epoch_regardless_of_offset() {
        let utc = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let eastern = FixedOffset::west_opt(5 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 1, 7, 0, 0)
            .unwrap();

        assert_eq!(Value::from(utc).to_json(), json!(utc.timestamp()));
        assert_eq!(Value::from(eastern).to_json(), json!(utc.timestamp()));
    }

    #[test]
    fn test_normalisation_reaches_deeply_nested_leaves() {
        let date = NaiveDate::from_ymd_opt(2023, 12, 31).unwrap();
        let time = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap();

        let mut inner = BTreeMap::new();
        inner.insert("due".to_string(), Value::from(date));
        inner.insert(
            "history".to_string(),
            Value::Array(vec![Value::Array(vec![Value::from(time)])]),
        );
        let mut outer = BTreeMap::new();
        outer.insert("schedule".to_string(), Value::Map(inner));
        outer.insert("title".to_string(), Value::from("Plan"));

        assert_eq!(
            Value::Map(outer).to_json(),
            json!({
                "schedule": {
                    "due": "2023-12-31",
                    "history": [[time.timestamp()]],
                },
                "title": "Plan",
            })
        );
    }

    #[test]
    fn test_parse_time_accepts_sqlite_and_rfc3339_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap().timestamp();
        assert_eq!(Value::parse_time("2024-05-01 08:30:00").unwrap().timestamp(), expected);
        assert_eq!(Value::parse_time("2024-05-01T08:30:00Z").unwrap().timestamp(), expected);
        assert_eq!(
            Value::parse_time("2024-05-01T10:30:00+02:00").unwrap().timestamp(),
            expected
        );
        assert!(Value::parse_time("yesterday").is_none());
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Int(0).is_truthy());
        assert!(Value::from("").is_truthy());
    }

    #[test]
    fn test_numeric_strings_read_as_integers() {
        assert_eq!(Value::from("42").as_i64(), Some(42));
        assert_eq!(Value::from("4x2").as_i64(), None);
    }
}
