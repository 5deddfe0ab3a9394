//! Values bound to named parameters, and the validity rules that decide
//! whether an optional predicate applies.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::sql::pattern;

/// Strings at most this long are checked for null-concatenation artifacts.
const MAX_LENGTH_FOR_NULL_CHECK: usize = 20;

static NULL_CONCATENATION: Lazy<Regex> = Lazy::new(|| pattern(r"(?i)^[%_]*null[%_]*$"));

/// A value that can be bound to a query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Strings(Vec<String>),
    Ints(Vec<i64>),
    Datetime(DateTime<Utc>),
    /// Several parameters for a multi-parameter fragment, keyed by name.
    Map(BTreeMap<String, Value>),
    Null,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Default applicability rule: present and not an empty or placeholder
    /// value.
    pub fn is_valid(&self) -> bool {
        match self {
            Value::Null => false,
            Value::String(s) => is_valid_string(s),
            Value::Strings(v) => !v.is_empty(),
            Value::Ints(v) => !v.is_empty(),
            Value::Map(m) => !m.is_empty(),
            _ => true,
        }
    }

    /// Any finite number; zero and negatives included.
    pub fn is_valid_number(&self) -> bool {
        match self {
            Value::Int(_) | Value::UInt(_) => true,
            Value::Float(f) => f.is_finite(),
            _ => false,
        }
    }

    pub fn is_positive_number(&self) -> bool {
        match self {
            Value::Int(n) => *n > 0,
            Value::UInt(n) => *n > 0,
            Value::Float(f) => f.is_finite() && *f > 0.0,
            _ => false,
        }
    }

    /// Strings and collections with content; anything else non-null.
    pub fn is_not_empty(&self) -> bool {
        match self {
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty(),
            Value::Strings(v) => !v.is_empty(),
            Value::Ints(v) => !v.is_empty(),
            Value::Map(m) => !m.is_empty(),
            _ => true,
        }
    }

    /// A LIKE pattern that actually narrows the result.
    pub fn is_valid_like_pattern(&self) -> bool {
        match self {
            Value::String(s) => {
                is_valid_string(s) && !matches!(s.trim(), "%" | "%%" | "_" | "__")
            }
            _ => false,
        }
    }

    /// JSON form, used when a value is logged or bound as a JSON document.
    /// Datetimes become RFC 3339 strings with microsecond precision.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;

        match self {
            Value::String(s) => Json::String(s.clone()),
            Value::Int(n) => Json::from(*n),
            Value::UInt(n) => Json::from(*n),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Bool(b) => Json::Bool(*b),
            Value::Strings(v) => Json::from(v.clone()),
            Value::Ints(v) => Json::from(v.clone()),
            Value::Datetime(dt) => {
                Json::String(dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true))
            }
            Value::Map(m) => Json::Object(m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()),
            Value::Null => Json::Null,
        }
    }
}

/// Rejects blank strings, literal `null`/`undefined`, and short LIKE
/// patterns produced by formatting a missing value (`%null%`).
pub fn is_valid_string(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return false;
    }
    if matches!(trimmed, "null" | "NULL" | "Null" | "undefined") {
        return false;
    }
    if trimmed.len() <= MAX_LENGTH_FOR_NULL_CHECK && NULL_CONCATENATION.is_match(trimmed) {
        return false;
    }
    true
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::String(s.clone())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::UInt(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::Strings(v)
    }
}

impl<'a> From<Vec<&'a str>> for Value {
    fn from(v: Vec<&'a str>) -> Self {
        Value::Strings(v.into_iter().map(|s| s.to_string()).collect())
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Value::Ints(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::Datetime(dt)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(m: BTreeMap<String, Value>) -> Self {
        Value::Map(m)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_validity_rejects_empty_and_placeholder_values() {
        assert!(!Value::Null.is_valid());
        assert!(!Value::from("   ").is_valid());
        assert!(!Value::from("undefined").is_valid());
        assert!(!Value::from("NULL").is_valid());
        assert!(!Value::from("%null%").is_valid());
        assert!(!Value::Strings(vec![]).is_valid());
        assert!(Value::from("alice").is_valid());
        assert!(Value::from(0i64).is_valid());
        assert!(Value::from(false).is_valid());
    }

    #[test]
    fn null_concatenation_check_only_applies_to_short_strings() {
        let long = format!("{}null{}", "%".repeat(10), "%".repeat(11));
        assert!(Value::from(long).is_valid());
    }

    #[test]
    fn numeric_rules() {
        assert!(Value::from(-3i64).is_valid_number());
        assert!(!Value::Float(f64::NAN).is_valid_number());
        assert!(!Value::from("1").is_valid_number());
        assert!(Value::from(2u64).is_positive_number());
        assert!(!Value::from(0i64).is_positive_number());
        assert!(!Value::Float(f64::INFINITY).is_positive_number());
    }

    #[test]
    fn like_patterns_must_narrow() {
        assert!(Value::from("%ali%").is_valid_like_pattern());
        assert!(!Value::from("%%").is_valid_like_pattern());
        assert!(!Value::from("_").is_valid_like_pattern());
        assert!(!Value::from(5i64).is_valid_like_pattern());
    }

    #[test]
    fn options_convert_to_null() {
        assert_eq!(Value::from(None::<String>), Value::Null);
        assert_eq!(Value::from(Some(7i64)), Value::Int(7));
    }

    #[test]
    fn json_form_of_structured_values() {
        let mut map = BTreeMap::new();
        map.insert("first".to_string(), Value::from("ann"));
        map.insert("age".to_string(), Value::from(41i64));
        assert_eq!(
            Value::Map(map).to_json(),
            serde_json::json!({"age": 41, "first": "ann"})
        );
        assert_eq!(Value::Float(f64::NAN).to_json(), serde_json::Value::Null);

        let at = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            Value::from(at).to_json(),
            serde_json::json!("2024-05-01T12:00:00.000000Z")
        );
    }
}
