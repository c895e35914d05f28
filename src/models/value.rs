//! Dynamic column value.
//!
//! `Value` is the tagged union stored in a [`Record`](super::Record) and bound as a
//! statement argument. All coercions are total: a value that cannot be converted
//! yields the target type's zero value instead of an error.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;

/// Text layouts accepted when coercing a string into a timestamp.
const TIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Format used when a timestamp is rendered as text.
const TIME_OUTPUT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Bytes(Vec<u8>),
    Time(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this value for logs and error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Time(_) => "time",
        }
    }

    /// True for Null, empty text and integer zero. Used to decide between
    /// INSERT and UPDATE on save.
    pub fn is_empty_key(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Int(0) => true,
            Self::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn as_string(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Text(s) => s.clone(),
            Self::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            Self::Time(t) => t.format(TIME_OUTPUT_FORMAT).to_string(),
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Int(i) => *i,
            Self::Float(f) if f.is_finite() => *f as i64,
            Self::Bool(b) => i64::from(*b),
            Self::Text(s) => parse_i64(s),
            Self::Bytes(b) => std::str::from_utf8(b).map(parse_i64).unwrap_or(0),
            Self::Time(t) => t.and_utc().timestamp(),
            _ => 0,
        }
    }

    /// Narrowing conversion; values outside the `i32` range yield 0.
    pub fn as_i32(&self) -> i32 {
        i32::try_from(self.as_i64()).unwrap_or(0)
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Int(i) => *i as f64,
            Self::Float(f) => *f,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Text(s) => s.trim().parse().unwrap_or(0.0),
            Self::Bytes(b) => std::str::from_utf8(b)
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(0.0),
            _ => 0.0,
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Text(s) => parse_bool(s),
            Self::Bytes(b) => std::str::from_utf8(b).map(parse_bool).unwrap_or(false),
            _ => false,
        }
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        match self {
            Self::Null => Vec::new(),
            Self::Bytes(b) => b.clone(),
            Self::Text(s) => s.as_bytes().to_vec(),
            other => other.as_string().into_bytes(),
        }
    }

    /// Timestamp coercion. Integers are read as Unix seconds; text is tried
    /// against RFC 3339, common datetime layouts, and a bare date.
    pub fn as_time(&self) -> Option<NaiveDateTime> {
        match self {
            Self::Time(t) => Some(*t),
            Self::Int(secs) => DateTime::from_timestamp(*secs, 0).map(|dt| dt.naive_utc()),
            Self::Text(s) => parse_time(s),
            Self::Bytes(b) => std::str::from_utf8(b).ok().and_then(parse_time),
            _ => None,
        }
    }

    /// Convert into a JSON value. Bytes become base64 text and timestamps
    /// ISO-8601 text; non-finite floats become null.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Int(i) => JsonValue::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::Text(s) => JsonValue::String(s.clone()),
            Self::Bytes(b) => JsonValue::String(STANDARD.encode(b)),
            Self::Time(t) => JsonValue::String(t.format(TIME_OUTPUT_FORMAT).to_string()),
        }
    }

    /// Build from a JSON value. Nested arrays and objects are kept as their
    /// JSON text; integers beyond `i64` fall back to floats.
    pub fn from_json(json: &JsonValue) -> Self {
        match json {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            JsonValue::String(s) => Self::Text(s.clone()),
            nested @ (JsonValue::Array(_) | JsonValue::Object(_)) => Self::Text(nested.to_string()),
        }
    }
}

fn parse_i64(s: &str) -> i64 {
    let s = s.trim();
    s.parse::<i64>()
        .ok()
        .or_else(|| {
            s.parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(|f| f as i64)
        })
        .unwrap_or(0)
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "1" | "t" | "true" | "y" | "yes" | "on"
    )
}

fn parse_time(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            Self::Float(_) => serializer.serialize_none(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Text(s) => serializer.serialize_str(s),
            Self::Bytes(b) => serializer.serialize_str(&STANDARD.encode(b)),
            Self::Time(t) => serializer.collect_str(&t.format(TIME_OUTPUT_FORMAT)),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            other => write!(f, "{}", other.as_string()),
        }
    }
}

// ============================================================================
// Conversions
// ============================================================================

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Self::Int(i64::from(v))
                }
            }
        )*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        i64::try_from(v)
            .map(Self::Int)
            .unwrap_or(Self::Float(v as f64))
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Self::Time(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_coercions() {
        assert_eq!(Value::Text(" 42 ".into()).as_i64(), 42);
        assert_eq!(Value::Text("3.9".into()).as_i64(), 3);
        assert_eq!(Value::Text("abc".into()).as_i64(), 0);
        assert_eq!(Value::Bool(true).as_i64(), 1);
        assert_eq!(Value::Null.as_i64(), 0);
        assert_eq!(Value::Int(i64::MAX).as_i32(), 0);
        assert_eq!(Value::Int(-7).as_i32(), -7);
    }

    #[test]
    fn test_bool_coercions() {
        for s in ["1", "t", "TRUE", "yes", "on"] {
            assert!(Value::Text(s.into()).as_bool(), "{s}");
        }
        for s in ["0", "f", "false", "no", "off", "maybe"] {
            assert!(!Value::Text(s.into()).as_bool(), "{s}");
        }
        assert!(Value::Int(2).as_bool());
        assert!(!Value::Float(0.0).as_bool());
    }

    #[test]
    fn test_time_coercions() {
        let t = Value::Text("2024-03-01 10:20:30".into()).as_time().unwrap();
        assert_eq!(t.to_string(), "2024-03-01 10:20:30");

        let d = Value::Text("2024-03-01".into()).as_time().unwrap();
        assert_eq!(d.to_string(), "2024-03-01 00:00:00");

        let rfc = Value::Text("2024-03-01T10:20:30+02:00".into())
            .as_time()
            .unwrap();
        assert_eq!(rfc.to_string(), "2024-03-01 08:20:30");

        assert_eq!(Value::Int(0).as_time().unwrap().to_string(), "1970-01-01 00:00:00");
        assert!(Value::Text("not a date".into()).as_time().is_none());
        assert!(Value::Bool(true).as_time().is_none());
    }

    #[test]
    fn test_empty_key() {
        assert!(Value::Null.is_empty_key());
        assert!(Value::Int(0).is_empty_key());
        assert!(Value::Text(String::new()).is_empty_key());
        assert!(!Value::Int(5).is_empty_key());
        assert!(!Value::Text("x".into()).is_empty_key());
    }

    #[test]
    fn test_json_mapping() {
        assert_eq!(Value::from_json(&serde_json::json!(7)), Value::Int(7));
        assert_eq!(Value::from_json(&serde_json::json!(1.5)), Value::Float(1.5));
        assert_eq!(
            Value::from_json(&serde_json::json!(u64::MAX)),
            Value::Float(u64::MAX as f64)
        );
        assert_eq!(
            Value::from_json(&serde_json::json!({"a": [1, 2]})),
            Value::Text(r#"{"a":[1,2]}"#.into())
        );
        assert_eq!(Value::Bytes(b"hi".to_vec()).to_json(), serde_json::json!("aGk="));
        assert_eq!(Value::Float(f64::NAN).to_json(), JsonValue::Null);
    }

    #[test]
    fn test_from_option() {
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".into()));
        assert_eq!(Value::from(u64::MAX), Value::Float(u64::MAX as f64));
    }
}
