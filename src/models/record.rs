//! Ordered dynamic row.
//!
//! A `Record` is used both for query results and for write payloads. Keys are
//! case-sensitive and unique; iteration follows the order in which keys were
//! first set.

use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDateTime;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;

use super::value::Value;
use crate::error::{DbError, DbResult};

static NULL: Value = Value::Null;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.fields.iter().position(|(k, _)| k == key)
    }

    /// Set a field. An existing key keeps its position.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        match self.position(&key) {
            Some(idx) => self.fields[idx].1 = value,
            None => self.fields.push((key, value)),
        }
        self
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Get a field, or `Value::Null` when absent.
    pub fn get(&self, key: &str) -> &Value {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
            .unwrap_or(&NULL)
    }

    pub fn has(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.position(key).map(|idx| self.fields.remove(idx).1)
    }

    pub fn clear(&mut self) {
        self.fields.clear();
    }

    pub fn keys(&self) -> Vec<&str> {
        self.fields.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    // ------------------------------------------------------------------------
    // Typed getters: best effort, zero value on failure.
    // ------------------------------------------------------------------------

    pub fn string(&self, key: &str) -> String {
        self.get(key).as_string()
    }

    pub fn int(&self, key: &str) -> i32 {
        self.get(key).as_i32()
    }

    pub fn int64(&self, key: &str) -> i64 {
        self.get(key).as_i64()
    }

    pub fn float(&self, key: &str) -> f64 {
        self.get(key).as_f64()
    }

    pub fn bool(&self, key: &str) -> bool {
        self.get(key).as_bool()
    }

    pub fn bytes(&self, key: &str) -> Vec<u8> {
        self.get(key).as_bytes()
    }

    /// Timestamp field, or the Unix epoch when absent or unparseable.
    pub fn time(&self, key: &str) -> NaiveDateTime {
        self.get(key).as_time().unwrap_or_default()
    }

    /// Unordered copy of the fields.
    pub fn to_map(&self) -> HashMap<String, Value> {
        self.fields.iter().cloned().collect()
    }

    // ------------------------------------------------------------------------
    // JSON
    // ------------------------------------------------------------------------

    pub fn try_to_json(&self) -> DbResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// JSON text of this record; `"{}"` if encoding fails.
    pub fn to_json(&self) -> String {
        self.try_to_json().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Record JSON encoding failed");
            "{}".to_string()
        })
    }

    /// Merge the fields of a JSON object into this record. On error the
    /// record is left untouched.
    pub fn from_json(&mut self, json: &str) -> DbResult<()> {
        let parsed = Self::parse_json(json)?;
        for (k, v) in parsed.fields {
            self.set(k, v);
        }
        Ok(())
    }

    /// Parse a flat JSON object into a new record.
    pub fn parse_json(json: &str) -> DbResult<Self> {
        let value: JsonValue = serde_json::from_str(json)?;
        Self::from_json_value(&value)
    }

    pub fn from_json_value(value: &JsonValue) -> DbResult<Self> {
        let JsonValue::Object(map) = value else {
            return Err(DbError::serialization(format!(
                "expected a JSON object, got {}",
                json_kind(value)
            )));
        };
        let mut record = Self::with_capacity(map.len());
        for (k, v) in map {
            record.set(k.clone(), Value::from_json(v));
        }
        Ok(record)
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Self::new();
        for (k, v) in iter {
            record.set(k, v);
        }
        record
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

struct RecordVisitor;

impl<'de> Visitor<'de> for RecordVisitor {
    type Value = Record;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a flat JSON object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Record, A::Error> {
        let mut record = Record::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((key, value)) = access.next_entry::<String, JsonValue>()? {
            record.set(key, Value::from_json(&value));
        }
        Ok(record)
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(RecordVisitor)
    }
}
