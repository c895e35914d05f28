//! Row decoding into [`Record`]s.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies the declared column type into a logical category
//! 2. Database-specific decoders extract a [`Value`] for that category
//!
//! When the typed decode fails (SQLite columns may hold any storage class, and
//! some server types have no direct mapping) the decoder falls back to a
//! text → integer → float → bool → bytes chain. A column that cannot be decoded
//! at all becomes `Value::Null` and is logged.

use crate::models::{Dialect, Record, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueFormat, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Temporal,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, dialect: Dialect) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is a storage affinity, not an exact type
        if dialect == Dialect::Sqlite {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    // Temporal before integer: "interval" would otherwise match "int"
    if lower.contains("timestamp")
        || lower.contains("datetime")
        || lower == "date"
        || lower == "time"
        || lower == "timetz"
    {
        return TypeCategory::Temporal;
    }

    if lower.contains("int") || lower.contains("serial") || lower.contains("tiny") {
        if lower.contains("interval") || lower.contains("point") {
            return TypeCategory::Unknown;
        }
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower.contains("text") || lower == "name" || lower == "enum" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Raw DECIMAL/NUMERIC value rendered as its exact decimal text.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        // MySQL sends DECIMAL as text in both protocols
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("NUMERIC")
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(RawDecimal(value.as_str()?.to_string())),
            PgValueFormat::Binary => pg_numeric_to_string(value.as_bytes()?)
                .map(RawDecimal)
                .ok_or_else(|| "malformed NUMERIC value".into()),
        }
    }
}

/// Render PostgreSQL's binary NUMERIC (base-10000 digits) as decimal text.
fn pg_numeric_to_string(buf: &[u8]) -> Option<String> {
    const NUMERIC_NEG: u16 = 0x4000;
    const NUMERIC_NAN: u16 = 0xC000;

    let word = |i: usize| -> Option<u16> {
        Some(u16::from_be_bytes([*buf.get(i)?, *buf.get(i + 1)?]))
    };
    let ndigits = word(0)? as usize;
    let weight = word(2)? as i16 as i32;
    let sign = word(4)?;
    let dscale = word(6)? as usize;

    if sign == NUMERIC_NAN {
        return Some("NaN".to_string());
    }
    let digits = (0..ndigits)
        .map(|i| word(8 + i * 2))
        .collect::<Option<Vec<u16>>>()?;
    let digit = |pos: i32| -> u16 {
        usize::try_from(pos)
            .ok()
            .and_then(|p| digits.get(p).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        for pos in 0..=weight {
            if pos == 0 {
                out.push_str(&digit(pos).to_string());
            } else {
                out.push_str(&format!("{:04}", digit(pos)));
            }
        }
    }
    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut pos = weight + 1;
        while frac.len() < dscale {
            frac.push_str(&format!("{:04}", digit(pos)));
            pos += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }
    Some(out)
}

// =============================================================================
// Row to Record Trait
// =============================================================================

/// Trait for converting database rows to records.
pub trait RowToRecord {
    fn to_record(&self) -> Record;
}

impl RowToRecord for MySqlRow {
    fn to_record(&self) -> Record {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), Dialect::MySql);
                (col.name().to_string(), mysql::decode_column(self, idx, category))
            })
            .collect()
    }
}

impl RowToRecord for PgRow {
    fn to_record(&self) -> Record {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), Dialect::Postgres);
                (col.name().to_string(), postgres::decode_column(self, idx, category))
            })
            .collect()
    }
}

impl RowToRecord for SqliteRow {
    fn to_record(&self) -> Record {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), Dialect::Sqlite);
                (col.name().to_string(), sqlite::decode_column(self, idx, category))
            })
            .collect()
    }
}

/// Generic fallback chain shared by all backends.
macro_rules! decode_any {
    ($row:expr, $idx:expr) => {{
        let row = $row;
        let idx = $idx;
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            Value::from(v)
        } else if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            Value::from(v)
        } else if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            Value::from(v)
        } else if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
            Value::from(v)
        } else if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
            Value::from(v)
        } else {
            let column = row.columns()[idx].name();
            tracing::warn!(column = %column, "Column type could not be decoded, returning NULL");
            Value::Null
        }
    }};
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> Value {
        let typed = match category {
            TypeCategory::Decimal => row
                .try_get::<Option<RawDecimal>, _>(idx)
                .ok()
                .map(|v| Value::from(v.map(|d| d.0))),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => row.try_get::<Option<bool>, _>(idx).ok().map(Value::from),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => row.try_get::<Option<Vec<u8>>, _>(idx).ok().map(Value::from),
            TypeCategory::Json => row
                .try_get::<Option<serde_json::Value>, _>(idx)
                .ok()
                .map(|v| Value::from(v.map(|j| j.to_string()))),
            TypeCategory::Temporal => decode_temporal(row, idx),
            _ => None,
        };
        typed.unwrap_or_else(|| decode_any!(row, idx))
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> Option<Value> {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return Some(Value::from(v));
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return Some(Value::from(v));
        }
        if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
            return Some(Value::from(v));
        }
        if let Ok(v) = row.try_get::<Option<i8>, _>(idx) {
            return Some(Value::from(v));
        }
        // Unsigned columns
        if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
            return Some(Value::from(v));
        }
        if let Ok(v) = row.try_get::<Option<u32>, _>(idx) {
            return Some(Value::from(v));
        }
        if let Ok(v) = row.try_get::<Option<u16>, _>(idx) {
            return Some(Value::from(v));
        }
        row.try_get::<Option<u8>, _>(idx).ok().map(Value::from)
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> Option<Value> {
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return Some(Value::from(v));
        }
        row.try_get::<Option<f32>, _>(idx).ok().map(Value::from)
    }

    fn decode_temporal(row: &MySqlRow, idx: usize) -> Option<Value> {
        if let Ok(v) = row.try_get::<Option<NaiveDateTime>, _>(idx) {
            return Some(Value::from(v));
        }
        if let Ok(v) = row.try_get::<Option<DateTime<Utc>>, _>(idx) {
            return Some(Value::from(v.map(|t| t.naive_utc())));
        }
        if let Ok(v) = row.try_get::<Option<NaiveDate>, _>(idx) {
            return Some(Value::from(v.and_then(|d| d.and_hms_opt(0, 0, 0))));
        }
        row.try_get::<Option<NaiveTime>, _>(idx)
            .ok()
            .map(|v| Value::from(v.map(|t| t.to_string())))
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> Value {
        let typed = match category {
            TypeCategory::Decimal => row
                .try_get::<Option<RawDecimal>, _>(idx)
                .ok()
                .map(|v| Value::from(v.map(|d| d.0))),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => row.try_get::<Option<bool>, _>(idx).ok().map(Value::from),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => row.try_get::<Option<Vec<u8>>, _>(idx).ok().map(Value::from),
            TypeCategory::Json => row
                .try_get::<Option<serde_json::Value>, _>(idx)
                .ok()
                .map(|v| Value::from(v.map(|j| j.to_string()))),
            TypeCategory::Uuid => row
                .try_get::<Option<uuid::Uuid>, _>(idx)
                .ok()
                .map(|v| Value::from(v.map(|u| u.to_string()))),
            TypeCategory::Temporal => decode_temporal(row, idx),
            _ => None,
        };
        typed.unwrap_or_else(|| decode_any!(row, idx))
    }

    fn decode_integer(row: &PgRow, idx: usize) -> Option<Value> {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return Some(Value::from(v));
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return Some(Value::from(v));
        }
        row.try_get::<Option<i16>, _>(idx).ok().map(Value::from)
    }

    fn decode_float(row: &PgRow, idx: usize) -> Option<Value> {
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return Some(Value::from(v));
        }
        row.try_get::<Option<f32>, _>(idx).ok().map(Value::from)
    }

    fn decode_temporal(row: &PgRow, idx: usize) -> Option<Value> {
        if let Ok(v) = row.try_get::<Option<NaiveDateTime>, _>(idx) {
            return Some(Value::from(v));
        }
        if let Ok(v) = row.try_get::<Option<DateTime<Utc>>, _>(idx) {
            return Some(Value::from(v.map(|t| t.naive_utc())));
        }
        if let Ok(v) = row.try_get::<Option<NaiveDate>, _>(idx) {
            return Some(Value::from(v.and_then(|d| d.and_hms_opt(0, 0, 0))));
        }
        row.try_get::<Option<NaiveTime>, _>(idx)
            .ok()
            .map(|v| Value::from(v.map(|t| t.to_string())))
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(row: &SqliteRow, idx: usize, category: TypeCategory) -> Value {
        let typed = match category {
            TypeCategory::Integer => row.try_get::<Option<i64>, _>(idx).ok().map(Value::from),
            TypeCategory::Boolean => row.try_get::<Option<bool>, _>(idx).ok().map(Value::from),
            TypeCategory::Float | TypeCategory::Decimal => {
                row.try_get::<Option<f64>, _>(idx).ok().map(Value::from)
            }
            TypeCategory::Binary => row.try_get::<Option<Vec<u8>>, _>(idx).ok().map(Value::from),
            TypeCategory::Temporal => decode_temporal(row, idx),
            _ => None,
        };
        typed.unwrap_or_else(|| decode_any!(row, idx))
    }

    fn decode_temporal(row: &SqliteRow, idx: usize) -> Option<Value> {
        if let Ok(v) = row.try_get::<Option<NaiveDateTime>, _>(idx) {
            return Some(Value::from(v));
        }
        row.try_get::<Option<NaiveDate>, _>(idx)
            .ok()
            .map(|v| Value::from(v.and_then(|d| d.and_hms_opt(0, 0, 0))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(categorize_type("INT", Dialect::MySql), TypeCategory::Integer);
        assert_eq!(categorize_type("BIGINT", Dialect::Postgres), TypeCategory::Integer);
        assert_eq!(categorize_type("TINYINT", Dialect::MySql), TypeCategory::Integer);
        assert_eq!(categorize_type("INT8", Dialect::Postgres), TypeCategory::Integer);
        assert_eq!(categorize_type("INTEGER", Dialect::Sqlite), TypeCategory::Integer);
        assert_eq!(categorize_type("INTERVAL", Dialect::Postgres), TypeCategory::Unknown);
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(categorize_type("DECIMAL", Dialect::MySql), TypeCategory::Decimal);
        assert_eq!(categorize_type("NUMERIC", Dialect::Postgres), TypeCategory::Decimal);
        // SQLite NUMERIC is an affinity
        assert_eq!(categorize_type("NUMERIC", Dialect::Sqlite), TypeCategory::Float);
    }

    #[test]
    fn test_categorize_type_temporal() {
        assert_eq!(categorize_type("DATETIME", Dialect::MySql), TypeCategory::Temporal);
        assert_eq!(categorize_type("TIMESTAMPTZ", Dialect::Postgres), TypeCategory::Temporal);
        assert_eq!(categorize_type("DATE", Dialect::Sqlite), TypeCategory::Temporal);
    }

    #[test]
    fn test_categorize_type_misc() {
        assert_eq!(categorize_type("BOOLEAN", Dialect::MySql), TypeCategory::Boolean);
        assert_eq!(categorize_type("jsonb", Dialect::Postgres), TypeCategory::Json);
        assert_eq!(categorize_type("UUID", Dialect::Postgres), TypeCategory::Uuid);
        assert_eq!(categorize_type("BYTEA", Dialect::Postgres), TypeCategory::Binary);
        assert_eq!(categorize_type("VARCHAR", Dialect::MySql), TypeCategory::Text);
        assert_eq!(categorize_type("NULL", Dialect::Sqlite), TypeCategory::Unknown);
    }

    fn numeric(ndigits: u16, weight: i16, sign: u16, dscale: u16, digits: &[u16]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&ndigits.to_be_bytes());
        buf.extend_from_slice(&weight.to_be_bytes());
        buf.extend_from_slice(&sign.to_be_bytes());
        buf.extend_from_slice(&dscale.to_be_bytes());
        for d in digits {
            buf.extend_from_slice(&d.to_be_bytes());
        }
        buf
    }

    #[test]
    fn test_pg_numeric_to_string() {
        // 12345.678
        let buf = numeric(3, 1, 0, 3, &[1, 2345, 6780]);
        assert_eq!(pg_numeric_to_string(&buf).as_deref(), Some("12345.678"));

        // -0.05
        let buf = numeric(1, -1, 0x4000, 2, &[500]);
        assert_eq!(pg_numeric_to_string(&buf).as_deref(), Some("-0.05"));

        // 20000 (trailing zero groups are omitted on the wire)
        let buf = numeric(1, 1, 0, 0, &[2]);
        assert_eq!(pg_numeric_to_string(&buf).as_deref(), Some("20000"));

        // 0
        let buf = numeric(0, 0, 0, 0, &[]);
        assert_eq!(pg_numeric_to_string(&buf).as_deref(), Some("0"));

        let buf = numeric(0, 0, 0xC000, 0, &[]);
        assert_eq!(pg_numeric_to_string(&buf).as_deref(), Some("NaN"));

        assert_eq!(pg_numeric_to_string(&[0, 1]), None);
    }
}
