//! Driver row to JSON conversion.
//!
//! sqlx rows carry a type name per column, so Postgres and MySQL columns are
//! first classified into a [`ValueKind`] and then decoded by probing the Rust
//! types that kind can hold. tiberius rows have no usable type names, so SQL
//! Server columns are probed in one fixed order.
//!
//! Values without a lossless JSON form are rendered as strings: DECIMAL and
//! NUMERIC keep their exact text, temporal values use ISO formats, non-finite
//! floats use their Rust spelling, and binary data is UTF-8 text when valid or
//! base64 otherwise.

use crate::models::{DatabaseType, SqlRow};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::{Column, Decode, Row, Type, TypeInfo};

/// How a column's values are decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Temporal,
}

impl ValueKind {
    /// Classify an engine type name. Anything unrecognized decodes as text.
    pub fn classify(type_name: &str, db: DatabaseType) -> Self {
        let name = type_name.to_ascii_lowercase();
        let is = |candidates: &[&str]| candidates.contains(&name.as_str());

        // numeric before float: "numeric" would otherwise look like a float
        if name.contains("decimal") || name.contains("numeric") {
            Self::Decimal
        } else if is(&["bool", "boolean"]) {
            Self::Boolean
        } else if name.contains("int") || name.contains("serial") {
            Self::Integer
        } else if name.contains("float") || name.contains("double") || is(&["real"]) {
            Self::Float
        } else if is(&["json", "jsonb"]) {
            Self::Json
        } else if name.contains("blob") || name.contains("binary") || is(&["bytea"]) {
            Self::Binary
        } else if name.starts_with("timestamp")
            || is(&["datetime", "date", "time", "timetz"])
            || (db.schema_is_database() && name == "year")
        {
            Self::Temporal
        } else {
            Self::Text
        }
    }
}

/// Exact text of a DECIMAL/NUMERIC value.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        ValueKind::classify(ty.name(), DatabaseType::MySql) == ValueKind::Decimal
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        <&str as Decode<sqlx::MySql>>::decode(value).map(|s| Self(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        ValueKind::classify(ty.name(), DatabaseType::Postgres) == ValueKind::Decimal
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        <&str as Decode<sqlx::Postgres>>::decode(value).map(|s| Self(s.to_string()))
    }
}

/// UTF-8 text when the bytes are valid UTF-8, base64 otherwise.
pub fn bytes_to_json(bytes: &[u8]) -> JsonValue {
    match std::str::from_utf8(bytes) {
        Ok(text) => JsonValue::String(text.to_string()),
        Err(_) => JsonValue::String(STANDARD.encode(bytes)),
    }
}

fn float_to_json(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

fn text<T: ToString>(v: T) -> JsonValue {
    JsonValue::String(v.to_string())
}

fn number<T: Into<serde_json::Number>>(v: T) -> JsonValue {
    JsonValue::Number(v.into())
}

/// Return from the enclosing function on the first type that decodes.
///
/// NULL decodes as `Option::None` for every probed type, so the first probe
/// already settles NULL columns.
macro_rules! probe {
    (sqlx $row:expr, $idx:expr, $ty:ty, $map:expr) => {
        match $row.try_get::<Option<$ty>, _>($idx) {
            Ok(Some(v)) => return $map(v),
            Ok(None) => return JsonValue::Null,
            Err(_) => {}
        }
    };
    (tds $row:expr, $idx:expr, $ty:ty, $map:expr) => {
        match $row.try_get::<$ty, _>($idx) {
            Ok(Some(v)) => return $map(v),
            Ok(None) => return JsonValue::Null,
            Err(_) => {}
        }
    };
}

/// Converts a driver row into a column-name to value map.
pub trait RowToJson {
    fn to_json_map(&self) -> SqlRow;
}

impl RowToJson for PgRow {
    fn to_json_map(&self) -> SqlRow {
        self.columns()
            .iter()
            .map(|col| {
                let kind = ValueKind::classify(col.type_info().name(), DatabaseType::Postgres);
                (col.name().to_string(), pg_value(self, col.ordinal(), kind))
            })
            .collect()
    }
}

impl RowToJson for MySqlRow {
    fn to_json_map(&self) -> SqlRow {
        self.columns()
            .iter()
            .map(|col| {
                let type_name = col.type_info().name();
                let kind = ValueKind::classify(type_name, DatabaseType::MySql);
                let value = mysql_value(self, col.ordinal(), kind, type_name);
                (col.name().to_string(), value)
            })
            .collect()
    }
}

impl RowToJson for tiberius::Row {
    fn to_json_map(&self) -> SqlRow {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| (col.name().to_string(), tds_value(self, idx)))
            .collect()
    }
}

fn pg_value(row: &PgRow, idx: usize, kind: ValueKind) -> JsonValue {
    match kind {
        ValueKind::Decimal => probe!(sqlx row, idx, RawDecimal, |v: RawDecimal| JsonValue::String(v.0)),
        ValueKind::Integer => {
            probe!(sqlx row, idx, i16, number);
            probe!(sqlx row, idx, i32, number);
            probe!(sqlx row, idx, i64, number);
        }
        ValueKind::Float => {
            probe!(sqlx row, idx, f64, float_to_json);
            probe!(sqlx row, idx, f32, |v: f32| float_to_json(v.into()));
        }
        ValueKind::Boolean => probe!(sqlx row, idx, bool, JsonValue::Bool),
        ValueKind::Json => probe!(sqlx row, idx, JsonValue, std::convert::identity),
        ValueKind::Binary => probe!(sqlx row, idx, Vec<u8>, |v: Vec<u8>| bytes_to_json(&v)),
        ValueKind::Temporal => {
            probe!(sqlx row, idx, DateTime<Utc>, |v: DateTime<Utc>| text(v.to_rfc3339()));
            probe!(sqlx row, idx, NaiveDateTime, text);
            probe!(sqlx row, idx, NaiveDate, text);
            probe!(sqlx row, idx, NaiveTime, text);
        }
        ValueKind::Text => probe!(sqlx row, idx, String, JsonValue::String),
    }
    pg_raw_text(row, idx)
}

/// uuid, inet, enums and anything the simple query protocol returns as text.
fn pg_raw_text(row: &PgRow, idx: usize) -> JsonValue {
    use sqlx::ValueRef;

    match row.try_get_raw(idx) {
        Ok(raw) if raw.is_null() => JsonValue::Null,
        Ok(raw) => raw.as_str().map(text).unwrap_or(JsonValue::Null),
        Err(_) => JsonValue::Null,
    }
}

fn mysql_value(row: &MySqlRow, idx: usize, kind: ValueKind, type_name: &str) -> JsonValue {
    match kind {
        ValueKind::Decimal => probe!(sqlx row, idx, RawDecimal, |v: RawDecimal| JsonValue::String(v.0)),
        ValueKind::Integer => {
            probe!(sqlx row, idx, i64, number);
            probe!(sqlx row, idx, u64, number);
            probe!(sqlx row, idx, i32, number);
            probe!(sqlx row, idx, u32, number);
            probe!(sqlx row, idx, i16, number);
            probe!(sqlx row, idx, u16, number);
            probe!(sqlx row, idx, i8, number);
            probe!(sqlx row, idx, u8, number);
        }
        ValueKind::Float => {
            probe!(sqlx row, idx, f64, float_to_json);
            probe!(sqlx row, idx, f32, |v: f32| float_to_json(v.into()));
        }
        ValueKind::Boolean => probe!(sqlx row, idx, bool, JsonValue::Bool),
        ValueKind::Json => probe!(sqlx row, idx, JsonValue, std::convert::identity),
        ValueKind::Temporal => match type_name.to_ascii_uppercase().as_str() {
            "TIMESTAMP" => probe!(sqlx row, idx, DateTime<Utc>, |v: DateTime<Utc>| text(v.to_rfc3339())),
            "DATETIME" => probe!(sqlx row, idx, NaiveDateTime, text),
            "DATE" => probe!(sqlx row, idx, NaiveDate, text),
            "TIME" => probe!(sqlx row, idx, NaiveTime, text),
            // YEAR, zero dates and TIME values beyond 24h fall through to text
            _ => {}
        },
        ValueKind::Binary | ValueKind::Text => {}
    }

    // MySQL hands VARCHAR back as VARBINARY under some charset settings
    probe!(sqlx row, idx, String, JsonValue::String);
    probe!(sqlx row, idx, Vec<u8>, |v: Vec<u8>| bytes_to_json(&v));
    JsonValue::Null
}

fn tds_value(row: &tiberius::Row, idx: usize) -> JsonValue {
    use tiberius::numeric::Numeric;

    probe!(tds row, idx, bool, JsonValue::Bool);
    probe!(tds row, idx, u8, number);
    probe!(tds row, idx, i16, number);
    probe!(tds row, idx, i32, number);
    probe!(tds row, idx, i64, number);
    probe!(tds row, idx, f32, |v: f32| float_to_json(v.into()));
    probe!(tds row, idx, f64, float_to_json);
    probe!(tds row, idx, Numeric, text);
    probe!(tds row, idx, &str, text);
    probe!(tds row, idx, NaiveDateTime, text);
    probe!(tds row, idx, DateTime<Utc>, |v: DateTime<Utc>| text(v.to_rfc3339()));
    probe!(tds row, idx, NaiveDate, text);
    probe!(tds row, idx, NaiveTime, text);
    probe!(tds row, idx, tiberius::Uuid, text);
    probe!(tds row, idx, &[u8], bytes_to_json);

    tracing::debug!(column = idx, "Unsupported SQL Server column type, returning null");
    JsonValue::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    const PG: DatabaseType = DatabaseType::Postgres;
    const MY: DatabaseType = DatabaseType::MySql;

    #[test]
    fn test_classify_numbers() {
        assert_eq!(ValueKind::classify("INT8", PG), ValueKind::Integer);
        assert_eq!(ValueKind::classify("BIGINT UNSIGNED", MY), ValueKind::Integer);
        assert_eq!(ValueKind::classify("NUMERIC", PG), ValueKind::Decimal);
        assert_eq!(ValueKind::classify("DECIMAL", MY), ValueKind::Decimal);
        assert_eq!(ValueKind::classify("FLOAT8", PG), ValueKind::Float);
        assert_eq!(ValueKind::classify("DOUBLE", MY), ValueKind::Float);
    }

    #[test]
    fn test_classify_boolean_before_integer() {
        assert_eq!(ValueKind::classify("BOOLEAN", MY), ValueKind::Boolean);
        assert_eq!(ValueKind::classify("BOOL", PG), ValueKind::Boolean);
    }

    #[test]
    fn test_classify_temporal() {
        assert_eq!(ValueKind::classify("TIMESTAMPTZ", PG), ValueKind::Temporal);
        assert_eq!(ValueKind::classify("DATETIME", MY), ValueKind::Temporal);
        assert_eq!(ValueKind::classify("YEAR", MY), ValueKind::Temporal);
        assert_eq!(ValueKind::classify("YEAR", PG), ValueKind::Text);
    }

    #[test]
    fn test_classify_fallbacks() {
        assert_eq!(ValueKind::classify("jsonb", PG), ValueKind::Json);
        assert_eq!(ValueKind::classify("BYTEA", PG), ValueKind::Binary);
        assert_eq!(ValueKind::classify("VARBINARY", MY), ValueKind::Binary);
        assert_eq!(ValueKind::classify("UUID", PG), ValueKind::Text);
        assert_eq!(ValueKind::classify("INET", PG), ValueKind::Text);
    }

    #[test]
    fn test_bytes_to_json() {
        assert_eq!(bytes_to_json(b"hello world"), JsonValue::String("hello world".into()));
        assert_eq!(
            bytes_to_json(&[0xFF, 0xFE, 0x00, 0x01]),
            JsonValue::String("//4AAQ==".into())
        );
    }

    #[test]
    fn test_float_to_json_non_finite() {
        assert_eq!(float_to_json(f64::NAN), JsonValue::String("NaN".into()));
        assert_eq!(float_to_json(1.5), serde_json::json!(1.5));
    }
}
