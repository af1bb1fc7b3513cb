//! Type-kind checking (Validate) and source→column conversion
//! (PrepareValues), per the §6.1 kind and conversion tables.

use chrono::{DateTime, NaiveDateTime, Utc};
use etl_core::{ColumnType, ColumnValue, FieldType};
use serde_json::Value;
use uuid::Uuid;

/// Returns `Ok(())` if `value`'s JSON kind is compatible with `declared`,
/// else `Err((expected, got))` describing the mismatch.
pub fn check_kind(declared: FieldType, value: &Value) -> Result<(), (&'static str, &'static str)> {
    let ok = match declared {
        FieldType::String => value.is_string(),
        FieldType::Bool => value.is_boolean(),
        FieldType::Int | FieldType::Uint => value.is_i64() || value.is_u64(),
        FieldType::Float => value.is_number(),
        FieldType::Array => value.is_array(),
        FieldType::Object => value.is_object(),
    };
    if ok {
        Ok(())
    } else {
        Err((declared_name(declared), json_kind_name(value)))
    }
}

fn declared_name(t: FieldType) -> &'static str {
    match t {
        FieldType::String => "string",
        FieldType::Bool => "bool",
        FieldType::Int => "int",
        FieldType::Uint => "uint",
        FieldType::Float => "float",
        FieldType::Array => "array",
        FieldType::Object => "object",
    }
}

fn json_kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

const ACCEPTED_DATETIME_LAYOUT: &str = "%Y-%m-%d %H:%M:%S";

/// Converts a resolved JSON value into the native column representation,
/// per the §6.1 conversion table. `Err(reason)` is always a per-row
/// failure, never fatal.
pub fn convert_value(value: &Value, column_type: &ColumnType) -> Result<ColumnValue, String> {
    match column_type {
        ColumnType::String => value
            .as_str()
            .map(|s| ColumnValue::String(s.to_string()))
            .ok_or_else(|| "expected string".to_string()),
        ColumnType::Uuid => {
            let s = value.as_str().ok_or("expected string for UUID")?;
            Uuid::parse_str(s)
                .map(ColumnValue::Uuid)
                .map_err(|e| format!("invalid UUID: {e}"))
        }
        ColumnType::DateTime => {
            let s = value.as_str().ok_or("expected string for DateTime")?;
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(ColumnValue::DateTime(dt.with_timezone(&Utc)));
            }
            NaiveDateTime::parse_from_str(s, ACCEPTED_DATETIME_LAYOUT)
                .map(|naive| ColumnValue::DateTime(DateTime::from_naive_utc_and_offset(naive, Utc)))
                .map_err(|e| format!("invalid DateTime '{s}': {e}"))
        }
        ColumnType::Int8 => as_i64(value)?.try_into().map(ColumnValue::Int8).map_err(range_err),
        ColumnType::Int16 => as_i64(value)?.try_into().map(ColumnValue::Int16).map_err(range_err),
        ColumnType::Int32 => as_i64(value)?.try_into().map(ColumnValue::Int32).map_err(range_err),
        ColumnType::Int64 => as_i64(value).map(ColumnValue::Int64),
        ColumnType::UInt8 => as_u64(value)?.try_into().map(ColumnValue::UInt8).map_err(range_err),
        ColumnType::UInt16 => as_u64(value)?.try_into().map(ColumnValue::UInt16).map_err(range_err),
        ColumnType::UInt32 => as_u64(value)?.try_into().map(ColumnValue::UInt32).map_err(range_err),
        ColumnType::UInt64 => as_u64(value).map(ColumnValue::UInt64),
        ColumnType::Float32 => value
            .as_f64()
            .map(|f| ColumnValue::Float32(f as f32))
            .ok_or_else(|| "expected number".to_string()),
        ColumnType::Float64 => value
            .as_f64()
            .map(ColumnValue::Float64)
            .ok_or_else(|| "expected number".to_string()),
        ColumnType::Bool => value
            .as_bool()
            .map(ColumnValue::Bool)
            .ok_or_else(|| "expected bool".to_string()),
        ColumnType::Array(inner) => {
            let arr = value.as_array().ok_or("expected array")?;
            let converted = arr
                .iter()
                .map(|v| convert_value(v, inner))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ColumnValue::Array(converted))
        }
    }
}

fn as_i64(value: &Value) -> Result<i64, String> {
    value
        .as_i64()
        .or_else(|| value.as_u64().and_then(|u| i64::try_from(u).ok()))
        .ok_or_else(|| "expected integer".to_string())
}

fn as_u64(value: &Value) -> Result<u64, String> {
    value
        .as_u64()
        .or_else(|| value.as_i64().and_then(|i| u64::try_from(i).ok()))
        .ok_or_else(|| "expected unsigned integer".to_string())
}

fn range_err<E: std::fmt::Display>(e: E) -> String {
    format!("value out of range: {e}")
}
