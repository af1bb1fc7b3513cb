use std::collections::HashMap;

use etl_core::{ColumnType, ColumnValue, FieldType, SinkMapping, SourceSchema};
use serde_json::Value;

use crate::convert::{check_kind, convert_value};
use crate::error::{Result, SchemaError, ValidationFailure};
use crate::path::resolve;

/// A configured join key: which field path on a topic's payload to
/// extract, and its declared type for normalization.
#[derive(Debug, Clone)]
pub struct JoinKeySpec {
    pub path: String,
    pub field_type: FieldType,
}

/// Implements the three Schema Mapper responsibilities (§4.1): payload
/// validation, join key extraction with normalization, record merging,
/// and column-value projection for the sink.
pub struct SchemaMapper {
    topic_schemas: HashMap<String, SourceSchema>,
    join_keys: HashMap<String, JoinKeySpec>,
    mapping: SinkMapping,
}

impl SchemaMapper {
    pub fn new(
        topic_schemas: HashMap<String, SourceSchema>,
        join_keys: HashMap<String, JoinKeySpec>,
        mapping: SinkMapping,
    ) -> Self {
        Self {
            topic_schemas,
            join_keys,
            mapping,
        }
    }

    /// Validate(topic, payload) — every declared field must resolve by
    /// dot-path and match its declared kind.
    pub fn validate(&self, topic: &str, payload: &Value) -> Result<()> {
        let schema = self
            .topic_schemas
            .get(topic)
            .ok_or_else(|| SchemaError::UnknownTopic(topic.to_string()))?;

        for field in &schema.fields {
            let field_type = FieldType::normalize(&field.field_type)
                .map_err(|_| ValidationFailure::TypeMismatch {
                    path: field.name.clone(),
                    expected: "declared type".to_string(),
                    got: field.field_type.clone(),
                })?;
            match resolve(payload, &field.name) {
                None => {
                    return Err(ValidationFailure::MissingField {
                        path: field.name.clone(),
                    }
                    .into())
                }
                Some(value) => {
                    if let Err((expected, got)) = check_kind(field_type, value) {
                        return Err(ValidationFailure::TypeMismatch {
                            path: field.name.clone(),
                            expected: expected.to_string(),
                            got: got.to_string(),
                        }
                        .into());
                    }
                }
            }
        }
        Ok(())
    }

    pub fn validate_bytes(&self, topic: &str, payload: &[u8]) -> Result<Value> {
        let value: Value =
            serde_json::from_slice(payload).map_err(|e| SchemaError::InvalidJson(e.to_string()))?;
        self.validate(topic, &value)?;
        Ok(value)
    }

    /// GetJoinKey(topic, payload) — resolves and normalizes the
    /// configured join key. Two keys compare equal iff their normalized
    /// strings are identical.
    pub fn get_join_key(&self, topic: &str, payload: &Value) -> Result<String> {
        let spec = self
            .join_keys
            .get(topic)
            .ok_or_else(|| SchemaError::NoJoinKey(topic.to_string()))?;
        let value = resolve(payload, &spec.path).ok_or_else(|| ValidationFailure::MissingField {
            path: spec.path.clone(),
        })?;
        Ok(normalize_key(value, spec.field_type))
    }

    /// JoinData(left, right) — shallow-merges two JSON objects, right
    /// wins on key collision.
    pub fn join_data(&self, left: &Value, right: &Value) -> Value {
        let mut merged = left.as_object().cloned().unwrap_or_default();
        if let Some(right_obj) = right.as_object() {
            for (k, v) in right_obj {
                merged.insert(k.clone(), v.clone());
            }
        }
        Value::Object(merged)
    }

    /// PrepareValues(payload) — ordered native values aligned with
    /// GetOrderedColumns(). Any single-column failure is reported with
    /// its index and field path; the caller routes the whole record to
    /// the DLQ, it never aborts a batch.
    pub fn prepare_values(&self, payload: &Value) -> Result<Vec<ColumnValue>> {
        let mut out = Vec::with_capacity(self.mapping.entries.len());
        for entry in &self.mapping.entries {
            let value = resolve(payload, &entry.field_name).ok_or_else(|| {
                ValidationFailure::MissingField {
                    path: entry.field_name.clone(),
                }
            })?;
            let column_type = ColumnType::parse(&entry.column_type).map_err(|e| {
                ValidationFailure::ParseError {
                    path: entry.field_name.clone(),
                    reason: e.to_string(),
                }
            })?;
            let converted = convert_value(value, &column_type).map_err(|reason| {
                ValidationFailure::ParseError {
                    path: entry.field_name.clone(),
                    reason,
                }
            })?;
            out.push(converted);
        }
        Ok(out)
    }

    /// GetOrderedColumns() — the mapping's column list in insertion order.
    pub fn get_ordered_columns(&self) -> Vec<String> {
        self.mapping.column_names()
    }
}

fn normalize_key(value: &Value, field_type: FieldType) -> String {
    match field_type {
        FieldType::String => value.as_str().unwrap_or_default().to_string(),
        FieldType::Int => value
            .as_i64()
            .map(|n| n.to_string())
            .unwrap_or_else(|| value.to_string()),
        FieldType::Uint => value
            .as_u64()
            .map(|n| n.to_string())
            .unwrap_or_else(|| value.to_string()),
        FieldType::Float => value
            .as_f64()
            .map(|n| format!("{n:.10}"))
            .unwrap_or_else(|| value.to_string()),
        FieldType::Bool => value
            .as_bool()
            .map(|b| b.to_string())
            .unwrap_or_else(|| value.to_string()),
        FieldType::Array | FieldType::Object => value.to_string(),
    }
}
