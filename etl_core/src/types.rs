//! Shared data-model types: source schemas, sink mappings, and the
//! declarative pipeline configuration that binds them together.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::duration::parse_duration;
use crate::error::{CoreError, Result};

static IDENT_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_.]+$").unwrap());

/// Validates a ClickHouse table or column identifier destined for
/// interpolation into raw SQL (§6.1, §7). Only a plain alphanumeric/
/// underscore/dot charset is accepted; this alone rules out injection
/// via spaces, quotes, or statement separators, so no reserved-word
/// blocklist is needed on top of it.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CoreError::InvalidIdentifier("identifier cannot be empty".to_string()));
    }
    if name.len() > 128 {
        return Err(CoreError::InvalidIdentifier(format!("identifier '{name}' is too long")));
    }
    if !IDENT_PATTERN.is_match(name) {
        return Err(CoreError::InvalidIdentifier(format!(
            "identifier '{name}' contains invalid characters"
        )));
    }
    Ok(())
}

/// Source JSON field kind, normalized from any precision variant
/// (`int8`..`int64` etc. collapse to `Int`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Bool,
    Int,
    Uint,
    Float,
    Array,
    Object,
}

impl FieldType {
    /// Normalizes precision-qualified type names (`int32`, `uint64`, ...)
    /// down to the seven basic kinds.
    pub fn normalize(raw: &str) -> Result<Self> {
        let lower = raw.to_ascii_lowercase();
        Ok(match lower.as_str() {
            "string" | "str" => FieldType::String,
            "bool" | "boolean" => FieldType::Bool,
            "array" | "list" => FieldType::Array,
            "object" | "map" => FieldType::Object,
            s if s.starts_with("uint") => FieldType::Uint,
            s if s.starts_with("int") => FieldType::Int,
            "float" | "double" => FieldType::Float,
            s if s.starts_with("float") => FieldType::Float,
            other => {
                return Err(CoreError::Other(format!(
                    "unrecognized source field type '{other}'"
                )))
            }
        })
    }
}

/// ClickHouse column type, as declared in a sink mapping entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    String,
    Uuid,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Bool,
    DateTime,
    Array(Box<ColumnType>),
}

impl ColumnType {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if let Some(inner) = raw
            .strip_prefix("Array(")
            .and_then(|r| r.strip_suffix(')'))
        {
            return Ok(ColumnType::Array(Box::new(ColumnType::parse(inner)?)));
        }
        Ok(match raw {
            "String" => ColumnType::String,
            "UUID" => ColumnType::Uuid,
            "Int8" => ColumnType::Int8,
            "Int16" => ColumnType::Int16,
            "Int32" => ColumnType::Int32,
            "Int64" => ColumnType::Int64,
            "UInt8" => ColumnType::UInt8,
            "UInt16" => ColumnType::UInt16,
            "UInt32" => ColumnType::UInt32,
            "UInt64" => ColumnType::UInt64,
            "Float32" => ColumnType::Float32,
            "Float64" => ColumnType::Float64,
            "Bool" => ColumnType::Bool,
            "DateTime" => ColumnType::DateTime,
            other => {
                return Err(CoreError::Other(format!(
                    "unrecognized column type '{other}'"
                )))
            }
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceSchema {
    pub fields: Vec<SchemaField>,
}

impl SourceSchema {
    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .and_then(|f| FieldType::normalize(&f.field_type).ok())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Left,
    Right,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    pub enabled: bool,
    pub id_field: String,
    pub id_field_type: String,
    pub time_window: String,
}

impl DedupConfig {
    pub fn window(&self) -> Result<Duration> {
        parse_duration(&self.time_window)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    pub expression: String,
    pub output_name: String,
    pub output_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    pub name: String,
    pub consumer_group_initial_offset: String,
    pub schema: SchemaWrapper,
    #[serde(default)]
    pub deduplication: Option<DedupConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaWrapper {
    #[serde(rename = "type")]
    pub kind: String,
    pub fields: Vec<SchemaField>,
}

impl TopicConfig {
    pub fn source_schema(&self) -> SourceSchema {
        SourceSchema {
            fields: self.schema.fields.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConnectionParams {
    pub brokers: Vec<String>,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub sasl_username: Option<String>,
    #[serde(default)]
    pub sasl_password: Option<String>,
    #[serde(default)]
    pub sasl_mechanism: Option<String>,
    #[serde(default)]
    pub tls_enabled: bool,
    #[serde(default)]
    pub skip_auth: bool,
}

fn default_protocol() -> String {
    "plaintext".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub provider: Option<String>,
    pub connection_params: KafkaConnectionParams,
    pub topics: Vec<TopicConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinSourceConfig {
    pub source_id: String,
    pub join_key: String,
    pub join_key_type: String,
    pub time_window: String,
    pub orientation: Orientation,
}

impl JoinSourceConfig {
    pub fn window(&self) -> Result<Duration> {
        parse_duration(&self.time_window)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinConfig {
    pub enabled: bool,
    #[serde(rename = "type")]
    pub kind: String,
    pub sources: Vec<JoinSourceConfig>,
}

impl JoinConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.sources.len() != 2 {
            return Err(CoreError::JoinSourceCount(self.sources.len()));
        }
        let mut seen = std::collections::HashSet::new();
        for s in &self.sources {
            if !seen.insert(s.orientation) {
                return Err(CoreError::DuplicateOrientation(s.orientation));
            }
        }
        Ok(())
    }

    pub fn left(&self) -> Option<&JoinSourceConfig> {
        self.sources.iter().find(|s| s.orientation == Orientation::Left)
    }

    pub fn right(&self) -> Option<&JoinSourceConfig> {
        self.sources.iter().find(|s| s.orientation == Orientation::Right)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingEntry {
    pub source_id: String,
    pub field_name: String,
    pub column_name: String,
    pub column_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SinkMapping {
    pub entries: Vec<MappingEntry>,
}

impl SinkMapping {
    pub fn column_names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.column_name.clone()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    /// base64-encoded; not encryption, see design notes.
    pub password: String,
    #[serde(default)]
    pub secure: bool,
    pub max_batch_size: usize,
    pub max_delay_time: String,
    pub table: String,
    pub table_mapping: Vec<MappingEntry>,
}

impl SinkConfig {
    pub fn max_delay(&self) -> Result<Duration> {
        parse_duration(&self.max_delay_time)
    }

    pub fn mapping(&self) -> SinkMapping {
        SinkMapping {
            entries: self.table_mapping.clone(),
        }
    }

    pub fn decoded_password(&self) -> Result<String> {
        use base64::{engine::general_purpose::STANDARD, Engine};
        let bytes = STANDARD
            .decode(&self.password)
            .map_err(|e| CoreError::Other(format!("invalid base64 password: {e}")))?;
        String::from_utf8(bytes).map_err(|e| CoreError::Other(format!("password not utf8: {e}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub pipeline_id: String,
    pub source: SourceConfig,
    #[serde(default)]
    pub join: Option<JoinConfig>,
    #[serde(default)]
    pub filter_expression: Option<String>,
    #[serde(default)]
    pub transformations: Vec<TransformConfig>,
    pub sink: SinkConfig,
}

impl PipelineConfig {
    /// Implements the §6.1 static validation rules. Must be called before
    /// any worker starts; a failure here is a configuration error, not a
    /// per-record one.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline_id.trim().is_empty() {
            return Err(CoreError::MissingField("pipeline_id".to_string()));
        }
        if self.source.topics.is_empty() || self.source.topics.len() > 2 {
            return Err(CoreError::Other(format!(
                "source must declare 1 or 2 topics, got {}",
                self.source.topics.len()
            )));
        }

        for topic in &self.source.topics {
            let schema = topic.source_schema();
            if let Some(dedup) = &topic.deduplication {
                if dedup.enabled && !schema.contains(&dedup.id_field) {
                    return Err(CoreError::UndeclaredField {
                        topic: topic.name.clone(),
                        field: dedup.id_field.clone(),
                        context: "deduplication.id_field".to_string(),
                    });
                }
            }
        }

        if let Some(join) = &self.join {
            join.validate()?;
            if join.enabled {
                for js in &join.sources {
                    let topic = self
                        .source
                        .topics
                        .iter()
                        .find(|t| t.name == js.source_id)
                        .ok_or_else(|| {
                            CoreError::Other(format!(
                                "join source_id '{}' does not match any topic",
                                js.source_id
                            ))
                        })?;
                    if !topic.source_schema().contains(&js.join_key) {
                        return Err(CoreError::UndeclaredField {
                            topic: topic.name.clone(),
                            field: js.join_key.clone(),
                            context: "join.join_key".to_string(),
                        });
                    }
                }
            }
        }

        for entry in &self.sink.table_mapping {
            let topic = self
                .source
                .topics
                .iter()
                .find(|t| t.name == entry.source_id)
                .ok_or_else(|| {
                    CoreError::Other(format!(
                        "mapping source_id '{}' does not match any topic",
                        entry.source_id
                    ))
                })?;
            if !topic.source_schema().contains(&entry.field_name) {
                return Err(CoreError::UndeclaredField {
                    topic: topic.name.clone(),
                    field: entry.field_name.clone(),
                    context: "sink.table_mapping.field_name".to_string(),
                });
            }
        }

        if self.sink.max_batch_size == 0 {
            return Err(CoreError::Other("sink.max_batch_size must be > 0".to_string()));
        }
        self.sink.max_delay()?;

        validate_identifier(&self.sink.table)?;
        for entry in &self.sink.table_mapping {
            validate_identifier(&entry.column_name)?;
        }

        Ok(())
    }

    pub fn topic(&self, name: &str) -> Option<&TopicConfig> {
        self.source.topics.iter().find(|t| t.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> PipelineConfig {
        PipelineConfig {
            pipeline_id: "p1".into(),
            source: SourceConfig {
                kind: "kafka".into(),
                provider: None,
                connection_params: KafkaConnectionParams {
                    brokers: vec!["localhost:9092".into()],
                    protocol: "plaintext".into(),
                    sasl_username: None,
                    sasl_password: None,
                    sasl_mechanism: None,
                    tls_enabled: false,
                    skip_auth: true,
                },
                topics: vec![TopicConfig {
                    name: "users".into(),
                    consumer_group_initial_offset: "earliest".into(),
                    schema: SchemaWrapper {
                        kind: "json".into(),
                        fields: vec![
                            SchemaField { name: "id".into(), field_type: "string".into() },
                            SchemaField { name: "name".into(), field_type: "string".into() },
                        ],
                    },
                    deduplication: None,
                }],
            },
            join: None,
            filter_expression: None,
            transformations: vec![],
            sink: SinkConfig {
                kind: "clickhouse".into(),
                host: "localhost".into(),
                port: 9000,
                database: "default".into(),
                username: "default".into(),
                password: "".into(),
                secure: false,
                max_batch_size: 100,
                max_delay_time: "5s".into(),
                table: "users".into(),
                table_mapping: vec![
                    MappingEntry {
                        source_id: "users".into(),
                        field_name: "id".into(),
                        column_name: "id".into(),
                        column_type: "UUID".into(),
                    },
                    MappingEntry {
                        source_id: "users".into(),
                        field_name: "name".into(),
                        column_name: "name".into(),
                        column_type: "String".into(),
                    },
                ],
            },
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn rejects_mapping_field_not_in_schema() {
        let mut cfg = sample_config();
        cfg.sink.table_mapping[0].field_name = "missing".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_batch_size() {
        let mut cfg = sample_config();
        cfg.sink.max_batch_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_table_name_with_sql_metacharacters() {
        let mut cfg = sample_config();
        cfg.sink.table = "users; DROP TABLE x".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn accepts_ordinary_column_names_that_contain_sql_keyword_substrings() {
        let mut cfg = sample_config();
        cfg.sink.table_mapping[0].column_name = "updated_at".into();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn field_type_normalizes_precision_variants() {
        assert_eq!(FieldType::normalize("int64").unwrap(), FieldType::Int);
        assert_eq!(FieldType::normalize("uint8").unwrap(), FieldType::Uint);
        assert_eq!(FieldType::normalize("STRING").unwrap(), FieldType::String);
    }

    #[test]
    fn column_type_parses_array() {
        assert_eq!(
            ColumnType::parse("Array(String)").unwrap(),
            ColumnType::Array(Box::new(ColumnType::String))
        );
    }

    #[test]
    fn join_validate_rejects_duplicate_orientation() {
        let join = JoinConfig {
            enabled: true,
            kind: "temporal".into(),
            sources: vec![
                JoinSourceConfig {
                    source_id: "a".into(),
                    join_key: "k".into(),
                    join_key_type: "string".into(),
                    time_window: "1h".into(),
                    orientation: Orientation::Left,
                },
                JoinSourceConfig {
                    source_id: "b".into(),
                    join_key: "k".into(),
                    join_key_type: "string".into(),
                    time_window: "1h".into(),
                    orientation: Orientation::Left,
                },
            ],
        };
        assert!(join.validate().is_err());
    }
}
