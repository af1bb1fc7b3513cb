//! Builds the single `SchemaMapper` shared by every component in a
//! pipeline: one source of truth for validation, join-key extraction, and
//! sink column projection (§4.1).

use std::collections::HashMap;

use etl_core::{FieldType, Orientation, PipelineConfig, SourceSchema, TopicConfig};
use etl_schema::mapper::JoinKeySpec;
use etl_schema::SchemaMapper;
use serde_json::Value;

use crate::error::{Result, SupervisorError};

pub fn build_mapper(config: &PipelineConfig) -> Result<SchemaMapper> {
    let mut topic_schemas = HashMap::new();
    for topic in &config.source.topics {
        topic_schemas.insert(topic.name.clone(), topic.source_schema());
    }

    let mut join_keys = HashMap::new();
    if let Some(join) = &config.join {
        if join.enabled {
            for src in &join.sources {
                let field_type = FieldType::normalize(&src.join_key_type)?;
                join_keys.insert(
                    src.source_id.clone(),
                    JoinKeySpec {
                        path: src.join_key.clone(),
                        field_type,
                    },
                );
            }
        }
    }

    Ok(SchemaMapper::new(topic_schemas, join_keys, config.sink.mapping()))
}

/// Builds a JSON object populated with a zero-value default per declared
/// field (§6.1: filter/transformation expressions must compile *and*
/// yield a boolean, resp. evaluate cleanly, against schema defaults).
/// Used at startup only, never against real records.
pub fn schema_defaults(schema: &SourceSchema) -> Value {
    let mut map = serde_json::Map::new();
    for field in &schema.fields {
        let default = match FieldType::normalize(&field.field_type) {
            Ok(FieldType::String) => Value::String(String::new()),
            Ok(FieldType::Bool) => Value::Bool(false),
            Ok(FieldType::Int) | Ok(FieldType::Uint) => Value::from(0),
            Ok(FieldType::Float) => Value::from(0.0),
            Ok(FieldType::Array) => Value::Array(Vec::new()),
            Ok(FieldType::Object) | Err(_) => Value::Object(serde_json::Map::new()),
        };
        map.insert(field.name.clone(), default);
    }
    Value::Object(map)
}

/// Where a deduplicator forwards its output: straight to the sink when no
/// join is configured, otherwise into whichever join-input subject matches
/// this topic's configured orientation.
pub fn dedup_output_subject(config: &PipelineConfig, topic: &TopicConfig) -> Result<String> {
    match &config.join {
        Some(join) if join.enabled => {
            let source = join
                .sources
                .iter()
                .find(|s| s.source_id == topic.name)
                .ok_or_else(|| {
                    SupervisorError::Config(format!(
                        "topic '{}' is not referenced by any join source",
                        topic.name
                    ))
                })?;
            Ok(match source.orientation {
                Orientation::Left => crate::subjects::JOIN_LEFT_IN.to_string(),
                Orientation::Right => crate::subjects::JOIN_RIGHT_IN.to_string(),
            })
        }
        _ => Ok(crate::subjects::SINK_IN.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etl_core::types::{KafkaConnectionParams, SchemaWrapper};
    use etl_core::{JoinConfig, JoinSourceConfig, MappingEntry, SchemaField, SinkConfig, SourceConfig};

    fn topic(name: &str) -> TopicConfig {
        TopicConfig {
            name: name.to_string(),
            consumer_group_initial_offset: "earliest".to_string(),
            schema: SchemaWrapper {
                kind: "json".to_string(),
                fields: vec![SchemaField {
                    name: "user_id".to_string(),
                    field_type: "string".to_string(),
                }],
            },
            deduplication: None,
        }
    }

    fn config_with_join(enabled: bool) -> PipelineConfig {
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
                topics: vec![topic("user_events"), topic("orders")],
            },
            join: Some(JoinConfig {
                enabled,
                kind: "temporal".into(),
                sources: vec![
                    JoinSourceConfig {
                        source_id: "user_events".into(),
                        join_key: "user_id".into(),
                        join_key_type: "string".into(),
                        time_window: "1h".into(),
                        orientation: Orientation::Left,
                    },
                    JoinSourceConfig {
                        source_id: "orders".into(),
                        join_key: "user_id".into(),
                        join_key_type: "string".into(),
                        time_window: "1h".into(),
                        orientation: Orientation::Right,
                    },
                ],
            }),
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
                table: "joined".into(),
                table_mapping: vec![MappingEntry {
                    source_id: "user_events".into(),
                    field_name: "user_id".into(),
                    column_name: "user_id".into(),
                    column_type: "String".into(),
                }],
            },
        }
    }

    #[test]
    fn schema_defaults_covers_every_declared_field_with_a_typed_zero_value() {
        let schema = topic("user_events").source_schema();
        let defaults = schema_defaults(&schema);
        assert_eq!(defaults["user_id"], serde_json::json!(""));
    }

    #[test]
    fn schema_defaults_lets_a_filter_on_a_declared_field_evaluate_cleanly() {
        use etl_dedup::CompiledExpr;
        let schema = topic("user_events").source_schema();
        let defaults = schema_defaults(&schema);
        let filter = CompiledExpr::compile("user_id == \"\"").unwrap();
        assert!(filter.eval_bool(&defaults).unwrap());
    }

    #[test]
    fn schema_defaults_rejects_non_boolean_filter_at_startup_time() {
        use etl_dedup::CompiledExpr;
        let schema = topic("user_events").source_schema();
        let defaults = schema_defaults(&schema);
        let filter = CompiledExpr::compile("user_id").unwrap();
        assert!(filter.eval_bool(&defaults).is_err());
    }

    #[test]
    fn build_mapper_collects_join_keys_when_enabled() {
        let config = config_with_join(true);
        let mapper = build_mapper(&config).unwrap();
        let key = mapper
            .get_join_key("user_events", &serde_json::json!({"user_id": "u1"}))
            .unwrap();
        assert_eq!(key, "u1");
    }

    #[test]
    fn dedup_output_routes_by_orientation_when_join_enabled() {
        let config = config_with_join(true);
        let left = dedup_output_subject(&config, &topic("user_events")).unwrap();
        let right = dedup_output_subject(&config, &topic("orders")).unwrap();
        assert_eq!(left, crate::subjects::JOIN_LEFT_IN);
        assert_eq!(right, crate::subjects::JOIN_RIGHT_IN);
    }

    #[test]
    fn dedup_output_goes_straight_to_sink_when_join_disabled() {
        let config = config_with_join(false);
        let subject = dedup_output_subject(&config, &topic("user_events")).unwrap();
        assert_eq!(subject, crate::subjects::SINK_IN);
    }

    #[test]
    fn dedup_output_errors_for_topic_not_in_join_sources() {
        let config = config_with_join(true);
        let err = dedup_output_subject(&config, &topic("unrelated"));
        assert!(err.is_err());
    }
}
