use std::sync::Arc;
use std::time::Duration;

use etl_bus::Bus;
use etl_core::{DlqRecord, MessageOrigin};
use etl_schema::SchemaMapper;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::buffer::{LeftBuffer, RightBuffer};
use crate::error::Result;

pub struct JoinExecutorConfig {
    pub left_topic: String,
    pub right_topic: String,
    pub left_subject: String,
    pub right_subject: String,
    pub results_subject: String,
    pub dlq_subject: String,
    pub batch_size: usize,
    pub max_wait: Duration,
}

/// Temporal two-stream join (§4.5). Left and right handlers are
/// serialized under one mutex so the "right arrival clears all
/// buffered lefts for K" invariant holds regardless of concurrent
/// fetch timing.
pub struct JoinExecutor {
    bus: Arc<dyn Bus>,
    left_buffer: LeftBuffer,
    right_buffer: RightBuffer,
    mapper: Arc<SchemaMapper>,
    config: JoinExecutorConfig,
    serialize: Mutex<()>,
}

impl JoinExecutor {
    pub fn new(
        bus: Arc<dyn Bus>,
        left_buffer: LeftBuffer,
        right_buffer: RightBuffer,
        mapper: Arc<SchemaMapper>,
        config: JoinExecutorConfig,
    ) -> Self {
        Self {
            bus,
            left_buffer,
            right_buffer,
            mapper,
            config,
            serialize: Mutex::new(()),
        }
    }

    /// Processes one batch from each side; returns the number of joined
    /// records emitted to the results subject.
    pub async fn run_once(&self) -> Result<usize> {
        let mut emitted = 0;
        emitted += self.process_left().await?;
        emitted += self.process_right().await?;
        Ok(emitted)
    }

    async fn process_left(&self) -> Result<usize> {
        let batch = self
            .bus
            .fetch(&self.config.left_subject, self.config.batch_size, self.config.max_wait)
            .await?;
        let mut emitted = 0;
        for delivery in &batch {
            let payload: Value = match serde_json::from_slice(&delivery.message.payload) {
                Ok(v) => v,
                Err(e) => {
                    self.dlq(format!("invalid json: {e}"), &delivery.message.payload).await?;
                    self.bus.ack(&self.config.left_subject, delivery).await?;
                    continue;
                }
            };
            let key = match self.mapper.get_join_key(&self.config.left_topic, &payload) {
                Ok(k) => k,
                Err(e) => {
                    self.dlq(format!("join key error: {e}"), &delivery.message.payload).await?;
                    self.bus.ack(&self.config.left_subject, delivery).await?;
                    continue;
                }
            };

            let joined = {
                let _guard = self.serialize.lock().await;
                match self.right_buffer.get(&key).await? {
                    Some(right_bytes) => {
                        let right: Value = serde_json::from_slice(&right_bytes)?;
                        Some(self.mapper.join_data(&payload, &right))
                    }
                    None => {
                        self.left_buffer.append(&key, delivery.message.payload.clone()).await?;
                        None
                    }
                }
            };

            if let Some(joined) = joined {
                self.publish_result(joined).await?;
                emitted += 1;
            }
            self.bus.ack(&self.config.left_subject, delivery).await?;
        }
        Ok(emitted)
    }

    async fn process_right(&self) -> Result<usize> {
        let batch = self
            .bus
            .fetch(&self.config.right_subject, self.config.batch_size, self.config.max_wait)
            .await?;
        let mut emitted = 0;
        for delivery in &batch {
            let payload: Value = match serde_json::from_slice(&delivery.message.payload) {
                Ok(v) => v,
                Err(e) => {
                    self.dlq(format!("invalid json: {e}"), &delivery.message.payload).await?;
                    self.bus.ack(&self.config.right_subject, delivery).await?;
                    continue;
                }
            };
            let key = match self.mapper.get_join_key(&self.config.right_topic, &payload) {
                Ok(k) => k,
                Err(e) => {
                    self.dlq(format!("join key error: {e}"), &delivery.message.payload).await?;
                    self.bus.ack(&self.config.right_subject, delivery).await?;
                    continue;
                }
            };

            let matched_lefts = {
                let _guard = self.serialize.lock().await;
                self.right_buffer.put(&key, delivery.message.payload.clone()).await?;
                self.left_buffer.drain(&key).await?
            };

            for left_bytes in matched_lefts {
                let left: Value = serde_json::from_slice(&left_bytes)?;
                let joined = self.mapper.join_data(&left, &payload);
                self.publish_result(joined).await?;
                emitted += 1;
            }
            self.bus.ack(&self.config.right_subject, delivery).await?;
        }
        Ok(emitted)
    }

    async fn publish_result(&self, joined: Value) -> Result<()> {
        self.bus
            .publish(
                &self.config.results_subject,
                serde_json::to_vec(&joined)?,
                Default::default(),
                MessageOrigin {
                    topic: "join-result".to_string(),
                    partition: 0,
                    offset: 0,
                },
            )
            .await?;
        Ok(())
    }

    async fn dlq(&self, reason: String, payload: &[u8]) -> Result<()> {
        warn!(%reason, "join executor routing record to dlq");
        let record = DlqRecord::new("join", reason, payload.to_vec(), Default::default());
        self.bus
            .publish(
                &self.config.dlq_subject,
                serde_json::to_vec(&record)?,
                Default::default(),
                MessageOrigin {
                    topic: "dlq".to_string(),
                    partition: 0,
                    offset: 0,
                },
            )
            .await?;
        Ok(())
    }

    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) -> Result<()> {
        loop {
            if *shutdown.borrow() {
                info!("join executor stopping");
                return Ok(());
            }
            tokio::select! {
                result = self.run_once() => { result?; }
                _ = shutdown.changed() => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etl_bus::{InMemoryBus, InMemoryKeyValueStore};
    use etl_core::{MappingEntry, SchemaField, SinkMapping, SourceSchema};
    use etl_schema::mapper::JoinKeySpec;
    use etl_core::FieldType;
    use serde_json::json;
    use std::collections::HashMap;

    fn mapper() -> Arc<SchemaMapper> {
        let mut schemas = HashMap::new();
        schemas.insert(
            "user_events".to_string(),
            SourceSchema {
                fields: vec![SchemaField { name: "user_id".into(), field_type: "string".into() }],
            },
        );
        schemas.insert(
            "orders".to_string(),
            SourceSchema {
                fields: vec![SchemaField { name: "user_id".into(), field_type: "string".into() }],
            },
        );
        let mut join_keys = HashMap::new();
        join_keys.insert(
            "user_events".to_string(),
            JoinKeySpec { path: "user_id".into(), field_type: FieldType::String },
        );
        join_keys.insert(
            "orders".to_string(),
            JoinKeySpec { path: "user_id".into(), field_type: FieldType::String },
        );
        Arc::new(SchemaMapper::new(schemas, join_keys, SinkMapping { entries: vec![
            MappingEntry { source_id: "user_events".into(), field_name: "user_id".into(), column_name: "user_id".into(), column_type: "String".into() },
        ]}))
    }

    fn setup() -> (Arc<InMemoryBus>, JoinExecutor) {
        let bus = Arc::new(InMemoryBus::new());
        let left_kv: Arc<dyn etl_bus::KeyValueStore> = Arc::new(InMemoryKeyValueStore::new());
        let right_kv: Arc<dyn etl_bus::KeyValueStore> = Arc::new(InMemoryKeyValueStore::new());
        let exec = JoinExecutor::new(
            bus.clone(),
            LeftBuffer::new(left_kv, Duration::from_secs(3600)),
            RightBuffer::new(right_kv, Duration::from_secs(3600)),
            mapper(),
            JoinExecutorConfig {
                left_topic: "user_events".into(),
                right_topic: "orders".into(),
                left_subject: "left".into(),
                right_subject: "right".into(),
                results_subject: "results".into(),
                dlq_subject: "dlq".into(),
                batch_size: 10,
                max_wait: Duration::from_millis(20),
            },
        );
        (bus, exec)
    }

    #[tokio::test]
    async fn s3_temporal_join_match_found() {
        let (bus, exec) = setup();
        bus.publish(
            "left",
            serde_json::to_vec(&json!({"user_id":"u1","name":"Alice"})).unwrap(),
            Default::default(),
            MessageOrigin { topic: "user_events".into(), partition: 0, offset: 0 },
        ).await.unwrap();
        bus.publish(
            "left",
            serde_json::to_vec(&json!({"user_id":"u2","name":"Bob"})).unwrap(),
            Default::default(),
            MessageOrigin { topic: "user_events".into(), partition: 0, offset: 1 },
        ).await.unwrap();
        exec.process_left().await.unwrap();

        bus.publish(
            "right",
            serde_json::to_vec(&json!({"user_id":"u2","amount":7})).unwrap(),
            Default::default(),
            MessageOrigin { topic: "orders".into(), partition: 0, offset: 0 },
        ).await.unwrap();
        let emitted = exec.process_right().await.unwrap();
        assert_eq!(emitted, 1);

        let results = bus.fetch("results", 10, Duration::from_millis(20)).await.unwrap();
        assert_eq!(results.len(), 1);
        let joined: Value = serde_json::from_slice(&results[0].message.payload).unwrap();
        assert_eq!(joined["user_id"], json!("u2"));
        assert_eq!(joined["name"], json!("Bob"));
        assert_eq!(joined["amount"], json!(7));
    }

    #[tokio::test]
    async fn s4_multiple_lefts_preserve_arrival_order() {
        let (bus, exec) = setup();
        bus.publish(
            "left",
            serde_json::to_vec(&json!({"user_id":"u1","name":"Alice"})).unwrap(),
            Default::default(),
            MessageOrigin { topic: "user_events".into(), partition: 0, offset: 0 },
        ).await.unwrap();
        bus.publish(
            "left",
            serde_json::to_vec(&json!({"user_id":"u1","name":"Charlie"})).unwrap(),
            Default::default(),
            MessageOrigin { topic: "user_events".into(), partition: 0, offset: 1 },
        ).await.unwrap();
        exec.process_left().await.unwrap();

        bus.publish(
            "right",
            serde_json::to_vec(&json!({"user_id":"u1","email":"e@x"})).unwrap(),
            Default::default(),
            MessageOrigin { topic: "orders".into(), partition: 0, offset: 0 },
        ).await.unwrap();
        let emitted = exec.process_right().await.unwrap();
        assert_eq!(emitted, 2);

        let results = bus.fetch("results", 10, Duration::from_millis(20)).await.unwrap();
        let first: Value = serde_json::from_slice(&results[0].message.payload).unwrap();
        let second: Value = serde_json::from_slice(&results[1].message.payload).unwrap();
        assert_eq!(first["name"], json!("Alice"));
        assert_eq!(second["name"], json!("Charlie"));
    }

    #[tokio::test]
    async fn unmatched_left_is_buffered_not_emitted() {
        let (bus, exec) = setup();
        bus.publish(
            "left",
            serde_json::to_vec(&json!({"user_id":"u9","name":"Nobody"})).unwrap(),
            Default::default(),
            MessageOrigin { topic: "user_events".into(), partition: 0, offset: 0 },
        ).await.unwrap();
        let emitted = exec.process_left().await.unwrap();
        assert_eq!(emitted, 0);
        let results = bus.fetch("results", 10, Duration::from_millis(10)).await.unwrap();
        assert!(results.is_empty());
    }
}
