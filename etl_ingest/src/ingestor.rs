use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use etl_bus::Bus;
use etl_core::{DlqRecord, MSG_ID_HEADER};
use etl_schema::SchemaMapper;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::consumer::KafkaSource;
use crate::error::Result;

pub struct IngestorConfig {
    pub topic: String,
    pub output_subject: String,
    pub dlq_subject: String,
    pub dlq_component: String,
    pub dedup_id_path: Option<String>,
    pub fetch_timeout: Duration,
    pub max_publish_retries: u32,
}

/// Owns one Kafka topic and publishes onto exactly one durable subject
/// (§4.2). Pause halts fetching without dropping the underlying
/// consumer-group session; Resume continues from the same offsets.
pub struct Ingestor<C: KafkaSource> {
    source: C,
    bus: Arc<dyn Bus>,
    mapper: Arc<SchemaMapper>,
    config: IngestorConfig,
    paused: Arc<AtomicBool>,
}

impl<C: KafkaSource> Ingestor<C> {
    pub fn new(source: C, bus: Arc<dyn Bus>, mapper: Arc<SchemaMapper>, config: IngestorConfig) -> Self {
        Self {
            source,
            bus,
            mapper,
            config,
            paused: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Runs the per-record protocol (§4.2) for at most one fetched
    /// record. Returns `true` if a record was processed (forwarded or
    /// DLQ'd), `false` on an empty fetch or while paused.
    pub async fn run_once(&self) -> Result<bool> {
        if self.is_paused() {
            return Ok(false);
        }

        let record = match self.source.fetch_one(self.config.fetch_timeout).await? {
            Some(r) => r,
            None => return Ok(false),
        };

        let payload: Value = match serde_json::from_slice(&record.payload) {
            Ok(v) => v,
            Err(e) => {
                self.to_dlq(format!("invalid json: {e}"), &record.payload).await?;
                self.source.commit(&record.origin).await?;
                return Ok(true);
            }
        };

        if let Err(e) = self.mapper.validate(&self.config.topic, &payload) {
            self.to_dlq(format!("schema validation failed: {e}"), &record.payload)
                .await?;
            self.source.commit(&record.origin).await?;
            return Ok(true);
        }

        let mut headers = HashMap::new();
        if let Some(path) = &self.config.dedup_id_path {
            if let Some(id) = resolve_path(&payload, path) {
                headers.insert(MSG_ID_HEADER.to_string(), stringify(id));
            }
        }

        self.publish_with_retry(record.payload.clone(), headers, record.origin.clone())
            .await?;
        self.source.commit(&record.origin).await?;
        debug!(topic = %self.config.topic, offset = record.origin.offset, "ingested record");
        Ok(true)
    }

    async fn publish_with_retry(
        &self,
        payload: Vec<u8>,
        headers: HashMap<String, String>,
        origin: etl_core::MessageOrigin,
    ) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self
                .bus
                .publish(&self.config.output_subject, payload.clone(), headers.clone(), origin.clone())
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) if attempt < self.config.max_publish_retries => {
                    attempt += 1;
                    let backoff = Duration::from_millis(100 * 2u64.pow(attempt - 1));
                    warn!(attempt, error = %e, "publish failed, retrying after backoff");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn to_dlq(&self, reason: String, payload: &[u8]) -> Result<()> {
        let record = DlqRecord::new(self.config.dlq_component.clone(), reason, payload.to_vec(), HashMap::new());
        self.bus
            .publish(
                &self.config.dlq_subject,
                serde_json::to_vec(&record)?,
                Default::default(),
                etl_core::MessageOrigin {
                    topic: "dlq".to_string(),
                    partition: 0,
                    offset: 0,
                },
            )
            .await?;
        Ok(())
    }

    /// Runs until `shutdown` fires or the source surfaces a fatal error.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) -> Result<()> {
        loop {
            if *shutdown.borrow() {
                info!(topic = %self.config.topic, "ingestor stopping");
                return Ok(());
            }
            tokio::select! {
                result = self.run_once() => {
                    if let Err(e) = result {
                        error!(topic = %self.config.topic, error = %e, "ingestor fatal error");
                        return Err(e);
                    }
                }
                _ = shutdown.changed() => {}
            }
        }
    }
}

fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::{RawRecord, VecSource};
    use etl_bus::InMemoryBus;
    use etl_core::{MessageOrigin, SchemaField, SourceSchema};
    use std::collections::HashMap as Map;

    fn mapper_for(topic: &str) -> Arc<SchemaMapper> {
        let mut schemas = Map::new();
        schemas.insert(
            topic.to_string(),
            SourceSchema {
                fields: vec![
                    SchemaField { name: "id".into(), field_type: "string".into() },
                    SchemaField { name: "name".into(), field_type: "string".into() },
                ],
            },
        );
        Arc::new(SchemaMapper::new(schemas, Map::new(), Default::default()))
    }

    fn origin(offset: i64) -> MessageOrigin {
        MessageOrigin {
            topic: "users".into(),
            partition: 0,
            offset,
        }
    }

    #[tokio::test]
    async fn s1_valid_records_are_forwarded_in_order() {
        let source = VecSource::new(vec![
            RawRecord {
                payload: br#"{"id":"11111111-1111-1111-1111-111111111111","name":"A"}"#.to_vec(),
                origin: origin(0),
            },
            RawRecord {
                payload: br#"{"id":"22222222-2222-2222-2222-222222222222","name":"B"}"#.to_vec(),
                origin: origin(1),
            },
        ]);
        let bus = Arc::new(InMemoryBus::new());
        let ingestor = Ingestor::new(
            source,
            bus.clone(),
            mapper_for("users"),
            IngestorConfig {
                topic: "users".into(),
                output_subject: "out".into(),
                dlq_subject: "dlq".into(),
                dlq_component: "ingestor".into(),
                dedup_id_path: None,
                fetch_timeout: Duration::from_millis(20),
                max_publish_retries: 2,
            },
        );

        assert!(ingestor.run_once().await.unwrap());
        assert!(ingestor.run_once().await.unwrap());
        assert!(!ingestor.run_once().await.unwrap());

        let out = bus.fetch("out", 10, Duration::from_millis(20)).await.unwrap();
        assert_eq!(out.len(), 2);
        assert!(out[0].message.payload.starts_with(b"{\"id\":\"1"));
    }

    #[tokio::test]
    async fn invalid_schema_goes_to_dlq_and_commits_offset() {
        let source = VecSource::new(vec![RawRecord {
            payload: br#"{"id":"x"}"#.to_vec(),
            origin: origin(0),
        }]);
        let bus = Arc::new(InMemoryBus::new());
        let ingestor = Ingestor::new(
            source,
            bus.clone(),
            mapper_for("users"),
            IngestorConfig {
                topic: "users".into(),
                output_subject: "out".into(),
                dlq_subject: "dlq".into(),
                dlq_component: "ingestor".into(),
                dedup_id_path: None,
                fetch_timeout: Duration::from_millis(20),
                max_publish_retries: 2,
            },
        );
        assert!(ingestor.run_once().await.unwrap());
        let out = bus.fetch("out", 10, Duration::from_millis(10)).await.unwrap();
        assert!(out.is_empty());
        let dlq = bus.fetch("dlq", 10, Duration::from_millis(20)).await.unwrap();
        assert_eq!(dlq.len(), 1);
    }

    #[tokio::test]
    async fn dedup_id_path_sets_msg_id_header() {
        let source = VecSource::new(vec![RawRecord {
            payload: br#"{"id":"x","name":"n"}"#.to_vec(),
            origin: origin(0),
        }]);
        let bus = Arc::new(InMemoryBus::new());
        let mut schemas = Map::new();
        schemas.insert(
            "users".to_string(),
            SourceSchema {
                fields: vec![
                    SchemaField { name: "id".into(), field_type: "string".into() },
                    SchemaField { name: "name".into(), field_type: "string".into() },
                ],
            },
        );
        let mapper = Arc::new(SchemaMapper::new(schemas, Map::new(), Default::default()));
        let ingestor = Ingestor::new(
            source,
            bus.clone(),
            mapper,
            IngestorConfig {
                topic: "users".into(),
                output_subject: "out".into(),
                dlq_subject: "dlq".into(),
                dlq_component: "ingestor".into(),
                dedup_id_path: Some("id".into()),
                fetch_timeout: Duration::from_millis(20),
                max_publish_retries: 2,
            },
        );
        ingestor.run_once().await.unwrap();
        let out = bus.fetch("out", 10, Duration::from_millis(20)).await.unwrap();
        assert_eq!(out[0].message.headers.get(MSG_ID_HEADER), Some(&"x".to_string()));
    }

    #[tokio::test]
    async fn paused_ingestor_does_not_fetch() {
        let source = VecSource::new(vec![RawRecord {
            payload: br#"{"id":"x","name":"n"}"#.to_vec(),
            origin: origin(0),
        }]);
        let bus = Arc::new(InMemoryBus::new());
        let ingestor = Ingestor::new(
            source,
            bus,
            mapper_for("users"),
            IngestorConfig {
                topic: "users".into(),
                output_subject: "out".into(),
                dlq_subject: "dlq".into(),
                dlq_component: "ingestor".into(),
                dedup_id_path: None,
                fetch_timeout: Duration::from_millis(20),
                max_publish_retries: 2,
            },
        );
        ingestor.pause();
        assert!(!ingestor.run_once().await.unwrap());
        ingestor.resume();
        assert!(ingestor.run_once().await.unwrap());
    }
}
