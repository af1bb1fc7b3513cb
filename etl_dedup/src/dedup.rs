use std::sync::Arc;
use std::time::Duration;

use etl_bus::{Bus, KeyValueStore};
use etl_core::{Message, MessageOrigin, DlqRecord, MSG_ID_HEADER};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::expr::CompiledExpr;
use crate::transform::StatelessTransformer;

pub struct DeduplicatorConfig {
    pub input_subject: String,
    pub output_subject: String,
    pub dlq_subject: String,
    pub window: Option<Duration>,
    pub batch_size: usize,
    pub max_wait: Duration,
}

/// Implements §4.3: drop messages whose `msg-id` was seen within the
/// configured window, apply stateless transforms (§4.4) to survivors,
/// forward the rest, and route failures to the DLQ subject.
pub struct Deduplicator {
    bus: Arc<dyn Bus>,
    key_store: Arc<dyn KeyValueStore>,
    config: DeduplicatorConfig,
    filter: Option<CompiledExpr>,
    transformer: StatelessTransformer,
}

impl Deduplicator {
    pub fn new(
        bus: Arc<dyn Bus>,
        key_store: Arc<dyn KeyValueStore>,
        config: DeduplicatorConfig,
        filter: Option<CompiledExpr>,
        transformer: StatelessTransformer,
    ) -> Self {
        Self {
            bus,
            key_store,
            config,
            filter,
            transformer,
        }
    }

    /// Processes one bounded batch; returns the number of records
    /// forwarded to the output subject. Used directly by tests and by
    /// the supervised run loop.
    pub async fn run_once(&self) -> Result<usize> {
        let batch = self
            .bus
            .fetch(&self.config.input_subject, self.config.batch_size, self.config.max_wait)
            .await?;
        if batch.is_empty() {
            return Ok(0);
        }

        let mut forward: Vec<(Message, Value)> = Vec::new();
        let mut dlq: Vec<DlqRecord> = Vec::new();
        let mut new_ids: Vec<String> = Vec::new();

        for delivery in &batch {
            let msg = &delivery.message;
            if let Some(id) = msg.msg_id() {
                if self.key_store.contains(&dedup_key(id)).await? {
                    debug!(msg_id = id, "dropping duplicate");
                    continue;
                }
                new_ids.push(id.to_string());
            }

            let payload: Value = match serde_json::from_slice(&msg.payload) {
                Ok(v) => v,
                Err(e) => {
                    dlq.push(DlqRecord::new(
                        "deduplicator",
                        format!("invalid json: {e}"),
                        msg.payload.clone(),
                        msg.headers.clone(),
                    ));
                    continue;
                }
            };

            if let Some(filter) = &self.filter {
                match filter.eval_bool(&payload) {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!("record excluded by filter expression");
                        continue;
                    }
                    Err(e) => {
                        dlq.push(DlqRecord::new(
                            "deduplicator",
                            format!("filter eval error: {e}"),
                            msg.payload.clone(),
                            msg.headers.clone(),
                        ));
                        continue;
                    }
                }
            }

            match self.transformer.apply(&payload) {
                Ok(transformed) => forward.push((msg.clone(), transformed)),
                Err(e) => dlq.push(DlqRecord::new(
                    "deduplicator",
                    format!("transform error: {e}"),
                    msg.payload.clone(),
                    msg.headers.clone(),
                )),
            }
        }

        for record in &dlq {
            self.bus
                .publish(
                    &self.config.dlq_subject,
                    serde_json::to_vec(record)?,
                    Default::default(),
                    MessageOrigin {
                        topic: "dlq".to_string(),
                        partition: 0,
                        offset: 0,
                    },
                )
                .await?;
        }

        let forwarded = forward.len();
        for (original, transformed) in &forward {
            self.bus
                .publish(
                    &self.config.output_subject,
                    serde_json::to_vec(transformed)?,
                    original.headers.clone(),
                    original.origin.clone(),
                )
                .await?;
        }

        if let Some(window) = self.config.window {
            for id in &new_ids {
                self.key_store.put(&dedup_key(id), vec![1], Some(window)).await?;
            }
        }

        if let Some(last) = batch.last() {
            self.bus.ack(&self.config.input_subject, last).await?;
        }

        info!(
            forwarded,
            dlq = dlq.len(),
            batch_size = batch.len(),
            "deduplicator processed batch"
        );
        Ok(forwarded)
    }

    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) -> Result<()> {
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            tokio::select! {
                result = self.run_once() => { result?; }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        warn!("deduplicator received shutdown signal");
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn dedup_key(msg_id: &str) -> String {
    format!("dedup:{msg_id}")
}

#[allow(dead_code)]
fn header_msg_id(msg: &Message) -> Option<&str> {
    msg.headers.get(MSG_ID_HEADER).map(String::as_str)
}
