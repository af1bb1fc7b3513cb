use std::sync::Arc;
use std::time::Duration;

use etl_bus::{Bus, Delivery};
use etl_core::{DlqRecord, MessageOrigin};
use etl_schema::SchemaMapper;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::Result;
use crate::pool::ChPool;
use crate::writer::write_batch;

pub struct SinkExecutorConfig {
    pub input_subject: String,
    pub dlq_subject: String,
    pub table: String,
    pub max_batch_size: usize,
    pub max_delay: Duration,
    pub max_retries: u32,
}

/// Batches messages from the final subject and inserts them into
/// ClickHouse (§4.6). One flush == one `Bus::fetch` call: the bus
/// already bounds the batch by size and wait time, which is exactly
/// the queue-size-or-deadline flush policy the spec describes.
pub struct SinkExecutor {
    bus: Arc<dyn Bus>,
    pool: Arc<ChPool>,
    mapper: Arc<SchemaMapper>,
    config: SinkExecutorConfig,
}

impl SinkExecutor {
    pub fn new(bus: Arc<dyn Bus>, pool: Arc<ChPool>, mapper: Arc<SchemaMapper>, config: SinkExecutorConfig) -> Self {
        Self { bus, pool, mapper, config }
    }

    /// Processes one flush; returns the number of rows written.
    pub async fn run_once(&self) -> Result<usize> {
        let batch = self
            .bus
            .fetch(&self.config.input_subject, self.config.max_batch_size, self.config.max_delay)
            .await?;
        if batch.is_empty() {
            return Ok(0);
        }

        let columns = self.mapper.get_ordered_columns();
        let mut rows = Vec::with_capacity(batch.len());
        let mut mapped_deliveries = Vec::with_capacity(batch.len());
        let mut dlq_records = Vec::new();

        for delivery in &batch {
            match self.row_for(&delivery.message.payload) {
                Ok(row) => {
                    rows.push(row);
                    mapped_deliveries.push(delivery);
                }
                Err(e) => dlq_records.push(DlqRecord::new(
                    "sink",
                    e.to_string(),
                    delivery.message.payload.clone(),
                    delivery.message.headers.clone(),
                )),
            }
        }

        for record in &dlq_records {
            self.to_dlq(record).await?;
        }

        let written = rows.len();
        if !rows.is_empty() {
            match write_batch(&self.pool, &self.config.table, &columns, &rows, self.config.max_retries).await {
                Ok(()) => {
                    info!(written, table = %self.config.table, "sink flushed batch");
                }
                Err(e) => {
                    warn!(error = %e, "sink batch write exhausted retries, routing mapped rows to dlq");
                    for delivery in &mapped_deliveries {
                        self.to_dlq(&DlqRecord::new(
                            "sink",
                            format!("insert failed after retries: {e}"),
                            delivery.message.payload.clone(),
                            delivery.message.headers.clone(),
                        ))
                        .await?;
                    }
                }
            }
        }

        self.ack_batch(&batch).await?;
        Ok(written)
    }

    fn row_for(&self, payload: &[u8]) -> Result<Vec<etl_core::ColumnValue>> {
        let value: Value = serde_json::from_slice(payload)?;
        Ok(self.mapper.prepare_values(&value)?)
    }

    async fn ack_batch(&self, batch: &[Delivery]) -> Result<()> {
        if let Some(last) = batch.last() {
            self.bus.ack(&self.config.input_subject, last).await?;
        }
        Ok(())
    }

    async fn to_dlq(&self, record: &DlqRecord) -> Result<()> {
        self.bus
            .publish(
                &self.config.dlq_subject,
                serde_json::to_vec(record)?,
                Default::default(),
                MessageOrigin { topic: "dlq".to_string(), partition: 0, offset: 0 },
            )
            .await?;
        Ok(())
    }

    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) -> Result<()> {
        loop {
            if *shutdown.borrow() {
                info!("sink stopping");
                return Ok(());
            }
            tokio::select! {
                result = self.run_once() => { result?; }
                _ = shutdown.changed() => {}
            }
        }
    }
}
