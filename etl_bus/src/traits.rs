use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use etl_core::{Message, MessageOrigin};

use crate::error::Result;

/// A single fetched message together with the sequence number needed to
/// ack/nak it under the bus's ack-all-up-to-seq policy.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub seq: u64,
    pub message: Message,
}

/// The durable, at-least-once bus contract (§6.2). One subject per
/// producer; components never write to a subject they don't own.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Publishes and waits for durable-store acknowledgement.
    async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
        headers: HashMap<String, String>,
        origin: MessageOrigin,
    ) -> Result<u64>;

    /// Like `publish`, but deduplicates against broker-side replays using
    /// `dedup_id` within `window`; returns `Ok(None)` if the id was already
    /// seen and the publish was suppressed.
    async fn publish_with_dedupe(
        &self,
        subject: &str,
        payload: Vec<u8>,
        headers: HashMap<String, String>,
        origin: MessageOrigin,
        dedup_id: &str,
        window: Duration,
    ) -> Result<Option<u64>>;

    /// Fetches up to `batch_size` not-yet-delivered messages, waiting at
    /// most `max_wait` for at least one to arrive.
    async fn fetch(&self, subject: &str, batch_size: usize, max_wait: Duration) -> Result<Vec<Delivery>>;

    /// Acks `delivery` and, per the AckAll policy, every earlier
    /// still-in-flight message on the same subject.
    async fn ack(&self, subject: &str, delivery: &Delivery) -> Result<()>;

    /// Returns `delivery` to the subject for redelivery.
    async fn nak(&self, subject: &str, delivery: &Delivery) -> Result<()>;
}
