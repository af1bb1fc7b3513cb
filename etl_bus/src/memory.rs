//! In-process bus and key-value store. This is the production
//! implementation used by the runner: subjects and buffers live for the
//! lifetime of the pipeline process and are rebuilt from replayed ingestor
//! output on restart, per the accepted at-least-once design (see
//! DESIGN.md's Open Question decisions).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use etl_core::{Clock, Message, MessageOrigin, SystemClock};

use crate::error::{BusError, Result};
use crate::kv::KeyValueStore;
use crate::traits::{Bus, Delivery};

struct Entry {
    seq: u64,
    message: Message,
    in_flight: bool,
}

struct Subject {
    queue: Mutex<VecDeque<Entry>>,
}

impl Subject {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }
}

/// Durable (process-lifetime), at-least-once, ack-all-up-to-seq bus.
pub struct InMemoryBus {
    subjects: DashMap<String, Arc<Subject>>,
    seen_dedupe_ids: DashMap<String, Instant>,
    next_seq: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            subjects: DashMap::new(),
            seen_dedupe_ids: DashMap::new(),
            next_seq: AtomicU64::new(1),
            clock,
        }
    }

    fn subject(&self, name: &str) -> Arc<Subject> {
        self.subjects
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Subject::new()))
            .clone()
    }

    fn publish_inner(
        &self,
        subject: &str,
        payload: Vec<u8>,
        headers: HashMap<String, String>,
        origin: MessageOrigin,
    ) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let message = Message {
            payload,
            headers,
            origin,
        };
        let subj = self.subject(subject);
        subj.queue.lock().unwrap().push_back(Entry {
            seq,
            message,
            in_flight: false,
        });
        seq
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bus for InMemoryBus {
    async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
        headers: HashMap<String, String>,
        origin: MessageOrigin,
    ) -> Result<u64> {
        Ok(self.publish_inner(subject, payload, headers, origin))
    }

    async fn publish_with_dedupe(
        &self,
        subject: &str,
        payload: Vec<u8>,
        headers: HashMap<String, String>,
        origin: MessageOrigin,
        dedup_id: &str,
        window: Duration,
    ) -> Result<Option<u64>> {
        let now = self.clock.now();
        if let Some(seen_at) = self.seen_dedupe_ids.get(dedup_id).map(|e| *e) {
            if now.duration_since(seen_at) < window {
                return Ok(None);
            }
        }
        self.seen_dedupe_ids.insert(dedup_id.to_string(), now);
        Ok(Some(self.publish_inner(subject, payload, headers, origin)))
    }

    async fn fetch(&self, subject: &str, batch_size: usize, max_wait: Duration) -> Result<Vec<Delivery>> {
        let subj = self.subject(subject);
        let deadline = Instant::now() + max_wait;
        loop {
            {
                let mut q = subj.queue.lock().unwrap();
                let mut out = Vec::new();
                for entry in q.iter_mut() {
                    if !entry.in_flight {
                        entry.in_flight = true;
                        out.push(Delivery {
                            seq: entry.seq,
                            message: entry.message.clone(),
                        });
                        if out.len() >= batch_size {
                            break;
                        }
                    }
                }
                if !out.is_empty() || Instant::now() >= deadline {
                    return Ok(out);
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn ack(&self, subject: &str, delivery: &Delivery) -> Result<()> {
        let subj = self.subject(subject);
        let mut q = subj.queue.lock().unwrap();
        while let Some(front) = q.front() {
            if front.seq <= delivery.seq {
                q.pop_front();
            } else {
                break;
            }
        }
        Ok(())
    }

    async fn nak(&self, subject: &str, delivery: &Delivery) -> Result<()> {
        let subj = self.subject(subject);
        let mut q = subj.queue.lock().unwrap();
        for entry in q.iter_mut() {
            if entry.seq == delivery.seq {
                entry.in_flight = false;
                return Ok(());
            }
        }
        Err(BusError::UnknownDelivery(delivery.seq))
    }
}

struct KvEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

/// TTL-indexed key-value store backing dedup ids and join buffers.
pub struct InMemoryKeyValueStore {
    map: DashMap<String, KvEntry>,
    clock: Arc<dyn Clock>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            map: DashMap::new(),
            clock,
        }
    }

    fn is_expired(&self, entry: &KvEntry) -> bool {
        match entry.expires_at {
            Some(exp) => self.clock.now() >= exp,
            None => false,
        }
    }
}

impl Default for InMemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = self.map.get(key) {
            if self.is_expired(&entry) {
                drop(entry);
                self.map.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|d| self.clock.now() + d);
        self.map.insert(key.to_string(), KvEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.map.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etl_core::FakeClock;

    fn origin() -> MessageOrigin {
        MessageOrigin {
            topic: "t".into(),
            partition: 0,
            offset: 0,
        }
    }

    #[tokio::test]
    async fn publish_then_fetch_roundtrips() {
        let bus = InMemoryBus::new();
        bus.publish("s", b"hello".to_vec(), HashMap::new(), origin())
            .await
            .unwrap();
        let out = bus.fetch("s", 10, Duration::from_millis(50)).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].message.payload, b"hello");
    }

    #[tokio::test]
    async fn ack_removes_up_to_seq_inclusive() {
        let bus = InMemoryBus::new();
        bus.publish("s", b"a".to_vec(), HashMap::new(), origin()).await.unwrap();
        bus.publish("s", b"b".to_vec(), HashMap::new(), origin()).await.unwrap();
        let out = bus.fetch("s", 10, Duration::from_millis(50)).await.unwrap();
        assert_eq!(out.len(), 2);
        bus.ack("s", &out[1]).await.unwrap();
        let remaining = bus.fetch("s", 10, Duration::from_millis(5)).await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn nak_makes_message_refetchable() {
        let bus = InMemoryBus::new();
        bus.publish("s", b"a".to_vec(), HashMap::new(), origin()).await.unwrap();
        let out = bus.fetch("s", 10, Duration::from_millis(50)).await.unwrap();
        bus.nak("s", &out[0]).await.unwrap();
        let refetched = bus.fetch("s", 10, Duration::from_millis(50)).await.unwrap();
        assert_eq!(refetched.len(), 1);
    }

    #[tokio::test]
    async fn dedupe_suppresses_within_window() {
        let clock = Arc::new(FakeClock::new());
        let bus = InMemoryBus::with_clock(clock.clone());
        let first = bus
            .publish_with_dedupe("s", b"a".to_vec(), HashMap::new(), origin(), "id1", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(first.is_some());
        let second = bus
            .publish_with_dedupe("s", b"b".to_vec(), HashMap::new(), origin(), "id1", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(second.is_none());
        clock.advance(Duration::from_secs(61));
        let third = bus
            .publish_with_dedupe("s", b"c".to_vec(), HashMap::new(), origin(), "id1", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(third.is_some());
    }

    #[tokio::test]
    async fn kv_ttl_expiry() {
        let clock = Arc::new(FakeClock::new());
        let kv = InMemoryKeyValueStore::with_clock(clock.clone());
        kv.put("k", b"v".to_vec(), Some(Duration::from_secs(10))).await.unwrap();
        assert!(kv.contains("k").await.unwrap());
        clock.advance(Duration::from_secs(11));
        assert!(!kv.contains("k").await.unwrap());
    }

    #[tokio::test]
    async fn kv_without_ttl_never_expires() {
        let kv = InMemoryKeyValueStore::new();
        kv.put("k", b"v".to_vec(), None).await.unwrap();
        assert!(kv.contains("k").await.unwrap());
    }
}
