//! The two TTL-indexed keyed buffers behind the temporal join (§3, §4.5).
//! The right buffer is a flat overwrite map; the left buffer uses the
//! key -> id-list -> payload indirection so multiple left records can
//! share a key under a flat KV API.

use std::sync::Arc;
use std::time::Duration;

use etl_bus::KeyValueStore;
use uuid::Uuid;

use crate::error::Result;

fn right_key(key: &str) -> String {
    format!("join:right:{key}")
}

fn left_list_key(key: &str) -> String {
    format!("join:left:list:{key}")
}

fn left_id_key(id: &str) -> String {
    format!("join:left:id:{id}")
}

pub struct RightBuffer {
    kv: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl RightBuffer {
    pub fn new(kv: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    pub async fn put(&self, key: &str, payload: Vec<u8>) -> Result<()> {
        self.kv.put(&right_key(key), payload, Some(self.ttl)).await?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.kv.get(&right_key(key)).await?)
    }
}

pub struct LeftBuffer {
    kv: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl LeftBuffer {
    pub fn new(kv: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    /// Appends a fresh opaque id for `payload` under `key`'s id-list.
    pub async fn append(&self, key: &str, payload: Vec<u8>) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.kv.put(&left_id_key(&id), payload, Some(self.ttl)).await?;

        let list_key = left_list_key(key);
        let mut ids = self.list_ids(key).await?;
        ids.push(id.clone());
        self.kv
            .put(&list_key, ids.join(" ").into_bytes(), Some(self.ttl))
            .await?;
        Ok(id)
    }

    async fn list_ids(&self, key: &str) -> Result<Vec<String>> {
        match self.kv.get(&left_list_key(key)).await? {
            Some(bytes) => {
                let s = String::from_utf8_lossy(&bytes);
                Ok(s.split_whitespace().map(str::to_string).collect())
            }
            None => Ok(Vec::new()),
        }
    }

    /// Drains every buffered left payload for `key`: returns them in
    /// arrival order, deletes each payload entry and clears the list.
    pub async fn drain(&self, key: &str) -> Result<Vec<Vec<u8>>> {
        let ids = self.list_ids(key).await?;
        let mut payloads = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(payload) = self.kv.get(&left_id_key(id)).await? {
                payloads.push(payload);
            }
            self.kv.delete(&left_id_key(id)).await?;
        }
        self.kv.delete(&left_list_key(key)).await?;
        Ok(payloads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etl_bus::InMemoryKeyValueStore;

    #[tokio::test]
    async fn left_buffer_preserves_arrival_order() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::new());
        let left = LeftBuffer::new(kv, Duration::from_secs(60));
        left.append("u1", b"alice".to_vec()).await.unwrap();
        left.append("u1", b"charlie".to_vec()).await.unwrap();
        let drained = left.drain("u1").await.unwrap();
        assert_eq!(drained, vec![b"alice".to_vec(), b"charlie".to_vec()]);
    }

    #[tokio::test]
    async fn drain_clears_the_key() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::new());
        let left = LeftBuffer::new(kv, Duration::from_secs(60));
        left.append("u1", b"alice".to_vec()).await.unwrap();
        left.drain("u1").await.unwrap();
        let second = left.drain("u1").await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn right_buffer_overwrites() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::new());
        let right = RightBuffer::new(kv, Duration::from_secs(60));
        right.put("u1", b"first".to_vec()).await.unwrap();
        right.put("u1", b"second".to_vec()).await.unwrap();
        assert_eq!(right.get("u1").await.unwrap(), Some(b"second".to_vec()));
    }
}
