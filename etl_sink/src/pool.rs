//! Bounded ClickHouse connection pool, reusing handles instead of
//! opening one connection per flush (§4.6).

use std::sync::Arc;

use clickhouse::Client;
use etl_core::SinkConfig;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Result, SinkError};

struct Handles {
    available: Vec<Client>,
    in_use: usize,
}

#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub created: u64,
    pub errors: u64,
}

pub struct ChPool {
    handles: Mutex<Handles>,
    stats: RwLock<PoolStats>,
    max_size: usize,
    url: String,
    database: String,
    username: String,
    password: String,
}

impl ChPool {
    pub fn new(config: &SinkConfig, max_size: usize) -> Result<Self> {
        let scheme = if config.secure { "https" } else { "http" };
        let url = format!("{scheme}://{}:{}", config.host, config.port);
        let password = config
            .decoded_password()
            .map_err(|e| SinkError::ClickHouse(format!("invalid sink password: {e}")))?;
        info!(%url, max_size, "initializing clickhouse connection pool");
        Ok(Self {
            handles: Mutex::new(Handles { available: Vec::new(), in_use: 0 }),
            stats: RwLock::new(PoolStats::default()),
            max_size,
            url,
            database: config.database.clone(),
            username: config.username.clone(),
            password,
        })
    }

    fn build_client(&self) -> Client {
        Client::default()
            .with_url(&self.url)
            .with_user(&self.username)
            .with_password(&self.password)
            .with_database(&self.database)
            .with_compression(clickhouse::Compression::Lz4)
    }

    pub async fn get_handle(&self) -> Result<Client> {
        let mut handles = self.handles.lock().await;
        if let Some(client) = handles.available.pop() {
            handles.in_use += 1;
            return Ok(client);
        }
        if handles.in_use < self.max_size {
            let client = self.build_client();
            handles.in_use += 1;
            self.stats.write().await.created += 1;
            debug!("created new clickhouse connection handle");
            return Ok(client);
        }
        self.stats.write().await.errors += 1;
        Err(SinkError::PoolExhausted(self.max_size))
    }

    pub async fn return_handle(&self, client: Client) {
        let mut handles = self.handles.lock().await;
        if handles.in_use > 0 {
            handles.in_use -= 1;
        }
        handles.available.push(client);
    }

    /// Runs `SELECT 1` through a pooled handle to validate connectivity.
    pub async fn ping(&self) -> Result<()> {
        let client = self.get_handle().await?;
        let result = client.query("SELECT 1").fetch_one::<u8>().await;
        self.return_handle(client).await;
        result
            .map(|_| ())
            .map_err(|e| {
                warn!(error = %e, "clickhouse ping failed");
                SinkError::ClickHouse(e.to_string())
            })
    }

    pub async fn stats(&self) -> PoolStats {
        self.stats.read().await.clone()
    }
}

pub type SharedPool = Arc<ChPool>;
