use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("bus error: {0}")]
    Bus(#[from] etl_bus::BusError),

    #[error("schema error: {0}")]
    Schema(#[from] etl_schema::SchemaError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid table identifier: {0}")]
    InvalidTable(String),

    #[error("clickhouse error: {0}")]
    ClickHouse(String),

    #[error("connection pool exhausted (max_size={0})")]
    PoolExhausted(usize),
}

pub type Result<T> = std::result::Result<T, SinkError>;
