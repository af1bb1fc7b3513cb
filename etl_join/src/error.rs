use thiserror::Error;

#[derive(Error, Debug)]
pub enum JoinError {
    #[error("bus error: {0}")]
    Bus(#[from] etl_bus::BusError),

    #[error("schema error: {0}")]
    Schema(#[from] etl_schema::SchemaError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, JoinError>;
