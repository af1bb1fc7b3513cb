use thiserror::Error;

#[derive(Error, Debug)]
pub enum DedupError {
    #[error("bus error: {0}")]
    Bus(#[from] etl_bus::BusError),

    #[error("expression error: {0}")]
    Expr(#[from] crate::expr::ExprError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DedupError>;
