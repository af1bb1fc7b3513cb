use thiserror::Error;

/// Configuration-time errors: detected at pipeline start, abort start,
/// never reach a running worker.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("field '{field}' referenced by {context} is not declared in topic '{topic}' schema")]
    UndeclaredField {
        topic: String,
        field: String,
        context: String,
    },

    #[error("duplicate join orientation: {0:?} appears more than once")]
    DuplicateOrientation(crate::types::Orientation),

    #[error("join requires exactly two source entries, got {0}")]
    JoinSourceCount(usize),

    #[error("invalid duration '{0}': {1}")]
    InvalidDuration(String, String),

    #[error("unsupported type conversion: {source_type} -> {column_type}")]
    UnsupportedConversion {
        source_type: String,
        column_type: String,
    },

    #[error("invalid expression '{expr}': {reason}")]
    InvalidExpression { expr: String, reason: String },

    #[error("filter expression must evaluate to boolean, got {0}")]
    FilterNotBoolean(String),

    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
