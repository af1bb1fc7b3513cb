use thiserror::Error;

/// Per-record validation failure (§4.1 Validate). Always recoverable: the
/// caller routes the offending message to the DLQ and continues.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationFailure {
    #[error("missing field at path '{path}'")]
    MissingField { path: String },

    #[error("type mismatch at path '{path}': expected {expected}, got {got}")]
    TypeMismatch {
        path: String,
        expected: String,
        got: String,
    },

    #[error("parse error at path '{path}': {reason}")]
    ParseError { path: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("unknown topic '{0}'")]
    UnknownTopic(String),

    #[error(transparent)]
    Validation(#[from] ValidationFailure),

    #[error("invalid json payload: {0}")]
    InvalidJson(String),

    #[error("no join key configured for topic '{0}'")]
    NoJoinKey(String),
}

pub type Result<T> = std::result::Result<T, SchemaError>;
