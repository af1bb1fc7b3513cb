use thiserror::Error;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("subject '{0}' not found")]
    UnknownSubject(String),

    #[error("publish to subject '{0}' timed out")]
    PublishTimeout(String),

    #[error("unknown delivery sequence {0}")]
    UnknownDelivery(u64),

    #[error("bus is shut down")]
    Closed,
}

pub type Result<T> = std::result::Result<T, BusError>;
