use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("pipeline already started")]
    AlreadyStarted,

    #[error("config error: {0}")]
    Config(String),

    #[error("core error: {0}")]
    Core(#[from] etl_core::CoreError),

    #[error("invalid pipeline state transition: {0}")]
    Transition(#[from] etl_core::lifecycle::TransitionError),

    #[error("ingest error: {0}")]
    Ingest(#[from] etl_ingest::IngestError),

    #[error("dedup error: {0}")]
    Dedup(#[from] etl_dedup::DedupError),

    #[error("join error: {0}")]
    Join(#[from] etl_join::JoinError),

    #[error("sink error: {0}")]
    Sink(#[from] etl_sink::SinkError),
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
