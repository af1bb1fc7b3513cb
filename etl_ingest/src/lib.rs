pub mod consumer;
pub mod error;
pub mod ingestor;

pub use consumer::{KafkaConnectionParams, KafkaSource, RawRecord, RdKafkaSource, VecSource};
pub use error::IngestError;
pub use ingestor::{Ingestor, IngestorConfig};
