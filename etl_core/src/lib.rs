pub mod clock;
pub mod dlq;
pub mod duration;
pub mod error;
pub mod lifecycle;
pub mod message;
pub mod types;
pub mod value;

pub use clock::{Clock, FakeClock, SystemClock};
pub use dlq::DlqRecord;
pub use error::CoreError;
pub use lifecycle::PipelineState;
pub use message::{Message, MessageOrigin};
pub use types::{
    ColumnType, DedupConfig, FieldType, JoinConfig, JoinSourceConfig, MappingEntry, Orientation,
    PipelineConfig, SchemaField, SinkConfig, SinkMapping, SourceConfig, SourceSchema, TopicConfig,
    TransformConfig,
};
pub use value::ColumnValue;
