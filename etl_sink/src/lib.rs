pub mod error;
pub mod pool;
pub mod sink;
pub mod validate;
pub mod writer;

pub use error::SinkError;
pub use pool::{ChPool, PoolStats};
pub use sink::{SinkExecutor, SinkExecutorConfig};
