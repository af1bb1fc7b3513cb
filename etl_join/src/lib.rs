pub mod buffer;
pub mod error;
pub mod join;

pub use buffer::{LeftBuffer, RightBuffer};
pub use error::JoinError;
pub use join::{JoinExecutor, JoinExecutorConfig};
