pub mod convert;
pub mod error;
pub mod mapper;
pub mod path;

pub use error::{SchemaError, ValidationFailure};
pub use mapper::SchemaMapper;
