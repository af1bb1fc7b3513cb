pub mod controller;
pub mod error;
pub mod mapping;
pub mod subjects;

pub use controller::PipelineController;
pub use error::SupervisorError;
