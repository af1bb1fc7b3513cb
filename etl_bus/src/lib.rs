pub mod error;
pub mod kv;
pub mod memory;
pub mod traits;

pub use error::BusError;
pub use kv::KeyValueStore;
pub use memory::{InMemoryBus, InMemoryKeyValueStore};
pub use traits::{Bus, Delivery};
