pub mod dedup;
pub mod error;
pub mod expr;
pub mod transform;

pub use dedup::{Deduplicator, DeduplicatorConfig};
pub use error::DedupError;
pub use expr::{CompiledExpr, ExprError};
pub use transform::StatelessTransformer;
