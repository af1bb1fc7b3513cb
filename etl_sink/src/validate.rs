//! Table/column identifier guard. Column names come from pipeline
//! configuration, not end-user input, but the sink still refuses to
//! interpolate anything that isn't a plain identifier before it builds
//! an INSERT statement.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, SinkError};

static IDENT_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_.]+$").unwrap());

/// Only a plain alphanumeric/underscore/dot charset is accepted, which
/// alone rules out injection via spaces, quotes, or statement separators.
/// There is deliberately no reserved-word blocklist on top of this: a
/// substring check would reject ordinary column names like `updated_at`
/// or `deleted_at`. `PipelineConfig::validate` runs this same check at
/// startup for `sink.table` and every mapped column name, so a bad
/// identifier is a configuration error, not a permanent per-flush one.
pub fn validate_identifier(name: &str) -> Result<&str> {
    if name.is_empty() {
        return Err(SinkError::InvalidTable("identifier cannot be empty".to_string()));
    }
    if name.len() > 128 {
        return Err(SinkError::InvalidTable("identifier too long".to_string()));
    }
    if !IDENT_PATTERN.is_match(name) {
        return Err(SinkError::InvalidTable(format!(
            "identifier '{name}' contains invalid characters"
        )));
    }
    Ok(name)
}
