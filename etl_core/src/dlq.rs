use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Dead-letter record shape (§7): every per-record failure path produces
/// one of these instead of silently dropping the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqRecord {
    pub component: String,
    pub reason: String,
    pub original_payload: Vec<u8>,
    pub original_headers: HashMap<String, String>,
}

impl DlqRecord {
    pub fn new(
        component: impl Into<String>,
        reason: impl Into<String>,
        original_payload: Vec<u8>,
        original_headers: HashMap<String, String>,
    ) -> Self {
        Self {
            component: component.into(),
            reason: reason.into(),
            original_payload,
            original_headers,
        }
    }
}
