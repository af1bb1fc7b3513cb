use std::collections::HashMap;

/// Where a message came from in the source Kafka topic, preserved end to end
/// so a DLQ record can always point back at the original offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageOrigin {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// The header carrying the deduplication id, set by the ingestor when a
/// dedup-id field path is configured for the topic.
pub const MSG_ID_HEADER: &str = "msg-id";

/// The header carrying the schema/output-envelope version id, propagated
/// through transforms and joins.
pub const SCHEMA_VERSION_HEADER: &str = "schema-version";

/// Internal message shape carried on every bus subject. Owned by its
/// consumer until acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub origin: MessageOrigin,
}

impl Message {
    pub fn new(payload: Vec<u8>, origin: MessageOrigin) -> Self {
        Self {
            payload,
            headers: HashMap::new(),
            origin,
        }
    }

    pub fn msg_id(&self) -> Option<&str> {
        self.headers.get(MSG_ID_HEADER).map(String::as_str)
    }

    pub fn set_msg_id(&mut self, id: impl Into<String>) {
        self.headers.insert(MSG_ID_HEADER.to_string(), id.into());
    }

    pub fn payload_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msg_id_absent_by_default() {
        let msg = Message::new(
            b"{}".to_vec(),
            MessageOrigin {
                topic: "t".into(),
                partition: 0,
                offset: 0,
            },
        );
        assert_eq!(msg.msg_id(), None);
    }

    #[test]
    fn set_msg_id_roundtrips() {
        let mut msg = Message::new(
            b"{}".to_vec(),
            MessageOrigin {
                topic: "t".into(),
                partition: 0,
                offset: 1,
            },
        );
        msg.set_msg_id("abc");
        assert_eq!(msg.msg_id(), Some("abc"));
    }
}
