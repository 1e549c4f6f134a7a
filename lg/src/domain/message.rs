//! Message records exchanged with the transport

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Attribute carrying the per-emission dedup token
pub const UNIQUE_MESSAGE_ID: &str = "uniqueMessageId";

/// Opaque payload plus string attributes, as delivered by the message stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub data: String,

    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Message {
    /// Message with no attributes
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Outgoing message tagged with a freshly generated dedup token
    pub fn with_dedup_token(data: impl Into<String>) -> Self {
        let mut message = Self::new(data);
        message
            .attributes
            .insert(UNIQUE_MESSAGE_ID.to_string(), Uuid::now_v7().to_string());
        message
    }

    #[cfg(test)]
    pub fn dedup_token(&self) -> Option<&str> {
        self.attributes.get(UNIQUE_MESSAGE_ID).map(String::as_str)
    }

    /// Parse one line of input
    ///
    /// Accepts either a full record (`{"data": ..., "attributes": {...}}`) or a
    /// bare payload, which becomes a message without attributes.
    pub fn parse_line(line: &str) -> Self {
        match serde_json::from_str::<Message>(line) {
            Ok(message) => {
                debug!("Message::parse_line: parsed record");
                message
            }
            Err(_) => {
                debug!("Message::parse_line: treating line as bare payload");
                Self::new(line)
            }
        }
    }
}
