//! Control messages from application pages.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A recognised control message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    GetVersion,
    ClearCache {
        #[serde(default)]
        name: Option<String>,
    },
    UpdateCache,
    GetCacheStatus,
    KeepAlive,
}

impl ControlMessage {
    /// Parse a message. Unknown or malformed messages yield `None`.
    pub fn parse(message: &JsonValue) -> Option<Self> {
        serde_json::from_value(message.clone()).ok()
    }
}

/// Entry count of one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionStatus {
    pub name: String,
    pub entries: usize,
}

/// Reply sent back over the message's reply channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlReply {
    Status {
        version: String,
        partitions: Vec<PartitionStatus>,
    },
    Version {
        version: String,
    },
    Cleared {
        cleared: Vec<String>,
    },
    Updated {
        updated: usize,
        failed: usize,
    },
    Alive {
        alive: bool,
    },
    Error {
        error: String,
    },
}

impl ControlReply {
    /// Reply for messages the worker does not understand.
    pub fn unknown() -> Self {
        ControlReply::Error {
            error: "unknown_message".to_string(),
        }
    }

    /// JSON form of the reply.
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}
