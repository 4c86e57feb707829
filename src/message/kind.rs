//! WRP message type tags.
//!
//! The tag travels on the wire as an integer under the `msg_type` key.
//! Values this relay does not know decode to [`MessageType::Unknown`] rather
//! than failing the whole frame.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed set of WRP message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum MessageType {
    Authorization,
    SimpleRequestResponse,
    SimpleEvent,
    Create,
    Retrieve,
    Update,
    Delete,
    ServiceRegistration,
    ServiceAlive,
    #[default]
    Unknown,
}

impl MessageType {
    /// Wire value of this tag.
    pub fn code(self) -> i64 {
        match self {
            MessageType::Authorization => 2,
            MessageType::SimpleRequestResponse => 3,
            MessageType::SimpleEvent => 4,
            MessageType::Create => 5,
            MessageType::Retrieve => 6,
            MessageType::Update => 7,
            MessageType::Delete => 8,
            MessageType::ServiceRegistration => 9,
            MessageType::ServiceAlive => 10,
            MessageType::Unknown => 11,
        }
    }

    /// Human readable name, used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Authorization => "Authorization",
            MessageType::SimpleRequestResponse => "SimpleRequestResponse",
            MessageType::SimpleEvent => "SimpleEvent",
            MessageType::Create => "Create",
            MessageType::Retrieve => "Retrieve",
            MessageType::Update => "Update",
            MessageType::Delete => "Delete",
            MessageType::ServiceRegistration => "ServiceRegistration",
            MessageType::ServiceAlive => "ServiceAlive",
            MessageType::Unknown => "Unknown",
        }
    }
}

impl From<i64> for MessageType {
    fn from(code: i64) -> Self {
        match code {
            2 => MessageType::Authorization,
            3 => MessageType::SimpleRequestResponse,
            4 => MessageType::SimpleEvent,
            5 => MessageType::Create,
            6 => MessageType::Retrieve,
            7 => MessageType::Update,
            8 => MessageType::Delete,
            9 => MessageType::ServiceRegistration,
            10 => MessageType::ServiceAlive,
            _ => MessageType::Unknown,
        }
    }
}

impl From<MessageType> for i64 {
    fn from(kind: MessageType) -> Self {
        kind.code()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
