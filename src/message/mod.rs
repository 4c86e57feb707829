//! WRP message model.
//!
//! [`Message`] is the unit exchanged between the hub, attached services, and
//! the cloud. Field names on the wire follow WRP's msgpack keys (`dest`,
//! `transaction_uuid`, `rdr`, ...). Empty fields are omitted when encoding and
//! default when decoding.
//!
//! # Example
//!
//! ```
//! use wrp_relay::message::{Message, MessageType};
//!
//! let msg = Message::registration("config", "tcp://127.0.0.1:13032");
//! let bytes = msg.encode().unwrap();
//! let decoded = Message::decode(&bytes).unwrap();
//! assert_eq!(decoded.msg_type, MessageType::ServiceRegistration);
//! assert_eq!(decoded.service_name, "config");
//! ```

mod kind;
mod response;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::codec::MsgPackCodec;
use crate::error::Result;

pub use kind::MessageType;
pub use response::{create_error, create_response, status, MIME_TYPE_JSON, MIME_TYPE_TEXT};

/// Payload carried by the client's reply to an alive probe.
pub const ALIVE_ECHO_PAYLOAD: &[u8] = b"I'm here!";

/// A decoded WRP message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Message {
    pub msg_type: MessageType,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub source: String,

    #[serde(rename = "dest", skip_serializing_if = "String::is_empty")]
    pub destination: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub transaction_uuid: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub content_type: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub accept: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<i64>,

    #[serde(rename = "rdr", skip_serializing_if = "Option::is_none")]
    pub request_delivery_response: Option<i64>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<String>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,

    #[serde(with = "serde_bytes", skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub service_name: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub partner_ids: Vec<String>,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub session_id: String,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub spans: Vec<Vec<String>>,
}

impl Message {
    /// Create an empty message of the given type.
    pub fn new(msg_type: MessageType) -> Self {
        Self {
            msg_type,
            ..Self::default()
        }
    }

    /// Registration a service sends to the hub.
    pub fn registration(service_name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            msg_type: MessageType::ServiceRegistration,
            service_name: service_name.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    /// Bare keep-alive probe, as sent by the hub's heartbeat.
    pub fn alive() -> Self {
        Self::new(MessageType::ServiceAlive)
    }

    /// Reply to an alive probe: route swapped, transaction id kept.
    pub fn alive_echo(&self) -> Self {
        Self {
            msg_type: MessageType::ServiceAlive,
            source: self.destination.clone(),
            destination: self.source.clone(),
            transaction_uuid: self.transaction_uuid.clone(),
            payload: ALIVE_ECHO_PAYLOAD.to_vec(),
            headers: self.headers.clone(),
            content_type: MIME_TYPE_TEXT.to_string(),
            spans: self.spans.clone(),
            service_name: self.service_name.clone(),
            ..Self::default()
        }
    }

    /// Build an error reply addressed back to this message's source.
    pub fn error_reply(&self, status: i64, err: impl std::fmt::Display) -> Self {
        create_error(
            &self.transaction_uuid,
            &self.source,
            &self.destination,
            status,
            err,
        )
    }

    /// Service segment of the destination locator.
    ///
    /// `mac:112233445566/config/path` yields `config`. A destination without
    /// an authority (`config`) is taken to be the service name itself.
    pub fn destination_service(&self) -> &str {
        match self.destination.split_once('/') {
            Some((_, rest)) => rest.split('/').next().unwrap_or(""),
            None => &self.destination,
        }
    }

    /// Encode to a msgpack frame.
    pub fn encode(&self) -> Result<Vec<u8>> {
        MsgPackCodec::encode(self)
    }

    /// Decode from a msgpack frame.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        MsgPackCodec::decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> Message {
        Message {
            msg_type: MessageType::SimpleRequestResponse,
            source: "dns:talaria.example.com".to_string(),
            destination: "mac:112233445566/config".to_string(),
            transaction_uuid: "tid-1".to_string(),
            content_type: MIME_TYPE_JSON.to_string(),
            payload: br#"{"command":"GET","names":["a"]}"#.to_vec(),
            partner_ids: vec!["comcast".to_string()],
            headers: vec!["X-Trace: 1".to_string()],
            spans: vec![vec!["parent".to_string(), "child".to_string()]],
            ..Message::default()
        }
    }

    #[test]
    fn test_encode_decode_request() {
        let original = request();
        let bytes = original.encode().unwrap();
        let decoded = Message::decode(&bytes).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_wire_keys() {
        // serde_json::Value cannot hold msgpack bin, so leave the payload out
        let msg = Message {
            payload: Vec::new(),
            ..request()
        };
        let bytes = msg.encode().unwrap();
        let map: BTreeMap<String, serde_json::Value> = rmp_serde::from_slice(&bytes).unwrap();

        assert_eq!(map["msg_type"], 3);
        assert_eq!(map["dest"], "mac:112233445566/config");
        assert_eq!(map["transaction_uuid"], "tid-1");
        assert!(!map.contains_key("status"));
        assert!(!map.contains_key("url"));
    }

    #[test]
    fn test_decode_missing_fields_default() {
        #[derive(Serialize)]
        struct Minimal {
            msg_type: i64,
            service_name: &'static str,
        }

        let bytes = MsgPackCodec::encode(&Minimal {
            msg_type: 10,
            service_name: "config",
        })
        .unwrap();
        let decoded = Message::decode(&bytes).unwrap();

        assert_eq!(decoded.msg_type, MessageType::ServiceAlive);
        assert_eq!(decoded.service_name, "config");
        assert!(decoded.source.is_empty());
        assert!(decoded.payload.is_empty());
        assert_eq!(decoded.status, None);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(Message::decode(b"\xc1\xc1\xc1").is_err());
    }

    #[test]
    fn test_alive_echo() {
        let probe = Message {
            msg_type: MessageType::ServiceAlive,
            source: "hub".to_string(),
            destination: "config".to_string(),
            transaction_uuid: "t-9".to_string(),
            service_name: "config".to_string(),
            ..Message::default()
        };

        let echo = probe.alive_echo();
        assert_eq!(echo.msg_type, MessageType::ServiceAlive);
        assert_eq!(echo.source, "config");
        assert_eq!(echo.destination, "hub");
        assert_eq!(echo.transaction_uuid, "t-9");
        assert_eq!(echo.payload, ALIVE_ECHO_PAYLOAD);
        assert_eq!(echo.content_type, MIME_TYPE_TEXT);
        assert_eq!(echo.service_name, "config");
    }

    #[test]
    fn test_destination_service() {
        let mut msg = Message::default();

        msg.destination = "mac:112233445566/config".to_string();
        assert_eq!(msg.destination_service(), "config");

        msg.destination = "mac:112233445566/config/some/path".to_string();
        assert_eq!(msg.destination_service(), "config");

        msg.destination = "cfg".to_string();
        assert_eq!(msg.destination_service(), "cfg");

        msg.destination = "mac:112233445566/".to_string();
        assert_eq!(msg.destination_service(), "");
    }

    #[test]
    fn test_registration_constructor() {
        let msg = Message::registration("config", "tcp://127.0.0.1:13032");
        assert_eq!(msg.msg_type, MessageType::ServiceRegistration);
        assert_eq!(msg.service_name, "config");
        assert_eq!(msg.url, "tcp://127.0.0.1:13032");
    }
}
