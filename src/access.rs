//! Access filters for inbound messages.
//!
//! A filter is a stateless predicate: it approves a message or rejects it
//! with a reason. Turning a rejection into a reply is the caller's job, see
//! [`unauthorized_reply`].
//!
//! # Example
//!
//! ```
//! use wrp_relay::access::{block_by_partner_id, AllowMessage};
//! use wrp_relay::message::{Message, MessageType};
//!
//! let filter = block_by_partner_id("comcast");
//! let mut msg = Message::new(MessageType::SimpleEvent);
//! msg.partner_ids = vec!["comcast".to_string()];
//! assert!(filter.allow(&msg).is_ok());
//! ```

use thiserror::Error;

use crate::message::{status, Message};

/// Why a message was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    /// The message does not carry the expected partner id.
    #[error("partner id does not match")]
    PartnerIdMismatch,

    /// Rejected by a custom policy.
    #[error("{0}")]
    Rejected(String),
}

/// Approves or rejects an inbound message.
pub trait AllowMessage: Send + Sync {
    /// `Ok(())` to let the message through.
    fn allow(&self, msg: &Message) -> Result<(), AccessError>;
}

impl<F> AllowMessage for F
where
    F: Fn(&Message) -> Result<(), AccessError> + Send + Sync,
{
    fn allow(&self, msg: &Message) -> Result<(), AccessError> {
        self(msg)
    }
}

/// Approves messages whose `partner_ids` contain a fixed id.
#[derive(Debug, Clone)]
pub struct BlockByPartnerId {
    partner_id: String,
}

impl AllowMessage for BlockByPartnerId {
    fn allow(&self, msg: &Message) -> Result<(), AccessError> {
        if msg.partner_ids.iter().any(|id| *id == self.partner_id) {
            Ok(())
        } else {
            Err(AccessError::PartnerIdMismatch)
        }
    }
}

/// Filter that only lets through messages tagged with `partner_id`.
pub fn block_by_partner_id(partner_id: impl Into<String>) -> BlockByPartnerId {
    BlockByPartnerId {
        partner_id: partner_id.into(),
    }
}

/// 401 reply for a rejected message, addressed back to its source.
pub fn unauthorized_reply(msg: &Message, err: &AccessError) -> Message {
    msg.error_reply(status::UNAUTHORIZED, err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageType, MIME_TYPE_JSON};

    fn with_partners(ids: &[&str]) -> Message {
        Message {
            msg_type: MessageType::SimpleRequestResponse,
            source: "dns:cloud".to_string(),
            destination: "mac:112233445566/config".to_string(),
            transaction_uuid: "tid-1".to_string(),
            partner_ids: ids.iter().map(|s| s.to_string()).collect(),
            ..Message::default()
        }
    }

    #[test]
    fn test_partner_id_present() {
        let filter = block_by_partner_id("p1");
        assert!(filter.allow(&with_partners(&["p2", "p1"])).is_ok());
    }

    #[test]
    fn test_partner_id_missing() {
        let filter = block_by_partner_id("p1");
        let err = filter.allow(&with_partners(&["p2"])).unwrap_err();
        assert_eq!(err, AccessError::PartnerIdMismatch);
        assert_eq!(err.to_string(), "partner id does not match");

        assert!(filter.allow(&with_partners(&[])).is_err());
    }

    #[test]
    fn test_closure_filter() {
        let filter = |msg: &Message| {
            if msg.source.starts_with("dns:") {
                Ok(())
            } else {
                Err(AccessError::Rejected("untrusted source".to_string()))
            }
        };
        assert!(filter.allow(&with_partners(&[])).is_ok());

        let mut msg = with_partners(&[]);
        msg.source = "mac:000000000000".to_string();
        assert_eq!(
            filter.allow(&msg),
            Err(AccessError::Rejected("untrusted source".to_string()))
        );
    }

    #[test]
    fn test_unauthorized_reply() {
        let msg = with_partners(&["p2"]);
        let reply = unauthorized_reply(&msg, &AccessError::PartnerIdMismatch);

        assert_eq!(reply.status, Some(status::UNAUTHORIZED));
        assert_eq!(reply.destination, msg.source);
        assert_eq!(reply.source, msg.destination);
        assert_eq!(reply.transaction_uuid, "tid-1");
        assert_eq!(reply.content_type, MIME_TYPE_JSON);

        let body: serde_json::Value = serde_json::from_slice(&reply.payload).unwrap();
        assert_eq!(body["statusCode"], 401);
        assert_eq!(body["message"], "partner id does not match");
    }
}
