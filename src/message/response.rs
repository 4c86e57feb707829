//! Reply construction helpers.

use serde::Serialize;

use super::{Message, MessageType};

/// `content_type` of synthetic error replies.
pub const MIME_TYPE_JSON: &str = "application/json";

/// `content_type` of alive echoes.
pub const MIME_TYPE_TEXT: &str = "text/plain";

/// Status codes carried in the `status` field of replies.
pub mod status {
    pub const UNAUTHORIZED: i64 = 401;
    pub const NOT_IMPLEMENTED: i64 = 501;
    pub const SERVICE_UNAVAILABLE: i64 = 503;
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    #[serde(rename = "statusCode")]
    status_code: i64,
    message: &'a str,
}

/// Build a response to `msg`: source and destination swapped, everything
/// else kept.
pub fn create_response(msg: &Message) -> Message {
    let mut response = msg.clone();
    std::mem::swap(&mut response.source, &mut response.destination);
    response
}

/// Build an error reply for a request that came from `source` to
/// `destination`.
///
/// The reply travels the other way, keeps the transaction id, and carries a
/// JSON body `{"statusCode": .., "message": ..}`.
pub fn create_error(
    transaction_uuid: &str,
    source: &str,
    destination: &str,
    status: i64,
    err: impl std::fmt::Display,
) -> Message {
    let text = err.to_string();
    let payload = serde_json::to_vec(&ErrorBody {
        status_code: status,
        message: &text,
    })
    .unwrap_or_default();

    Message {
        msg_type: MessageType::SimpleRequestResponse,
        source: destination.to_string(),
        destination: source.to_string(),
        transaction_uuid: transaction_uuid.to_string(),
        content_type: MIME_TYPE_JSON.to_string(),
        status: Some(status),
        payload,
        ..Message::default()
    }
}
