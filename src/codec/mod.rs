//! Codec module - msgpack serialization for WRP messages.
//!
//! [`MsgPackCodec`] wraps `rmp-serde` with the map-keyed encoding WRP uses.
//! [`Message::encode`](crate::message::Message::encode) and
//! [`Message::decode`](crate::message::Message::decode) are built on it.

mod msgpack;

pub use msgpack::MsgPackCodec;
