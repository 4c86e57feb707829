//! Protocol module - SP handshake and framing.
//!
//! This module implements the byte-level protocol of the push/pull sockets:
//! - 8-byte connection handshake
//! - 8-byte length-prefixed frames
//! - Frame buffer for accumulating partial reads

mod frame_buffer;
mod wire_format;

pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    decode_length, encode_length, Handshake, DEFAULT_MAX_FRAME_SIZE,
    HANDSHAKE_SIZE, LENGTH_PREFIX_SIZE, PROTO_PULL, PROTO_PUSH,
};
