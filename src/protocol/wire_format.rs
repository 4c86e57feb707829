//! SP (scalability protocols) wire format over TCP.
//!
//! Every connection starts with an 8-byte handshake from each side:
//! ```text
//! ┌──────┬─────┬─────┬──────┬──────────────┬──────────┐
//! │ 0x00 │ 'S' │ 'P' │ 0x00 │ Protocol ID  │ Reserved │
//! │      │     │     │      │ uint16 BE    │ 2 bytes  │
//! └──────┴─────┴─────┴──────┴──────────────┴──────────┘
//! ```
//!
//! After the handshake each message is a frame:
//! ```text
//! ┌──────────────┬─────────────┐
//! │ Length       │ Payload     │
//! │ uint64 BE    │ Length bytes│
//! └──────────────┴─────────────┘
//! ```
//!
//! This matches what nanomsg/mangos peers speak on `tcp://` endpoints.

use crate::error::{RelayError, Result};

/// Handshake size in bytes.
pub const HANDSHAKE_SIZE: usize = 8;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 8;

/// Default maximum inbound frame size (1 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u64 = 1024 * 1024;

/// SP protocol identifier for push sockets.
pub const PROTO_PUSH: u16 = 0x50;

/// SP protocol identifier for pull sockets.
pub const PROTO_PULL: u16 = 0x51;

const MAGIC: [u8; 4] = [0x00, b'S', b'P', 0x00];

/// Connection handshake announcing the sender's protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub protocol: u16,
}

impl Handshake {
    /// Create a handshake for the given protocol.
    pub fn new(protocol: u16) -> Self {
        Self { protocol }
    }

    /// Encode handshake to bytes.
    ///
    /// # Example
    ///
    /// ```
    /// use wrp_relay::protocol::{Handshake, PROTO_PUSH};
    ///
    /// let bytes = Handshake::new(PROTO_PUSH).encode();
    /// assert_eq!(bytes, [0x00, b'S', b'P', 0x00, 0x00, 0x50, 0x00, 0x00]);
    /// ```
    pub fn encode(&self) -> [u8; HANDSHAKE_SIZE] {
        let mut buf = [0u8; HANDSHAKE_SIZE];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..6].copy_from_slice(&self.protocol.to_be_bytes());
        buf
    }

    /// Decode and validate a handshake received from a peer.
    pub fn decode(buf: &[u8; HANDSHAKE_SIZE]) -> Result<Self> {
        if buf[0..4] != MAGIC {
            return Err(RelayError::Protocol(
                "peer did not send an SP handshake".to_string(),
            ));
        }
        if buf[6] != 0 || buf[7] != 0 {
            return Err(RelayError::Protocol(
                "reserved handshake bytes must be 0".to_string(),
            ));
        }
        Ok(Self {
            protocol: u16::from_be_bytes([buf[4], buf[5]]),
        })
    }

    /// Check the peer speaks the protocol we pair with.
    pub fn expect_peer_of(&self, own: u16) -> Result<()> {
        match peer_protocol(own) {
            Some(peer) if peer == self.protocol => Ok(()),
            _ => Err(RelayError::Protocol(format!(
                "peer protocol 0x{:02x} cannot pair with 0x{:02x}",
                self.protocol, own
            ))),
        }
    }
}

/// Protocol a socket of the given protocol must talk to.
fn peer_protocol(protocol: u16) -> Option<u16> {
    match protocol {
        PROTO_PUSH => Some(PROTO_PULL),
        PROTO_PULL => Some(PROTO_PUSH),
        _ => None,
    }
}

/// Encode a frame length prefix.
#[inline]
pub fn encode_length(len: usize) -> [u8; LENGTH_PREFIX_SIZE] {
    (len as u64).to_be_bytes()
}

/// Decode a frame length prefix.
///
/// Returns `None` if the buffer is too short.
#[inline]
pub fn decode_length(buf: &[u8]) -> Option<u64> {
    let prefix: [u8; LENGTH_PREFIX_SIZE] = buf.get(..LENGTH_PREFIX_SIZE)?.try_into().ok()?;
    Some(u64::from_be_bytes(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_round_trip() {
        let encoded = Handshake::new(PROTO_PULL).encode();
        let decoded = Handshake::decode(&encoded).unwrap();
        assert_eq!(decoded.protocol, PROTO_PULL);
    }

    #[test]
    fn test_handshake_bad_magic() {
        let mut encoded = Handshake::new(PROTO_PUSH).encode();
        encoded[1] = b'X';
        assert!(matches!(
            Handshake::decode(&encoded),
            Err(RelayError::Protocol(_))
        ));
    }

    #[test]
    fn test_handshake_reserved_bytes() {
        let mut encoded = Handshake::new(PROTO_PUSH).encode();
        encoded[7] = 1;
        assert!(Handshake::decode(&encoded).is_err());
    }

    #[test]
    fn test_peer_pairing() {
        assert!(Handshake::new(PROTO_PULL).expect_peer_of(PROTO_PUSH).is_ok());
        assert!(Handshake::new(PROTO_PUSH).expect_peer_of(PROTO_PULL).is_ok());
        assert!(Handshake::new(PROTO_PUSH).expect_peer_of(PROTO_PUSH).is_err());
        // pair protocol (0x10) never matches
        assert!(Handshake::new(0x10).expect_peer_of(PROTO_PULL).is_err());
    }

    #[test]
    fn test_length_round_trip() {
        let encoded = encode_length(300);
        assert_eq!(encoded, [0, 0, 0, 0, 0, 0, 0x01, 0x2c]);
        assert_eq!(decode_length(&encoded), Some(300));
    }

    #[test]
    fn test_decode_length_short_buffer() {
        assert_eq!(decode_length(&[0, 0, 0]), None);
    }
}
