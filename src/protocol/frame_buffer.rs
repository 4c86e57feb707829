//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForLength`: Need at least 8 bytes
//! - `WaitingForPayload`: Length parsed, need N more payload bytes
//!
//! # Example
//!
//! ```
//! use wrp_relay::protocol::{encode_length, FrameBuffer};
//!
//! let mut buffer = FrameBuffer::new();
//! let mut wire = encode_length(5).to_vec();
//! wire.extend_from_slice(b"hello");
//!
//! let frames = buffer.push(&wire).unwrap();
//! assert_eq!(&frames[0][..], b"hello");
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::{decode_length, DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE};
use crate::error::{RelayError, Result};

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for a complete length prefix.
    WaitingForLength,
    /// Length parsed, waiting for payload bytes.
    WaitingForPayload { remaining: usize },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed frame size.
    max_frame_size: u64,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max frame: 1MiB.
    pub fn new() -> Self {
        Self::with_max_frame(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new frame buffer with custom max frame size.
    pub fn with_max_frame(max_frame_size: u64) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForLength,
            max_frame_size,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Partial data is kept for the next push.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::FrameTooLarge`] if a length prefix exceeds the
    /// maximum. The connection cannot be resynchronised after that.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }

        Ok(frames)
    }

    fn try_extract_one(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.state {
                State::WaitingForLength => {
                    let Some(len) = decode_length(&self.buffer) else {
                        return Ok(None);
                    };

                    if len > self.max_frame_size {
                        return Err(RelayError::FrameTooLarge {
                            size: len,
                            max: self.max_frame_size,
                        });
                    }

                    let _ = self.buffer.split_to(LENGTH_PREFIX_SIZE);
                    self.state = State::WaitingForPayload {
                        remaining: len as usize,
                    };
                }

                State::WaitingForPayload { remaining } => {
                    if self.buffer.len() < remaining {
                        return Ok(None);
                    }

                    let payload = self.buffer.split_to(remaining).freeze();
                    self.state = State::WaitingForLength;
                    return Ok(Some(payload));
                }
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::WaitingForLength => "WaitingForLength",
            State::WaitingForPayload { .. } => "WaitingForPayload",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
