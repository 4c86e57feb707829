//! Error types for wrp-relay.

use thiserror::Error;

use crate::access::AccessError;

/// Main error type for all relay operations.
#[derive(Debug, Error)]
pub enum RelayError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error (error reply payloads).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (bad handshake, unexpected peer, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Inbound frame larger than the configured maximum.
    #[error("Frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: u64, max: u64 },

    /// Socket is closed (locally, or the peer went away for good).
    #[error("Socket closed")]
    Closed,

    /// `close()` called on a socket that was already closed.
    #[error("Socket already closed")]
    AlreadyClosed,

    /// Outbound queue stayed full past the send timeout.
    #[error("Send timeout")]
    SendTimeout,

    /// The caller's cancellation token fired before the operation completed.
    #[error("Operation cancelled")]
    Cancelled,

    /// Address uses a transport scheme we do not speak.
    #[error("Invalid URL scheme: {0} - only tcp:// urls are supported")]
    InvalidScheme(String),

    /// Address could not be parsed.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Configuration failed validation.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A service with this name is already registered.
    #[error("Service already registered: {0}")]
    DuplicateService(String),

    /// Message rejected by an access filter.
    #[error("Access denied: {0}")]
    Access(#[from] AccessError),
}

/// Result type alias using RelayError.
pub type Result<T> = std::result::Result<T, RelayError>;
