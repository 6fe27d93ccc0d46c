//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors that can occur during framing or message handling.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid magic bytes: expected 'GRPX', got {0:?}")]
    InvalidMagic([u8; 4]),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u16),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("CRC mismatch: expected {expected:#x}, got {actual:#x}")]
    CrcMismatch { expected: u32, actual: u32 },

    #[error("invalid frame flags: {0:#x}")]
    InvalidFlags(u16),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("unknown status code: {0}")]
    UnknownStatus(u16),

    #[error("unknown value tag: {0}")]
    UnknownTag(String),

    #[error("cannot encode non-finite float: {0}")]
    NonFiniteFloat(f64),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid UTF-8 in payload")]
    InvalidUtf8,
}

impl ProtocolError {
    /// Returns whether the error was caused by the bytes the peer sent, as
    /// opposed to a local encoding or I/O failure.
    pub fn is_peer_error(&self) -> bool {
        !matches!(self, ProtocolError::Io(_) | ProtocolError::NonFiniteFloat(_))
    }
}
