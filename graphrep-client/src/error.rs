//! Client error types.

use graphrep_protocol::{Status, Value};
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] graphrep_protocol::ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timeout")]
    Timeout,

    /// The server answered with a 4xx or 5xx terminal frame.
    #[error("{status}: {message}")]
    Status { status: Status, message: String },

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl ClientError {
    /// Builds the error for a non-success terminal frame. The first value of
    /// the body, when it is a string, is the server's message.
    pub fn from_terminal(status: Status, body: &[Value]) -> Self {
        let message = match body.first() {
            Some(Value::String(message)) => message.clone(),
            Some(other) => other.to_string(),
            None => status.reason().to_string(),
        };
        ClientError::Status { status, message }
    }

    /// Returns the terminal status when the server rejected the request.
    pub fn status(&self) -> Option<Status> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::Timeout => true,
            ClientError::ConnectionClosed => true,
            ClientError::Status { status, .. } => *status == Status::Conflict,
            _ => false,
        }
    }
}
