//! # graphrep-protocol
//!
//! Wire protocol implementation for graphrep.
//!
//! This crate provides:
//! - Request line parsing (`<METHOD>\t<resource>[\t<argument>]*`)
//! - Response frame rendering (`<status>[\t<value>]*`)
//! - Self-describing value literals, including tagged graph entities
//! - Binary transport framing with length prefix and CRC32C validation

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod value;

pub use codec::{Decoder, Encoder};
pub use error::ProtocolError;
pub use frame::{Frame, FrameFlags, FRAME_HEADER_SIZE, MAGIC};
pub use message::{Method, Request, Response, Status};
pub use value::{NodeSnapshot, RelSnapshot, Value};

/// Protocol version supported by this implementation.
pub const PROTOCOL_VERSION: u16 = 1;

/// Default port for the graphrep server.
pub const DEFAULT_PORT: u16 = 47474;

/// Maximum frame payload size (16 MiB).
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Field delimiter inside request lines and response frames.
pub const FIELD_DELIMITER: char = '\t';
