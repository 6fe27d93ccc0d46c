//! # graphrep-client
//!
//! Client library for graphrep.
//!
//! This crate provides:
//! - Async TCP connection with strict request-reply exchanges
//! - Collection of streamed Continue frames up to the terminal frame
//! - Typed operations for nodes, relationships, queries and node sets
//! - Batches of requests sharing one server-side transaction

pub mod client;
pub mod connection;
pub mod error;

pub use client::{Client, Table};
pub use connection::{BatchReply, Connection, ConnectionConfig, Reply};
pub use error::ClientError;
