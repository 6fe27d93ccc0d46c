//! # graphrep-server
//!
//! Request-reply front-end for a graph store.
//!
//! This crate provides:
//! - A tokio TCP acceptor with one task per connection
//! - A fixed pool of worker threads fed from one shared queue
//! - Resource dispatch (`node`, `rel`, `cypher`, `nodeset`) inside a
//!   per-request transaction
//! - Streamed responses: Continue frames followed by one terminal frame
//! - YAML/env configuration and Prometheus metrics

pub mod config;
pub mod error;
pub mod labels;
pub mod metrics;
pub mod resource;
pub mod response;
pub mod server;
pub mod session;
pub mod worker;

pub use config::{Config, MetricsConfig, NetworkConfig, WorkersConfig};
pub use error::{ResourceError, ServerError};
pub use metrics::Metrics;
pub use resource::{Outcome, RequestContext, Resource};
pub use response::ResponseStream;
pub use server::{Server, ServerConfig, ServerStats, MAX_BATCH_REQUESTS};
pub use session::Session;
pub use worker::{Exchange, ExchangeQueue, Payload, WorkerPool};
