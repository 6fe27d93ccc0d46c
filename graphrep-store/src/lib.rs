//! # graphrep-store
//!
//! Graph store interface and in-memory reference engine for graphrep.
//!
//! This crate provides:
//! - The `GraphStore` / `Transaction` traits request handlers run against
//! - Per-entity re-entrant read/write locks with scoped guards
//! - `MemoryGraph`, a transactional in-memory engine
//! - A small declarative query language with lazy row cursors

pub mod entity;
pub mod error;
pub mod graph;
pub mod lock;
pub mod memory;
pub mod query;

pub use entity::{EntityRef, Label, NodeId, RelId};
pub use error::StoreError;
pub use graph::{GraphStore, NodeCursor, QueryResult, Row, RowCursor, Transaction};
pub use lock::{LockGuard, LockManager, LockMode, DEFAULT_LOCK_TIMEOUT};
pub use memory::{MemoryGraph, MemoryTransaction, StoreStats};
pub use query::{Params, Statement};
