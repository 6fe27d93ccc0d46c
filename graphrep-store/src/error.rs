//! Store error types.

use crate::entity::{EntityRef, NodeId, RelId};
use thiserror::Error;

/// Errors from graph store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    #[error("relationship {0} not found")]
    RelationshipNotFound(RelId),

    /// A query referenced an entity that does not exist.
    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("invalid query: {0}")]
    Query(String),

    #[error("invalid value for property '{key}': {reason}")]
    InvalidProperty { key: String, reason: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("node {0} still has relationships")]
    NodeHasRelationships(NodeId),

    #[error("lock wait on {entity} timed out")]
    LockTimeout { entity: EntityRef },

    #[error("commit failed: {0}")]
    Commit(String),
}

impl StoreError {
    /// Returns whether the error reports a missing node, relationship or
    /// query reference.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::NodeNotFound(_)
                | StoreError::RelationshipNotFound(_)
                | StoreError::EntityNotFound(_)
        )
    }

    /// Returns whether retrying the same transaction later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::LockTimeout { .. })
    }

    /// Returns a stable error code for logs and metrics.
    pub fn error_code(&self) -> &'static str {
        match self {
            StoreError::NodeNotFound(_) => "NODE_NOT_FOUND",
            StoreError::RelationshipNotFound(_) => "RELATIONSHIP_NOT_FOUND",
            StoreError::EntityNotFound(_) => "ENTITY_NOT_FOUND",
            StoreError::Query(_) => "INVALID_QUERY",
            StoreError::InvalidProperty { .. } => "INVALID_PROPERTY",
            StoreError::InvalidArgument(_) => "INVALID_ARGUMENT",
            StoreError::NodeHasRelationships(_) => "NODE_HAS_RELATIONSHIPS",
            StoreError::LockTimeout { .. } => "LOCK_TIMEOUT",
            StoreError::Commit(_) => "COMMIT_FAILED",
        }
    }
}
