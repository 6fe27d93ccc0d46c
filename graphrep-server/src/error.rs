//! Server error types.
//!
//! [`ResourceError`] is the taxonomy a request can end in; every variant maps
//! onto exactly one terminal status. [`ServerError`] covers the transport
//! around the workers.

use graphrep_protocol::{ProtocolError, Status, Value};
use graphrep_store::StoreError;
use thiserror::Error;

/// Body sent with every 5xx response. Details only go to the log.
pub const SERVER_ERROR_BODY: &str = "server error";

/// Errors that end a request with a terminal error frame.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The message could not be parsed. No transaction was opened.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// The resource has no handler for this verb. Carries the verb verbatim.
    #[error("{0}")]
    MethodNotAllowed(String),

    #[error("{0}")]
    Conflict(String),

    #[error("server error: {0}")]
    Server(String),
}

impl ResourceError {
    pub fn status(&self) -> Status {
        match self {
            ResourceError::MalformedRequest(_) | ResourceError::BadRequest(_) => {
                Status::BadRequest
            }
            ResourceError::NotFound(_) => Status::NotFound,
            ResourceError::MethodNotAllowed(_) => Status::MethodNotAllowed,
            ResourceError::Conflict(_) => Status::Conflict,
            ResourceError::Server(_) => Status::ServerError,
        }
    }

    /// Values carried by the terminal frame.
    pub fn body(&self) -> Vec<Value> {
        match self {
            ResourceError::Server(_) => vec![Value::from(SERVER_ERROR_BODY)],
            other => vec![Value::String(other.to_string())],
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }

    /// Maps a failure of the query engine. A missing entity named by the
    /// query is a 404; anything else the engine rejects is the client's query.
    pub fn from_query(err: StoreError) -> Self {
        match err {
            StoreError::EntityNotFound(_) => ResourceError::NotFound(err.to_string()),
            StoreError::Commit(_) => ResourceError::Server(err.to_string()),
            StoreError::NodeHasRelationships(_) | StoreError::LockTimeout { .. } => {
                ResourceError::Conflict(err.to_string())
            }
            _ => ResourceError::BadRequest(err.to_string()),
        }
    }
}

impl From<StoreError> for ResourceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NodeNotFound(id) => ResourceError::NotFound(format!("Node {} not found", id)),
            StoreError::RelationshipNotFound(id) => {
                ResourceError::NotFound(format!("Relationship {} not found", id))
            }
            StoreError::EntityNotFound(_) => ResourceError::NotFound(err.to_string()),
            StoreError::Query(_)
            | StoreError::InvalidProperty { .. }
            | StoreError::InvalidArgument(_) => ResourceError::BadRequest(err.to_string()),
            StoreError::NodeHasRelationships(_) | StoreError::LockTimeout { .. } => {
                ResourceError::Conflict(err.to_string())
            }
            StoreError::Commit(_) => ResourceError::Server(err.to_string()),
        }
    }
}

impl From<ProtocolError> for ResourceError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::MalformedRequest(msg) => ResourceError::MalformedRequest(msg),
            other if other.is_peer_error() => ResourceError::MalformedRequest(other.to_string()),
            other => ResourceError::Server(other.to_string()),
        }
    }
}

/// Transport-level server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("worker pool is closed")]
    PoolClosed,

    #[error("server shutting down")]
    ShuttingDown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphrep_store::{EntityRef, NodeId, RelId};

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ResourceError::MalformedRequest("x".into()).status(),
            Status::BadRequest
        );
        assert_eq!(ResourceError::BadRequest("x".into()).status(), Status::BadRequest);
        assert_eq!(ResourceError::NotFound("x".into()).status(), Status::NotFound);
        assert_eq!(
            ResourceError::MethodNotAllowed("BREW".into()).status(),
            Status::MethodNotAllowed
        );
        assert_eq!(ResourceError::Conflict("x".into()).status(), Status::Conflict);
        assert_eq!(ResourceError::Server("x".into()).status(), Status::ServerError);
    }

    #[test]
    fn test_server_error_body_is_generic() {
        let err = ResourceError::Server("disk on fire".into());
        assert_eq!(err.body(), vec![Value::from("server error")]);

        let err = ResourceError::MethodNotAllowed("BREW".into());
        assert_eq!(err.body(), vec![Value::from("BREW")]);
    }

    #[test]
    fn test_store_error_mapping() {
        let err = ResourceError::from(StoreError::NodeNotFound(NodeId(4)));
        assert!(matches!(&err, ResourceError::NotFound(msg) if msg == "Node 4 not found"));

        let err = ResourceError::from(StoreError::RelationshipNotFound(RelId(2)));
        assert_eq!(err.status(), Status::NotFound);

        let err = ResourceError::from(StoreError::NodeHasRelationships(NodeId(1)));
        assert_eq!(err.status(), Status::Conflict);

        let err = ResourceError::from(StoreError::LockTimeout {
            entity: EntityRef::Node(NodeId(1)),
        });
        assert_eq!(err.status(), Status::Conflict);

        let err = ResourceError::from(StoreError::Commit("boom".into()));
        assert_eq!(err.status(), Status::ServerError);
    }

    #[test]
    fn test_query_error_mapping() {
        let err = ResourceError::from_query(StoreError::EntityNotFound("node 9".into()));
        assert_eq!(err.status(), Status::NotFound);

        let err = ResourceError::from_query(StoreError::Query("unexpected token".into()));
        assert!(matches!(&err, ResourceError::BadRequest(msg) if msg.contains("unexpected token")));
    }

    #[test]
    fn test_protocol_error_mapping() {
        let err = ResourceError::from(ProtocolError::MalformedRequest("no resource".into()));
        assert!(matches!(err, ResourceError::MalformedRequest(_)));
        assert_eq!(
            ResourceError::from(ProtocolError::NonFiniteFloat(f64::NAN)).status(),
            Status::ServerError
        );
    }
}
