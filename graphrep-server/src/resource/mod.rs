//! Routable resources.
//!
//! A resource is a name plus a capability table mapping verbs onto handler
//! functions. Verbs missing from the table answer 405 with the verb echoed
//! back. Handlers run inside the request's transaction and return an
//! [`Outcome`]; the worker commits before the outcome becomes the terminal
//! frame.

mod args;
pub mod cypher;
pub mod node;
pub mod nodeset;
pub mod rel;

pub use args::Args;

use crate::error::ResourceError;
use crate::labels::LabelCache;
use crate::response::ResponseStream;
use graphrep_protocol::{Request, Status, Value};
use graphrep_store::{EntityRef, GraphStore, Label, LockGuard, Transaction};

/// Handler for one verb of one resource.
pub type Handler = fn(&mut RequestContext<'_>, &Args<'_>) -> Result<Outcome, ResourceError>;

/// Everything a handler may touch while serving one request.
pub struct RequestContext<'a> {
    pub store: &'a dyn GraphStore,
    pub tx: &'a mut dyn Transaction,
    pub stream: &'a mut ResponseStream,
    pub labels: &'a mut LabelCache,
}

impl RequestContext<'_> {
    /// Returns the interned handle for a label name.
    pub fn label(&mut self, name: &str) -> Label {
        self.labels.get(self.store, name)
    }

    /// Takes the write lock and then the read lock on an entity.
    pub fn lock(&mut self, entity: EntityRef) -> Result<EntityLocks, ResourceError> {
        let write = self.tx.acquire_write_lock(entity)?;
        let read = self.tx.acquire_read_lock(entity)?;
        Ok(EntityLocks {
            read: Some(read),
            write: Some(write),
        })
    }
}

/// Write and read lock held on one entity for the duration of a mutation.
///
/// The read lock is released before the write lock, whether the guard is
/// released explicitly or dropped on an error path.
#[must_use = "the entity is unlocked as soon as the guard is dropped"]
#[derive(Debug)]
pub struct EntityLocks {
    read: Option<LockGuard>,
    write: Option<LockGuard>,
}

impl EntityLocks {
    pub fn release(self) {}
}

impl Drop for EntityLocks {
    fn drop(&mut self) {
        drop(self.read.take());
        drop(self.write.take());
    }
}

/// Result of a successful handler: the terminal status and body, plus the
/// primary entity the request touched.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub status: Status,
    pub body: Vec<Value>,
    pub entity: Option<Value>,
}

impl Outcome {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            body: Vec::new(),
            entity: None,
        }
    }

    /// 200 carrying one value, which is also the touched entity when it is
    /// a node or relationship.
    pub fn ok(value: impl Into<Value>) -> Self {
        Self::single(Status::Ok, value.into())
    }

    pub fn created(value: impl Into<Value>) -> Self {
        Self::single(Status::Created, value.into())
    }

    pub fn no_content() -> Self {
        Self::new(Status::NoContent)
    }

    pub fn touching(mut self, entity: Option<Value>) -> Self {
        self.entity = entity;
        self
    }

    fn single(status: Status, value: Value) -> Self {
        let entity = value.is_entity().then(|| value.clone());
        Self {
            status,
            body: vec![value],
            entity,
        }
    }
}

/// A named resource and its capability table.
pub struct Resource {
    name: &'static str,
    handlers: &'static [(&'static str, Handler)],
}

impl Resource {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Verbs this resource answers.
    pub fn methods(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.iter().map(|(method, _)| *method)
    }

    pub fn allows(&self, method: &str) -> bool {
        self.handlers.iter().any(|(m, _)| *m == method)
    }

    /// Routes a request to the handler for its verb.
    pub fn dispatch(
        &self,
        ctx: &mut RequestContext<'_>,
        request: &Request,
    ) -> Result<Outcome, ResourceError> {
        let method = request.method.as_str();
        let handler = self
            .handlers
            .iter()
            .find(|(m, _)| *m == method)
            .map(|(_, handler)| *handler)
            .ok_or_else(|| ResourceError::MethodNotAllowed(method.to_string()))?;
        handler(ctx, &Args::new(&request.data))
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.name)
            .field("methods", &self.methods().collect::<Vec<_>>())
            .finish()
    }
}

/// Every routable resource.
pub static RESOURCES: [&Resource; 4] = [&node::NODE, &rel::REL, &cypher::CYPHER, &nodeset::NODESET];

/// Finds a resource by its routing name.
pub fn lookup(name: &str) -> Option<&'static Resource> {
    RESOURCES.iter().copied().find(|resource| resource.name == name)
}
