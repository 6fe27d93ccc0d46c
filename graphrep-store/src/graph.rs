//! Graph store interface.
//!
//! Request handlers only ever see these traits; the concrete engine is
//! injected as `Arc<dyn GraphStore>`.

use crate::entity::{EntityRef, Label, NodeId, RelId};
use crate::error::StoreError;
use crate::lock::LockGuard;
use crate::query::Params;
use graphrep_protocol::value::{NodeSnapshot, RelSnapshot, Value};

/// One result row, in column order.
pub type Row = Vec<Value>;

/// Lazy, single-consumer row cursor.
pub type RowCursor<'a> = Box<dyn Iterator<Item = Result<Row, StoreError>> + 'a>;

/// Lazy node cursor.
pub type NodeCursor<'a> = Box<dyn Iterator<Item = Result<NodeSnapshot, StoreError>> + 'a>;

/// Result of executing a query: column names plus a lazy row cursor.
pub struct QueryResult<'a> {
    pub columns: Vec<String>,
    pub rows: RowCursor<'a>,
}

impl std::fmt::Debug for QueryResult<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResult")
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

/// A transactional graph engine shared by all workers.
pub trait GraphStore: Send + Sync {
    /// Opens a new transaction.
    fn begin(&self) -> Box<dyn Transaction + '_>;

    /// Returns the interned handle for a label name.
    fn intern_label(&self, name: &str) -> Label;
}

/// One unit of work against the store.
///
/// Dropping a transaction without committing rolls it back.
pub trait Transaction {
    fn id(&self) -> u64;

    fn create_node(&mut self) -> Result<NodeId, StoreError>;

    fn node(&self, id: NodeId) -> Result<NodeSnapshot, StoreError>;

    fn add_label(&mut self, id: NodeId, label: &Label) -> Result<(), StoreError>;

    fn remove_label(&mut self, id: NodeId, label: &Label) -> Result<(), StoreError>;

    /// Sets a property on a node or relationship. Setting `Null` removes it.
    fn set_property(&mut self, entity: EntityRef, key: &str, value: Value)
        -> Result<(), StoreError>;

    fn remove_property(&mut self, entity: EntityRef, key: &str) -> Result<(), StoreError>;

    fn create_relationship(
        &mut self,
        start: NodeId,
        end: NodeId,
        rel_type: &str,
    ) -> Result<RelId, StoreError>;

    fn relationship(&self, id: RelId) -> Result<RelSnapshot, StoreError>;

    /// Deletes a node. Fails while relationships still reference it.
    fn delete_node(&mut self, id: NodeId) -> Result<(), StoreError>;

    fn delete_relationship(&mut self, id: RelId) -> Result<(), StoreError>;

    fn acquire_write_lock(&mut self, entity: EntityRef) -> Result<LockGuard, StoreError>;

    fn acquire_read_lock(&mut self, entity: EntityRef) -> Result<LockGuard, StoreError>;

    /// Write-locks an entity until the transaction commits or rolls back.
    fn hold_write_lock(&mut self, entity: EntityRef) -> Result<(), StoreError>;

    /// Executes a declarative query.
    ///
    /// Fails with [`StoreError::Query`] on malformed input and
    /// [`StoreError::EntityNotFound`] when the query names a missing entity.
    fn execute(&mut self, query: &str, params: &Params) -> Result<QueryResult<'_>, StoreError>;

    /// Finds nodes carrying a label, optionally with one property equal to
    /// a value.
    fn find_nodes(
        &self,
        label: &Label,
        property: Option<(&str, &Value)>,
    ) -> Result<NodeCursor<'_>, StoreError>;

    fn commit(self: Box<Self>) -> Result<(), StoreError>;

    fn rollback(self: Box<Self>);
}
