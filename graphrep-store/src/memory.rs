//! In-memory reference engine.
//!
//! Committed state lives behind one `RwLock`. A transaction keeps a private
//! overlay of the records it touched; its own reads see the overlay first.
//! Every mutation takes an implicit write lock on the entity (read locks on
//! relationship endpoints) that is held until the transaction ends, so the
//! overlay is always based on the latest committed version of the entity.
//! Commit validates and publishes the overlay atomically.

use crate::entity::{validate_property, EntityRef, Label, NodeId, NodeRecord, RelId, RelRecord};
use crate::error::StoreError;
use crate::graph::{GraphStore, NodeCursor, QueryResult, Row, RowCursor, Transaction};
use crate::lock::{LockGuard, LockManager, LockMode, TxId, DEFAULT_LOCK_TIMEOUT};
use crate::query::{values_equal, NodePattern, Params, ReturnItem, Statement};
use dashmap::DashMap;
use graphrep_protocol::value::{NodeSnapshot, RelSnapshot, Value};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct GraphState {
    nodes: BTreeMap<NodeId, NodeRecord>,
    rels: BTreeMap<RelId, RelRecord>,
    label_index: HashMap<Label, BTreeSet<NodeId>>,
    adjacency: HashMap<NodeId, BTreeSet<RelId>>,
}

impl GraphState {
    fn node_exists(&self, overlay: &BTreeMap<NodeId, Option<NodeRecord>>, id: NodeId) -> bool {
        match overlay.get(&id) {
            Some(entry) => entry.is_some(),
            None => self.nodes.contains_key(&id),
        }
    }

    fn put_node(&mut self, id: NodeId, record: NodeRecord) {
        if let Some(old) = self.nodes.get(&id) {
            for label in old.labels.difference(&record.labels) {
                if let Some(ids) = self.label_index.get_mut(label) {
                    ids.remove(&id);
                }
            }
        }
        for label in &record.labels {
            self.label_index
                .entry(label.clone())
                .or_default()
                .insert(id);
        }
        self.nodes.insert(id, record);
    }

    fn remove_node(&mut self, id: NodeId) {
        if let Some(old) = self.nodes.remove(&id) {
            for label in &old.labels {
                if let Some(ids) = self.label_index.get_mut(label) {
                    ids.remove(&id);
                }
            }
        }
        self.adjacency.remove(&id);
    }

    fn put_rel(&mut self, id: RelId, record: RelRecord) {
        for node in [record.start, record.end] {
            self.adjacency.entry(node).or_default().insert(id);
        }
        self.rels.insert(id, record);
    }

    fn remove_rel(&mut self, id: RelId) {
        if let Some(old) = self.rels.remove(&id) {
            for node in [old.start, old.end] {
                if let Some(ids) = self.adjacency.get_mut(&node) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        self.adjacency.remove(&node);
                    }
                }
            }
        }
    }
}

/// Counters describing a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub nodes: usize,
    pub relationships: usize,
    pub labels: usize,
    pub commits: u64,
    pub rollbacks: u64,
}

/// Transactional in-memory graph.
pub struct MemoryGraph {
    state: RwLock<GraphState>,
    labels: DashMap<String, Label>,
    next_label: AtomicU32,
    next_node: AtomicU64,
    next_rel: AtomicU64,
    next_tx: AtomicU64,
    locks: Arc<LockManager>,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Creates a graph whose transactions give up waiting for a lock after
    /// `timeout`.
    pub fn with_lock_timeout(timeout: Duration) -> Self {
        Self {
            state: RwLock::new(GraphState::default()),
            labels: DashMap::new(),
            next_label: AtomicU32::new(0),
            next_node: AtomicU64::new(0),
            next_rel: AtomicU64::new(0),
            next_tx: AtomicU64::new(1),
            locks: Arc::new(LockManager::new(timeout)),
            commits: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
        }
    }

    /// Opens a transaction with its concrete type.
    pub fn transaction(&self) -> MemoryTransaction<'_> {
        let id = self.next_tx.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(tx = id, "transaction started");
        MemoryTransaction {
            graph: self,
            id,
            nodes: BTreeMap::new(),
            rels: BTreeMap::new(),
            held: HashSet::new(),
            finished: false,
        }
    }

    /// Returns the label handle for a name that has already been interned.
    pub fn lookup_label(&self, name: &str) -> Option<Label> {
        self.labels.get(name).map(|label| label.clone())
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn node_count(&self) -> usize {
        self.state.read().nodes.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.state.read().rels.len()
    }

    pub fn stats(&self) -> StoreStats {
        let state = self.state.read();
        StoreStats {
            nodes: state.nodes.len(),
            relationships: state.rels.len(),
            labels: self.labels.len(),
            commits: self.commits.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
        }
    }
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore for MemoryGraph {
    fn begin(&self) -> Box<dyn Transaction + '_> {
        Box::new(self.transaction())
    }

    fn intern_label(&self, name: &str) -> Label {
        if let Some(label) = self.labels.get(name) {
            return label.clone();
        }
        self.labels
            .entry(name.to_string())
            .or_insert_with(|| Label::new(self.next_label.fetch_add(1, Ordering::Relaxed), name))
            .clone()
    }
}

/// A transaction against a [`MemoryGraph`].
pub struct MemoryTransaction<'g> {
    graph: &'g MemoryGraph,
    id: TxId,
    /// Touched nodes; `None` marks a deletion.
    nodes: BTreeMap<NodeId, Option<NodeRecord>>,
    /// Touched relationships; `None` marks a deletion.
    rels: BTreeMap<RelId, Option<RelRecord>>,
    held: HashSet<(EntityRef, LockMode)>,
    finished: bool,
}

impl<'g> MemoryTransaction<'g> {
    fn node_record(&self, id: NodeId) -> Option<NodeRecord> {
        match self.nodes.get(&id) {
            Some(entry) => entry.clone(),
            None => self.graph.state.read().nodes.get(&id).cloned(),
        }
    }

    fn rel_record(&self, id: RelId) -> Option<RelRecord> {
        match self.rels.get(&id) {
            Some(entry) => entry.clone(),
            None => self.graph.state.read().rels.get(&id).cloned(),
        }
    }

    /// Takes an implicit lock held until the transaction ends.
    fn hold(&mut self, entity: EntityRef, mode: LockMode) -> Result<(), StoreError> {
        if self.held.contains(&(entity, mode)) || self.held.contains(&(entity, LockMode::Write)) {
            return Ok(());
        }
        self.graph.locks.lock(self.id, entity, mode)?;
        self.held.insert((entity, mode));
        Ok(())
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeRecord, StoreError> {
        self.hold(EntityRef::Node(id), LockMode::Write)?;
        if !self.nodes.contains_key(&id) {
            let committed = self
                .graph
                .state
                .read()
                .nodes
                .get(&id)
                .cloned()
                .ok_or(StoreError::NodeNotFound(id))?;
            self.nodes.insert(id, Some(committed));
        }
        match self.nodes.get_mut(&id) {
            Some(Some(record)) => Ok(record),
            _ => Err(StoreError::NodeNotFound(id)),
        }
    }

    fn rel_mut(&mut self, id: RelId) -> Result<&mut RelRecord, StoreError> {
        self.hold(EntityRef::Rel(id), LockMode::Write)?;
        if !self.rels.contains_key(&id) {
            let committed = self
                .graph
                .state
                .read()
                .rels
                .get(&id)
                .cloned()
                .ok_or(StoreError::RelationshipNotFound(id))?;
            self.rels.insert(id, Some(committed));
        }
        match self.rels.get_mut(&id) {
            Some(Some(record)) => Ok(record),
            _ => Err(StoreError::RelationshipNotFound(id)),
        }
    }

    fn has_relationships(&self, node: NodeId) -> bool {
        let in_overlay = self
            .rels
            .values()
            .any(|entry| matches!(entry, Some(record) if record.touches(node)));
        if in_overlay {
            return true;
        }
        let state = self.graph.state.read();
        state
            .adjacency
            .get(&node)
            .map_or(false, |ids| ids.iter().any(|id| !self.rels.contains_key(id)))
    }

    /// Returns the first visible node with an id greater than `after`.
    fn next_node_after(
        &self,
        after: Option<NodeId>,
        label: Option<&Label>,
    ) -> Option<(NodeId, NodeRecord)> {
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        let range = (lower, Bound::Unbounded);

        let overlay = self.nodes.range(range).find_map(|(id, entry)| match entry {
            Some(record) if label.map_or(true, |l| record.has_label(l)) => Some((*id, record)),
            _ => None,
        });

        let state = self.graph.state.read();
        let committed = match label {
            Some(label) => state.label_index.get(label).and_then(|ids| {
                ids.range(range)
                    .find(|id| !self.nodes.contains_key(*id))
                    .copied()
            }),
            None => state
                .nodes
                .range(range)
                .map(|(id, _)| *id)
                .find(|id| !self.nodes.contains_key(id)),
        };

        match (overlay, committed) {
            (Some((overlay_id, _)), Some(committed_id)) if committed_id < overlay_id => state
                .nodes
                .get(&committed_id)
                .map(|record| (committed_id, record.clone())),
            (Some((overlay_id, record)), _) => Some((overlay_id, record.clone())),
            (None, Some(committed_id)) => state
                .nodes
                .get(&committed_id)
                .map(|record| (committed_id, record.clone())),
            (None, None) => None,
        }
    }

    fn create_from_pattern(
        &mut self,
        pattern: &NodePattern,
        params: &Params,
    ) -> Result<NodeId, StoreError> {
        let id = self.create_node()?;
        for name in &pattern.labels {
            let label = self.graph.intern_label(name);
            self.add_label(id, &label)?;
        }
        for (key, expr) in &pattern.properties {
            let value = expr.resolve(params)?;
            self.set_property(EntityRef::Node(id), key, value)?;
        }
        Ok(id)
    }

    fn validate(
        state: &GraphState,
        nodes: &BTreeMap<NodeId, Option<NodeRecord>>,
        rels: &BTreeMap<RelId, Option<RelRecord>>,
    ) -> Result<(), StoreError> {
        for (id, entry) in rels {
            if let Some(record) = entry {
                for node in [record.start, record.end] {
                    if !state.node_exists(nodes, node) {
                        return Err(StoreError::Commit(format!(
                            "relationship {} references missing node {}",
                            id, node
                        )));
                    }
                }
            }
        }
        for (id, entry) in nodes {
            if entry.is_none() {
                let referenced = state.adjacency.get(id).map_or(false, |ids| {
                    ids.iter().any(|rel| !matches!(rels.get(rel), Some(None)))
                });
                if referenced {
                    return Err(StoreError::NodeHasRelationships(*id));
                }
            }
        }
        Ok(())
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.held.clear();
            self.graph.locks.release_all(self.id);
        }
    }
}

/// Node iterator that re-reads committed state at every step.
struct NodeScan<'t, 'g> {
    tx: &'t MemoryTransaction<'g>,
    label: Option<Label>,
    cursor: Option<NodeId>,
}

impl<'t, 'g> NodeScan<'t, 'g> {
    fn new(tx: &'t MemoryTransaction<'g>, label: Option<Label>) -> Self {
        Self {
            tx,
            label,
            cursor: None,
        }
    }
}

impl Iterator for NodeScan<'_, '_> {
    type Item = (NodeId, NodeRecord);

    fn next(&mut self) -> Option<Self::Item> {
        let (id, record) = self.tx.next_node_after(self.cursor, self.label.as_ref())?;
        self.cursor = Some(id);
        Some((id, record))
    }
}

fn no_properties(entity: EntityRef) -> StoreError {
    StoreError::InvalidArgument(format!("{} has no properties", entity))
}

fn matches_properties(record: &NodeRecord, filters: &[(String, Value)]) -> bool {
    filters.iter().all(|(key, expected)| {
        record
            .properties
            .get(key)
            .map_or(false, |actual| values_equal(actual, expected))
    })
}

fn project(
    returns: &[ReturnItem],
    node: Option<&NodeSnapshot>,
    params: &Params,
) -> Result<Row, StoreError> {
    returns
        .iter()
        .map(|item| item.evaluate(node, params))
        .collect()
}

impl Transaction for MemoryTransaction<'_> {
    fn id(&self) -> u64 {
        self.id
    }

    fn create_node(&mut self) -> Result<NodeId, StoreError> {
        let id = NodeId(self.graph.next_node.fetch_add(1, Ordering::Relaxed));
        self.nodes.insert(id, Some(NodeRecord::default()));
        Ok(id)
    }

    fn node(&self, id: NodeId) -> Result<NodeSnapshot, StoreError> {
        self.node_record(id)
            .map(|record| record.snapshot(id))
            .ok_or(StoreError::NodeNotFound(id))
    }

    fn add_label(&mut self, id: NodeId, label: &Label) -> Result<(), StoreError> {
        if label.name().is_empty() {
            return Err(StoreError::InvalidArgument("empty label name".to_string()));
        }
        self.node_mut(id)?.labels.insert(label.clone());
        Ok(())
    }

    fn remove_label(&mut self, id: NodeId, label: &Label) -> Result<(), StoreError> {
        self.node_mut(id)?.labels.remove(label);
        Ok(())
    }

    fn set_property(
        &mut self,
        entity: EntityRef,
        key: &str,
        value: Value,
    ) -> Result<(), StoreError> {
        if value.is_null() {
            return self.remove_property(entity, key);
        }
        validate_property(key, &value)?;
        let properties = match entity {
            EntityRef::Node(id) => &mut self.node_mut(id)?.properties,
            EntityRef::Rel(id) => &mut self.rel_mut(id)?.properties,
            EntityRef::IndexKey(_) => return Err(no_properties(entity)),
        };
        properties.insert(key.to_string(), value);
        Ok(())
    }

    fn remove_property(&mut self, entity: EntityRef, key: &str) -> Result<(), StoreError> {
        let properties = match entity {
            EntityRef::Node(id) => &mut self.node_mut(id)?.properties,
            EntityRef::Rel(id) => &mut self.rel_mut(id)?.properties,
            EntityRef::IndexKey(_) => return Err(no_properties(entity)),
        };
        properties.remove(key);
        Ok(())
    }

    fn create_relationship(
        &mut self,
        start: NodeId,
        end: NodeId,
        rel_type: &str,
    ) -> Result<RelId, StoreError> {
        if rel_type.is_empty() {
            return Err(StoreError::InvalidArgument(
                "empty relationship type".to_string(),
            ));
        }
        for node in [start, end] {
            self.hold(EntityRef::Node(node), LockMode::Read)?;
            if self.node_record(node).is_none() {
                return Err(StoreError::NodeNotFound(node));
            }
        }

        let id = RelId(self.graph.next_rel.fetch_add(1, Ordering::Relaxed));
        self.rels.insert(
            id,
            Some(RelRecord {
                start,
                end,
                rel_type: rel_type.to_string(),
                properties: Default::default(),
            }),
        );
        Ok(id)
    }

    fn relationship(&self, id: RelId) -> Result<RelSnapshot, StoreError> {
        self.rel_record(id)
            .map(|record| record.snapshot(id))
            .ok_or(StoreError::RelationshipNotFound(id))
    }

    fn delete_node(&mut self, id: NodeId) -> Result<(), StoreError> {
        self.hold(EntityRef::Node(id), LockMode::Write)?;
        if self.node_record(id).is_none() {
            return Err(StoreError::NodeNotFound(id));
        }
        if self.has_relationships(id) {
            return Err(StoreError::NodeHasRelationships(id));
        }
        self.nodes.insert(id, None);
        Ok(())
    }

    fn delete_relationship(&mut self, id: RelId) -> Result<(), StoreError> {
        self.hold(EntityRef::Rel(id), LockMode::Write)?;
        if self.rel_record(id).is_none() {
            return Err(StoreError::RelationshipNotFound(id));
        }
        self.rels.insert(id, None);
        Ok(())
    }

    fn acquire_write_lock(&mut self, entity: EntityRef) -> Result<LockGuard, StoreError> {
        self.graph.locks.acquire(self.id, entity, LockMode::Write)
    }

    fn acquire_read_lock(&mut self, entity: EntityRef) -> Result<LockGuard, StoreError> {
        self.graph.locks.acquire(self.id, entity, LockMode::Read)
    }

    fn hold_write_lock(&mut self, entity: EntityRef) -> Result<(), StoreError> {
        self.hold(entity, LockMode::Write)
    }

    fn execute(&mut self, query: &str, params: &Params) -> Result<QueryResult<'_>, StoreError> {
        let statement = Statement::parse(query)?;
        statement.check_params(params)?;
        let columns = statement.columns();
        let params = params.clone();
        tracing::debug!(tx = self.id, query, "executing query");

        let rows: RowCursor<'_> = match statement {
            Statement::Return { returns } => {
                let row = project(&returns, None, &params)?;
                Box::new(std::iter::once(Ok(row)))
            }
            Statement::Create { pattern, returns } => {
                let id = self.create_from_pattern(&pattern, &params)?;
                if returns.is_empty() {
                    Box::new(std::iter::empty())
                } else {
                    let snapshot = self.node(id)?;
                    let row = project(&returns, Some(&snapshot), &params)?;
                    Box::new(std::iter::once(Ok(row)))
                }
            }
            Statement::Start {
                ids,
                returns,
                limit,
                ..
            } => {
                let mut snapshots = Vec::with_capacity(ids.len());
                for id in ids {
                    let id = NodeId(id);
                    let snapshot = self
                        .node(id)
                        .map_err(|_| StoreError::EntityNotFound(format!("node {}", id)))?;
                    snapshots.push(snapshot);
                }
                Box::new(
                    snapshots
                        .into_iter()
                        .take(limit.unwrap_or(usize::MAX))
                        .map(move |snapshot| project(&returns, Some(&snapshot), &params)),
                )
            }
            Statement::Match {
                pattern,
                conditions,
                returns,
                limit,
            } => {
                let mut filters = Vec::new();
                for (key, expr) in pattern.properties.iter().chain(conditions.iter()) {
                    filters.push((key.clone(), expr.resolve(&params)?));
                }
                let labels: Option<Vec<Label>> = pattern
                    .labels
                    .iter()
                    .map(|name| self.graph.lookup_label(name))
                    .collect();

                match labels {
                    // a label nobody has used yet cannot match anything
                    None => Box::new(std::iter::empty()),
                    Some(labels) => {
                        let this: &Self = self;
                        let scan = NodeScan::new(this, labels.first().cloned());
                        Box::new(
                            scan.filter(move |(_, record)| {
                                labels.iter().all(|l| record.has_label(l))
                                    && matches_properties(record, &filters)
                            })
                            .take(limit.unwrap_or(usize::MAX))
                            .map(move |(id, record)| {
                                project(&returns, Some(&record.snapshot(id)), &params)
                            }),
                        )
                    }
                }
            }
        };

        Ok(QueryResult { columns, rows })
    }

    fn find_nodes(
        &self,
        label: &Label,
        property: Option<(&str, &Value)>,
    ) -> Result<NodeCursor<'_>, StoreError> {
        let filters: Vec<(String, Value)> = property
            .map(|(key, value)| (key.to_string(), value.clone()))
            .into_iter()
            .collect();
        let scan = NodeScan::new(self, Some(label.clone()));
        Ok(Box::new(
            scan.filter(move |(_, record)| matches_properties(record, &filters))
                .map(|(id, record)| Ok(record.snapshot(id))),
        ))
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        let nodes = std::mem::take(&mut self.nodes);
        let rels = std::mem::take(&mut self.rels);

        let result = {
            let mut state = self.graph.state.write();
            Self::validate(&state, &nodes, &rels).map(|()| {
                for (id, entry) in rels {
                    match entry {
                        Some(record) => state.put_rel(id, record),
                        None => state.remove_rel(id),
                    }
                }
                for (id, entry) in nodes {
                    match entry {
                        Some(record) => state.put_node(id, record),
                        None => state.remove_node(id),
                    }
                }
            })
        };

        self.finish();
        match &result {
            Ok(()) => {
                self.graph.commits.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(tx = self.id, "transaction committed");
            }
            Err(e) => {
                self.graph.rollbacks.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(tx = self.id, error = %e, "commit rejected");
            }
        }
        result
    }

    fn rollback(mut self: Box<Self>) {
        self.nodes.clear();
        self.rels.clear();
        self.finish();
        self.graph.rollbacks.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(tx = self.id, "transaction rolled back");
    }
}

impl Drop for MemoryTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.finish();
            self.graph.rollbacks.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(tx = self.id, "transaction dropped without commit");
        }
    }
}
