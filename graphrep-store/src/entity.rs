//! Entity identifiers, label handles and stored records.

use graphrep_protocol::value::{NodeSnapshot, Properties, RelSnapshot, Value};
use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::StoreError;

/// Store-assigned node identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u64);

/// Store-assigned relationship identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Any lockable entity.
///
/// `IndexKey` is not stored; it stands for one (label, property, value)
/// lookup so that get-or-create on the same key is serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Node(NodeId),
    Rel(RelId),
    IndexKey(u64),
}

impl EntityRef {
    /// Lock entity for nodes carrying `label` with `key` equal to `value`.
    /// Distinct keys may share a hash; that only serializes unrelated merges.
    pub fn index_key(label: &Label, key: &str, value: &Value) -> Self {
        let mut hasher = DefaultHasher::new();
        label.name().hash(&mut hasher);
        key.hash(&mut hasher);
        format!("{:?}", value).hash(&mut hasher);
        EntityRef::IndexKey(hasher.finish())
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Node(id) => write!(f, "node {}", id),
            EntityRef::Rel(id) => write!(f, "relationship {}", id),
            EntityRef::IndexKey(hash) => write!(f, "index key {:016x}", hash),
        }
    }
}

impl From<NodeId> for EntityRef {
    fn from(id: NodeId) -> Self {
        EntityRef::Node(id)
    }
}

impl From<RelId> for EntityRef {
    fn from(id: RelId) -> Self {
        EntityRef::Rel(id)
    }
}

/// Interned label handle.
///
/// Two handles for the same name compare equal regardless of which registry
/// call produced them; the numeric id only speeds up hashing.
#[derive(Debug, Clone)]
pub struct Label {
    id: u32,
    name: Arc<str>,
}

impl Label {
    pub(crate) fn new(id: u32, name: &str) -> Self {
        Self {
            id,
            name: Arc::from(name),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for Label {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Label {}

impl Hash for Label {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialOrd for Label {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Label {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Stored state of a node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeRecord {
    pub labels: BTreeSet<Label>,
    pub properties: Properties,
}

impl NodeRecord {
    pub fn has_label(&self, label: &Label) -> bool {
        self.labels.contains(label)
    }

    pub fn snapshot(&self, id: NodeId) -> NodeSnapshot {
        NodeSnapshot {
            id: id.0,
            labels: self.labels.iter().map(|l| l.name().to_string()).collect(),
            properties: self.properties.clone(),
        }
    }
}

/// Stored state of a relationship.
#[derive(Debug, Clone, PartialEq)]
pub struct RelRecord {
    pub start: NodeId,
    pub end: NodeId,
    pub rel_type: String,
    pub properties: Properties,
}

impl RelRecord {
    pub fn snapshot(&self, id: RelId) -> RelSnapshot {
        RelSnapshot {
            id: id.0,
            start: self.start.0,
            end: self.end.0,
            rel_type: self.rel_type.clone(),
            properties: self.properties.clone(),
        }
    }

    pub fn touches(&self, node: NodeId) -> bool {
        self.start == node || self.end == node
    }
}

/// Checks that a value can be stored as a property.
///
/// Properties hold scalars and homogeneous lists of scalars; maps and graph
/// entities are rejected.
pub fn validate_property(key: &str, value: &Value) -> Result<(), StoreError> {
    let reject = |reason: String| StoreError::InvalidProperty {
        key: key.to_string(),
        reason,
    };

    if key.is_empty() {
        return Err(reject("empty key".to_string()));
    }

    match value {
        Value::Bool(_) | Value::Int(_) | Value::String(_) => Ok(()),
        Value::Float(f) if f.is_finite() => Ok(()),
        Value::Float(f) => Err(reject(format!("non-finite float {}", f))),
        Value::List(items) => {
            let mut kind = None;
            for item in items {
                match item {
                    Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::String(_) => {}
                    other => {
                        return Err(reject(format!("lists cannot hold {}", other.type_name())))
                    }
                }
                if let Some(first) = kind {
                    if first != item.type_name() {
                        return Err(reject("mixed list element types".to_string()));
                    }
                } else {
                    kind = Some(item.type_name());
                }
            }
            Ok(())
        }
        other => Err(reject(format!("{} is not a property type", other.type_name()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_equality_by_name() {
        let a = Label::new(1, "Person");
        let b = Label::new(2, "Person");
        assert_eq!(a, b);
        assert_ne!(a, Label::new(1, "Place"));
    }

    #[test]
    fn test_node_record_snapshot() {
        let mut record = NodeRecord::default();
        record.labels.insert(Label::new(0, "Person"));
        record
            .properties
            .insert("name".to_string(), Value::from("Alice"));

        let snapshot = record.snapshot(NodeId(4));
        assert_eq!(snapshot.id, 4);
        assert!(snapshot.has_label("Person"));
        assert_eq!(snapshot.properties["name"], Value::from("Alice"));
    }

    #[test]
    fn test_validate_property() {
        assert!(validate_property("age", &Value::Int(33)).is_ok());
        assert!(validate_property("tags", &Value::List(vec!["a".into(), "b".into()])).is_ok());
        assert!(validate_property("empty", &Value::List(vec![])).is_ok());

        assert!(validate_property("", &Value::Int(1)).is_err());
        assert!(validate_property("x", &Value::Null).is_err());
        assert!(validate_property("x", &Value::Map(Default::default())).is_err());
        assert!(validate_property("x", &Value::Float(f64::NAN)).is_err());
        assert!(validate_property("x", &Value::List(vec![Value::Int(1), "a".into()])).is_err());
        assert!(validate_property("x", &Value::Node(NodeSnapshot::new(0))).is_err());
    }

    #[test]
    fn test_entity_ref_display() {
        assert_eq!(EntityRef::from(NodeId(3)).to_string(), "node 3");
        assert_eq!(EntityRef::from(RelId(5)).to_string(), "relationship 5");
        assert_eq!(EntityRef::IndexKey(255).to_string(), "index key 00000000000000ff");
    }

    #[test]
    fn test_index_key() {
        let person = Label::new(0, "Person");
        let alice = EntityRef::index_key(&person, "name", &Value::from("Alice"));
        assert_eq!(
            alice,
            EntityRef::index_key(&Label::new(7, "Person"), "name", &Value::from("Alice"))
        );
        assert_ne!(alice, EntityRef::index_key(&person, "name", &Value::from("Bob")));
        assert_ne!(alice, EntityRef::index_key(&person, "nick", &Value::from("Alice")));
        assert_ne!(
            EntityRef::index_key(&person, "n", &Value::Int(1)),
            EntityRef::index_key(&person, "n", &Value::from("1"))
        );
    }
}
