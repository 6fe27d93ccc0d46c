//! Positional request arguments.

use crate::error::ResourceError;
use graphrep_protocol::value::Properties;
use graphrep_protocol::Value;
use graphrep_store::{NodeId, RelId};

/// Typed access to a request's positional arguments. Every failure is a
/// `BadRequest` naming the position and the expected type.
#[derive(Debug, Clone, Copy)]
pub struct Args<'a> {
    data: &'a [Value],
}

impl<'a> Args<'a> {
    pub fn new(data: &'a [Value]) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the argument at `index` if present and not null.
    pub fn optional(&self, index: usize) -> Option<&'a Value> {
        self.data.get(index).filter(|value| !value.is_null())
    }

    pub fn value(&self, index: usize, expected: &str) -> Result<&'a Value, ResourceError> {
        self.data.get(index).ok_or_else(|| {
            ResourceError::BadRequest(format!("argument {}: missing, expected {}", index, expected))
        })
    }

    pub fn integer(&self, index: usize) -> Result<i64, ResourceError> {
        let value = self.value(index, "integer")?;
        value.as_i64().ok_or_else(|| mismatch(index, "integer", value))
    }

    /// A node given either by id or by a node snapshot, as a resolved
    /// batch pointer is.
    pub fn node_id(&self, index: usize) -> Result<NodeId, ResourceError> {
        match self.data.get(index) {
            Some(Value::Node(node)) => Ok(NodeId(node.id)),
            _ => self.id(index).map(NodeId),
        }
    }

    /// A relationship given either by id or by a relationship snapshot.
    pub fn rel_id(&self, index: usize) -> Result<RelId, ResourceError> {
        match self.data.get(index) {
            Some(Value::Rel(rel)) => Ok(RelId(rel.id)),
            _ => self.id(index).map(RelId),
        }
    }

    pub fn string(&self, index: usize) -> Result<&'a str, ResourceError> {
        let value = self.value(index, "string")?;
        value.as_str().ok_or_else(|| mismatch(index, "string", value))
    }

    pub fn list(&self, index: usize) -> Result<&'a [Value], ResourceError> {
        let value = self.value(index, "list")?;
        value.as_list().ok_or_else(|| mismatch(index, "list", value))
    }

    /// A list of label names.
    pub fn labels(&self, index: usize) -> Result<Vec<&'a str>, ResourceError> {
        self.list(index)?
            .iter()
            .map(|item| {
                item.as_str()
                    .ok_or_else(|| mismatch(index, "list of strings", item))
            })
            .collect()
    }

    pub fn map(&self, index: usize) -> Result<&'a Properties, ResourceError> {
        let value = self.value(index, "map")?;
        value.as_map().ok_or_else(|| mismatch(index, "map", value))
    }

    /// A map that may be absent or null.
    pub fn optional_map(&self, index: usize) -> Result<Option<&'a Properties>, ResourceError> {
        match self.optional(index) {
            Some(value) => value
                .as_map()
                .map(Some)
                .ok_or_else(|| mismatch(index, "map", value)),
            None => Ok(None),
        }
    }

    fn id(&self, index: usize) -> Result<u64, ResourceError> {
        let value = self.value(index, "integer id")?;
        value
            .as_u64()
            .ok_or_else(|| mismatch(index, "non-negative integer id", value))
    }
}

fn mismatch(index: usize, expected: &str, found: &Value) -> ResourceError {
    ResourceError::BadRequest(format!(
        "argument {}: expected {}, found {}",
        index,
        expected,
        found.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphrep_protocol::NodeSnapshot;

    fn message(err: ResourceError) -> String {
        match err {
            ResourceError::BadRequest(msg) => msg,
            other => panic!("expected bad request, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_argument_names_position() {
        let data = vec![Value::from(1)];
        let args = Args::new(&data);
        let msg = message(args.list(1).unwrap_err());
        assert_eq!(msg, "argument 1: missing, expected list");
    }

    #[test]
    fn test_wrong_type_names_position_and_type() {
        let data = vec![Value::from("seven")];
        let args = Args::new(&data);
        let msg = message(args.node_id(0).unwrap_err());
        assert!(msg.starts_with("argument 0: expected non-negative integer id"));
        assert!(msg.ends_with("found string"));
    }

    #[test]
    fn test_negative_id_rejected() {
        let data = vec![Value::from(-1)];
        assert!(Args::new(&data).node_id(0).is_err());
        assert_eq!(Args::new(&data).integer(0).unwrap(), -1);
    }

    #[test]
    fn test_labels() {
        let data = vec![Value::List(vec![Value::from("A"), Value::from("B")])];
        assert_eq!(Args::new(&data).labels(0).unwrap(), vec!["A", "B"]);

        let data = vec![Value::List(vec![Value::from("A"), Value::from(3)])];
        let msg = message(Args::new(&data).labels(0).unwrap_err());
        assert!(msg.contains("list of strings"));
    }

    #[test]
    fn test_ids_accept_snapshots() {
        let data = vec![Value::from(NodeSnapshot::new(5)), Value::from(6)];
        let args = Args::new(&data);
        assert_eq!(args.node_id(0).unwrap(), NodeId(5));
        assert_eq!(args.node_id(1).unwrap(), NodeId(6));
        // a node is not a relationship
        assert!(args.rel_id(0).is_err());
    }

    #[test]
    fn test_optional_map() {
        let data = vec![Value::from("q"), Value::Null];
        let args = Args::new(&data);
        assert!(args.optional_map(1).unwrap().is_none());
        assert!(args.optional_map(2).unwrap().is_none());

        let data = vec![Value::from("q"), Value::from(1)];
        assert!(Args::new(&data).optional_map(1).is_err());
    }
}
