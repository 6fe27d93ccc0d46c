//! Typed values carried in requests and responses.
//!
//! Every value travels as a self-describing literal. Scalars, lists and maps
//! are plain JSON; graph entities use a tagged form so a decoded frame can
//! rebuild the full snapshot of the entity:
//!
//! ```text
//! /*Node*/{"id":0,"labels":["Person"],"properties":{"name":"Alice"}}
//! /*Rel*/{"id":3,"start":0,"end":1,"type":"KNOWS","properties":{}}
//! /*Pointer*/2
//! ```
//!
//! A pointer names the entity produced by an earlier request of the same
//! batch, by the request's position in the batch.
//!
//! Floats always render with a fraction or exponent, so `1.0` never comes
//! back as the integer `1`. The entity tag applies to a top-level literal
//! only; an entity nested inside a list or map renders as its plain object.

use crate::error::ProtocolError;
use serde::ser::{self, SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Key-unique property mapping.
pub type Properties = BTreeMap<String, Value>;

const NODE_TAG: &str = "Node";
const REL_TAG: &str = "Rel";
const POINTER_TAG: &str = "Pointer";

/// Full snapshot of a node as seen inside one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: u64,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default)]
    pub properties: Properties,
}

impl NodeSnapshot {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            labels: BTreeSet::new(),
            properties: Properties::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }
}

/// Full snapshot of a relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelSnapshot {
    pub id: u64,
    pub start: u64,
    pub end: u64,
    #[serde(rename = "type")]
    pub rel_type: String,
    #[serde(default)]
    pub properties: Properties,
}

/// A value in a request argument list or a response frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Node(NodeSnapshot),
    Rel(RelSnapshot),
    Pointer(u64),
}

impl Value {
    /// Encodes the value as a wire literal.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        self.ensure_finite()?;
        let literal = match self {
            Value::Node(node) => format!("/*{}*/{}", NODE_TAG, serde_json::to_string(node)?),
            Value::Rel(rel) => format!("/*{}*/{}", REL_TAG, serde_json::to_string(rel)?),
            Value::Pointer(index) => format!("/*{}*/{}", POINTER_TAG, index),
            other => serde_json::to_string(other)?,
        };
        Ok(literal)
    }

    /// Decodes a wire literal.
    pub fn decode(literal: &str) -> Result<Self, ProtocolError> {
        if let Some(rest) = literal.strip_prefix("/*") {
            let (tag, body) = rest
                .split_once("*/")
                .ok_or_else(|| ProtocolError::UnknownTag(rest.to_string()))?;
            return match tag {
                NODE_TAG => Ok(Value::Node(serde_json::from_str(body)?)),
                REL_TAG => Ok(Value::Rel(serde_json::from_str(body)?)),
                POINTER_TAG => Ok(Value::Pointer(serde_json::from_str(body)?)),
                other => Err(ProtocolError::UnknownTag(other.to_string())),
            };
        }
        let json: serde_json::Value = serde_json::from_str(literal)?;
        Ok(Value::from(json))
    }

    fn ensure_finite(&self) -> Result<(), ProtocolError> {
        match self {
            Value::Float(f) if !f.is_finite() => Err(ProtocolError::NonFiniteFloat(*f)),
            Value::List(items) => items.iter().try_for_each(Value::ensure_finite),
            Value::Map(map) => map.values().try_for_each(Value::ensure_finite),
            Value::Node(node) => node.properties.values().try_for_each(Value::ensure_finite),
            Value::Rel(rel) => rel.properties.values().try_for_each(Value::ensure_finite),
            _ => Ok(()),
        }
    }

    /// Short name of the value's kind, used in argument error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Node(_) => "node",
            Value::Rel(_) => "relationship",
            Value::Pointer(_) => "pointer",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true for graph entity values.
    pub fn is_entity(&self) -> bool {
        matches!(self, Value::Node(_) | Value::Rel(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_i64().and_then(|i| u64::try_from(i).ok())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&NodeSnapshot> {
        match self {
            Value::Node(node) => Some(node),
            _ => None,
        }
    }

    pub fn as_rel(&self) -> Option<&RelSnapshot> {
        match self {
            Value::Rel(rel) => Some(rel),
            _ => None,
        }
    }

    pub fn as_pointer(&self) -> Option<u64> {
        match self {
            Value::Pointer(index) => Some(*index),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.encode() {
            Ok(literal) => f.write_str(&literal),
            Err(_) => write!(f, "{:?}", self),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => {
                if !f.is_finite() {
                    return Err(ser::Error::custom(format!("non-finite float {}", f)));
                }
                serializer.serialize_f64(*f)
            }
            Value::String(s) => serializer.serialize_str(s),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
            Value::Node(node) => node.serialize(serializer),
            Value::Rel(rel) => rel.serialize(serializer),
            Value::Pointer(index) => serializer.serialize_u64(*index),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

impl From<NodeSnapshot> for Value {
    fn from(node: NodeSnapshot) -> Self {
        Value::Node(node)
    }
}

impl From<RelSnapshot> for Value {
    fn from(rel: RelSnapshot) -> Self {
        Value::Rel(rel)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}
