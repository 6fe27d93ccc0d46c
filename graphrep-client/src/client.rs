//! High-level client API.

use crate::connection::{BatchReply, Connection, ConnectionConfig, Reply};
use crate::error::ClientError;
use graphrep_protocol::value::Properties;
use graphrep_protocol::{Method, NodeSnapshot, RelSnapshot, Request, Status, Value};
use std::sync::Arc;

/// Result of a query: column names plus rows in column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the values of one column, in row order.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let index = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().filter_map(|row| row.get(index)).collect())
    }
}

/// High-level client for graphrep.
pub struct Client {
    conn: Arc<Connection>,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            conn: Arc::new(Connection::new(config)),
        }
    }

    /// Connects to the server.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.conn.connect().await
    }

    /// Returns whether the client is connected.
    pub async fn is_connected(&self) -> bool {
        self.conn.is_connected().await
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.conn.close().await
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> Arc<Connection> {
        self.conn.clone()
    }

    // =========================================================================
    // Helper methods
    // =========================================================================

    /// Sends a raw request. 4xx/5xx terminal frames become errors.
    pub async fn request(&self, request: &Request) -> Result<Reply, ClientError> {
        self.conn.request(request).await?.into_result()
    }

    /// Runs requests in one server-side transaction. A rolled-back batch
    /// becomes an error carrying the failing request's status.
    pub async fn batch(&self, requests: &[Request]) -> Result<BatchReply, ClientError> {
        self.conn.batch(requests).await?.into_result()
    }

    async fn single_node(&self, request: Request) -> Result<NodeSnapshot, ClientError> {
        let reply = self.request(&request).await?;
        match reply.body.into_iter().next() {
            Some(Value::Node(node)) => Ok(node),
            other => Err(unexpected("node", other)),
        }
    }

    async fn single_rel(&self, request: Request) -> Result<RelSnapshot, ClientError> {
        let reply = self.request(&request).await?;
        match reply.body.into_iter().next() {
            Some(Value::Rel(rel)) => Ok(rel),
            other => Err(unexpected("relationship", other)),
        }
    }

    // =========================================================================
    // Node operations
    // =========================================================================

    pub async fn get_node(&self, id: u64) -> Result<NodeSnapshot, ClientError> {
        self.single_node(Request::new(Method::Get, "node").with_arg(id_value(id)))
            .await
    }

    /// Creates a node with the given labels and properties.
    pub async fn create_node(
        &self,
        labels: &[&str],
        properties: Properties,
    ) -> Result<NodeSnapshot, ClientError> {
        self.single_node(
            Request::new(Method::Post, "node")
                .with_arg(labels_value(labels))
                .with_arg(properties),
        )
        .await
    }

    /// Replaces every label and property of an existing node.
    pub async fn replace_node(
        &self,
        id: u64,
        labels: &[&str],
        properties: Properties,
    ) -> Result<NodeSnapshot, ClientError> {
        self.single_node(
            Request::new(Method::Put, "node")
                .with_arg(id_value(id))
                .with_arg(labels_value(labels))
                .with_arg(properties),
        )
        .await
    }

    /// Adds labels and merges properties into an existing node. A `Null`
    /// property value removes the key.
    pub async fn update_node(
        &self,
        id: u64,
        labels: &[&str],
        properties: Properties,
    ) -> Result<NodeSnapshot, ClientError> {
        self.single_node(
            Request::new(Method::Patch, "node")
                .with_arg(id_value(id))
                .with_arg(labels_value(labels))
                .with_arg(properties),
        )
        .await
    }

    pub async fn delete_node(&self, id: u64) -> Result<(), ClientError> {
        self.request(&Request::new(Method::Delete, "node").with_arg(id_value(id)))
            .await?;
        Ok(())
    }

    // =========================================================================
    // Relationship operations
    // =========================================================================

    pub async fn get_relationship(&self, id: u64) -> Result<RelSnapshot, ClientError> {
        self.single_rel(Request::new(Method::Get, "rel").with_arg(id_value(id)))
            .await
    }

    pub async fn create_relationship(
        &self,
        start: u64,
        end: u64,
        rel_type: &str,
        properties: Properties,
    ) -> Result<RelSnapshot, ClientError> {
        self.single_rel(
            Request::new(Method::Post, "rel")
                .with_arg(id_value(start))
                .with_arg(id_value(end))
                .with_arg(rel_type)
                .with_arg(properties),
        )
        .await
    }

    pub async fn replace_relationship(
        &self,
        id: u64,
        properties: Properties,
    ) -> Result<RelSnapshot, ClientError> {
        self.single_rel(
            Request::new(Method::Put, "rel")
                .with_arg(id_value(id))
                .with_arg(properties),
        )
        .await
    }

    pub async fn update_relationship(
        &self,
        id: u64,
        properties: Properties,
    ) -> Result<RelSnapshot, ClientError> {
        self.single_rel(
            Request::new(Method::Patch, "rel")
                .with_arg(id_value(id))
                .with_arg(properties),
        )
        .await
    }

    pub async fn delete_relationship(&self, id: u64) -> Result<(), ClientError> {
        self.request(&Request::new(Method::Delete, "rel").with_arg(id_value(id)))
            .await?;
        Ok(())
    }

    // =========================================================================
    // Queries and node sets
    // =========================================================================

    /// Executes a query. The first Continue frame carries the column names,
    /// each following one a row.
    pub async fn execute(&self, query: &str, params: Properties) -> Result<Table, ClientError> {
        let mut request = Request::new(Method::Post, "cypher").with_arg(query);
        if !params.is_empty() {
            request = request.with_arg(params);
        }
        let reply = self.request(&request).await?;

        let mut frames = reply.continues.into_iter();
        let columns = match frames.next() {
            Some(header) => header
                .data
                .into_iter()
                .map(|value| match value {
                    Value::String(name) => Ok(name),
                    other => Err(unexpected("column name", Some(other))),
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => return Err(unexpected("column header", None)),
        };
        let rows = frames.map(|frame| frame.data).collect();
        Ok(Table { columns, rows })
    }

    /// Lists nodes carrying a label, optionally filtered by one property.
    pub async fn nodeset(
        &self,
        label: &str,
        property: Option<(&str, Value)>,
    ) -> Result<Vec<NodeSnapshot>, ClientError> {
        let mut request = Request::new(Method::Get, "nodeset").with_arg(label);
        if let Some((key, value)) = property {
            request = request.with_arg(key).with_arg(value);
        }
        let reply = self.request(&request).await?;
        collect_nodes(reply.continues.into_iter().map(|frame| frame.data))
    }

    /// Get-or-create by label and property. Returns whether a node was
    /// created together with the matching nodes.
    pub async fn merge_nodes(
        &self,
        label: &str,
        key: &str,
        value: Value,
    ) -> Result<(bool, Vec<NodeSnapshot>), ClientError> {
        let request = Request::new(Method::Patch, "nodeset")
            .with_arg(label)
            .with_arg(key)
            .with_arg(value);
        let reply = self.request(&request).await?;
        let created = reply.status == Status::Created;
        let nodes = collect_nodes(reply.continues.into_iter().map(|frame| frame.data))?;
        Ok((created, nodes))
    }
}

fn id_value(id: u64) -> Value {
    Value::Int(id as i64)
}

fn labels_value(labels: &[&str]) -> Value {
    Value::List(labels.iter().map(|label| Value::from(*label)).collect())
}

fn collect_nodes(
    frames: impl Iterator<Item = Vec<Value>>,
) -> Result<Vec<NodeSnapshot>, ClientError> {
    frames
        .map(|data| match data.into_iter().next() {
            Some(Value::Node(node)) => Ok(node),
            other => Err(unexpected("node", other)),
        })
        .collect()
}

fn unexpected(expected: &str, found: Option<Value>) -> ClientError {
    let found = match found {
        Some(value) => value.type_name(),
        None => "nothing",
    };
    ClientError::UnexpectedResponse(format!("expected {}, found {}", expected, found))
}
