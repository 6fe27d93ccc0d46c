//! `nodeset` resource: nodes selected by label and optional property.

use super::node::{add_labels, set_properties};
use super::{Args, Outcome, RequestContext, Resource};
use crate::error::ResourceError;
use graphrep_protocol::value::Properties;
use graphrep_protocol::{NodeSnapshot, Status, Value};
use graphrep_store::EntityRef;

pub static NODESET: Resource = Resource {
    name: "nodeset",
    handlers: &[("GET", get), ("PUT", merge), ("PATCH", merge)],
};

/// GET nodeset {label} [{key} {value}]
///
/// Streams one Continue frame per matching node.
fn get(ctx: &mut RequestContext<'_>, args: &Args<'_>) -> Result<Outcome, ResourceError> {
    let name = args.string(0)?;
    let property = match args.optional(1) {
        Some(_) => Some((args.string(1)?, args.value(2, "property value")?)),
        None => None,
    };
    let label = ctx.label(name);

    let mut first = None;
    let mut count = 0usize;
    for node in ctx.tx.find_nodes(&label, property)? {
        let node = Value::from(node?);
        if first.is_none() {
            first = Some(node.clone());
        }
        ctx.stream.send_continue(vec![node])?;
        count += 1;
    }

    tracing::debug!(label = name, nodes = count, "node set streamed");
    Ok(Outcome::new(Status::Ok).touching(first))
}

/// PUT|PATCH nodeset {label} {key} {value}
///
/// Get-or-create: streams the existing matches, or creates a single node
/// carrying the label and property and answers 201. The key stays
/// write-locked until the transaction ends, so concurrent merges of one key
/// create at most one node.
fn merge(ctx: &mut RequestContext<'_>, args: &Args<'_>) -> Result<Outcome, ResourceError> {
    let name = args.string(0)?;
    let key = args.string(1)?;
    let value = args.value(2, "property value")?;
    if value.is_null() {
        return Err(ResourceError::BadRequest(
            "argument 2: expected property value, found null".to_string(),
        ));
    }
    let label = ctx.label(name);
    ctx.tx.hold_write_lock(EntityRef::index_key(&label, key, value))?;

    let existing = ctx
        .tx
        .find_nodes(&label, Some((key, value)))?
        .collect::<Result<Vec<NodeSnapshot>, _>>()?;

    let (status, nodes) = if existing.is_empty() {
        let id = ctx.tx.create_node()?;
        let locks = ctx.lock(EntityRef::Node(id))?;
        add_labels(ctx, id, &[name])?;
        let mut properties = Properties::new();
        properties.insert(key.to_string(), value.clone());
        set_properties(ctx, EntityRef::Node(id), &properties)?;
        locks.release();
        (Status::Created, vec![ctx.tx.node(id)?])
    } else {
        (Status::Ok, existing)
    };

    let first = nodes.first().cloned().map(Value::from);
    for node in nodes {
        ctx.stream.send_continue(vec![Value::from(node)])?;
    }
    Ok(Outcome::new(status).touching(first))
}

#[cfg(test)]
mod tests {
    use super::super::testing::{request, run};
    use super::*;
    use graphrep_protocol::Method;
    use graphrep_store::{GraphStore, MemoryGraph, Transaction};

    fn merge_request(label: &str, key: &str, value: Value) -> graphrep_protocol::Request {
        request(
            Method::Patch,
            "nodeset",
            vec![Value::from(label), Value::from(key), value],
        )
    }

    #[test]
    fn test_merge_creates_once() {
        let graph = MemoryGraph::new();

        let captured = run(&graph, &merge_request("Person", "name", Value::from("Alice")));
        let outcome = captured.result.unwrap();
        assert_eq!(outcome.status, Status::Created);
        assert_eq!(captured.continues.len(), 1);
        assert!(outcome.entity.is_some());

        let captured = run(&graph, &merge_request("Person", "name", Value::from("Alice")));
        assert_eq!(captured.result.unwrap().status, Status::Ok);
        assert_eq!(captured.continues.len(), 1);
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn test_merge_key_locked_until_commit() {
        let graph = MemoryGraph::new();
        let label = graph.intern_label("Person");
        let key = EntityRef::index_key(&label, "name", &Value::from("Alice"));

        let mut tx = graph.begin();
        tx.hold_write_lock(key).unwrap();
        assert!(graph.locks().writer_of(key).is_some());
        drop(tx);

        run(&graph, &merge_request("Person", "name", Value::from("Alice")))
            .result
            .unwrap();
        assert_eq!(graph.locks().writer_of(key), None);
    }

    #[test]
    fn test_get_filters_by_property() {
        let graph = MemoryGraph::new();
        for name in ["Alice", "Bob"] {
            run(&graph, &merge_request("Person", "name", Value::from(name)))
                .result
                .unwrap();
        }
        run(&graph, &merge_request("City", "name", Value::from("Alice")))
            .result
            .unwrap();

        let all = run(
            &graph,
            &request(Method::Get, "nodeset", vec![Value::from("Person")]),
        );
        assert_eq!(all.result.unwrap().status, Status::Ok);
        assert_eq!(all.continues.len(), 2);

        let bob = run(
            &graph,
            &request(
                Method::Get,
                "nodeset",
                vec![Value::from("Person"), Value::from("name"), Value::from("Bob")],
            ),
        );
        assert_eq!(bob.continues.len(), 1);
        let node = bob.continues[0].data[0].as_node().unwrap();
        assert_eq!(node.properties.get("name"), Some(&Value::from("Bob")));
    }

    #[test]
    fn test_get_unknown_label_is_empty() {
        let graph = MemoryGraph::new();
        let captured = run(
            &graph,
            &request(Method::Get, "nodeset", vec![Value::from("Ghost")]),
        );
        let outcome = captured.result.unwrap();
        assert_eq!(outcome.status, Status::Ok);
        assert!(captured.continues.is_empty());
        assert_eq!(outcome.entity, None);
    }

    #[test]
    fn test_key_without_value() {
        let graph = MemoryGraph::new();
        let captured = run(
            &graph,
            &request(
                Method::Get,
                "nodeset",
                vec![Value::from("Person"), Value::from("name")],
            ),
        );
        assert_eq!(captured.result.unwrap_err().status(), Status::BadRequest);
    }

    #[test]
    fn test_delete_not_allowed() {
        let graph = MemoryGraph::new();
        let captured = run(
            &graph,
            &request(Method::Delete, "nodeset", vec![Value::from("Person")]),
        );
        assert_eq!(captured.result.unwrap_err().status(), Status::MethodNotAllowed);
    }
}
