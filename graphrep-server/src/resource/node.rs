//! `node` resource.

use super::{Args, Outcome, RequestContext, Resource};
use crate::error::ResourceError;
use graphrep_protocol::value::Properties;
use graphrep_store::{EntityRef, NodeId};

pub static NODE: Resource = Resource {
    name: "node",
    handlers: &[
        ("GET", get),
        ("PUT", put),
        ("PATCH", patch),
        ("POST", post),
        ("DELETE", delete),
    ],
};

/// GET node {id}
fn get(ctx: &mut RequestContext<'_>, args: &Args<'_>) -> Result<Outcome, ResourceError> {
    let id = args.node_id(0)?;
    Ok(Outcome::ok(ctx.tx.node(id)?))
}

/// PUT node {id} {labels} {properties}
///
/// Replaces every label and property. Never creates the node.
fn put(ctx: &mut RequestContext<'_>, args: &Args<'_>) -> Result<Outcome, ResourceError> {
    let id = args.node_id(0)?;
    let labels = args.labels(1)?;
    let properties = args.map(2)?;
    ctx.tx.node(id)?;

    let locks = ctx.lock(EntityRef::Node(id))?;
    let current = ctx.tx.node(id)?;
    for name in &current.labels {
        let label = ctx.label(name);
        ctx.tx.remove_label(id, &label)?;
    }
    for key in current.properties.keys() {
        ctx.tx.remove_property(EntityRef::Node(id), key)?;
    }
    add_labels(ctx, id, &labels)?;
    set_properties(ctx, EntityRef::Node(id), properties)?;
    locks.release();

    Ok(Outcome::ok(ctx.tx.node(id)?))
}

/// PATCH node {id} {labels} {properties}
///
/// Adds labels and properties, keeping whatever is already there.
fn patch(ctx: &mut RequestContext<'_>, args: &Args<'_>) -> Result<Outcome, ResourceError> {
    let id = args.node_id(0)?;
    let labels = args.labels(1)?;
    let properties = args.map(2)?;
    ctx.tx.node(id)?;

    let locks = ctx.lock(EntityRef::Node(id))?;
    add_labels(ctx, id, &labels)?;
    set_properties(ctx, EntityRef::Node(id), properties)?;
    locks.release();

    Ok(Outcome::ok(ctx.tx.node(id)?))
}

/// POST node {labels} {properties}
fn post(ctx: &mut RequestContext<'_>, args: &Args<'_>) -> Result<Outcome, ResourceError> {
    let labels = args.labels(0)?;
    let properties = args.map(1)?;

    let id = ctx.tx.create_node()?;
    let locks = ctx.lock(EntityRef::Node(id))?;
    add_labels(ctx, id, &labels)?;
    set_properties(ctx, EntityRef::Node(id), properties)?;
    locks.release();

    tracing::debug!(node = id.0, "created node");
    Ok(Outcome::created(ctx.tx.node(id)?))
}

/// DELETE node {id}
fn delete(ctx: &mut RequestContext<'_>, args: &Args<'_>) -> Result<Outcome, ResourceError> {
    let id = args.node_id(0)?;
    ctx.tx.node(id)?;

    let write = ctx.tx.acquire_write_lock(EntityRef::Node(id))?;
    ctx.tx.delete_node(id)?;
    write.release();

    Ok(Outcome::no_content())
}

pub(crate) fn add_labels(
    ctx: &mut RequestContext<'_>,
    id: NodeId,
    names: &[&str],
) -> Result<(), ResourceError> {
    for name in names {
        let label = ctx.label(name);
        ctx.tx.add_label(id, &label)?;
    }
    Ok(())
}

/// Applies properties one by one; a null value removes the key.
pub(crate) fn set_properties(
    ctx: &mut RequestContext<'_>,
    entity: EntityRef,
    properties: &Properties,
) -> Result<(), ResourceError> {
    for (key, value) in properties {
        ctx.tx.set_property(entity, key, value.clone())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::testing::{request, run};
    use super::*;
    use graphrep_protocol::{Method, NodeSnapshot, Status, Value};
    use graphrep_store::{GraphStore, MemoryGraph, Transaction};
    use std::collections::BTreeMap;

    fn labels(names: &[&str]) -> Value {
        Value::List(names.iter().map(|n| Value::from(*n)).collect())
    }

    fn props(pairs: &[(&str, Value)]) -> Value {
        Value::Map(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    fn node_of(outcome: &Outcome) -> NodeSnapshot {
        outcome.body[0].as_node().cloned().expect("node body")
    }

    fn create(graph: &MemoryGraph, names: &[&str], properties: Value) -> NodeSnapshot {
        let captured = run(
            graph,
            &request(Method::Post, "node", vec![labels(names), properties]),
        );
        node_of(&captured.result.expect("created"))
    }

    #[test]
    fn test_post_returns_created_snapshot() {
        let graph = MemoryGraph::new();
        let captured = run(
            &graph,
            &request(
                Method::Post,
                "node",
                vec![labels(&["Person"]), props(&[("name", Value::from("Alice"))])],
            ),
        );
        let outcome = captured.result.unwrap();
        assert_eq!(outcome.status, Status::Created);

        let node = node_of(&outcome);
        assert_eq!(node.id, 0);
        assert!(node.has_label("Person"));
        assert_eq!(node.properties.get("name"), Some(&Value::from("Alice")));
        assert_eq!(outcome.entity, Some(Value::Node(node)));
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn test_get_missing_node() {
        let graph = MemoryGraph::new();
        let captured = run(&graph, &request(Method::Get, "node", vec![Value::from(42)]));
        match captured.result {
            Err(ResourceError::NotFound(msg)) => assert_eq!(msg, "Node 42 not found"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_put_missing_node_leaves_store_unchanged() {
        let graph = MemoryGraph::new();
        let captured = run(
            &graph,
            &request(
                Method::Put,
                "node",
                vec![Value::from(7), labels(&["X"]), props(&[])],
            ),
        );
        assert_eq!(captured.result.unwrap_err().status(), Status::NotFound);
        assert_eq!(graph.node_count(), 0);
    }

    #[test]
    fn test_put_replaces_patch_merges() {
        let graph = MemoryGraph::new();
        let node = create(
            &graph,
            &["A"],
            props(&[("x", Value::from(1)), ("y", Value::from(2))]),
        );
        let id = Value::from(node.id as i64);

        let captured = run(
            &graph,
            &request(
                Method::Patch,
                "node",
                vec![id.clone(), labels(&["B"]), props(&[("z", Value::from(3))])],
            ),
        );
        let patched = node_of(&captured.result.unwrap());
        assert!(patched.has_label("A") && patched.has_label("B"));
        assert_eq!(patched.properties.len(), 3);

        let captured = run(
            &graph,
            &request(
                Method::Put,
                "node",
                vec![id, labels(&["C"]), props(&[("w", Value::from(4))])],
            ),
        );
        let outcome = captured.result.unwrap();
        assert_eq!(outcome.status, Status::Ok);
        let replaced = node_of(&outcome);
        assert_eq!(replaced.labels.iter().collect::<Vec<_>>(), vec!["C"]);
        assert_eq!(replaced.properties.keys().collect::<Vec<_>>(), vec!["w"]);

        // committed, not just visible inside the request
        let tx = graph.begin();
        assert_eq!(tx.node(NodeId(node.id)).unwrap(), replaced);
    }

    #[test]
    fn test_patch_null_removes_property() {
        let graph = MemoryGraph::new();
        let node = create(&graph, &[], props(&[("x", Value::from(1))]));
        let captured = run(
            &graph,
            &request(
                Method::Patch,
                "node",
                vec![Value::from(node.id as i64), labels(&[]), props(&[("x", Value::Null)])],
            ),
        );
        assert!(node_of(&captured.result.unwrap()).properties.is_empty());
    }

    #[test]
    fn test_delete_then_get() {
        let graph = MemoryGraph::new();
        let node = create(&graph, &["Temp"], props(&[]));
        let id = Value::from(node.id as i64);

        let captured = run(&graph, &request(Method::Delete, "node", vec![id.clone()]));
        let outcome = captured.result.unwrap();
        assert_eq!(outcome.status, Status::NoContent);
        assert!(outcome.body.is_empty());

        let captured = run(&graph, &request(Method::Get, "node", vec![id]));
        assert_eq!(captured.result.unwrap_err().status(), Status::NotFound);
    }

    #[test]
    fn test_delete_node_with_relationship_conflicts() {
        let graph = MemoryGraph::new();
        let a = create(&graph, &[], props(&[]));
        let b = create(&graph, &[], props(&[]));
        {
            let mut tx = graph.begin();
            tx.create_relationship(NodeId(a.id), NodeId(b.id), "KNOWS")
                .unwrap();
            tx.commit().unwrap();
        }

        let captured = run(
            &graph,
            &request(Method::Delete, "node", vec![Value::from(a.id as i64)]),
        );
        assert_eq!(captured.result.unwrap_err().status(), Status::Conflict);
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn test_bad_arguments() {
        let graph = MemoryGraph::new();
        let captured = run(
            &graph,
            &request(Method::Post, "node", vec![Value::from("Person")]),
        );
        match captured.result {
            Err(ResourceError::BadRequest(msg)) => {
                assert_eq!(msg, "argument 0: expected list, found string")
            }
            other => panic!("unexpected {:?}", other),
        }

        let captured = run(
            &graph,
            &request(
                Method::Post,
                "node",
                vec![labels(&[]), props(&[("bad", Value::Map(BTreeMap::new()))])],
            ),
        );
        assert_eq!(captured.result.unwrap_err().status(), Status::BadRequest);
        assert_eq!(graph.node_count(), 0);
    }
}
