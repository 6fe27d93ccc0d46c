//! `rel` resource.

use super::node::set_properties;
use super::{Args, Outcome, RequestContext, Resource};
use crate::error::ResourceError;
use graphrep_store::EntityRef;

pub static REL: Resource = Resource {
    name: "rel",
    handlers: &[
        ("GET", get),
        ("PUT", put),
        ("PATCH", patch),
        ("POST", post),
        ("DELETE", delete),
    ],
};

/// GET rel {id}
fn get(ctx: &mut RequestContext<'_>, args: &Args<'_>) -> Result<Outcome, ResourceError> {
    let id = args.rel_id(0)?;
    Ok(Outcome::ok(ctx.tx.relationship(id)?))
}

/// PUT rel {id} {properties}
fn put(ctx: &mut RequestContext<'_>, args: &Args<'_>) -> Result<Outcome, ResourceError> {
    let id = args.rel_id(0)?;
    let properties = args.map(1)?;
    ctx.tx.relationship(id)?;

    let locks = ctx.lock(EntityRef::Rel(id))?;
    let current = ctx.tx.relationship(id)?;
    for key in current.properties.keys() {
        ctx.tx.remove_property(EntityRef::Rel(id), key)?;
    }
    set_properties(ctx, EntityRef::Rel(id), properties)?;
    locks.release();

    Ok(Outcome::ok(ctx.tx.relationship(id)?))
}

/// PATCH rel {id} {properties}
fn patch(ctx: &mut RequestContext<'_>, args: &Args<'_>) -> Result<Outcome, ResourceError> {
    let id = args.rel_id(0)?;
    let properties = args.map(1)?;
    ctx.tx.relationship(id)?;

    let locks = ctx.lock(EntityRef::Rel(id))?;
    set_properties(ctx, EntityRef::Rel(id), properties)?;
    locks.release();

    Ok(Outcome::ok(ctx.tx.relationship(id)?))
}

/// POST rel {start} {end} {type} [{properties}]
///
/// Endpoints may be given as node ids or node snapshots.
fn post(ctx: &mut RequestContext<'_>, args: &Args<'_>) -> Result<Outcome, ResourceError> {
    let start = args.node_id(0)?;
    let end = args.node_id(1)?;
    let rel_type = args.string(2)?;
    let properties = args.optional_map(3)?;

    let id = ctx.tx.create_relationship(start, end, rel_type)?;
    let locks = ctx.lock(EntityRef::Rel(id))?;
    if let Some(properties) = properties {
        set_properties(ctx, EntityRef::Rel(id), properties)?;
    }
    locks.release();

    tracing::debug!(rel = id.0, start = start.0, end = end.0, "created relationship");
    Ok(Outcome::created(ctx.tx.relationship(id)?))
}

/// DELETE rel {id}
fn delete(ctx: &mut RequestContext<'_>, args: &Args<'_>) -> Result<Outcome, ResourceError> {
    let id = args.rel_id(0)?;
    ctx.tx.relationship(id)?;

    let write = ctx.tx.acquire_write_lock(EntityRef::Rel(id))?;
    ctx.tx.delete_relationship(id)?;
    write.release();

    Ok(Outcome::no_content())
}
