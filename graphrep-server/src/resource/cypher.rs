//! `cypher` resource: declarative queries with streamed results.

use super::{Args, Outcome, RequestContext, Resource};
use crate::error::ResourceError;
use graphrep_protocol::{Status, Value};
use graphrep_store::Params;

pub static CYPHER: Resource = Resource {
    name: "cypher",
    handlers: &[("POST", post)],
};

/// POST cypher {query} [{params}]
///
/// Sends one Continue frame with the column names, then one per row. Rows
/// are pulled from the store cursor one at a time as frames are sent.
fn post(ctx: &mut RequestContext<'_>, args: &Args<'_>) -> Result<Outcome, ResourceError> {
    let query = args.string(0)?;
    let params: Params = args.optional_map(1)?.cloned().unwrap_or_default();

    let result = ctx
        .tx
        .execute(query, &params)
        .map_err(ResourceError::from_query)?;
    ctx.stream.send_continue(
        result
            .columns
            .iter()
            .map(|column| Value::from(column.as_str()))
            .collect(),
    )?;

    let mut first_entity = None;
    let mut count = 0usize;
    for row in result.rows {
        let row = row.map_err(ResourceError::from_query)?;
        if count == 0 {
            first_entity = row.first().filter(|value| value.is_entity()).cloned();
        }
        ctx.stream.send_continue(row)?;
        count += 1;
    }

    tracing::debug!(rows = count, "query streamed");
    Ok(Outcome::new(Status::Ok).touching(first_entity))
}
