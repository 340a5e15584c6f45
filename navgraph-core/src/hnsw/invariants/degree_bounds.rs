use super::{EvaluationMode, GraphContext, HnswInvariantViolation};

/// Checks declared link counts, not the clamped views used for traversal, so
/// a corrupted header is reported rather than hidden.
pub(super) fn check_degree_bounds(
    ctx: GraphContext<'_>,
    mode: &mut EvaluationMode<'_>,
) -> Result<(), HnswInvariantViolation> {
    for node in ctx.node_ids() {
        for level in 0..=ctx.store.level(node) {
            let Some(links) = ctx.store.links(node, level) else {
                continue;
            };
            let limit = if level == 0 { ctx.max_m0 } else { ctx.max_m };
            let degree = links.header().count();
            if degree > limit {
                mode.record(HnswInvariantViolation::DegreeBounds {
                    node,
                    layer: level,
                    degree,
                    limit,
                })?;
            }
        }
    }
    Ok(())
}
