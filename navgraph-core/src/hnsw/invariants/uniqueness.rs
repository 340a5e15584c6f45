use std::collections::HashSet;

use super::{EvaluationMode, GraphContext, HnswInvariantViolation};

pub(super) fn check_neighbour_uniqueness(
    ctx: GraphContext<'_>,
    mode: &mut EvaluationMode<'_>,
) -> Result<(), HnswInvariantViolation> {
    let mut links = Vec::new();
    let mut seen = HashSet::new();
    for node in ctx.node_ids() {
        for level in 0..=ctx.store.level(node) {
            let Some(list) = ctx.store.links(node, level) else {
                continue;
            };
            list.snapshot_into(&mut links);
            seen.clear();
            for &neighbour in &links {
                if neighbour == node {
                    mode.record(HnswInvariantViolation::SelfLoop { node, layer: level })?;
                } else if !seen.insert(neighbour) {
                    mode.record(HnswInvariantViolation::DuplicateNeighbour {
                        node,
                        neighbour,
                        layer: level,
                    })?;
                }
            }
        }
    }
    Ok(())
}
