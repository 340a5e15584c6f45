use super::{EvaluationMode, GraphContext, HnswInvariantViolation};

/// The entry point must exist once the graph is populated, sit at the
/// maximum level, and no node may sit above it.
pub(super) fn check_entry_point(
    ctx: GraphContext<'_>,
    mode: &mut EvaluationMode<'_>,
) -> Result<(), HnswInvariantViolation> {
    if ctx.count == 0 {
        if ctx.entry.is_some() {
            mode.record(HnswInvariantViolation::EntryPointMismatch {
                reason: "an empty graph declares an entry point".to_owned(),
            })?;
        }
        return Ok(());
    }
    let (Some(entry), Some(max_level)) = (ctx.entry, ctx.max_level) else {
        return mode.record(HnswInvariantViolation::MissingEntryPoint);
    };
    if entry as usize >= ctx.count {
        return mode.record(HnswInvariantViolation::EntryPointMismatch {
            reason: format!("entry point {entry} is not a stored node"),
        });
    }
    let entry_level = ctx.store.level(entry);
    if entry_level != max_level {
        mode.record(HnswInvariantViolation::EntryPointMismatch {
            reason: format!("entry point {entry} has level {entry_level}, max level is {max_level}"),
        })?;
    }
    for node in ctx.node_ids() {
        let level = ctx.store.level(node);
        if level > max_level {
            mode.record(HnswInvariantViolation::EntryPointMismatch {
                reason: format!("node {node} at level {level} sits above max level {max_level}"),
            })?;
        }
    }
    Ok(())
}
