//! Reachability of every stored node from the entry point.
//!
//! Breadth-first traversal over all layers. Soft-deleted nodes count as
//! reachable and are traversed like any other node.

use std::collections::VecDeque;

use super::{EvaluationMode, GraphContext, HnswInvariantViolation, helpers::LayerValidator};

/// Records [`HnswInvariantViolation::UnreachableNode`] for every stored node
/// the traversal from the entry point never reaches.
///
/// A missing entry point on a populated graph is reported as
/// [`HnswInvariantViolation::MissingEntryPoint`]; broken edges met on the
/// way are recorded as layer-consistency violations and not followed.
pub(super) fn check_reachability(
    ctx: GraphContext<'_>,
    mode: &mut EvaluationMode<'_>,
) -> Result<(), HnswInvariantViolation> {
    if ctx.count == 0 {
        return Ok(());
    }
    let Some(entry) = ctx.entry.filter(|entry| (*entry as usize) < ctx.count) else {
        return mode.record(HnswInvariantViolation::MissingEntryPoint);
    };

    let validator = LayerValidator::new(ctx);
    let mut bfs = BfsContext::new(ctx.count);
    bfs.visit(entry);
    let mut links = Vec::new();
    while let Some(node) = bfs.queue.pop_front() {
        for level in 0..=ctx.store.level(node) {
            let Some(list) = ctx.store.links(node, level) else {
                continue;
            };
            list.snapshot_into(&mut links);
            for &target in &links {
                match validator.ensure(node, target, level) {
                    Ok(()) if bfs.visited[target as usize] => {}
                    Ok(()) => bfs.visit(target),
                    Err(err) => mode.record(err)?,
                }
            }
        }
    }

    for node in ctx.node_ids() {
        if !bfs.visited[node as usize] {
            mode.record(HnswInvariantViolation::UnreachableNode { node })?;
        }
    }
    Ok(())
}

struct BfsContext {
    visited: Vec<bool>,
    queue: VecDeque<u32>,
}

impl BfsContext {
    fn new(count: usize) -> Self {
        Self {
            visited: vec![false; count],
            queue: VecDeque::new(),
        }
    }

    fn visit(&mut self, node: u32) {
        self.visited[node as usize] = true;
        self.queue.push_back(node);
    }
}
