use super::{GraphContext, HnswInvariantViolation, LayerConsistencyDetail};

/// Visits every stored edge as `(source, target, level)`.
pub(super) fn for_each_edge(
    ctx: GraphContext<'_>,
    mut visitor: impl FnMut(u32, u32, usize) -> Result<(), HnswInvariantViolation>,
) -> Result<(), HnswInvariantViolation> {
    let mut links = Vec::new();
    for source in ctx.node_ids() {
        for level in 0..=ctx.store.level(source) {
            let Some(list) = ctx.store.links(source, level) else {
                continue;
            };
            list.snapshot_into(&mut links);
            for &target in &links {
                visitor(source, target, level)?;
            }
        }
    }
    Ok(())
}

#[derive(Clone, Copy, Debug)]
pub(super) struct LayerValidator<'a> {
    ctx: GraphContext<'a>,
}

impl<'a> LayerValidator<'a> {
    pub(super) fn new(ctx: GraphContext<'a>) -> Self {
        Self { ctx }
    }

    /// Confirms `target` is stored and owns a record at `layer`.
    pub(super) fn ensure(&self, origin: u32, target: u32, layer: usize) -> Result<(), HnswInvariantViolation> {
        if target as usize >= self.ctx.count {
            return Err(HnswInvariantViolation::LayerConsistency {
                origin,
                target,
                layer,
                detail: LayerConsistencyDetail::MissingNode,
            });
        }
        let level = self.ctx.store.level(target);
        if level < layer {
            return Err(HnswInvariantViolation::LayerConsistency {
                origin,
                target,
                layer,
                detail: LayerConsistencyDetail::MissingLayer { available: level + 1 },
            });
        }
        Ok(())
    }
}
