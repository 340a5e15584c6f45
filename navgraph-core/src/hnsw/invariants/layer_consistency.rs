use super::{EvaluationMode, GraphContext, HnswInvariantViolation, helpers::LayerValidator, helpers::for_each_edge};

pub(super) fn check_layer_consistency(
    ctx: GraphContext<'_>,
    mode: &mut EvaluationMode<'_>,
) -> Result<(), HnswInvariantViolation> {
    let validator = LayerValidator::new(ctx);
    for_each_edge(ctx, |source, target, level| match validator.ensure(source, target, level) {
        Ok(()) => Ok(()),
        Err(err) => mode.record(err),
    })
}
