use serde::{Deserialize, Serialize};

use crate::{
    Result,
    pipeline::condition::ConditionSet,
    runtime::{ExecutionContext, GraphState, SkipFlags, StepOutcome},
};

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct SkipConfig {
    /// Skip only when these hold; always when empty.
    #[serde(flatten)]
    pub conditions: ConditionSet,
    #[serde(default)]
    pub skip_main_node: bool,
    #[serde(default)]
    pub skip_children: bool,
    #[serde(default)]
    pub skip_children_tags: Vec<String>,
}

/// Raise skip flags for the element. With no specific flag set the whole
/// element is skipped.
pub fn skip(
    cfg: &SkipConfig,
    ctx: &ExecutionContext,
    _state: &mut GraphState,
) -> Result<StepOutcome> {
    if !cfg.conditions.evaluate(ctx.doc, ctx.element) {
        return Ok(StepOutcome::default());
    }
    let partial = cfg.skip_main_node || cfg.skip_children || !cfg.skip_children_tags.is_empty();
    Ok(StepOutcome {
        flags: SkipFlags {
            skipped: !partial,
            skip_main_node: cfg.skip_main_node,
            skip_children: cfg.skip_children,
            skip_children_tags: cfg.skip_children_tags.clone(),
        },
        ..Default::default()
    })
}
