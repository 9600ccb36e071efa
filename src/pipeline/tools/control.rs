use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    pipeline::{
        condition::ConditionSet,
        source::{ValueSource, value_to_string},
    },
    runtime::{ExecutionContext, GraphState},
};

use super::{PATH_DEFAULT, PATH_FALSE, PATH_TRUE, ToolOutput};

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct IfConfig {
    #[serde(flatten)]
    pub conditions: ConditionSet,
}

/// Branch on a condition set: output path `true` or `false`.
pub fn if_tool(
    cfg: &IfConfig,
    ctx: &ExecutionContext,
) -> ToolOutput {
    let passed = cfg.conditions.evaluate(ctx.doc, ctx.element);
    ToolOutput::path(Value::Bool(passed), if passed { PATH_TRUE } else { PATH_FALSE })
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SwitchCase {
    /// Output path taken when the case matches.
    pub id: String,
    /// Compared against the switch source, as text.
    #[serde(default)]
    pub equals: Option<Value>,
    #[serde(flatten)]
    pub conditions: ConditionSet,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SwitchConfig {
    #[serde(default)]
    pub source: Option<ValueSource>,
    #[serde(default)]
    pub cases: Vec<SwitchCase>,
}

/// First matching case wins; its id is the output path, `default` otherwise.
pub fn switch_tool(
    cfg: &SwitchConfig,
    ctx: &ExecutionContext,
    state: &GraphState,
) -> ToolOutput {
    let value = cfg.source.as_ref().and_then(|s| s.read(ctx, &state.graph, ctx.current)).map(|v| value_to_string(&v));

    let matched = cfg.cases.iter().find(|case| {
        let equals = match (&case.equals, &value) {
            (Some(expected), Some(actual)) => value_to_string(expected) == *actual,
            (Some(_), None) => false,
            (None, _) => true,
        };
        equals && case.conditions.evaluate(ctx.doc, ctx.element)
    });

    match matched {
        Some(case) => ToolOutput::path(json!({ "case": case.id, "value": value }), &case.id),
        None => ToolOutput::path(json!({ "case": PATH_DEFAULT, "value": value }), PATH_DEFAULT),
    }
}
