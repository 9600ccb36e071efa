//! Collection-shaping tools. Each gathers values from the element or the
//! current node and stores the shaped result on the current node.

use std::{cmp::Ordering, collections::BTreeMap};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    Result, XmlflowError,
    graph::GraphAssembler,
    model::NodeId,
    pipeline::{
        filter::TagPatterns,
        source::{CollectionSource, number_value, value_to_f64, value_to_string},
    },
    runtime::{ExecutionContext, GraphState, StepOutcome},
};

use super::ToolOutput;

fn space() -> String {
    " ".to_string()
}

fn one() -> usize {
    1
}

fn ungrouped() -> String {
    "_ungrouped".to_string()
}

/// Run `shape` against the current node and store its value under `target`.
fn store<F>(
    ctx: &ExecutionContext,
    state: &mut GraphState,
    target: &str,
    shape: F,
) -> Result<ToolOutput>
where
    F: FnOnce(&GraphAssembler, NodeId) -> Result<Value>,
{
    let mut outcome = StepOutcome::default();
    let node = ctx.ensure_node(state, &mut outcome);
    let value = shape(&state.graph, node)?;
    state.graph.set_property(node, target, value.clone());
    Ok(ToolOutput::value(value).with_outcome(outcome))
}

fn dedup(items: Vec<Value>) -> Vec<Value> {
    let mut seen = Vec::with_capacity(items.len());
    for item in items {
        if !seen.contains(&item) {
            seen.push(item);
        }
    }
    seen
}

fn compare(
    a: &Value,
    b: &Value,
    numeric: bool,
) -> Ordering {
    if numeric {
        if let (Some(x), Some(y)) = (value_to_f64(a), value_to_f64(b)) {
            return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
        }
    }
    value_to_string(a).cmp(&value_to_string(b))
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AggregateOp {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Concat,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AggregateConfig {
    #[serde(default)]
    pub source: CollectionSource,
    pub operation: AggregateOp,
    pub target: String,
    #[serde(default = "space")]
    pub separator: String,
}

pub fn aggregate(
    cfg: &AggregateConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<ToolOutput> {
    store(ctx, state, &cfg.target, |graph, node| {
        let items = cfg.source.collect(ctx, graph, Some(node));
        let numbers: Vec<f64> = items.iter().filter_map(value_to_f64).collect();
        Ok(match cfg.operation {
            AggregateOp::Count => Value::from(items.len()),
            AggregateOp::Sum => number_value(numbers.iter().sum()),
            AggregateOp::Avg if numbers.is_empty() => Value::Null,
            AggregateOp::Avg => number_value(numbers.iter().sum::<f64>() / numbers.len() as f64),
            AggregateOp::Min => numbers.iter().copied().reduce(f64::min).map(number_value).unwrap_or(Value::Null),
            AggregateOp::Max => numbers.iter().copied().reduce(f64::max).map(number_value).unwrap_or(Value::Null),
            AggregateOp::Concat => Value::String(items.iter().map(value_to_string).collect::<Vec<_>>().join(&cfg.separator)),
        })
    })
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SortConfig {
    #[serde(default)]
    pub source: CollectionSource,
    pub target: String,
    #[serde(default)]
    pub order: SortOrder,
    /// Compare numerically where both sides parse as numbers.
    #[serde(default)]
    pub numeric: bool,
}

pub fn sort(
    cfg: &SortConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<ToolOutput> {
    store(ctx, state, &cfg.target, |graph, node| {
        let mut items = cfg.source.collect(ctx, graph, Some(node));
        items.sort_by(|a, b| compare(a, b, cfg.numeric));
        if cfg.order == SortOrder::Desc {
            items.reverse();
        }
        Ok(Value::Array(items))
    })
}

/// Shared by `collect`, `count`, and `distinct`.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CollectConfig {
    #[serde(default)]
    pub source: CollectionSource,
    pub target: String,
}

pub fn collect(
    cfg: &CollectConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<ToolOutput> {
    store(ctx, state, &cfg.target, |graph, node| Ok(Value::Array(cfg.source.collect(ctx, graph, Some(node)))))
}

pub fn count(
    cfg: &CollectConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<ToolOutput> {
    store(ctx, state, &cfg.target, |graph, node| Ok(Value::from(cfg.source.collect(ctx, graph, Some(node)).len())))
}

pub fn distinct(
    cfg: &CollectConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<ToolOutput> {
    store(ctx, state, &cfg.target, |graph, node| Ok(Value::Array(dedup(cfg.source.collect(ctx, graph, Some(node))))))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GroupConfig {
    /// Child tag pattern; all children when absent.
    #[serde(default)]
    pub tag: Option<String>,
    /// Attribute whose value is the group key.
    pub key: String,
    /// Attribute taken as the grouped value; the child text when absent.
    #[serde(default)]
    pub value: Option<String>,
    /// Group name for children lacking the key attribute.
    #[serde(default = "ungrouped")]
    pub missing: String,
    pub target: String,
}

/// Group direct children by an attribute into an object of arrays.
pub fn group(
    cfg: &GroupConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<ToolOutput> {
    let patterns = cfg.tag.as_deref().map(|t| TagPatterns::new(&[t])).transpose()?;
    store(ctx, state, &cfg.target, |_, _| {
        let mut groups: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        for &child in ctx.doc.children(ctx.element) {
            if patterns.as_ref().is_some_and(|p| !p.is_match(&ctx.doc.tag_key(child))) {
                continue;
            }
            let key = ctx.doc.attribute(child, &cfg.key).map(str::to_string).unwrap_or_else(|| cfg.missing.clone());
            let value = match &cfg.value {
                Some(attr) => ctx.doc.attribute(child, attr).map(|v| Value::String(v.to_string())).unwrap_or(Value::Null),
                None => Value::String(ctx.doc.text_content(child)),
            };
            groups.entry(key).or_default().push(value);
        }
        Ok(json!(groups))
    })
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SetOperationConfig {
    pub sources: Vec<CollectionSource>,
    pub target: String,
}

fn gather(
    cfg: &SetOperationConfig,
    ctx: &ExecutionContext,
    graph: &GraphAssembler,
    node: NodeId,
) -> Vec<Vec<Value>> {
    cfg.sources.iter().map(|s| s.collect(ctx, graph, Some(node))).collect()
}

pub fn union(
    cfg: &SetOperationConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<ToolOutput> {
    store(ctx, state, &cfg.target, |graph, node| Ok(Value::Array(dedup(gather(cfg, ctx, graph, node).into_iter().flatten().collect()))))
}

/// Items present in every source, in first-source order.
pub fn intersect(
    cfg: &SetOperationConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<ToolOutput> {
    store(ctx, state, &cfg.target, |graph, node| {
        let mut sets = gather(cfg, ctx, graph, node).into_iter();
        let first = dedup(sets.next().unwrap_or_default());
        let rest: Vec<Vec<Value>> = sets.collect();
        Ok(Value::Array(first.into_iter().filter(|v| rest.iter().all(|s| s.contains(v))).collect()))
    })
}

/// Items of the first source absent from all others.
pub fn diff(
    cfg: &SetOperationConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<ToolOutput> {
    store(ctx, state, &cfg.target, |graph, node| {
        let mut sets = gather(cfg, ctx, graph, node).into_iter();
        let first = dedup(sets.next().unwrap_or_default());
        let rest: Vec<Vec<Value>> = sets.collect();
        Ok(Value::Array(first.into_iter().filter(|v| rest.iter().all(|s| !s.contains(v))).collect()))
    })
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WindowConfig {
    #[serde(default)]
    pub source: CollectionSource,
    pub size: usize,
    #[serde(default = "one")]
    pub step: usize,
    pub target: String,
}

/// Sliding windows of `size` items advancing by `step`.
pub fn window(
    cfg: &WindowConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<ToolOutput> {
    if cfg.size == 0 || cfg.step == 0 {
        return Err(XmlflowError::Tool("window size and step must be positive".to_string()));
    }
    store(ctx, state, &cfg.target, |graph, node| {
        let items = cfg.source.collect(ctx, graph, Some(node));
        let windows: Vec<Value> = items.windows(cfg.size).step_by(cfg.step).map(|w| Value::Array(w.to_vec())).collect();
        Ok(Value::Array(windows))
    })
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct JoinConfig {
    #[serde(default)]
    pub source: CollectionSource,
    #[serde(default = "space")]
    pub separator: String,
    pub target: String,
}

pub fn join(
    cfg: &JoinConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<ToolOutput> {
    store(ctx, state, &cfg.target, |graph, node| {
        let items = cfg.source.collect(ctx, graph, Some(node));
        Ok(Value::String(items.iter().map(value_to_string).filter(|s| !s.is_empty()).collect::<Vec<_>>().join(&cfg.separator)))
    })
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PartitionConfig {
    #[serde(default)]
    pub source: CollectionSource,
    pub pattern: String,
    /// Receives the matching items.
    pub target: String,
    /// Receives the rest, when set.
    #[serde(default)]
    pub rest: Option<String>,
}

/// Split items by a regex into matching and non-matching halves.
pub fn partition(
    cfg: &PartitionConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<ToolOutput> {
    let re = Regex::new(&cfg.pattern)?;
    let mut outcome = StepOutcome::default();
    let node = ctx.ensure_node(state, &mut outcome);
    let (matched, rest): (Vec<Value>, Vec<Value>) = cfg.source.collect(ctx, &state.graph, Some(node)).into_iter().partition(|v| re.is_match(&value_to_string(v)));

    state.graph.set_property(node, &cfg.target, Value::Array(matched.clone()));
    if let Some(target) = &cfg.rest {
        state.graph.set_property(node, target, Value::Array(rest.clone()));
    }
    Ok(ToolOutput::value(json!({ "matched": matched, "rest": rest })).with_outcome(outcome))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::pipeline::tools::tests::ToolFixture;

    const LINE: &str = r#"<l n="12"><w n="1" pos="DET">Li</w><w n="2" pos="NOM">rois</w><w n="3" pos="NOM">Artus</w><pc>,</pc></l>"#;

    #[tokio::test]
    async fn test_aggregate_operations() {
        let mut fx = ToolFixture::new(LINE);
        let src = json!({"from": "children", "tag": "w", "attribute": "n"});
        fx.run(0, "aggregate", json!({"source": src, "operation": "sum", "target": "total"})).await;
        fx.run(0, "aggregate", json!({"source": src, "operation": "avg", "target": "mean"})).await;
        fx.run(0, "aggregate", json!({"source": src, "operation": "max", "target": "last"})).await;
        fx.run(0, "aggregate", json!({"source": {"from": "children", "tag": "w"}, "operation": "concat", "target": "line"})).await;
        let props = fx.props(0);
        assert_eq!(props["total"], json!(6));
        assert_eq!(props["mean"], json!(2));
        assert_eq!(props["last"], json!(3));
        assert_eq!(props["line"], json!("Li rois Artus"));
        assert_eq!(fx.state.graph.node_count(), 1);
    }

    #[tokio::test]
    async fn test_sort_count_distinct() {
        let mut fx = ToolFixture::new(LINE);
        fx.run(0, "sort", json!({"source": {"from": "children", "tag": "w"}, "target": "sorted", "order": "desc"})).await;
        fx.run(0, "count", json!({"target": "children"})).await;
        fx.run(0, "distinct", json!({"source": {"from": "children", "tag": "w", "attribute": "pos"}, "target": "pos"})).await;
        let props = fx.props(0);
        assert_eq!(props["sorted"], json!(["rois", "Li", "Artus"]));
        assert_eq!(props["children"], json!(4));
        assert_eq!(props["pos"], json!(["DET", "NOM"]));
    }

    #[tokio::test]
    async fn test_group_by_attribute() {
        let mut fx = ToolFixture::new(LINE);
        let out = fx.run(0, "group", json!({"key": "pos", "target": "byPos"})).await;
        assert_eq!(out.result, json!({"DET": ["Li"], "NOM": ["rois", "Artus"], "_ungrouped": [","]}));
    }

    #[tokio::test]
    async fn test_set_operations() {
        let mut fx = ToolFixture::new(r#"<r a="x y z" b="y z w"/>"#);
        let sources = json!([{"from": "attribute", "name": "a"}, {"from": "attribute", "name": "b"}]);
        fx.run(0, "union", json!({"sources": sources, "target": "u"})).await;
        fx.run(0, "intersect", json!({"sources": sources, "target": "i"})).await;
        fx.run(0, "diff", json!({"sources": sources, "target": "d"})).await;
        let props = fx.props(0);
        assert_eq!(props["u"], json!(["x", "y", "z", "w"]));
        assert_eq!(props["i"], json!(["y", "z"]));
        assert_eq!(props["d"], json!(["x"]));
    }

    #[tokio::test]
    async fn test_window_join_partition() {
        let mut fx = ToolFixture::new("<l>a b c d</l>");
        let text = json!({"from": "text"});
        let out = fx.run(0, "window", json!({"source": text, "size": 2, "step": 2, "target": "pairs"})).await;
        assert_eq!(out.result, json!([["a", "b"], ["c", "d"]]));

        let out = fx.run(0, "join", json!({"source": text, "separator": "-", "target": "joined"})).await;
        assert_eq!(out.result, json!("a-b-c-d"));

        let out = fx.run(0, "partition", json!({"source": text, "pattern": "[ac]", "target": "odd", "rest": "even"})).await;
        assert_eq!(out.result, json!({"matched": ["a", "c"], "rest": ["b", "d"]}));
        assert_eq!(fx.props(0)["even"], json!(["b", "d"]));

        assert!(fx.try_run(0, "window", json!({"size": 0, "target": "w"})).await.is_err());
    }
}
