use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    Result,
    model::{NodeId, Properties},
    pipeline::source::value_to_string,
    runtime::{CurrentNode, ExecutionContext, GraphState, StepOutcome},
    utils,
};

const TAGS_KEY: &str = "_tags";
const META_PREFIX: &str = "_meta_";
const CREATED_AT_KEY: &str = "_createdAt";
const MODIFIED_AT_KEY: &str = "_modifiedAt";
const VALIDATED_KEY: &str = "_validated";
const VALIDATION_ERRORS_KEY: &str = "_validationErrors";

/// Accepts an object or a JSON string holding one; anything else is ignored.
fn lenient_object<'de, D>(deserializer: D) -> std::result::Result<Properties, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Object(map) => map,
        Value::String(text) if text.trim().is_empty() => Properties::new(),
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => map,
            _ => {
                warn!("ignoring metadata that is not a JSON object");
                Properties::new()
            }
        },
        _ => Properties::new(),
    })
}

fn matches_all(
    state: &GraphState,
    node: NodeId,
    filter: &Properties,
) -> bool {
    filter.iter().all(|(k, v)| state.graph.property(node, k) == Some(v))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNodeConfig {
    #[serde(default)]
    pub properties: Properties,
    /// Extra labels to add.
    #[serde(default)]
    pub labels: Vec<String>,
}

pub fn update_node(
    cfg: &UpdateNodeConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::default();
    let node = ctx.ensure_node(state, &mut outcome);
    if let Some(n) = state.graph.node_mut(node) {
        n.properties.extend(cfg.properties.clone());
        for label in &cfg.labels {
            if !n.labels.contains(label) {
                n.labels.push(label.clone());
            }
        }
    }
    Ok(outcome)
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeleteNodeConfig {
    /// Delete only when every listed property matches.
    #[serde(default, rename = "where")]
    pub matching: Properties,
}

pub fn delete_node(
    cfg: &DeleteNodeConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    let Some(node) = ctx.current.filter(|n| state.graph.contains_node(*n)) else {
        return Ok(StepOutcome::default());
    };
    if !matches_all(state, node, &cfg.matching) {
        return Ok(StepOutcome::default());
    }
    state.remove_node(node);
    Ok(StepOutcome {
        current: CurrentNode::Cleared,
        node_handled: true,
        ..Default::default()
    })
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CloneNodeConfig {
    /// Overrides applied to the copy.
    #[serde(default)]
    pub properties: Properties,
    /// Labels for the copy; the original's when absent.
    #[serde(default)]
    pub labels: Option<Vec<String>>,
    /// Link the original to the copy with this type.
    #[serde(default)]
    pub relationship: Option<String>,
}

pub fn clone_node(
    cfg: &CloneNodeConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::default();
    let node = ctx.ensure_node(state, &mut outcome);
    let Some(original) = state.graph.node(node).cloned() else {
        return Ok(outcome);
    };
    let labels = cfg.labels.clone().filter(|l| !l.is_empty()).unwrap_or(original.labels);
    let mut properties = original.properties;
    properties.extend(cfg.properties.clone());
    let copy = state.graph.create_node(labels, properties);
    if let Some(label) = &cfg.relationship {
        state.graph.create_relationship(label, node, copy, Properties::new());
    }
    Ok(outcome)
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum MergeStrategy {
    /// Conflicting values are kept side by side in an array.
    #[default]
    Union,
    PreferSource,
    PreferTarget,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MergeNodesConfig {
    /// Property identifying duplicates among nodes with the same label.
    pub match_property: String,
    #[serde(default)]
    pub strategy: MergeStrategy,
}

/// Merge the current node into an earlier node with the same label and key.
///
/// Relationships of the absorbed node are moved onto the surviving one.
pub fn merge_nodes(
    cfg: &MergeNodesConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::default();
    let source = ctx.ensure_node(state, &mut outcome);
    let Some(node) = state.graph.node(source).cloned() else {
        return Ok(outcome);
    };
    let Some(key) = node.properties.get(&cfg.match_property).cloned() else {
        return Ok(outcome);
    };
    let target = state
        .graph
        .find_nodes(&cfg.match_property, &key)
        .into_iter()
        .find(|n| *n != source && state.graph.node(*n).is_some_and(|t| t.primary_label() == node.primary_label()));
    let Some(target) = target else {
        return Ok(outcome);
    };

    debug!(source, target, "merging nodes");
    if let Some(t) = state.graph.node_mut(target) {
        merge_properties(&mut t.properties, &node.properties, cfg.strategy);
        for label in &node.labels {
            if !t.labels.contains(label) {
                t.labels.push(label.clone());
            }
        }
    }

    for id in state.graph.relationships_of(source) {
        let mut self_loop = false;
        if let Some(rel) = state.graph.relationship_mut(id) {
            if rel.start == source {
                rel.start = target;
            }
            if rel.end == source {
                rel.end = target;
            }
            self_loop = rel.start == rel.end;
        }
        if self_loop {
            state.graph.remove_relationship(id);
        }
    }
    state.rebind(source, target);
    state.remove_node(source);
    outcome.current = CurrentNode::Set(target);
    outcome.node_handled = true;
    Ok(outcome)
}

fn merge_properties(
    target: &mut Properties,
    source: &Properties,
    strategy: MergeStrategy,
) {
    for (key, value) in source {
        match (target.get(key), strategy) {
            (None, _) | (Some(_), MergeStrategy::PreferSource) => {
                target.insert(key.clone(), value.clone());
            }
            (Some(_), MergeStrategy::PreferTarget) => {}
            (Some(existing), MergeStrategy::Union) => {
                if existing == value {
                    continue;
                }
                let mut items = as_items(existing);
                for item in as_items(value) {
                    if !items.contains(&item) {
                        items.push(item);
                    }
                }
                target.insert(key.clone(), Value::Array(items));
            }
        }
    }
}

fn as_items(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        v => vec![v.clone()],
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ValidateNodeConfig {
    #[serde(default, alias = "requiredProperties")]
    pub required: Vec<String>,
}

/// Record missing required properties on the node; never aborts.
pub fn validate_node(
    cfg: &ValidateNodeConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::default();
    let node = ctx.ensure_node(state, &mut outcome);
    let errors: Vec<Value> = cfg
        .required
        .iter()
        .filter(|key| state.graph.property(node, key).is_none_or(|v| value_to_string(v).is_empty()))
        .map(|key| Value::String(format!("missing required property '{}'", key)))
        .collect();
    state.graph.set_property(node, VALIDATED_KEY, Value::Bool(errors.is_empty()));
    state.graph.set_property(node, VALIDATION_ERRORS_KEY, Value::Array(errors));
    Ok(outcome)
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TagNodeConfig {
    pub tags: Vec<String>,
}

pub fn tag_node(
    cfg: &TagNodeConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::default();
    let node = ctx.ensure_node(state, &mut outcome);
    let mut tags = state.graph.property(node, TAGS_KEY).map(as_items).unwrap_or_default();
    for tag in &cfg.tags {
        let tag = Value::String(tag.clone());
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    state.graph.set_property(node, TAGS_KEY, Value::Array(tags));
    Ok(outcome)
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AddMetadataConfig {
    #[serde(default, deserialize_with = "lenient_object")]
    pub metadata: Properties,
}

pub fn add_metadata(
    cfg: &AddMetadataConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::default();
    if cfg.metadata.is_empty() {
        return Ok(outcome);
    }
    let node = ctx.ensure_node(state, &mut outcome);
    for (key, value) in &cfg.metadata {
        state.graph.set_property(node, &format!("{}{}", META_PREFIX, key), value.clone());
    }
    Ok(outcome)
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TimestampMode {
    Created,
    Modified,
    #[default]
    Both,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SetTimestampConfig {
    #[serde(default)]
    pub mode: TimestampMode,
    /// Also write the timestamp to this property.
    #[serde(default)]
    pub property: Option<String>,
}

pub fn set_timestamp(
    cfg: &SetTimestampConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::default();
    let node = ctx.ensure_node(state, &mut outcome);
    let now = Value::String(utils::time::now_rfc3339());
    if matches!(cfg.mode, TimestampMode::Created | TimestampMode::Both) && state.graph.property(node, CREATED_AT_KEY).is_none() {
        state.graph.set_property(node, CREATED_AT_KEY, now.clone());
    }
    if matches!(cfg.mode, TimestampMode::Modified | TimestampMode::Both) {
        state.graph.set_property(node, MODIFIED_AT_KEY, now.clone());
    }
    if let Some(property) = &cfg.property {
        state.graph.set_property(node, property, now);
    }
    Ok(outcome)
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LabelConfig {
    pub label: String,
}

pub fn add_label(
    cfg: &LabelConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::default();
    let node = ctx.ensure_node(state, &mut outcome);
    if let Some(n) = state.graph.node_mut(node) {
        if !n.labels.contains(&cfg.label) {
            n.labels.push(cfg.label.clone());
        }
    }
    Ok(outcome)
}

/// Remove a label; a node always keeps at least one.
pub fn remove_label(
    cfg: &LabelConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    if let Some(n) = ctx.current.and_then(|node| state.graph.node_mut(node)) {
        if n.labels.len() > 1 {
            n.labels.retain(|l| *l != cfg.label);
        }
    }
    Ok(StepOutcome::default())
}
