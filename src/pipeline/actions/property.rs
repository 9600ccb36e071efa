use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    Result,
    model::Properties,
    pipeline::{
        source::{ValueSource, number_value, value_to_f64, value_to_string},
        transform::{Transform, apply_transforms, lenient_transforms},
    },
    runtime::{ExecutionContext, GraphState, StepOutcome},
};

static PROPERTY_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{([A-Za-z_][\w.:-]*)\}").expect("placeholder pattern is valid"));

fn text_property() -> String {
    "text".to_string()
}

fn comma() -> String {
    ",".to_string()
}

fn space() -> String {
    " ".to_string()
}

/// Copies one attribute onto a property, through a transform list.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AttributeMapping {
    pub attribute: String,
    /// Target property; the attribute name when absent.
    #[serde(default)]
    pub property: Option<String>,
    #[serde(default, deserialize_with = "lenient_transforms")]
    pub transforms: Vec<Transform>,
    /// Used when the attribute is missing or transforms to empty.
    #[serde(default)]
    pub default: Option<Value>,
}

impl AttributeMapping {
    pub fn resolve(
        &self,
        ctx: &ExecutionContext,
    ) -> Option<(String, Value)> {
        let key = self.property.clone().unwrap_or_else(|| self.attribute.clone());
        let value = ctx.attribute(&self.attribute).map(|v| apply_transforms(v, &self.transforms)).filter(|v| !v.is_empty());
        match value {
            Some(v) => Some((key, Value::String(v))),
            None => self.default.clone().map(|d| (key, d)),
        }
    }
}

/// Apply every mapping, returning the properties that resolved.
pub fn map_attributes(
    mappings: &[AttributeMapping],
    ctx: &ExecutionContext,
) -> Properties {
    mappings.iter().filter_map(|m| m.resolve(ctx)).collect()
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SetPropertyConfig {
    pub property: String,
    #[serde(default)]
    pub value: Value,
}

pub fn set_property(
    cfg: &SetPropertyConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::default();
    let node = ctx.ensure_node(state, &mut outcome);
    state.graph.set_property(node, &cfg.property, cfg.value.clone());
    Ok(outcome)
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ExtractAttributeConfig {
    #[serde(flatten)]
    pub mapping: AttributeMapping,
}

pub fn extract_attribute(
    cfg: &ExtractAttributeConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::default();
    if let Some((key, value)) = cfg.mapping.resolve(ctx) {
        let node = ctx.ensure_node(state, &mut outcome);
        state.graph.set_property(node, &key, value);
    }
    Ok(outcome)
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ExtractTextConfig {
    #[serde(default = "text_property")]
    pub property: String,
    /// Only the text directly inside the element.
    #[serde(default)]
    pub own_text: bool,
    #[serde(default, deserialize_with = "lenient_transforms")]
    pub transforms: Vec<Transform>,
}

pub fn extract_text(
    cfg: &ExtractTextConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::default();
    let text = if cfg.own_text { ctx.doc.own_text(ctx.element) } else { ctx.text() };
    let text = apply_transforms(&text, &cfg.transforms);
    if !text.is_empty() {
        let node = ctx.ensure_node(state, &mut outcome);
        state.graph.set_property(node, &cfg.property, Value::String(text));
    }
    Ok(outcome)
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CopyPropertyConfig {
    pub from: String,
    pub to: String,
    /// Read `from` on the parent node instead of the current node.
    #[serde(default)]
    pub from_parent: bool,
}

pub fn copy_property(
    cfg: &CopyPropertyConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::default();
    let node = ctx.ensure_node(state, &mut outcome);
    let source = if cfg.from_parent { ctx.parent } else { Some(node) };
    if let Some(value) = source.and_then(|s| state.graph.property(s, &cfg.from)).cloned() {
        state.graph.set_property(node, &cfg.to, value);
    }
    Ok(outcome)
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RenamePropertyConfig {
    pub from: String,
    pub to: String,
}

pub fn rename_property(
    cfg: &RenamePropertyConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::default();
    let node = ctx.ensure_node(state, &mut outcome);
    if let Some(n) = state.graph.node_mut(node) {
        if let Some(value) = n.properties.remove(&cfg.from) {
            n.properties.insert(cfg.to.clone(), value);
        }
    }
    Ok(outcome)
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RemovePropertyConfig {
    #[serde(default)]
    pub property: Option<String>,
    #[serde(default)]
    pub properties: Vec<String>,
}

pub fn remove_property(
    cfg: &RemovePropertyConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::default();
    let node = ctx.ensure_node(state, &mut outcome);
    if let Some(n) = state.graph.node_mut(node) {
        for key in cfg.property.iter().chain(cfg.properties.iter()) {
            n.properties.remove(key);
        }
    }
    Ok(outcome)
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MergePropertiesConfig {
    pub sources: Vec<String>,
    pub target: String,
    #[serde(default = "space")]
    pub separator: String,
    #[serde(default)]
    pub remove_sources: bool,
}

pub fn merge_properties(
    cfg: &MergePropertiesConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::default();
    let node = ctx.ensure_node(state, &mut outcome);
    let Some(n) = state.graph.node_mut(node) else {
        return Ok(outcome);
    };
    let parts: Vec<String> = cfg.sources.iter().filter_map(|s| n.properties.get(s)).map(value_to_string).filter(|s| !s.is_empty()).collect();
    if cfg.remove_sources {
        for s in &cfg.sources {
            n.properties.remove(s);
        }
    }
    if !parts.is_empty() {
        n.properties.insert(cfg.target.clone(), Value::String(parts.join(&cfg.separator)));
    }
    Ok(outcome)
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SplitPropertyConfig {
    pub property: String,
    #[serde(default = "comma")]
    pub separator: String,
    /// Write the parts here instead of replacing `property`.
    #[serde(default)]
    pub target: Option<String>,
}

pub fn split_property(
    cfg: &SplitPropertyConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::default();
    let node = ctx.ensure_node(state, &mut outcome);
    let Some(value) = state.graph.property(node, &cfg.property).map(value_to_string) else {
        return Ok(outcome);
    };
    let parts: Vec<Value> = value.split(cfg.separator.as_str()).map(str::trim).filter(|p| !p.is_empty()).map(|p| Value::String(p.to_string())).collect();
    let target = cfg.target.as_deref().unwrap_or(&cfg.property);
    state.graph.set_property(node, target, Value::Array(parts));
    Ok(outcome)
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FormatPropertyConfig {
    pub target: String,
    /// Text with `{property}` placeholders filled from the current node.
    pub template: String,
}

pub fn format_property(
    cfg: &FormatPropertyConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::default();
    let node = ctx.ensure_node(state, &mut outcome);
    let formatted = PROPERTY_PLACEHOLDER
        .replace_all(&cfg.template, |caps: &regex::Captures| state.graph.property(node, &caps[1]).map(value_to_string).unwrap_or_default())
        .into_owned();
    state.graph.set_property(node, &cfg.target, Value::String(formatted));
    Ok(outcome)
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TransformTextConfig {
    /// Transform this property in place; otherwise the element text is
    /// transformed into `transformedText`.
    #[serde(default)]
    pub property: Option<String>,
    #[serde(default, deserialize_with = "lenient_transforms")]
    pub transforms: Vec<Transform>,
}

pub fn transform_text(
    cfg: &TransformTextConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::default();
    let node = ctx.ensure_node(state, &mut outcome);
    match &cfg.property {
        Some(property) => {
            if let Some(value) = state.graph.property(node, property).map(value_to_string) {
                state.graph.set_property(node, property, Value::String(apply_transforms(&value, &cfg.transforms)));
            }
        }
        None => {
            let text = apply_transforms(&ctx.text(), &cfg.transforms);
            state.graph.set_property(node, "transformedText", Value::String(text));
        }
    }
    Ok(outcome)
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ExtractAndNormalizeConfig {
    #[serde(default, alias = "attributeMappings")]
    pub mappings: Vec<AttributeMapping>,
}

pub fn extract_and_normalize(
    cfg: &ExtractAndNormalizeConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::default();
    let props = map_attributes(&cfg.mappings, ctx);
    if !props.is_empty() {
        let node = ctx.ensure_node(state, &mut outcome);
        if let Some(n) = state.graph.node_mut(node) {
            n.properties.extend(props);
        }
    }
    Ok(outcome)
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ComputeOperation {
    #[default]
    Concat,
    Sum,
    Join,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ExtractAndComputeConfig {
    pub target: String,
    #[serde(default)]
    pub operation: ComputeOperation,
    pub sources: Vec<ValueSource>,
    #[serde(default = "space")]
    pub separator: String,
}

pub fn extract_and_compute(
    cfg: &ExtractAndComputeConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::default();
    let node = ctx.ensure_node(state, &mut outcome);
    let values: Vec<Value> = cfg.sources.iter().filter_map(|s| s.read(ctx, &state.graph, Some(node))).filter(|v| !v.is_null()).collect();

    let computed = match cfg.operation {
        ComputeOperation::Concat => Value::String(values.iter().map(value_to_string).collect()),
        ComputeOperation::Join => Value::String(values.iter().map(value_to_string).filter(|s| !s.is_empty()).collect::<Vec<_>>().join(&cfg.separator)),
        ComputeOperation::Sum => number_value(values.iter().filter_map(value_to_f64).sum()),
    };
    state.graph.set_property(node, &cfg.target, computed);
    Ok(outcome)
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NormalizeAndDeduplicateConfig {
    pub property: String,
    /// Read from here instead of the existing property value.
    #[serde(default)]
    pub source: Option<ValueSource>,
    #[serde(default = "comma")]
    pub separator: String,
    #[serde(default, deserialize_with = "lenient_transforms")]
    pub transforms: Vec<Transform>,
}

/// Split, transform, and deduplicate into a scalar (one value) or an array.
pub fn normalize_and_deduplicate(
    cfg: &NormalizeAndDeduplicateConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::default();
    let node = ctx.ensure_node(state, &mut outcome);
    let raw = match &cfg.source {
        Some(source) => source.read(ctx, &state.graph, Some(node)),
        None => state.graph.property(node, &cfg.property).cloned(),
    };
    let pieces: Vec<String> = match raw {
        Some(Value::Array(items)) => items.iter().map(value_to_string).collect(),
        Some(v) => value_to_string(&v).split(cfg.separator.as_str()).map(str::to_string).collect(),
        None => return Ok(outcome),
    };

    let mut unique: Vec<String> = Vec::new();
    for piece in pieces {
        let normalized = apply_transforms(piece.trim(), &cfg.transforms);
        if !normalized.is_empty() && !unique.contains(&normalized) {
            unique.push(normalized);
        }
    }

    match unique.len() {
        0 => {}
        1 => state.graph.set_property(node, &cfg.property, Value::String(unique.remove(0))),
        _ => state.graph.set_property(node, &cfg.property, Value::Array(unique.into_iter().map(Value::String).collect())),
    }
    Ok(outcome)
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SetPropertiesFromAttributesConfig {
    /// Attributes to copy; all of them when empty.
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default)]
    pub prefix: String,
    #[serde(default, deserialize_with = "lenient_transforms")]
    pub transforms: Vec<Transform>,
}

pub fn set_properties_from_attributes(
    cfg: &SetPropertiesFromAttributesConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::default();
    let props: Properties = ctx
        .doc
        .attributes(ctx.element)
        .iter()
        .filter(|(name, _)| cfg.attributes.is_empty() || cfg.attributes.contains(name))
        .map(|(name, value)| (format!("{}{}", cfg.prefix, name), Value::String(apply_transforms(value, &cfg.transforms))))
        .collect();
    if !props.is_empty() {
        let node = ctx.ensure_node(state, &mut outcome);
        if let Some(n) = state.graph.node_mut(node) {
            n.properties.extend(props);
        }
    }
    Ok(outcome)
}
