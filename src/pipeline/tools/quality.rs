//! Data-quality tools: validation, normalization, enrichment.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use crate::{
    Result, XmlflowError,
    model::Properties,
    pipeline::{
        actions::node::{MergeNodesConfig, MergeStrategy, merge_nodes},
        source::{value_to_f64, value_to_string},
        template::{evaluate_path, parse_path},
        yes,
    },
    runtime::{CurrentNode, ExecutionContext, GraphState, StepOutcome},
};

use super::{PATH_INVALID, PATH_UNVERIFIED, PATH_VALID, PATH_VERIFIED, ToolOutput};

const VALIDATED_KEY: &str = "_validated";
const VALIDATION_ERRORS_KEY: &str = "_validationErrors";
const VERIFIED_KEY: &str = "_verified";

/// Compile a user pattern; malformed patterns are logged and ignored.
fn pattern(source: &str) -> Option<Regex> {
    match Regex::new(source) {
        Ok(re) => Some(re),
        Err(err) => {
            warn!(pattern = source, error = %err, "malformed regex ignored");
            None
        }
    }
}

/// Properties a tool applies to: the listed ones, or every string property.
fn targets(
    listed: &[String],
    props: &Properties,
) -> Vec<String> {
    if listed.is_empty() {
        props.iter().filter(|(k, v)| v.is_string() && !k.starts_with('_')).map(|(k, _)| k.clone()).collect()
    } else {
        listed.to_vec()
    }
}

/// Apply `f` to each targeted string property of the current node.
fn rewrite_strings<F>(
    ctx: &ExecutionContext,
    state: &mut GraphState,
    listed: &[String],
    f: F,
) -> ToolOutput
where
    F: Fn(&str) -> Option<String>,
{
    let mut outcome = StepOutcome::default();
    let node = ctx.ensure_node(state, &mut outcome);
    let mut changed = Vec::new();
    if let Some(n) = state.graph.node_mut(node) {
        for key in targets(listed, &n.properties) {
            let Some(Value::String(current)) = n.properties.get(&key).cloned() else {
                continue;
            };
            match f(&current) {
                Some(next) if next != current => {
                    n.properties.insert(key.clone(), Value::String(next));
                    changed.push(Value::String(key));
                }
                Some(_) => {}
                None => {
                    n.properties.remove(&key);
                    changed.push(Value::String(key));
                }
            }
        }
    }
    ToolOutput::value(Value::Array(changed)).with_outcome(outcome)
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRule {
    pub property: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl ValidationRule {
    fn check(
        &self,
        props: &Properties,
        errors: &mut Vec<String>,
    ) {
        let Some(value) = props.get(&self.property).filter(|v| !v.is_null()) else {
            if self.required {
                errors.push(format!("missing required property '{}'", self.property));
            }
            return;
        };
        let text = value_to_string(value);
        let length = text.chars().count();

        if let Some(re) = self.pattern.as_deref().and_then(pattern) {
            if !re.is_match(&text) {
                errors.push(format!("'{}' does not match pattern '{}'", self.property, re.as_str()));
            }
        }
        if self.min_length.is_some_and(|min| length < min) || self.max_length.is_some_and(|max| length > max) {
            errors.push(format!("'{}' has invalid length {}", self.property, length));
        }
        if self.min.is_some() || self.max.is_some() {
            match value_to_f64(value) {
                Some(n) if self.min.is_some_and(|min| n < min) || self.max.is_some_and(|max| n > max) => {
                    errors.push(format!("'{}' is out of range: {}", self.property, n));
                }
                Some(_) => {}
                None => errors.push(format!("'{}' is not numeric", self.property)),
            }
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OnFail {
    /// Record the outcome on the node and keep it.
    #[default]
    Mark,
    /// Drop the element's node.
    Skip,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ValidateConfig {
    #[serde(default)]
    pub rules: Vec<ValidationRule>,
    /// JSON Schema the node's properties must satisfy.
    #[serde(default)]
    pub schema: Option<Value>,
    #[serde(default)]
    pub on_fail: OnFail,
}

/// Check the current node's properties; output path `valid` or `invalid`.
pub fn validate(
    cfg: &ValidateConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<ToolOutput> {
    let validator = cfg.schema.as_ref().map(jsonschema::validator_for).transpose().map_err(|err| XmlflowError::Tool(format!("invalid validation schema: {}", err)))?;

    let mut outcome = StepOutcome::default();
    let node = ctx.ensure_node(state, &mut outcome);
    let props = state.graph.node(node).map(|n| n.properties.clone()).unwrap_or_default();

    let mut errors = Vec::new();
    for rule in &cfg.rules {
        rule.check(&props, &mut errors);
    }
    if let Some(validator) = validator {
        let instance = Value::Object(props);
        errors.extend(validator.iter_errors(&instance).map(|e| e.to_string()));
    }

    let valid = errors.is_empty();
    match cfg.on_fail {
        OnFail::Skip if !valid => outcome.flags.skip_main_node = true,
        _ => {
            state.graph.set_property(node, VALIDATED_KEY, Value::Bool(valid));
            if !valid {
                state.graph.set_property(node, VALIDATION_ERRORS_KEY, json!(errors));
            }
        }
    }

    let result = json!({ "valid": valid, "errors": errors });
    Ok(ToolOutput::path(result, if valid { PATH_VALID } else { PATH_INVALID }).with_outcome(outcome))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NormalizeConfig {
    /// Properties to normalize; every string property when empty.
    #[serde(default)]
    pub properties: Vec<String>,
    #[serde(default)]
    pub lowercase: bool,
    #[serde(default = "yes")]
    pub collapse_whitespace: bool,
    /// Characters removed from values.
    #[serde(default)]
    pub strip_chars: String,
}

pub fn normalize(
    cfg: &NormalizeConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<ToolOutput> {
    Ok(rewrite_strings(ctx, state, &cfg.properties, |value| {
        let mut out: String = value.chars().filter(|c| !cfg.strip_chars.contains(*c)).collect();
        if cfg.collapse_whitespace {
            out = out.split_whitespace().collect::<Vec<_>>().join(" ");
        } else {
            out = out.trim().to_string();
        }
        if cfg.lowercase {
            out = out.to_lowercase();
        }
        Some(out)
    }))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CleanConfig {
    #[serde(default)]
    pub properties: Vec<String>,
    /// Regex whose matches are deleted from values.
    #[serde(default)]
    pub strip_pattern: Option<String>,
    /// Remove properties left empty.
    #[serde(default = "yes")]
    pub remove_empty: bool,
}

pub fn clean(
    cfg: &CleanConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<ToolOutput> {
    let strip = cfg.strip_pattern.as_deref().and_then(pattern);
    Ok(rewrite_strings(ctx, state, &cfg.properties, |value| {
        let cleaned = match &strip {
            Some(re) => re.replace_all(value, "").trim().to_string(),
            None => value.trim().to_string(),
        };
        if cleaned.is_empty() && cfg.remove_empty { None } else { Some(cleaned) }
    }))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StandardizeConfig {
    pub property: String,
    /// Variant spelling -> standard value.
    pub mapping: BTreeMap<String, Value>,
    #[serde(default = "yes")]
    pub case_insensitive: bool,
    /// Used when no variant matches; the value is kept otherwise.
    #[serde(default)]
    pub default: Option<Value>,
}

/// Replace a property value with its standard form from a lookup table.
pub fn standardize(
    cfg: &StandardizeConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<ToolOutput> {
    let mut outcome = StepOutcome::default();
    let node = ctx.ensure_node(state, &mut outcome);
    let Some(current) = state.graph.property(node, &cfg.property).map(value_to_string) else {
        return Ok(ToolOutput::value(Value::Null).with_outcome(outcome));
    };

    let found = cfg.mapping.iter().find(|(variant, _)| if cfg.case_insensitive { variant.to_lowercase() == current.trim().to_lowercase() } else { variant.as_str() == current.trim() }).map(|(_, standard)| standard.clone());
    let result = match found.or_else(|| cfg.default.clone()) {
        Some(standard) => {
            state.graph.set_property(node, &cfg.property, standard.clone());
            standard
        }
        None => Value::String(current),
    };
    Ok(ToolOutput::value(result).with_outcome(outcome))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct VerifyConfig {
    pub property: String,
    #[serde(default)]
    pub pattern: Option<String>,
    /// Accepted values; any value when empty.
    #[serde(default)]
    pub allowed: Vec<Value>,
    /// Write the outcome to `_verified`.
    #[serde(default = "yes")]
    pub mark: bool,
}

/// Output path `verified` or `unverified`.
pub fn verify(
    cfg: &VerifyConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<ToolOutput> {
    let mut outcome = StepOutcome::default();
    let node = ctx.ensure_node(state, &mut outcome);
    let verified = match state.graph.property(node, &cfg.property).filter(|v| !v.is_null()) {
        None => false,
        Some(value) => {
            let text = value_to_string(value);
            let pattern_ok = cfg.pattern.as_deref().and_then(pattern).is_none_or(|re| re.is_match(&text));
            let allowed_ok = cfg.allowed.is_empty() || cfg.allowed.iter().any(|a| a == value || value_to_string(a) == text);
            pattern_ok && allowed_ok
        }
    };
    if cfg.mark {
        state.graph.set_property(node, VERIFIED_KEY, Value::Bool(verified));
    }
    Ok(ToolOutput::path(Value::Bool(verified), if verified { PATH_VERIFIED } else { PATH_UNVERIFIED }).with_outcome(outcome))
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct EnrichConfig {
    /// `apiData` key of the payload to read from.
    #[serde(default)]
    pub key: Option<String>,
    /// Target property -> payload path (`$json.a.b` or `a.b`).
    #[serde(default)]
    pub mapping: BTreeMap<String, String>,
    /// Static properties added as well.
    #[serde(default)]
    pub properties: Properties,
}

/// Copy values out of a fetched payload onto the current node.
pub fn enrich(
    cfg: &EnrichConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<ToolOutput> {
    let mut outcome = StepOutcome::default();
    let node = ctx.ensure_node(state, &mut outcome);
    let payload = cfg.key.as_ref().and_then(|k| ctx.api_data.get(k));

    let mut added = Properties::new();
    if let Some(payload) = &payload {
        for (target, path) in &cfg.mapping {
            let expr = if path.starts_with("$json") { path.clone() } else { format!("$json.{}", path) };
            let Some(segments) = parse_path(&expr) else {
                warn!(path = %path, "invalid enrich path");
                continue;
            };
            if let Some(value) = evaluate_path(payload, &segments).filter(|v| !v.is_null()) {
                added.insert(target.clone(), value.clone());
            }
        }
    }
    added.extend(cfg.properties.clone());

    for (key, value) in &added {
        state.graph.set_property(node, key, value.clone());
    }
    Ok(ToolOutput::value(Value::Object(added)).with_outcome(outcome))
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeduplicateConfig {
    /// Array properties to deduplicate; every array property when empty.
    #[serde(default)]
    pub properties: Vec<String>,
    /// Fold the node into an earlier node of the same label sharing this key.
    #[serde(default)]
    pub key: Option<String>,
}

pub fn deduplicate(
    cfg: &DeduplicateConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<ToolOutput> {
    let mut outcome = StepOutcome::default();
    let node = ctx.ensure_node(state, &mut outcome);

    if let Some(n) = state.graph.node_mut(node) {
        let keys: Vec<String> = if cfg.properties.is_empty() { n.properties.iter().filter(|(_, v)| v.is_array()).map(|(k, _)| k.clone()).collect() } else { cfg.properties.clone() };
        for key in keys {
            if let Some(Value::Array(items)) = n.properties.get_mut(&key) {
                let mut unique: Vec<Value> = Vec::with_capacity(items.len());
                for item in items.drain(..) {
                    if !unique.contains(&item) {
                        unique.push(item);
                    }
                }
                *items = unique;
            }
        }
    }

    let Some(key) = &cfg.key else {
        return Ok(ToolOutput::value(Value::Bool(false)).with_outcome(outcome));
    };
    let merge = MergeNodesConfig {
        match_property: key.clone(),
        strategy: MergeStrategy::PreferTarget,
    };
    let scoped = ExecutionContext::new(ctx.doc, ctx.element, ctx.parent, ctx.builder, ctx.api_data, Some(node));
    let merged = merge_nodes(&merge, &scoped, state)?;
    let duplicate = matches!(merged.current, CurrentNode::Set(target) if target != node);
    if duplicate {
        outcome.current = merged.current;
        outcome.node_handled = true;
    }
    Ok(ToolOutput::value(Value::Bool(duplicate)).with_outcome(outcome))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::pipeline::tools::tests::ToolFixture;

    #[tokio::test]
    async fn test_validate_rules_mark() {
        let mut fx = ToolFixture::new(r#"<w lemma="roi" n="x">rois</w>"#);
        let config = json!({"rules": [
            {"property": "lemma", "required": true, "pattern": "^[a-z]+$"},
            {"property": "pos", "required": true},
            {"property": "n", "min": 1}
        ]});
        let out = fx.run(0, "validate", config).await;
        assert_eq!(out.output_path.as_deref(), Some("invalid"));
        let props = fx.props(0);
        assert_eq!(props["_validated"], json!(false));
        assert_eq!(props["_validationErrors"], json!(["missing required property 'pos'", "'n' is not numeric"]));
    }

    #[tokio::test]
    async fn test_validate_schema_and_skip() {
        let mut fx = ToolFixture::new(r#"<w lemma="roi">rois</w>"#);
        let schema = json!({"type": "object", "required": ["lemma"], "properties": {"lemma": {"type": "string"}}});
        let out = fx.run(0, "validate", json!({"schema": schema})).await;
        assert_eq!(out.output_path.as_deref(), Some("valid"));
        assert_eq!(fx.props(0)["_validated"], json!(true));

        let mut fx = ToolFixture::new("<w>rois</w>");
        let out = fx.run(0, "validate", json!({"rules": [{"property": "lemma", "required": true}], "onFail": "skip"})).await;
        assert_eq!(out.output_path.as_deref(), Some("invalid"));
        assert!(out.outcome.flags.skip_main_node);
        assert!(!fx.props(0).contains_key("_validated"));
    }

    #[tokio::test]
    async fn test_malformed_rule_pattern_passes() {
        let mut fx = ToolFixture::new(r#"<w lemma="roi"/>"#);
        let out = fx.run(0, "validate", json!({"rules": [{"property": "lemma", "pattern": "(["}]})).await;
        assert_eq!(out.output_path.as_deref(), Some("valid"));
    }

    #[tokio::test]
    async fn test_normalize_clean_standardize() {
        let mut fx = ToolFixture::new(r#"<w lemma="  Roi   de  France " note=" [sic] " pos="nom"/>"#);
        fx.run(0, "normalize", json!({"properties": ["lemma"], "lowercase": true})).await;
        fx.run(0, "clean", json!({"properties": ["note"], "stripPattern": "\\[sic\\]"})).await;
        fx.run(0, "standardize", json!({"property": "pos", "mapping": {"NOM": "NOUN", "VER": "VERB"}})).await;
        let props = fx.props(0);
        assert_eq!(props["lemma"], json!("roi de france"));
        assert!(!props.contains_key("note"));
        assert_eq!(props["pos"], json!("NOUN"));
    }

    #[tokio::test]
    async fn test_verify_paths() {
        let mut fx = ToolFixture::new(r#"<date when="1190"/>"#);
        let out = fx.run(0, "verify", json!({"property": "when", "pattern": "^\\d{4}$"})).await;
        assert_eq!(out.output_path.as_deref(), Some("verified"));
        let out = fx.run(0, "verify", json!({"property": "when", "allowed": ["1200"]})).await;
        assert_eq!(out.output_path.as_deref(), Some("unverified"));
        assert_eq!(fx.props(0)["_verified"], json!(false));
    }

    #[tokio::test]
    async fn test_enrich_from_api_data() {
        let mut fx = ToolFixture::new("<persName/>");
        fx.api.set("person".to_string(), json!({"name": "Jean Bodel", "dates": [{"birth": 1165}]}));
        let config = json!({"key": "person", "mapping": {"name": "name", "born": "$json.dates[0].birth", "absent": "nope"}, "properties": {"enriched": true}});
        let out = fx.run(0, "enrich", config).await;
        assert_eq!(out.result, json!({"name": "Jean Bodel", "born": 1165, "enriched": true}));
        assert_eq!(fx.props(0)["born"], json!(1165));
    }

    #[tokio::test]
    async fn test_deduplicate_arrays_and_nodes() {
        let mut fx = ToolFixture::new(r#"<list><w ref="a"/><w ref="a"/></list>"#);
        fx.run(1, "deduplicate", json!({"key": "ref"})).await;
        let first = fx.node(1);
        fx.state.graph.set_property(first, "tags", json!(["x", "y", "x"]));
        fx.run(1, "deduplicate", json!({})).await;
        assert_eq!(fx.props(1)["tags"], json!(["x", "y"]));

        let out = fx.run(2, "deduplicate", json!({"key": "ref"})).await;
        assert_eq!(out.result, json!(true));
        assert_eq!(fx.node(2), first);
        assert_eq!(fx.state.graph.node_count(), 1);
    }
}
