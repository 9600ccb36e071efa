use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    Result,
    model::{NodeId, Properties},
    pipeline::{
        source::{ValueSource, value_to_string},
        transform::{Transform, apply_transforms, lenient_transforms},
    },
    runtime::{ExecutionContext, GraphState, StepOutcome},
};

fn token_label() -> String {
    "Token".to_string()
}

fn space() -> String {
    " ".to_string()
}

fn text_property() -> String {
    "text".to_string()
}

fn next_relationship() -> String {
    "next".to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TokenStructure {
    /// Every token hangs off the element's node.
    #[default]
    Flat,
    /// The element's node links to the first token; each token links to the next.
    Chained,
}

/// Per-token values available to `tokenProperties`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TokenField {
    Text,
    Index,
    Length,
    Lowercase,
    Uppercase,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateTokenNodesConfig {
    #[serde(default = "token_label")]
    pub label: String,
    #[serde(default)]
    pub source: ValueSource,
    #[serde(default, deserialize_with = "lenient_transforms")]
    pub transforms: Vec<Transform>,
    /// Delimiter; the empty string splits into characters and a single
    /// space splits on any whitespace.
    #[serde(default = "space")]
    pub split_by: String,
    /// Regex whose matches are the tokens; takes precedence over `splitBy`.
    #[serde(default)]
    pub pattern: Option<String>,
    /// Keep only tokens matching this regex.
    #[serde(default)]
    pub filter_pattern: Option<String>,
    #[serde(default = "text_property")]
    pub property: String,
    /// Additional computed properties per token.
    #[serde(default)]
    pub token_properties: BTreeMap<String, TokenField>,
    /// Static properties on every token.
    #[serde(default)]
    pub properties: Properties,
    /// Type linking the element's node to its tokens; resolved from the
    /// schema when absent.
    #[serde(default)]
    pub relationship: Option<String>,
    #[serde(default)]
    pub structure: TokenStructure,
    #[serde(default = "next_relationship")]
    pub chain_relationship: String,
}

/// Compiled `pattern` and `filterPattern`.
struct Tokenizer<'c> {
    cfg: &'c CreateTokenNodesConfig,
    pattern: Option<Regex>,
    filter: Option<Regex>,
}

impl<'c> Tokenizer<'c> {
    fn new(cfg: &'c CreateTokenNodesConfig) -> Result<Self> {
        Ok(Self {
            cfg,
            pattern: cfg.pattern.as_deref().map(Regex::new).transpose()?,
            filter: cfg.filter_pattern.as_deref().map(Regex::new).transpose()?,
        })
    }

    fn tokenize(
        &self,
        text: &str,
    ) -> Vec<String> {
        let split_by = self.cfg.split_by.as_str();
        let tokens: Vec<String> = match &self.pattern {
            Some(pattern) => pattern.find_iter(text).map(|m| m.as_str().to_string()).collect(),
            None if split_by.is_empty() => text.chars().map(String::from).collect(),
            None if split_by == " " => text.split_whitespace().map(str::to_string).collect(),
            None => text.split(split_by).map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect(),
        };
        match &self.filter {
            Some(filter) => tokens.into_iter().filter(|t| filter.is_match(t)).collect(),
            None => tokens,
        }
    }
}

/// Split the element text into tokens and create one node per token.
pub fn create_token_nodes(
    cfg: &CreateTokenNodesConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    let tokenizer = Tokenizer::new(cfg)?;
    let mut outcome = StepOutcome::default();
    let owner = ctx.ensure_node(state, &mut outcome);
    let text = cfg.source.read(ctx, &state.graph, Some(owner)).map(|v| value_to_string(&v)).unwrap_or_default();
    let tokens = tokenizer.tokenize(&apply_transforms(&text, &cfg.transforms));

    let mut previous: Option<NodeId> = None;
    for (index, token) in tokens.iter().enumerate() {
        let mut props = cfg.properties.clone();
        props.insert(cfg.property.clone(), Value::String(token.clone()));
        for (name, field) in &cfg.token_properties {
            let value = match field {
                TokenField::Text => Value::String(token.clone()),
                TokenField::Index => Value::from(index),
                TokenField::Length => Value::from(token.chars().count()),
                TokenField::Lowercase => Value::String(token.to_lowercase()),
                TokenField::Uppercase => Value::String(token.to_uppercase()),
            };
            props.insert(name.clone(), value);
        }

        let node = state.graph.create_labeled_node(&cfg.label, props);
        match (cfg.structure, previous) {
            (TokenStructure::Chained, Some(prev)) => {
                state.graph.create_relationship(&cfg.chain_relationship, prev, node, Properties::new());
            }
            _ => {
                state.graph.link(owner, node, cfg.relationship.as_deref());
            }
        }
        previous = Some(node);
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::pipeline::actions::{ActionKind, tests::Fixture};

    fn run(
        fx: &mut Fixture,
        config: Value,
    ) -> StepOutcome {
        let action = ActionKind::decode("create-token-nodes", &config).unwrap();
        fx.run(0, &action)
    }

    fn token_texts(fx: &Fixture) -> Vec<String> {
        fx.state.graph.iter_nodes().filter(|n| n.primary_label() != "Word").map(|n| n.properties["text"].as_str().unwrap_or_default().to_string()).collect()
    }

    #[test]
    fn test_character_tokens() {
        let mut fx = Fixture::new(r#"<w lemma="li">li</w>"#);
        let out = run(&mut fx, json!({"label": "Character", "splitBy": "", "relationship": "contains"}));
        let word = fx.current(&out);
        assert_eq!(token_texts(&fx), vec!["l", "i"]);
        assert_eq!(fx.state.graph.relationship_count(), 2);
        assert!(fx.state.graph.iter_relationships().all(|r| r.start == word && r.label == "contains"));
    }

    #[test]
    fn test_character_filter_counts_alphanumerics() {
        let text = "Li rois, 12 chevaliers!";
        let mut fx = Fixture::new(&format!("<l>{text}</l>"));
        run(&mut fx, json!({"splitBy": "", "filterPattern": "[a-zA-Z0-9]"}));
        let expected = text.chars().filter(|c| c.is_ascii_alphanumeric()).count();
        assert_eq!(token_texts(&fx).len(), expected);
    }

    #[test]
    fn test_word_tokens_with_fields() {
        let mut fx = Fixture::new("<l>Li  rois Artus</l>");
        run(&mut fx, json!({"tokenProperties": {"n": "index", "len": "length", "norm": "lowercase"}}));
        assert_eq!(token_texts(&fx), vec!["Li", "rois", "Artus"]);
        let last = fx.state.graph.iter_nodes().last().unwrap();
        assert_eq!(last.properties["n"], json!(2));
        assert_eq!(last.properties["len"], json!(5));
        assert_eq!(last.properties["norm"], json!("artus"));
    }

    #[test]
    fn test_regex_and_delimiter_tokens() {
        let mut fx = Fixture::new("<l>a-b;c</l>");
        run(&mut fx, json!({"pattern": "[a-z]"}));
        assert_eq!(token_texts(&fx), vec!["a", "b", "c"]);

        let mut fx = Fixture::new("<l>a-b; c</l>");
        run(&mut fx, json!({"splitBy": ";"}));
        assert_eq!(token_texts(&fx), vec!["a-b", "c"]);
    }

    #[test]
    fn test_chained_structure() {
        let mut fx = Fixture::new("<l>a b c</l>");
        let out = run(&mut fx, json!({"structure": "chained"}));
        let owner = fx.current(&out);
        let rels: Vec<(String, u64, u64)> = fx.state.graph.iter_relationships().map(|r| (r.label.clone(), r.start, r.end)).collect();
        assert_eq!(rels, vec![("contains".to_string(), owner, 1), ("next".to_string(), 1, 2), ("next".to_string(), 2, 3)]);
    }

    #[test]
    fn test_malformed_pattern_is_an_error() {
        let mut fx = Fixture::new("<l>a</l>");
        let action = ActionKind::decode("create-token-nodes", &json!({"pattern": "(["})).unwrap();
        assert!(fx.try_run(0, &action).is_err());
        assert_eq!(fx.state.graph.node_count(), 0);

        let action = ActionKind::decode("create-token-nodes", &json!({"filterPattern": "[a-"})).unwrap();
        assert!(fx.try_run(0, &action).is_err());
        assert_eq!(fx.state.graph.node_count(), 0);
    }
}
