use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::{
    Result,
    model::Properties,
    pipeline::{
        actions::property::{AttributeMapping, map_attributes},
        condition::ConditionSet,
        filter::{TagFilter, TagPatterns},
        source::ValueSource,
        transform::{Transform, apply_transforms, lenient_transforms},
        yes,
    },
    runtime::{ExecutionContext, GraphState, NodeSpec, StepOutcome},
};

static ELEMENT_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{(attr:[^{}]+|text|tag|label)\}").expect("placeholder pattern is valid"));

fn text_property() -> String {
    "text".to_string()
}

fn id_property() -> String {
    "id".to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateNodeConfig {
    /// Label for the node; the builder label when absent.
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default = "yes")]
    pub include_attributes: bool,
    /// Relationship type to the parent, overriding schema resolution.
    #[serde(default)]
    pub relationship: Option<String>,
    #[serde(default = "yes")]
    pub link_to_parent: bool,
}

pub fn create_node(
    cfg: &CreateNodeConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    let node = ctx.create_node(
        state,
        NodeSpec {
            label: cfg.label.clone(),
            properties: cfg.properties.clone(),
            include_defaults: true,
            include_attributes: cfg.include_attributes,
            link_to_parent: cfg.link_to_parent,
            relationship: cfg.relationship.clone(),
            ..Default::default()
        },
    );
    Ok(StepOutcome::with_current(node))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateNodeFromTextConfig {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default = "text_property")]
    pub property: String,
    #[serde(default)]
    pub source: ValueSource,
    #[serde(default, deserialize_with = "lenient_transforms")]
    pub transforms: Vec<Transform>,
    /// Create nothing when the text is empty.
    #[serde(default = "yes")]
    pub skip_empty: bool,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub relationship: Option<String>,
}

pub fn create_node_from_text(
    cfg: &CreateNodeFromTextConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    let text = cfg.source.read_string(ctx, &state.graph, ctx.current).map(|t| apply_transforms(&t, &cfg.transforms)).unwrap_or_default();
    if text.is_empty() && cfg.skip_empty {
        return Ok(StepOutcome {
            node_handled: true,
            ..Default::default()
        });
    }

    let mut properties = cfg.properties.clone();
    properties.insert(cfg.property.clone(), Value::String(text));
    let node = ctx.create_node(
        state,
        NodeSpec {
            label: cfg.label.clone(),
            properties,
            include_defaults: true,
            link_to_parent: true,
            relationship: cfg.relationship.clone(),
            ..Default::default()
        },
    );
    Ok(StepOutcome::with_current(node))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateNodeWithAttributesConfig {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default, alias = "mappings")]
    pub attribute_mappings: Vec<AttributeMapping>,
    /// Copy unmapped attributes too.
    #[serde(default)]
    pub include_all_attributes: bool,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub relationship: Option<String>,
}

pub fn create_node_with_attributes(
    cfg: &CreateNodeWithAttributesConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    let mut properties = cfg.properties.clone();
    properties.extend(map_attributes(&cfg.attribute_mappings, ctx));
    let node = ctx.create_node(
        state,
        NodeSpec {
            label: cfg.label.clone(),
            properties,
            include_defaults: true,
            include_attributes: cfg.include_all_attributes,
            link_to_parent: true,
            relationship: cfg.relationship.clone(),
            ..Default::default()
        },
    );
    Ok(StepOutcome::with_current(node))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateNodeCompleteConfig {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default, alias = "mappings")]
    pub attribute_mappings: Vec<AttributeMapping>,
    #[serde(default)]
    pub include_all_attributes: bool,
    /// Store the transformed element text under this property.
    #[serde(default)]
    pub text_property: Option<String>,
    #[serde(default, deserialize_with = "lenient_transforms")]
    pub text_transforms: Vec<Transform>,
    /// Identity template with `{attr:name}`, `{text}`, `{tag}`, `{label}`
    /// placeholders. A node with the same label and id is updated instead of
    /// creating a new one.
    #[serde(default)]
    pub id_template: Option<String>,
    #[serde(default = "id_property")]
    pub id_property: String,
    #[serde(default)]
    pub relationship: Option<String>,
}

pub fn create_node_complete(
    cfg: &CreateNodeCompleteConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    let label = cfg.label.clone().unwrap_or_else(|| ctx.builder.label.clone());
    let mut properties = cfg.properties.clone();
    properties.extend(map_attributes(&cfg.attribute_mappings, ctx));
    if let Some(key) = &cfg.text_property {
        let text = apply_transforms(&ctx.text(), &cfg.text_transforms);
        if !text.is_empty() {
            properties.insert(key.clone(), Value::String(text));
        }
    }

    if let Some(template) = &cfg.id_template {
        let id = render_element_template(template, ctx, &label);
        if !id.is_empty() {
            let id = Value::String(id);
            let existing = state.graph.find_nodes(&cfg.id_property, &id).into_iter().find(|n| state.graph.node(*n).is_some_and(|node| node.primary_label() == label));
            if let Some(node) = existing {
                debug!(node, label = %label, "updating existing node by id");
                if let Some(n) = state.graph.node_mut(node) {
                    n.properties.extend(properties);
                }
                state.bind(ctx.element, node);
                return Ok(StepOutcome::reuse(node));
            }
            properties.insert(cfg.id_property.clone(), id);
        }
    }

    let node = ctx.create_node(
        state,
        NodeSpec {
            label: Some(label),
            properties,
            include_defaults: true,
            include_attributes: cfg.include_all_attributes,
            link_to_parent: true,
            relationship: cfg.relationship.clone(),
            ..Default::default()
        },
    );
    Ok(StepOutcome::with_current(node))
}

/// Fill `{attr:name}`, `{text}`, `{tag}`, and `{label}` from the element.
fn render_element_template(
    template: &str,
    ctx: &ExecutionContext,
    label: &str,
) -> String {
    ELEMENT_PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures| match &caps[1] {
            "text" => ctx.text(),
            "tag" => ctx.doc.tag(ctx.element).to_string(),
            "label" => label.to_string(),
            other => other.strip_prefix("attr:").and_then(|name| ctx.attribute(name.trim())).unwrap_or_default().to_string(),
        })
        .into_owned()
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Otherwise {
    /// Leave the element to the default node.
    #[default]
    Default,
    /// Create no node for the element at all.
    None,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateConditionalNodeConfig {
    #[serde(flatten)]
    pub conditions: ConditionSet,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub otherwise: Otherwise,
    #[serde(default)]
    pub relationship: Option<String>,
}

pub fn create_conditional_node(
    cfg: &CreateConditionalNodeConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    if !cfg.conditions.evaluate(ctx.doc, ctx.element) {
        return Ok(StepOutcome {
            node_handled: cfg.otherwise == Otherwise::None,
            ..Default::default()
        });
    }
    let node = ctx.create_node(
        state,
        NodeSpec {
            label: cfg.label.clone(),
            properties: cfg.properties.clone(),
            relationship: cfg.relationship.clone(),
            ..NodeSpec::main()
        },
    );
    Ok(StepOutcome::with_current(node))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateHierarchicalNodeConfig {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub properties: Properties,
    /// Direct child tags (glob patterns) that become child nodes.
    pub child_tags: Vec<String>,
    /// Label for child nodes; the child's tag name when absent.
    #[serde(default)]
    pub child_label: Option<String>,
    #[serde(default)]
    pub child_relationship: Option<String>,
    #[serde(default = "text_property")]
    pub child_text_property: String,
    /// Do not walk the children afterwards.
    #[serde(default)]
    pub skip_children: bool,
}

/// Create the element's node and nodes for its matching children in one step.
///
/// Child nodes are bound to their elements, so a builder matching a child
/// later reuses that node instead of creating another.
pub fn create_hierarchical_node(
    cfg: &CreateHierarchicalNodeConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    let patterns = TagPatterns::new(&cfg.child_tags)?;
    let parent = ctx.create_node(
        state,
        NodeSpec {
            label: cfg.label.clone(),
            properties: cfg.properties.clone(),
            ..NodeSpec::main()
        },
    );

    for child in ctx.doc.children(ctx.element).iter().copied() {
        if !patterns.is_match(&ctx.doc.tag_key(child)) {
            continue;
        }
        let mut props: Properties = ctx.doc.attributes(child).iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect();
        let text = ctx.doc.text_content(child);
        if !text.is_empty() {
            props.insert(cfg.child_text_property.clone(), Value::String(text));
        }
        let label = cfg.child_label.clone().unwrap_or_else(|| ctx.doc.tag(child).to_string());
        let node = state.graph.create_labeled_node(&label, props);
        state.bind(child, node);
        state.graph.link(parent, node, cfg.child_relationship.as_deref());
    }

    let mut outcome = StepOutcome::with_current(parent);
    if cfg.skip_children {
        outcome.flags.skip_children_tags = patterns.patterns().to_vec();
    }
    Ok(outcome)
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateNodeFilteredChildrenConfig {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub properties: Properties,
    /// Child tags to walk into; all when empty.
    #[serde(default, alias = "allowedTags")]
    pub allow_tags: Vec<String>,
    #[serde(default, alias = "deniedTags")]
    pub deny_tags: Vec<String>,
}

pub fn create_node_filtered_children(
    cfg: &CreateNodeFilteredChildrenConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    let filter = TagFilter::new(&cfg.allow_tags, &cfg.deny_tags)?;
    let node = ctx.create_node(
        state,
        NodeSpec {
            label: cfg.label.clone(),
            properties: cfg.properties.clone(),
            ..NodeSpec::main()
        },
    );
    let mut outcome = StepOutcome::with_current(node);
    outcome.child_filter = Some(filter);
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::pipeline::actions::{ActionKind, tests::Fixture};

    fn run(
        fx: &mut Fixture,
        element: usize,
        kind: &str,
        config: Value,
    ) -> StepOutcome {
        let action = ActionKind::decode(kind, &config).unwrap();
        fx.run(element, &action)
    }

    #[test]
    fn test_create_node_links_parent() {
        let mut fx = Fixture::new(r#"<s><w lemma="li">li</w></s>"#);
        let parent = fx.main_node(0);
        let out = run(&mut fx, 1, "create-node", json!({"label": "Token", "properties": {"kind": "w"}}));
        let node = fx.current(&out);
        let props = fx.props(node);
        assert_eq!(fx.state.graph.node(node).unwrap().labels, vec!["Token"]);
        assert_eq!(props["kind"], json!("w"));
        assert_eq!(props["lemma"], json!("li"));
        assert!(fx.state.graph.has_relationship("contains", parent, node));
        assert_eq!(fx.state.node_for(1), Some(node));
    }

    #[test]
    fn test_create_node_without_attributes() {
        let mut fx = Fixture::new(r#"<w lemma="li">li</w>"#);
        let out = run(&mut fx, 0, "create-node", json!({"includeAttributes": false}));
        let props = fx.props(fx.current(&out));
        assert!(!props.contains_key("lemma"));
        assert_eq!(props["lang"], json!("fro"));
    }

    #[test]
    fn test_create_node_from_text() {
        let mut fx = Fixture::new("<s><w> Li </w><w/></s>");
        let out = run(&mut fx, 1, "create-node-from-text", json!({"label": "Form", "property": "form", "transforms": [{"type": "lowercase"}]}));
        assert_eq!(fx.props(fx.current(&out))["form"], json!("li"));

        let out = run(&mut fx, 2, "create-node-from-text", json!({}));
        assert!(out.node_handled);
        assert_eq!(out.current, crate::runtime::CurrentNode::Unchanged);
        assert_eq!(fx.state.graph.node_count(), 1);
    }

    #[test]
    fn test_create_node_with_attribute_mappings() {
        let mut fx = Fixture::new(r##"<persName ref="#jb" type="author">Jean</persName>"##);
        let out = run(
            &mut fx,
            0,
            "create-node-with-attributes",
            json!({"label": "Person", "attributeMappings": [{"attribute": "ref", "property": "xmlRef", "transforms": [{"type": "replace", "params": {"search": "#", "replacement": ""}}]}]}),
        );
        let props = fx.props(fx.current(&out));
        assert_eq!(props["xmlRef"], json!("jb"));
        assert!(!props.contains_key("type"));
    }

    #[test]
    fn test_create_node_complete_upserts_by_id() {
        let mut fx = Fixture::new(r#"<list><person n="jb">Jean</person><person n="jb" role="poet">Jehan</person><person n="x"/></list>"#);
        let config = json!({"label": "Person", "idTemplate": "person-{attr:n}", "textProperty": "name", "attributeMappings": [{"attribute": "role"}]});
        let out = run(&mut fx, 1, "create-node-complete", config.clone());
        let first = fx.current(&out);
        let out = run(&mut fx, 2, "create-node-complete", config.clone());
        let second = fx.current(&out);
        let out = run(&mut fx, 3, "create-node-complete", config);
        let third = fx.current(&out);

        assert_eq!(first, second);
        assert_ne!(first, third);
        let props = fx.props(first);
        assert_eq!(props["id"], json!("person-jb"));
        assert_eq!(props["name"], json!("Jehan"));
        assert_eq!(props["role"], json!("poet"));
        assert_eq!(fx.state.node_for(2), Some(first));
    }

    #[test]
    fn test_create_node_complete_upsert_is_not_owned() {
        let mut fx = Fixture::new(r#"<list><w n="1">li</w><w n="1">li</w></list>"#);
        let config = json!({"idTemplate": "{attr:n}"});
        let created = run(&mut fx, 1, "create-node-complete", config.clone());
        let reused = run(&mut fx, 2, "create-node-complete", config);
        assert_eq!(created.created, vec![fx.current(&created)]);
        assert_eq!(reused.current, created.current);
        assert!(reused.created.is_empty());
    }

    #[test]
    fn test_conditional_node() {
        let mut fx = Fixture::new(r#"<s><w pos="NOUN">rois</w><w>li</w></s>"#);
        let config = json!({"label": "Noun", "conditions": [{"type": "attribute-equals", "name": "pos", "value": "NOUN"}], "otherwise": "none"});
        let out = run(&mut fx, 1, "create-conditional-node", config.clone());
        assert_eq!(fx.state.graph.node(fx.current(&out)).unwrap().labels, vec!["Noun"]);

        let out = run(&mut fx, 2, "create-conditional-node", config);
        assert!(out.node_handled);
        assert_eq!(fx.state.graph.node_count(), 1);

        let out = run(&mut fx, 2, "create-conditional-node", json!({"conditions": [{"type": "has-child", "tag": "x"}]}));
        assert!(!out.node_handled);
    }

    #[test]
    fn test_hierarchical_node_binds_children() {
        let mut fx = Fixture::new(r#"<choice><sic>teh</sic><corr resp="ed">the</corr><note/></choice>"#);
        let out = run(&mut fx, 0, "create-hierarchical-node", json!({"label": "Choice", "childTags": ["sic", "corr"], "childRelationship": "HAS_READING", "skipChildren": true}));
        let parent = fx.current(&out);
        let sic = fx.state.node_for(1).unwrap();
        let corr = fx.state.node_for(2).unwrap();

        assert_eq!(fx.state.graph.node(sic).unwrap().labels, vec!["sic"]);
        assert_eq!(fx.props(corr)["resp"], json!("ed"));
        assert_eq!(fx.props(corr)["text"], json!("the"));
        assert!(fx.state.graph.has_relationship("HAS_READING", parent, sic));
        assert!(fx.state.graph.has_relationship("HAS_READING", parent, corr));
        assert_eq!(fx.state.node_for(3), None);
        assert_eq!(out.flags.skip_children_tags, vec!["sic", "corr"]);
    }

    #[test]
    fn test_filtered_children_sets_filter() {
        let mut fx = Fixture::new("<div><p/><note/></div>");
        let out = run(&mut fx, 0, "create-node-filtered-children", json!({"allowTags": ["p", "note"], "denyTags": ["note"]}));
        let filter = out.child_filter.as_ref().unwrap();
        assert!(filter.admits("p"));
        assert!(!filter.admits("note"));
        assert!(fx.state.graph.contains_node(fx.current(&out)));
    }
}
