use std::{collections::HashMap, sync::Arc};

use crate::{
    Config, Result, XmlflowError,
    graph::SchemaIndex,
    model::{BuilderNode, MappingModel},
    pipeline::graph::{ActionBody, ActionStep, StepGraph, StepNode, ToolStep},
};

/// A mapping compiled for execution: tag lookup, schema tables, and the step graph.
#[derive(Debug, Clone)]
pub struct Mapping {
    builders: Vec<BuilderNode>,
    /// Lower-cased tag -> builder positions, in input order.
    by_tag: HashMap<String, Vec<usize>>,
    schema: Arc<SchemaIndex>,
    steps: StepGraph,
    start_label: Option<String>,
}

impl Mapping {
    pub fn compile(
        model: MappingModel,
        config: &Config,
    ) -> Result<Self> {
        let schema = SchemaIndex::new(&model.schema, &model.builder_nodes, &model.relationships, &config.default_relationship);

        let mut steps = StepGraph::new();
        let mut by_tag: HashMap<String, Vec<usize>> = HashMap::new();
        for (pos, builder) in model.builder_nodes.iter().enumerate() {
            steps.add_node(&builder.id, StepNode::Builder(builder.id.clone()))?;
            by_tag.entry(builder.tag_key()).or_default().push(pos);
        }
        for tool in &model.tools {
            steps.add_node(&tool.id, StepNode::Tool(ToolStep::compile(tool)?))?;
        }
        for action in &model.actions {
            steps.add_node(&action.id, StepNode::Action(ActionStep::compile(action)?))?;
        }

        // group children must name actions
        for action in &model.actions {
            let Some(StepNode::Action(ActionStep {
                body: ActionBody::Group { children },
                ..
            })) = steps.step(&action.id)
            else {
                continue;
            };
            if let Some(missing) = children.iter().find(|c| !matches!(steps.step(c), Some(StepNode::Action(_)))) {
                return Err(XmlflowError::Mapping(format!("group '{}' references unknown action '{}'", action.id, missing)));
            }
        }

        for (order, edge) in model.tool_edges.iter().chain(model.action_edges.iter()).enumerate() {
            steps.add_edge(edge, order)?;
        }

        if let Some(label) = &model.start_label {
            if !model.builder_nodes.iter().any(|b| &b.label == label) {
                return Err(XmlflowError::Mapping(format!("start label '{}' matches no builder node", label)));
            }
        }

        Ok(Self {
            builders: model.builder_nodes,
            by_tag,
            schema: Arc::new(schema),
            steps,
            start_label: model.start_label,
        })
    }

    /// Parse, validate, and compile a mapping document.
    pub fn from_json(
        json: &str,
        config: &Config,
    ) -> Result<Self> {
        Self::compile(MappingModel::from_json(json)?, config)
    }

    /// Builders matching a lower-cased tag, in mapping order.
    pub fn builders_for(
        &self,
        tag_key: &str,
    ) -> Vec<&BuilderNode> {
        self.by_tag.get(tag_key).map(|ids| ids.iter().map(|i| &self.builders[*i]).collect()).unwrap_or_default()
    }

    pub fn builder_by_label(
        &self,
        label: &str,
    ) -> Option<&BuilderNode> {
        self.builders.iter().find(|b| b.label == label)
    }

    pub fn schema(&self) -> Arc<SchemaIndex> {
        self.schema.clone()
    }

    pub fn steps(&self) -> &StepGraph {
        &self.steps
    }

    pub fn start_label(&self) -> Option<&str> {
        self.start_label.as_deref()
    }

    /// Human-readable dump of the compiled step graph.
    pub fn describe(&self) -> String {
        self.steps.describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAPPING: &str = r#"{
        "builderNodes": [
            { "id": "b-s", "label": "Sentence", "tag": "s" },
            { "id": "b-w", "label": "Word", "tag": "W" },
            { "id": "b-w2", "label": "Form", "tag": "w" }
        ],
        "relationships": [{ "source": "b-s", "target": "b-w", "type": "HAS_WORD" }],
        "tools": [{ "id": "t1", "type": "if", "config": { "conditions": [{ "type": "has-text" }] } }],
        "toolEdges": [{ "id": "e1", "source": "b-w", "target": "t1" }],
        "actions": [
            { "id": "a1", "type": "set-property", "config": { "property": "k", "value": 1 } },
            { "id": "g1", "type": "group", "children": ["a1"] }
        ],
        "actionEdges": [{ "id": "e2", "source": "t1", "target": "g1", "sourceHandle": "true" }],
        "startLabel": "Sentence"
    }"#;

    #[test]
    fn test_compile_mapping() {
        let mapping = Mapping::from_json(MAPPING, &Config::default()).unwrap();
        let labels: Vec<&str> = mapping.builders_for("w").iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["Word", "Form"]);
        assert!(mapping.builders_for("pc").is_empty());
        assert_eq!(mapping.schema().relationship_type("Sentence", "Word"), "HAS_WORD");
        assert_eq!(mapping.schema().relationship_type("Sentence", "Form"), "contains");
        assert_eq!(mapping.steps().entry_steps("b-w"), vec!["t1"]);
        assert_eq!(mapping.steps().tool_successors("t1", Some("true")), vec!["g1"]);
        assert_eq!(mapping.start_label(), Some("Sentence"));
        assert!(mapping.describe().contains("t1 --[true]--> g1"));
    }

    #[test]
    fn test_compile_errors() {
        let unknown_kind = MAPPING.replace("set-property", "paint-node");
        assert!(matches!(Mapping::from_json(&unknown_kind, &Config::default()), Err(XmlflowError::Mapping(_))));

        let bad_child = MAPPING.replace(r#""children": ["a1"]"#, r#""children": ["a9"]"#);
        assert!(Mapping::from_json(&bad_child, &Config::default()).is_err());

        let bad_edge = MAPPING.replace(r#""target": "g1""#, r#""target": "g9""#);
        assert!(Mapping::from_json(&bad_edge, &Config::default()).is_err());

        let bad_start = MAPPING.replace(r#""startLabel": "Sentence""#, r#""startLabel": "Line""#);
        assert!(Mapping::from_json(&bad_start, &Config::default()).is_err());
    }
}
