//! Compiled step graph: builder nodes, tools, and actions joined by edges.

use std::{borrow::Cow, collections::HashMap};

use petgraph::{
    Direction,
    graph::{DiGraph, NodeIndex},
    visit::EdgeRef,
};
use serde_json::Value;

use crate::{
    Result, XmlflowError,
    model::{ActionNodeModel, EdgeModel, ToolNodeModel},
    pipeline::{
        actions::{ActionKind, GROUP_KIND},
        template::{has_template, resolve_json_value},
        tools::ToolKind,
    },
};

/// Handle treated like an unlabeled edge.
pub const OUTPUT_HANDLE: &str = "output";

fn contains_template(value: &Value) -> bool {
    match value {
        Value::String(s) => has_template(s),
        Value::Array(items) => items.iter().any(contains_template),
        Value::Object(map) => map.values().any(contains_template),
        _ => false,
    }
}

#[derive(Debug, Clone)]
pub struct ToolStep {
    pub id: String,
    pub tool: ToolKind,
    pub enabled: bool,
    raw: Value,
    templated: bool,
}

impl ToolStep {
    pub fn compile(model: &ToolNodeModel) -> Result<Self> {
        Ok(Self {
            id: model.id.clone(),
            tool: ToolKind::decode(&model.kind, &model.config).map_err(|err| XmlflowError::Mapping(format!("tool '{}': {}", model.id, err)))?,
            enabled: model.enabled.unwrap_or(true),
            templated: contains_template(&model.config),
            raw: model.config.clone(),
        })
    }

    /// The tool with `{{ $json... }}` values resolved against `payload`.
    pub fn resolve(
        &self,
        payload: Option<&Value>,
    ) -> Result<Cow<'_, ToolKind>> {
        match payload {
            Some(payload) if self.templated => Ok(Cow::Owned(ToolKind::decode(self.tool.as_ref(), &resolve_json_value(&self.raw, payload))?)),
            _ => Ok(Cow::Borrowed(&self.tool)),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ActionBody {
    Kind(ActionKind),
    /// Ordered child action ids.
    Group { children: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct ActionStep {
    pub id: String,
    pub body: ActionBody,
    pub enabled: bool,
    raw: Value,
    templated: bool,
}

impl ActionStep {
    pub fn compile(model: &ActionNodeModel) -> Result<Self> {
        let body = if model.kind == GROUP_KIND {
            ActionBody::Group {
                children: model.children.clone(),
            }
        } else {
            ActionBody::Kind(ActionKind::decode(&model.kind, &model.config).map_err(|err| XmlflowError::Mapping(format!("action '{}': {}", model.id, err)))?)
        };
        Ok(Self {
            id: model.id.clone(),
            body,
            enabled: model.enabled.unwrap_or(true),
            templated: contains_template(&model.config),
            raw: model.config.clone(),
        })
    }

    /// The action with templates resolved; `None` for groups.
    pub fn resolve(
        &self,
        payload: Option<&Value>,
    ) -> Result<Option<Cow<'_, ActionKind>>> {
        let ActionBody::Kind(action) = &self.body else {
            return Ok(None);
        };
        match payload {
            Some(payload) if self.templated => Ok(Some(Cow::Owned(ActionKind::decode(action.as_ref(), &resolve_json_value(&self.raw, payload))?))),
            _ => Ok(Some(Cow::Borrowed(action))),
        }
    }
}

#[derive(Debug, Clone)]
pub enum StepNode {
    /// Attachment point; carries the builder id.
    Builder(String),
    Tool(ToolStep),
    Action(ActionStep),
}

impl StepNode {
    fn kind(&self) -> &str {
        match self {
            StepNode::Builder(_) => "builder",
            StepNode::Tool(step) => step.tool.as_ref(),
            StepNode::Action(ActionStep { body: ActionBody::Kind(action), .. }) => action.as_ref(),
            StepNode::Action(_) => GROUP_KIND,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StepEdge {
    pub id: String,
    pub handle: Option<String>,
    /// Position in the mapping; tool edges precede action edges.
    pub order: usize,
}

impl StepEdge {
    /// Whether a step that produced `path` continues along this edge.
    fn admits(
        &self,
        path: Option<&str>,
    ) -> bool {
        match self.handle.as_deref() {
            None | Some(OUTPUT_HANDLE) => true,
            Some(handle) => path == Some(handle),
        }
    }
}

/// Builder nodes, tools, and actions as one directed graph.
#[derive(Debug, Clone, Default)]
pub struct StepGraph {
    graph: DiGraph<StepNode, StepEdge>,
    index: HashMap<String, NodeIndex>,
}

impl StepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(
        &mut self,
        id: &str,
        node: StepNode,
    ) -> Result<NodeIndex> {
        if self.index.contains_key(id) {
            return Err(XmlflowError::Mapping(format!("duplicate step id '{}'", id)));
        }
        let idx = self.graph.add_node(node);
        self.index.insert(id.to_string(), idx);
        Ok(idx)
    }

    pub fn add_edge(
        &mut self,
        edge: &EdgeModel,
        order: usize,
    ) -> Result<()> {
        let lookup = |id: &str| self.index.get(id).copied().ok_or_else(|| XmlflowError::Mapping(format!("edge '{}' references unknown step '{}'", edge.id, id)));
        let (from, to) = (lookup(&edge.source)?, lookup(&edge.target)?);
        if matches!(self.graph[to], StepNode::Builder(_)) {
            return Err(XmlflowError::Mapping(format!("edge '{}' targets builder node '{}'", edge.id, edge.target)));
        }
        self.graph.add_edge(
            from,
            to,
            StepEdge {
                id: edge.id.clone(),
                handle: edge.source_handle.clone(),
                order,
            },
        );
        Ok(())
    }

    pub fn step(
        &self,
        id: &str,
    ) -> Option<&StepNode> {
        self.index.get(id).map(|idx| &self.graph[*idx])
    }

    pub fn contains(
        &self,
        id: &str,
    ) -> bool {
        self.index.contains_key(id)
    }

    fn targets(
        &self,
        id: &str,
        path: Option<&str>,
        all: bool,
    ) -> Vec<&str> {
        let Some(idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut edges: Vec<_> = self.graph.edges_directed(*idx, Direction::Outgoing).filter(|e| all || e.weight().admits(path)).collect();
        edges.sort_by_key(|e| e.weight().order);
        edges
            .into_iter()
            .filter_map(|e| match &self.graph[e.target()] {
                StepNode::Tool(step) => Some(step.id.as_str()),
                StepNode::Action(step) => Some(step.id.as_str()),
                StepNode::Builder(_) => None,
            })
            .collect()
    }

    /// Steps attached to a builder node, in edge order.
    pub fn entry_steps(
        &self,
        builder_id: &str,
    ) -> Vec<&str> {
        self.targets(builder_id, None, true)
    }

    /// Downstream steps of a tool that produced `path`.
    pub fn tool_successors(
        &self,
        id: &str,
        path: Option<&str>,
    ) -> Vec<&str> {
        self.targets(id, path, false)
    }

    /// Downstream steps of an action; every edge is followed.
    pub fn action_successors(
        &self,
        id: &str,
    ) -> Vec<&str> {
        self.targets(id, None, true)
    }

    /// Human-readable dump of the step graph.
    pub fn describe(&self) -> String {
        let mut lines = Vec::new();

        lines.push("=== Step Graph ===".to_string());
        lines.push(format!("Steps: {}, Edges: {}", self.graph.node_count(), self.graph.edge_count()));
        lines.push(String::new());

        lines.push("--- Steps ---".to_string());
        let mut ids: Vec<(&String, &NodeIndex)> = self.index.iter().collect();
        ids.sort_by_key(|(_, idx)| **idx);
        for (id, idx) in &ids {
            let node = &self.graph[**idx];
            let enabled = match node {
                StepNode::Tool(step) => step.enabled,
                StepNode::Action(step) => step.enabled,
                StepNode::Builder(_) => true,
            };
            lines.push(format!("[{}] type: {}{}", id, node.kind(), if enabled { "" } else { " (disabled)" }));
        }
        lines.push(String::new());

        lines.push("--- Edges ---".to_string());
        let mut edges: Vec<_> = self.graph.edge_references().collect();
        edges.sort_by_key(|e| e.weight().order);
        let name = |idx: NodeIndex| ids.iter().find(|(_, i)| **i == idx).map(|(id, _)| id.as_str()).unwrap_or("?");
        for edge in edges {
            let handle = edge.weight().handle.as_deref().unwrap_or(OUTPUT_HANDLE);
            lines.push(format!("{} --[{}]--> {} (id: {})", name(edge.source()), handle, name(edge.target()), edge.weight().id));
        }

        lines.join("\n")
    }
}
