use serde_json::Value;

use crate::{
    Result,
    common::ApiData,
    graph::GraphAssembler,
    model::{BuilderNode, NodeId, Properties},
    pipeline::filter::{TagFilter, TagPatterns},
    xml::{ElementId, XmlDocument},
};

/// Skip requests raised by tools and actions for one element.
#[derive(Debug, Clone, Default)]
pub struct SkipFlags {
    /// Drop the element entirely: no node, no descent.
    pub skipped: bool,
    /// Drop the element's node but keep walking its children.
    pub skip_main_node: bool,
    pub skip_children: bool,
    /// Child tags (glob patterns) not to descend into.
    pub skip_children_tags: Vec<String>,
}

impl SkipFlags {
    /// OR-combine booleans and union tag lists.
    pub fn merge(
        &mut self,
        other: &SkipFlags,
    ) {
        self.skipped |= other.skipped;
        self.skip_main_node |= other.skip_main_node;
        self.skip_children |= other.skip_children;
        for tag in &other.skip_children_tags {
            if !self.skip_children_tags.contains(tag) {
                self.skip_children_tags.push(tag.clone());
            }
        }
    }

    pub fn drops_node(&self) -> bool {
        self.skipped || self.skip_main_node
    }

    pub fn blocks_descent(&self) -> bool {
        self.skipped || self.skip_children
    }

    pub fn tag_patterns(&self) -> Result<TagPatterns> {
        TagPatterns::new(&self.skip_children_tags)
    }
}

/// Relationship queued until every node exists.
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredRelationship {
    pub source: NodeId,
    /// Identifier of the target: an element `xml:id`/`id`, or a property value.
    pub target: String,
    /// Node properties compared against `target` when no element matches.
    pub match_properties: Vec<String>,
    pub label: String,
    pub properties: Properties,
    /// Point the relationship from the target back to the source.
    pub reverse: bool,
}

/// How a step changed the context's current node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CurrentNode {
    #[default]
    Unchanged,
    Set(NodeId),
    Cleared,
}

/// What a single tool or action contributes to its context.
#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    pub current: CurrentNode,
    pub flags: SkipFlags,
    pub deferred: Vec<DeferredRelationship>,
    /// Restrict descent to admitted child tags.
    pub child_filter: Option<TagFilter>,
    /// A node-creation step ran, whether or not it produced a node.
    pub node_handled: bool,
    /// Nodes the step created, as opposed to existing nodes it made current.
    pub created: Vec<NodeId>,
}

impl StepOutcome {
    /// A freshly created node becomes current.
    pub fn with_current(node: NodeId) -> Self {
        Self {
            current: CurrentNode::Set(node),
            node_handled: true,
            created: vec![node],
            ..Default::default()
        }
    }

    /// An existing node, possibly owned by another element, becomes current.
    pub fn reuse(node: NodeId) -> Self {
        Self {
            current: CurrentNode::Set(node),
            node_handled: true,
            ..Default::default()
        }
    }
}

/// Per-run graph state shared by every context.
pub struct GraphState {
    pub graph: GraphAssembler,
    element_nodes: Vec<Option<NodeId>>,
}

impl GraphState {
    pub fn new(
        graph: GraphAssembler,
        element_count: usize,
    ) -> Self {
        Self {
            graph,
            element_nodes: vec![None; element_count],
        }
    }

    /// Node currently bound to an element, if it still exists.
    pub fn node_for(
        &self,
        element: ElementId,
    ) -> Option<NodeId> {
        self.element_nodes.get(element).copied().flatten().filter(|n| self.graph.contains_node(*n))
    }

    pub fn bind(
        &mut self,
        element: ElementId,
        node: NodeId,
    ) {
        if let Some(slot) = self.element_nodes.get_mut(element) {
            *slot = Some(node);
        }
    }

    /// Remove a node, dropping any element binding that pointed at it.
    pub fn remove_node(
        &mut self,
        node: NodeId,
    ) {
        self.graph.remove_node(node);
        for slot in self.element_nodes.iter_mut() {
            if *slot == Some(node) {
                *slot = None;
            }
        }
    }

    /// Rebind elements from one node to another (after a merge).
    pub fn rebind(
        &mut self,
        from: NodeId,
        to: NodeId,
    ) {
        for slot in self.element_nodes.iter_mut() {
            if *slot == Some(from) {
                *slot = Some(to);
            }
        }
    }
}

/// Options for creating a node on behalf of the current element.
#[derive(Debug, Clone, Default)]
pub struct NodeSpec {
    /// Primary label; the builder label when `None`.
    pub label: Option<String>,
    /// Explicit label list, bypassing schema derivation.
    pub labels: Option<Vec<String>>,
    pub properties: Properties,
    /// Start from the builder's default properties.
    pub include_defaults: bool,
    /// Copy XML attributes, if the builder allows it.
    pub include_attributes: bool,
    pub link_to_parent: bool,
    pub relationship: Option<String>,
}

impl NodeSpec {
    /// The builder's default node: defaults plus attributes, linked to the parent.
    pub fn main() -> Self {
        Self {
            include_defaults: true,
            include_attributes: true,
            link_to_parent: true,
            ..Default::default()
        }
    }
}

/// Context for one (element, builder node) pairing.
///
/// Steps read it and return a [`StepOutcome`]; the runner merges outcomes back.
pub struct ExecutionContext<'a> {
    pub doc: &'a XmlDocument,
    pub element: ElementId,
    pub parent: Option<NodeId>,
    pub builder: &'a BuilderNode,
    pub api_data: &'a ApiData,
    pub current: Option<NodeId>,
    pub flags: SkipFlags,
    pub child_filter: Option<TagFilter>,
    pub node_handled: bool,
    pub deferred: Vec<DeferredRelationship>,
    /// Nodes created for this pairing, in creation order.
    pub created: Vec<NodeId>,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(
        doc: &'a XmlDocument,
        element: ElementId,
        parent: Option<NodeId>,
        builder: &'a BuilderNode,
        api_data: &'a ApiData,
        existing: Option<NodeId>,
    ) -> Self {
        Self {
            doc,
            element,
            parent,
            builder,
            api_data,
            current: existing,
            flags: SkipFlags::default(),
            child_filter: None,
            node_handled: existing.is_some(),
            deferred: Vec::new(),
            created: Vec::new(),
        }
    }

    /// Merge a step's outcome into the context.
    pub fn absorb(
        &mut self,
        outcome: StepOutcome,
    ) {
        match outcome.current {
            CurrentNode::Unchanged => {}
            CurrentNode::Set(node) => self.current = Some(node),
            CurrentNode::Cleared => self.current = None,
        }
        for node in outcome.created {
            if !self.created.contains(&node) {
                self.created.push(node);
            }
        }
        self.flags.merge(&outcome.flags);
        if outcome.child_filter.is_some() {
            self.child_filter = outcome.child_filter;
        }
        self.node_handled |= outcome.node_handled;
        self.deferred.extend(outcome.deferred);
    }

    /// The element's attributes as string properties.
    pub fn attribute_properties(&self) -> Properties {
        self.doc.attributes(self.element).iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect()
    }

    pub fn attribute(
        &self,
        name: &str,
    ) -> Option<&str> {
        self.doc.attribute(self.element, name)
    }

    pub fn text(&self) -> String {
        self.doc.text_content(self.element)
    }

    pub fn tag_key(&self) -> String {
        self.doc.tag_key(self.element)
    }

    /// Create a node for this element, bind it, and link it to the parent.
    pub fn create_node(
        &self,
        state: &mut GraphState,
        spec: NodeSpec,
    ) -> NodeId {
        let label = spec.label.unwrap_or_else(|| self.builder.label.clone());
        let mut props = Properties::new();
        if spec.include_defaults {
            props.extend(self.builder.properties.clone());
        }
        if spec.include_attributes && self.builder.include_attributes {
            props.extend(self.attribute_properties());
        }
        props.extend(spec.properties);

        let node = match spec.labels {
            Some(labels) if !labels.is_empty() => state.graph.create_node(labels, props),
            _ => state.graph.create_labeled_node(&label, props),
        };
        state.bind(self.element, node);

        if spec.link_to_parent {
            if let Some(parent) = self.parent {
                state.graph.link(parent, node, spec.relationship.as_deref());
            }
        }
        node
    }

    /// The node steps operate on, taking earlier changes in `outcome` into account.
    pub fn current_node(
        &self,
        outcome: &StepOutcome,
    ) -> Option<NodeId> {
        match outcome.current {
            CurrentNode::Set(node) => Some(node),
            CurrentNode::Cleared => None,
            CurrentNode::Unchanged => self.current,
        }
    }

    /// The current node, materializing the builder's default node if none exists yet.
    pub fn ensure_node(
        &self,
        state: &mut GraphState,
        outcome: &mut StepOutcome,
    ) -> NodeId {
        if let Some(node) = self.current_node(outcome).filter(|n| state.graph.contains_node(*n)) {
            return node;
        }
        let node = self.create_node(state, NodeSpec::main());
        outcome.current = CurrentNode::Set(node);
        outcome.node_handled = true;
        outcome.created.push(node);
        node
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::{common::MemCache, graph::SchemaIndex};

    fn builder() -> BuilderNode {
        serde_json::from_value(json!({ "id": "b", "label": "Word", "properties": { "lang": "fro" } })).unwrap()
    }

    fn state(doc: &XmlDocument) -> GraphState {
        GraphState::new(GraphAssembler::new(Arc::new(SchemaIndex::new(&Default::default(), &[], &[], "contains"))), doc.len())
    }

    #[test]
    fn test_skip_flags_merge() {
        let mut a = SkipFlags {
            skip_children_tags: vec!["w".into()],
            ..Default::default()
        };
        let b = SkipFlags {
            skip_main_node: true,
            skip_children_tags: vec!["w".into(), "pc".into()],
            ..Default::default()
        };
        a.merge(&b);
        assert!(a.skip_main_node && !a.skip_children);
        assert_eq!(a.skip_children_tags, vec!["w", "pc"]);
        assert!(a.drops_node() && !a.blocks_descent());
    }

    #[test]
    fn test_ensure_node_creates_default_once() {
        let doc = XmlDocument::parse(r#"<s><w lemma="li">li</w></s>"#).unwrap();
        let api: ApiData = Arc::new(MemCache::new(4));
        let b = builder();
        let mut st = state(&doc);
        let parent = st.graph.create_node(vec!["Sentence".into()], Properties::new());
        let ctx = ExecutionContext::new(&doc, 1, Some(parent), &b, &api, None);

        let mut out = StepOutcome::default();
        let first = ctx.ensure_node(&mut st, &mut out);
        let second = ctx.ensure_node(&mut st, &mut out);
        assert_eq!(first, second);
        assert_eq!(out.current, CurrentNode::Set(first));
        assert_eq!(out.created, vec![first]);
        assert!(out.node_handled);

        let node = st.graph.node(first).unwrap();
        assert_eq!(node.labels, vec!["Word"]);
        assert_eq!(node.properties.get("lemma"), Some(&json!("li")));
        assert_eq!(node.properties.get("lang"), Some(&json!("fro")));
        assert_eq!(st.node_for(1), Some(first));
        assert!(st.graph.has_relationship("contains", parent, first));
    }

    #[test]
    fn test_absorb_tracks_created_and_clear() {
        let doc = XmlDocument::parse("<w/>").unwrap();
        let api: ApiData = Arc::new(MemCache::new(4));
        let b = builder();
        let mut ctx = ExecutionContext::new(&doc, 0, None, &b, &api, None);

        ctx.absorb(StepOutcome::with_current(3));
        ctx.absorb(StepOutcome {
            current: CurrentNode::Cleared,
            ..Default::default()
        });
        assert_eq!(ctx.current, None);
        assert_eq!(ctx.created, vec![3]);
        assert!(ctx.node_handled);

        // a reused node becomes current without being owned
        ctx.absorb(StepOutcome::reuse(1));
        assert_eq!(ctx.current, Some(1));
        assert_eq!(ctx.created, vec![3]);
    }

    #[test]
    fn test_remove_node_unbinds_element() {
        let doc = XmlDocument::parse("<w/>").unwrap();
        let mut st = state(&doc);
        let n = st.graph.create_node(vec!["W".into()], Properties::new());
        st.bind(0, n);
        st.remove_node(n);
        assert_eq!(st.node_for(0), None);
    }
}
