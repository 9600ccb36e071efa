use std::sync::Arc;

use serde_json::Value;

use crate::{
    graph::SchemaIndex,
    model::{GraphNode, GraphRecord, GraphRelationship, NodeId, Properties, RelationshipId},
};

/// Accumulates the output graph for one run.
///
/// Nodes and relationships live in arenas indexed by their id. Removing an
/// entry leaves a tombstone, so ids are monotonic and never reused.
#[derive(Debug, Clone)]
pub struct GraphAssembler {
    nodes: Vec<Option<GraphNode>>,
    relationships: Vec<Option<GraphRelationship>>,
    schema: Arc<SchemaIndex>,
}

impl GraphAssembler {
    pub fn new(schema: Arc<SchemaIndex>) -> Self {
        Self {
            nodes: Vec::new(),
            relationships: Vec::new(),
            schema,
        }
    }

    pub fn schema(&self) -> &SchemaIndex {
        &self.schema
    }

    /// Create a node with the given labels. Schema defaults for the primary
    /// label are applied underneath `properties`.
    pub fn create_node(
        &mut self,
        labels: Vec<String>,
        properties: Properties,
    ) -> NodeId {
        let id = self.nodes.len() as NodeId;
        let mut props = labels.first().map(|l| self.schema.defaults_for(l)).unwrap_or_default();
        props.extend(properties);
        self.nodes.push(Some(GraphNode {
            id,
            labels,
            properties: props,
        }));
        id
    }

    /// Create a node labelled per the schema for `label`.
    pub fn create_labeled_node(
        &mut self,
        label: &str,
        properties: Properties,
    ) -> NodeId {
        let labels = self.schema.labels_for(label);
        self.create_node(labels, properties)
    }

    /// Create a relationship. Returns `None` if either endpoint does not exist.
    pub fn create_relationship(
        &mut self,
        label: &str,
        start: NodeId,
        end: NodeId,
        properties: Properties,
    ) -> Option<RelationshipId> {
        if !self.contains_node(start) || !self.contains_node(end) {
            return None;
        }
        let id = self.relationships.len() as RelationshipId;
        self.relationships.push(Some(GraphRelationship {
            id,
            label: label.to_string(),
            start,
            end,
            properties,
        }));
        Some(id)
    }

    /// Link `parent` to `child` using the schema-resolved type unless `label` is given.
    pub fn link(
        &mut self,
        parent: NodeId,
        child: NodeId,
        label: Option<&str>,
    ) -> Option<RelationshipId> {
        let label = match label {
            Some(l) => l.to_string(),
            None => {
                let from = self.node(parent)?.primary_label().to_string();
                let to = self.node(child)?.primary_label().to_string();
                self.schema.relationship_type(&from, &to)
            }
        };
        self.create_relationship(&label, parent, child, Properties::new())
    }

    pub fn contains_node(
        &self,
        id: NodeId,
    ) -> bool {
        self.node(id).is_some()
    }

    pub fn node(
        &self,
        id: NodeId,
    ) -> Option<&GraphNode> {
        self.nodes.get(id as usize).and_then(Option::as_ref)
    }

    pub fn node_mut(
        &mut self,
        id: NodeId,
    ) -> Option<&mut GraphNode> {
        self.nodes.get_mut(id as usize).and_then(Option::as_mut)
    }

    pub fn relationship(
        &self,
        id: RelationshipId,
    ) -> Option<&GraphRelationship> {
        self.relationships.get(id as usize).and_then(Option::as_ref)
    }

    pub fn relationship_mut(
        &mut self,
        id: RelationshipId,
    ) -> Option<&mut GraphRelationship> {
        self.relationships.get_mut(id as usize).and_then(Option::as_mut)
    }

    /// Set a property on a node; no-op for missing nodes.
    pub fn set_property(
        &mut self,
        id: NodeId,
        key: &str,
        value: Value,
    ) {
        if let Some(node) = self.node_mut(id) {
            node.properties.insert(key.to_string(), value);
        }
    }

    pub fn property(
        &self,
        id: NodeId,
        key: &str,
    ) -> Option<&Value> {
        self.node(id).and_then(|n| n.properties.get(key))
    }

    /// Remove a node and every relationship touching it.
    pub fn remove_node(
        &mut self,
        id: NodeId,
    ) -> Option<GraphNode> {
        let node = self.nodes.get_mut(id as usize).and_then(Option::take)?;
        for slot in self.relationships.iter_mut() {
            if slot.as_ref().is_some_and(|r| r.start == id || r.end == id) {
                *slot = None;
            }
        }
        Some(node)
    }

    pub fn remove_relationship(
        &mut self,
        id: RelationshipId,
    ) -> Option<GraphRelationship> {
        self.relationships.get_mut(id as usize).and_then(Option::take)
    }

    /// Ids of relationships touching `node`, in creation order.
    pub fn relationships_of(
        &self,
        node: NodeId,
    ) -> Vec<RelationshipId> {
        self.iter_relationships().filter(|r| r.start == node || r.end == node).map(|r| r.id).collect()
    }

    pub fn has_relationship(
        &self,
        label: &str,
        start: NodeId,
        end: NodeId,
    ) -> bool {
        self.iter_relationships().any(|r| r.label == label && r.start == start && r.end == end)
    }

    /// Nodes whose property `key` equals `value`, in creation order.
    pub fn find_nodes(
        &self,
        key: &str,
        value: &Value,
    ) -> Vec<NodeId> {
        self.iter_nodes().filter(|n| n.properties.get(key) == Some(value)).map(|n| n.id).collect()
    }

    pub fn iter_nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter().flatten()
    }

    pub fn iter_relationships(&self) -> impl Iterator<Item = &GraphRelationship> {
        self.relationships.iter().flatten()
    }

    pub fn node_count(&self) -> usize {
        self.iter_nodes().count()
    }

    pub fn relationship_count(&self) -> usize {
        self.iter_relationships().count()
    }

    /// Surviving nodes followed by surviving relationships, each in creation order.
    pub fn into_records(self) -> Vec<GraphRecord> {
        let nodes = self.nodes.into_iter().flatten().map(GraphRecord::Node);
        let rels = self.relationships.into_iter().flatten().map(GraphRecord::Relationship);
        nodes.chain(rels).collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn props(v: Value) -> Properties {
        v.as_object().cloned().unwrap_or_default()
    }

    fn assembler() -> GraphAssembler {
        GraphAssembler::new(Arc::new(SchemaIndex::default()))
    }

    #[test]
    fn test_monotonic_ids_never_reused() {
        let mut graph = assembler();
        let a = graph.create_node(vec!["A".into()], Properties::new());
        let b = graph.create_node(vec!["B".into()], Properties::new());
        graph.remove_node(b);
        let c = graph.create_node(vec!["C".into()], Properties::new());

        assert_eq!((a, b, c), (0, 1, 2));
        assert!(graph.node(b).is_none());
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn test_remove_node_purges_relationships() {
        let mut graph = assembler();
        let a = graph.create_node(vec!["A".into()], Properties::new());
        let b = graph.create_node(vec!["B".into()], Properties::new());
        let c = graph.create_node(vec!["C".into()], Properties::new());
        graph.create_relationship("r", a, b, Properties::new()).unwrap();
        graph.create_relationship("r", b, c, Properties::new()).unwrap();
        graph.create_relationship("r", a, c, Properties::new()).unwrap();

        graph.remove_node(b);
        let rels: Vec<_> = graph.iter_relationships().map(|r| (r.start, r.end)).collect();
        assert_eq!(rels, vec![(a, c)]);
    }

    #[test]
    fn test_relationship_requires_endpoints() {
        let mut graph = assembler();
        let a = graph.create_node(vec!["A".into()], Properties::new());
        assert!(graph.create_relationship("r", a, 42, Properties::new()).is_none());
        assert_eq!(graph.relationship_count(), 0);
    }

    #[test]
    fn test_link_uses_default_relationship() {
        let mut graph = GraphAssembler::new(Arc::new(SchemaIndex::new(&Default::default(), &[], &[], "contains")));
        let a = graph.create_node(vec!["A".into()], Properties::new());
        let b = graph.create_node(vec!["B".into()], Properties::new());
        let rel = graph.link(a, b, None).unwrap();
        assert_eq!(graph.relationship(rel).unwrap().label, "contains");
        let rel = graph.link(a, b, Some("HAS")).unwrap();
        assert_eq!(graph.relationship(rel).unwrap().label, "HAS");
    }

    #[test]
    fn test_into_records_orders_nodes_then_relationships() {
        let mut graph = assembler();
        let a = graph.create_node(vec!["A".into()], props(json!({"k": 1})));
        let b = graph.create_node(vec!["B".into()], Properties::new());
        graph.create_relationship("r", a, b, Properties::new());
        let c = graph.create_node(vec!["C".into()], Properties::new());
        graph.create_relationship("r", b, c, Properties::new());

        let records = graph.into_records();
        let kinds: Vec<bool> = records.iter().map(|r| r.as_node().is_some()).collect();
        assert_eq!(kinds, vec![true, true, true, false, false]);
    }

    #[test]
    fn test_find_nodes_by_property() {
        let mut graph = assembler();
        graph.create_node(vec!["A".into()], props(json!({"id": "x"})));
        let b = graph.create_node(vec!["A".into()], props(json!({"id": "y"})));
        assert_eq!(graph.find_nodes("id", &json!("y")), vec![b]);
    }
}
