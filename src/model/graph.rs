use serde::{Deserialize, Serialize};

/// Graph node id, unique for a run.
pub type NodeId = u64;
/// Graph relationship id, unique for a run.
pub type RelationshipId = u64;
/// Property map carried by nodes and relationships.
pub type Properties = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphNode {
    pub id: NodeId,
    /// `labels[0]` is the primary type.
    pub labels: Vec<String>,
    pub properties: Properties,
}

impl GraphNode {
    pub fn primary_label(&self) -> &str {
        self.labels.first().map(String::as_str).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphRelationship {
    pub id: RelationshipId,
    pub label: String,
    pub start: NodeId,
    pub end: NodeId,
    pub properties: Properties,
}

/// One entry of the flat output array.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GraphRecord {
    Node(GraphNode),
    Relationship(GraphRelationship),
}

impl GraphRecord {
    pub fn as_node(&self) -> Option<&GraphNode> {
        match self {
            GraphRecord::Node(node) => Some(node),
            GraphRecord::Relationship(_) => None,
        }
    }

    pub fn as_relationship(&self) -> Option<&GraphRelationship> {
        match self {
            GraphRecord::Node(_) => None,
            GraphRecord::Relationship(rel) => Some(rel),
        }
    }
}
