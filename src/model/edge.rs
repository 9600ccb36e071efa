use serde::{Deserialize, Serialize};

/// Connection between a builder node, tool, or action and a downstream step.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EdgeModel {
    pub id: String,
    pub source: String,
    pub target: String,
    /// Output path of the source tool this edge listens to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
}
