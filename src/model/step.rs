use serde::{Deserialize, Serialize};

fn empty_config() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

/// A configured tool as authored in the mapping editor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolNodeModel {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "empty_config")]
    pub config: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

/// A configured action, or an action group when `type` is `group`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionNodeModel {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "empty_config")]
    pub config: serde_json::Value,
    /// Ordered child action ids, only meaningful for groups.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}
