use serde::{Deserialize, Serialize};

use crate::{
    Result, XmlflowError,
    model::{ActionNodeModel, EdgeModel, Properties, SchemaJson, ToolNodeModel},
};

fn yes() -> bool {
    true
}

/// Label and default-property template an XML tag is mapped to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuilderNode {
    pub id: String,
    pub label: String,
    /// XML tag name this builder matches; defaults to the lower-cased label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default)]
    pub properties: Properties,
    /// Copy XML attribute values onto synthesized nodes.
    #[serde(default = "yes")]
    pub include_attributes: bool,
}

impl BuilderNode {
    /// Lower-cased tag name used for element matching.
    pub fn tag_key(&self) -> String {
        self.tag.as_deref().unwrap_or(&self.label).to_lowercase()
    }
}

/// Builder-to-builder link fixing the relationship type between two labels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipModel {
    #[serde(default)]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// The complete, user-authored mapping: schema, element mapping, and pipelines.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MappingModel {
    #[serde(default)]
    pub schema: SchemaJson,
    #[serde(default)]
    pub builder_nodes: Vec<BuilderNode>,
    #[serde(default)]
    pub relationships: Vec<RelationshipModel>,
    #[serde(default)]
    pub tools: Vec<ToolNodeModel>,
    #[serde(default)]
    pub tool_edges: Vec<EdgeModel>,
    #[serde(default)]
    pub actions: Vec<ActionNodeModel>,
    #[serde(default)]
    pub action_edges: Vec<EdgeModel>,
    /// Label whose first matching element roots the walk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_label: Option<String>,
}

impl MappingModel {
    pub fn from_json(s: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(s).map_err(|e| XmlflowError::Mapping(format!("{}", e)))?;
        Self::from_value(value)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        jsonschema::validate(&Self::schema(), &value)?;
        serde_json::from_value::<MappingModel>(value).map_err(|e| XmlflowError::Mapping(format!("{}", e)))
    }

    /// JSON Schema the mapping document is validated against.
    pub fn schema() -> serde_json::Value {
        let step = serde_json::json!({
            "type": "object",
            "required": ["id", "type"],
            "properties": {
                "id": { "type": "string" },
                "type": { "type": "string" },
                "config": { "type": "object" },
                "enabled": { "type": "boolean" },
                "children": { "type": "array", "items": { "type": "string" } }
            }
        });
        let edge = serde_json::json!({
            "type": "object",
            "required": ["id", "source", "target"],
            "properties": {
                "id": { "type": "string" },
                "source": { "type": "string" },
                "target": { "type": "string" },
                "sourceHandle": { "type": ["string", "null"] }
            }
        });

        serde_json::json!({
            "type": "object",
            "properties": {
                "schema": {
                    "type": "object",
                    "properties": {
                        "nodes": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "required": ["label"],
                                "properties": {
                                    "label": { "type": "string" },
                                    "domain": { "type": ["string", "null"] },
                                    "labels": { "type": "array", "items": { "type": "string" } },
                                    "properties": { "type": "array", "items": { "type": "object", "required": ["name"] } }
                                }
                            }
                        },
                        "relationships": {
                            "type": "array",
                            "items": { "type": "object", "required": ["type", "from", "to"] }
                        }
                    }
                },
                "builderNodes": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["id", "label"],
                        "properties": {
                            "id": { "type": "string" },
                            "label": { "type": "string", "minLength": 1 },
                            "tag": { "type": ["string", "null"] },
                            "properties": { "type": "object" },
                            "includeAttributes": { "type": "boolean" }
                        }
                    }
                },
                "relationships": {
                    "type": "array",
                    "items": { "type": "object", "required": ["source", "target", "type"] }
                },
                "tools": { "type": "array", "items": step.clone() },
                "toolEdges": { "type": "array", "items": edge.clone() },
                "actions": { "type": "array", "items": step },
                "actionEdges": { "type": "array", "items": edge },
                "startLabel": { "type": ["string", "null"] }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_from_json() {
        let json = r#"{
            "builderNodes": [{ "id": "b1", "label": "Word", "tag": "W" }],
            "actions": [{ "id": "a1", "type": "set-property", "config": { "property": "k", "value": 1 } }],
            "actionEdges": [{ "id": "e1", "source": "b1", "target": "a1" }],
            "startLabel": "Word"
        }"#;
        let model = MappingModel::from_json(json).unwrap();
        assert_eq!(model.builder_nodes[0].tag_key(), "w");
        assert!(model.builder_nodes[0].include_attributes);
        assert_eq!(model.actions[0].kind, "set-property");
        assert_eq!(model.action_edges[0].source_handle, None);
        assert_eq!(model.start_label.as_deref(), Some("Word"));
    }

    #[test]
    fn test_mapping_tag_defaults_to_label() {
        let json = r#"{ "builderNodes": [{ "id": "b1", "label": "Sentence" }] }"#;
        let model = MappingModel::from_json(json).unwrap();
        assert_eq!(model.builder_nodes[0].tag_key(), "sentence");
    }

    #[test]
    fn test_mapping_schema_violation() {
        let json = r#"{ "builderNodes": [{ "id": "b1" }] }"#;
        let err = MappingModel::from_json(json).unwrap_err();
        assert!(matches!(err, XmlflowError::Mapping(_)));
    }

    #[test]
    fn test_mapping_invalid_json() {
        assert!(MappingModel::from_json("{ not json").is_err());
    }
}
