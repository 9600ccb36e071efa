use std::collections::HashMap;

use crate::model::{BuilderNode, Properties, RelationshipModel, SchemaJson};

/// Lookup tables derived from the schema and builder-level relationships.
#[derive(Debug, Clone, Default)]
pub struct SchemaIndex {
    labels: HashMap<String, Vec<String>>,
    defaults: HashMap<String, Properties>,
    relationships: HashMap<(String, String), String>,
    default_relationship: String,
}

impl SchemaIndex {
    pub fn new(
        schema: &SchemaJson,
        builders: &[BuilderNode],
        relationships: &[RelationshipModel],
        default_relationship: &str,
    ) -> Self {
        let mut labels = HashMap::new();
        let mut defaults = HashMap::new();
        for node in &schema.nodes {
            let mut derived = vec![node.label.clone()];
            for extra in node.labels.iter().chain(node.domain.iter()) {
                if !derived.contains(extra) {
                    derived.push(extra.clone());
                }
            }
            labels.insert(node.label.clone(), derived);

            let props: Properties = node.properties.iter().filter_map(|p| p.default.clone().map(|v| (p.name.clone(), v))).collect();
            if !props.is_empty() {
                defaults.insert(node.label.clone(), props);
            }
        }

        let mut table = HashMap::new();
        for rel in &schema.relationships {
            table.insert((rel.from.clone(), rel.to.clone()), rel.kind.clone());
        }
        // builder-level links take priority over schema domains
        let builder_label = |id: &str| builders.iter().find(|b| b.id == id).map(|b| b.label.clone());
        for rel in relationships {
            if let (Some(from), Some(to)) = (builder_label(&rel.source), builder_label(&rel.target)) {
                table.insert((from, to), rel.kind.clone());
            }
        }

        Self {
            labels,
            defaults,
            relationships: table,
            default_relationship: default_relationship.to_string(),
        }
    }

    /// Ordered labels for a primary label: itself, extra labels, then domain.
    pub fn labels_for(
        &self,
        label: &str,
    ) -> Vec<String> {
        self.labels.get(label).cloned().unwrap_or_else(|| vec![label.to_string()])
    }

    /// Schema property defaults for a label.
    pub fn defaults_for(
        &self,
        label: &str,
    ) -> Properties {
        self.defaults.get(label).cloned().unwrap_or_default()
    }

    /// Relationship type linking `from` to `to`, falling back to the default type.
    pub fn relationship_type(
        &self,
        from: &str,
        to: &str,
    ) -> String {
        self.relationships.get(&(from.to_string(), to.to_string())).cloned().unwrap_or_else(|| self.default_relationship.clone())
    }

    pub fn default_relationship(&self) -> &str {
        &self.default_relationship
    }
}
