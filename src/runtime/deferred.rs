use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::{model::NodeId, xml::XmlDocument};

use super::context::{DeferredRelationship, GraphState};

/// Create queued relationships once the walk is complete.
///
/// A target is resolved first as an element identifier (`xml:id` or `id`)
/// whose element produced a node, then by comparing the listed node
/// properties. Entries whose source was removed or whose target cannot be
/// found are dropped. Returns the number of relationships created.
pub fn resolve_deferred(
    doc: &XmlDocument,
    state: &mut GraphState,
    deferred: Vec<DeferredRelationship>,
) -> usize {
    if deferred.is_empty() {
        return 0;
    }

    let mut by_identifier: HashMap<&str, usize> = HashMap::new();
    for element in 0..doc.len() {
        if let Some(id) = doc.identifier(element) {
            by_identifier.entry(id).or_insert(element);
        }
    }

    let mut created = 0;
    for entry in deferred {
        if !state.graph.contains_node(entry.source) {
            debug!(target_id = %entry.target, label = %entry.label, "deferred relationship source no longer exists");
            continue;
        }
        let Some(target) = find_target(&by_identifier, state, &entry) else {
            debug!(target_id = %entry.target, label = %entry.label, "deferred relationship target not found");
            continue;
        };
        let (start, end) = if entry.reverse { (target, entry.source) } else { (entry.source, target) };
        if state.graph.create_relationship(&entry.label, start, end, entry.properties).is_some() {
            created += 1;
        }
    }
    created
}

fn find_target(
    by_identifier: &HashMap<&str, usize>,
    state: &GraphState,
    entry: &DeferredRelationship,
) -> Option<NodeId> {
    let key = entry.target.trim_start_matches('#');
    if let Some(node) = by_identifier.get(key).and_then(|element| state.node_for(*element)) {
        return Some(node);
    }
    let value = Value::String(key.to_string());
    entry.match_properties.iter().find_map(|prop| state.graph.find_nodes(prop, &value).into_iter().find(|n| *n != entry.source))
}
