use serde::{Deserialize, Serialize};

use crate::{
    Result,
    model::{GraphRelationship, NodeId, Properties, RelationshipId},
    pipeline::{condition::ConditionSet, source::ValueSource, yes},
    runtime::{DeferredRelationship, ExecutionContext, GraphState, StepOutcome},
};

fn match_properties() -> Vec<String> {
    vec!["id".to_string(), "xml:id".to_string()]
}

fn target_source() -> ValueSource {
    ValueSource::Attribute { name: "target".to_string() }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Direction {
    Outgoing,
    Incoming,
    #[default]
    Both,
}

/// Selects relationships touching the current node.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipFilter {
    /// Relationship type; any type when absent.
    #[serde(default, alias = "type")]
    pub relationship: Option<String>,
    #[serde(default)]
    pub direction: Direction,
    /// Every listed property must be equal.
    #[serde(default, rename = "where")]
    pub matching: Properties,
}

impl RelationshipFilter {
    fn admits(
        &self,
        node: NodeId,
        rel: &GraphRelationship,
    ) -> bool {
        let direction = match self.direction {
            Direction::Outgoing => rel.start == node,
            Direction::Incoming => rel.end == node,
            Direction::Both => true,
        };
        direction && self.relationship.as_ref().is_none_or(|l| *l == rel.label) && self.matching.iter().all(|(k, v)| rel.properties.get(k) == Some(v))
    }

    fn select(
        &self,
        node: NodeId,
        state: &GraphState,
    ) -> Vec<RelationshipId> {
        state.graph.relationships_of(node).into_iter().filter(|id| state.graph.relationship(*id).is_some_and(|r| self.admits(node, r))).collect()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateRelationshipConfig {
    /// Relationship type; resolved from the schema when absent.
    #[serde(default, alias = "type")]
    pub relationship: Option<String>,
    #[serde(default)]
    pub properties: Properties,
    /// Point from the current node to the parent.
    #[serde(default)]
    pub reverse: bool,
}

/// Link the parent node to the current node.
pub fn create_relationship(
    cfg: &CreateRelationshipConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::default();
    let Some(parent) = ctx.parent else {
        return Ok(outcome);
    };
    let node = ctx.ensure_node(state, &mut outcome);
    let (start, end) = if cfg.reverse { (node, parent) } else { (parent, node) };
    let label = match &cfg.relationship {
        Some(label) => label.clone(),
        None => {
            let from = state.graph.node(start).map(|n| n.primary_label().to_string()).unwrap_or_default();
            let to = state.graph.node(end).map(|n| n.primary_label().to_string()).unwrap_or_default();
            state.graph.schema().relationship_type(&from, &to)
        }
    };
    state.graph.create_relationship(&label, start, end, cfg.properties.clone());
    Ok(outcome)
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeferRelationshipConfig {
    #[serde(flatten)]
    pub conditions: ConditionSet,
    #[serde(alias = "type")]
    pub relationship: String,
    /// Where the target reference is read from.
    #[serde(default = "target_source")]
    pub target: ValueSource,
    /// Node properties compared against the reference when no element
    /// carries it as `xml:id`/`id`.
    #[serde(default = "match_properties")]
    pub match_properties: Vec<String>,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub reverse: bool,
    /// Treat whitespace-separated references as several targets.
    #[serde(default = "yes")]
    pub multiple: bool,
}

/// Queue relationships to targets that may not exist yet.
///
/// References are stripped of a leading `#`, so `ref="#p1"` targets `xml:id="p1"`.
pub fn defer_relationship(
    cfg: &DeferRelationshipConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::default();
    if !cfg.conditions.evaluate(ctx.doc, ctx.element) {
        return Ok(outcome);
    }
    let Some(reference) = cfg.target.read_string(ctx, &state.graph, ctx.current) else {
        return Ok(outcome);
    };
    let targets: Vec<&str> = if cfg.multiple { reference.split_whitespace().collect() } else { vec![reference.trim()] };

    let source = ctx.ensure_node(state, &mut outcome);
    for target in targets {
        let target = target.trim_start_matches('#');
        if target.is_empty() {
            continue;
        }
        outcome.deferred.push(DeferredRelationship {
            source,
            target: target.to_string(),
            match_properties: cfg.match_properties.clone(),
            label: cfg.relationship.clone(),
            properties: cfg.properties.clone(),
            reverse: cfg.reverse,
        });
    }
    Ok(outcome)
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRelationshipConfig {
    #[serde(flatten)]
    pub filter: RelationshipFilter,
    #[serde(default)]
    pub properties: Properties,
    /// Retype matching relationships.
    #[serde(default)]
    pub new_type: Option<String>,
}

pub fn update_relationship(
    cfg: &UpdateRelationshipConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    let outcome = StepOutcome::default();
    let Some(node) = ctx.current else {
        return Ok(outcome);
    };
    for id in cfg.filter.select(node, state) {
        if let Some(rel) = state.graph.relationship_mut(id) {
            rel.properties.extend(cfg.properties.clone());
            if let Some(label) = &cfg.new_type {
                rel.label = label.clone();
            }
        }
    }
    Ok(outcome)
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRelationshipConfig {
    #[serde(flatten)]
    pub filter: RelationshipFilter,
}

pub fn delete_relationship(
    cfg: &DeleteRelationshipConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    if let Some(node) = ctx.current {
        for id in cfg.filter.select(node, state) {
            state.graph.remove_relationship(id);
        }
    }
    Ok(StepOutcome::default())
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ReverseRelationshipConfig {
    #[serde(flatten)]
    pub filter: RelationshipFilter,
}

pub fn reverse_relationship(
    cfg: &ReverseRelationshipConfig,
    ctx: &ExecutionContext,
    state: &mut GraphState,
) -> Result<StepOutcome> {
    if let Some(node) = ctx.current {
        for id in cfg.filter.select(node, state) {
            if let Some(rel) = state.graph.relationship_mut(id) {
                std::mem::swap(&mut rel.start, &mut rel.end);
            }
        }
    }
    Ok(StepOutcome::default())
}
