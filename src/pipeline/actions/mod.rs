//! Graph-mutation steps.
//!
//! Every action kind is a variant of [`ActionKind`] carrying its typed config,
//! decoded from the mapping's `{type, config}` record. Groups are not kinds;
//! they are expanded by the step runner.

pub mod control;
pub mod create;
pub mod node;
pub mod property;
pub mod relationship;
pub mod tokens;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    Result, XmlflowError,
    runtime::{ExecutionContext, GraphState, StepOutcome},
};

use control::*;
use create::*;
use node::*;
use property::*;
use relationship::*;
use tokens::*;

/// Kind tag of an action group container.
pub const GROUP_KIND: &str = "group";

#[derive(Serialize, Deserialize, Debug, Clone, strum::AsRefStr)]
#[serde(tag = "type", content = "config", rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ActionKind {
    // node creation
    CreateNode(CreateNodeConfig),
    CreateNodeFromText(CreateNodeFromTextConfig),
    CreateTokenNodes(CreateTokenNodesConfig),
    CreateNodeWithAttributes(CreateNodeWithAttributesConfig),
    CreateNodeComplete(CreateNodeCompleteConfig),
    CreateConditionalNode(CreateConditionalNodeConfig),
    CreateHierarchicalNode(CreateHierarchicalNodeConfig),
    CreateNodeFilteredChildren(CreateNodeFilteredChildrenConfig),

    // properties
    SetProperty(SetPropertyConfig),
    ExtractAttribute(ExtractAttributeConfig),
    ExtractText(ExtractTextConfig),
    CopyProperty(CopyPropertyConfig),
    RenameProperty(RenamePropertyConfig),
    RemoveProperty(RemovePropertyConfig),
    MergeProperties(MergePropertiesConfig),
    SplitProperty(SplitPropertyConfig),
    FormatProperty(FormatPropertyConfig),
    TransformText(TransformTextConfig),
    ExtractAndNormalizeAttributes(ExtractAndNormalizeConfig),
    ExtractAndComputeProperty(ExtractAndComputeConfig),
    NormalizeAndDeduplicate(NormalizeAndDeduplicateConfig),
    SetPropertiesFromAttributes(SetPropertiesFromAttributesConfig),

    // relationships
    CreateRelationship(CreateRelationshipConfig),
    DeferRelationship(DeferRelationshipConfig),
    UpdateRelationship(UpdateRelationshipConfig),
    DeleteRelationship(DeleteRelationshipConfig),
    ReverseRelationship(ReverseRelationshipConfig),

    // nodes
    UpdateNode(UpdateNodeConfig),
    DeleteNode(DeleteNodeConfig),
    CloneNode(CloneNodeConfig),
    MergeNodes(MergeNodesConfig),
    ValidateNode(ValidateNodeConfig),
    TagNode(TagNodeConfig),
    AddMetadata(AddMetadataConfig),
    SetTimestamp(SetTimestampConfig),
    AddLabel(LabelConfig),
    RemoveLabel(LabelConfig),

    // control
    Skip(SkipConfig),
}

impl ActionKind {
    /// Decode a kind tag and its config record.
    pub fn decode(
        kind: &str,
        config: &Value,
    ) -> Result<Self> {
        serde_json::from_value(json!({ "type": kind, "config": config })).map_err(|err| XmlflowError::Action(format!("invalid '{}' action: {}", kind, err)))
    }

    /// Run the action against one element context.
    pub fn execute(
        &self,
        ctx: &ExecutionContext,
        state: &mut GraphState,
    ) -> Result<StepOutcome> {
        match self {
            ActionKind::CreateNode(cfg) => create_node(cfg, ctx, state),
            ActionKind::CreateNodeFromText(cfg) => create_node_from_text(cfg, ctx, state),
            ActionKind::CreateTokenNodes(cfg) => create_token_nodes(cfg, ctx, state),
            ActionKind::CreateNodeWithAttributes(cfg) => create_node_with_attributes(cfg, ctx, state),
            ActionKind::CreateNodeComplete(cfg) => create_node_complete(cfg, ctx, state),
            ActionKind::CreateConditionalNode(cfg) => create_conditional_node(cfg, ctx, state),
            ActionKind::CreateHierarchicalNode(cfg) => create_hierarchical_node(cfg, ctx, state),
            ActionKind::CreateNodeFilteredChildren(cfg) => create_node_filtered_children(cfg, ctx, state),

            ActionKind::SetProperty(cfg) => set_property(cfg, ctx, state),
            ActionKind::ExtractAttribute(cfg) => extract_attribute(cfg, ctx, state),
            ActionKind::ExtractText(cfg) => extract_text(cfg, ctx, state),
            ActionKind::CopyProperty(cfg) => copy_property(cfg, ctx, state),
            ActionKind::RenameProperty(cfg) => rename_property(cfg, ctx, state),
            ActionKind::RemoveProperty(cfg) => remove_property(cfg, ctx, state),
            ActionKind::MergeProperties(cfg) => merge_properties(cfg, ctx, state),
            ActionKind::SplitProperty(cfg) => split_property(cfg, ctx, state),
            ActionKind::FormatProperty(cfg) => format_property(cfg, ctx, state),
            ActionKind::TransformText(cfg) => transform_text(cfg, ctx, state),
            ActionKind::ExtractAndNormalizeAttributes(cfg) => extract_and_normalize(cfg, ctx, state),
            ActionKind::ExtractAndComputeProperty(cfg) => extract_and_compute(cfg, ctx, state),
            ActionKind::NormalizeAndDeduplicate(cfg) => normalize_and_deduplicate(cfg, ctx, state),
            ActionKind::SetPropertiesFromAttributes(cfg) => set_properties_from_attributes(cfg, ctx, state),

            ActionKind::CreateRelationship(cfg) => create_relationship(cfg, ctx, state),
            ActionKind::DeferRelationship(cfg) => defer_relationship(cfg, ctx, state),
            ActionKind::UpdateRelationship(cfg) => update_relationship(cfg, ctx, state),
            ActionKind::DeleteRelationship(cfg) => delete_relationship(cfg, ctx, state),
            ActionKind::ReverseRelationship(cfg) => reverse_relationship(cfg, ctx, state),

            ActionKind::UpdateNode(cfg) => update_node(cfg, ctx, state),
            ActionKind::DeleteNode(cfg) => delete_node(cfg, ctx, state),
            ActionKind::CloneNode(cfg) => clone_node(cfg, ctx, state),
            ActionKind::MergeNodes(cfg) => merge_nodes(cfg, ctx, state),
            ActionKind::ValidateNode(cfg) => validate_node(cfg, ctx, state),
            ActionKind::TagNode(cfg) => tag_node(cfg, ctx, state),
            ActionKind::AddMetadata(cfg) => add_metadata(cfg, ctx, state),
            ActionKind::SetTimestamp(cfg) => set_timestamp(cfg, ctx, state),
            ActionKind::AddLabel(cfg) => add_label(cfg, ctx, state),
            ActionKind::RemoveLabel(cfg) => remove_label(cfg, ctx, state),

            ActionKind::Skip(cfg) => skip(cfg, ctx, state),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::{
        common::{ApiData, MemCache},
        graph::{GraphAssembler, SchemaIndex},
        model::{BuilderNode, NodeId, Properties},
        runtime::{CurrentNode, NodeSpec},
        xml::{ElementId, XmlDocument},
    };

    /// One document, a `Word` builder, and the graph state actions write to.
    pub(crate) struct Fixture {
        pub doc: XmlDocument,
        pub builder: BuilderNode,
        pub api: ApiData,
        pub state: GraphState,
        current: Vec<Option<NodeId>>,
        last: Option<NodeId>,
    }

    impl Fixture {
        pub fn new(xml: &str) -> Self {
            let doc = XmlDocument::parse(xml).unwrap();
            let builder: BuilderNode = serde_json::from_value(json!({ "id": "b", "label": "Word", "properties": { "lang": "fro" } })).unwrap();
            let schema = Arc::new(SchemaIndex::new(&Default::default(), &[], &[], "contains"));
            let state = GraphState::new(GraphAssembler::new(schema), doc.len());
            let current = vec![None; doc.len()];
            Self {
                doc,
                builder,
                api: Arc::new(MemCache::new(16)),
                state,
                current,
                last: None,
            }
        }

        fn parent_of(
            &self,
            element: ElementId,
        ) -> Option<NodeId> {
            self.doc.ancestors(element).find_map(|a| self.current[a])
        }

        pub fn try_run(
            &mut self,
            element: ElementId,
            action: &ActionKind,
        ) -> Result<StepOutcome> {
            let parent = self.parent_of(element);
            let ctx = ExecutionContext::new(&self.doc, element, parent, &self.builder, &self.api, self.current[element]);
            let out = action.execute(&ctx, &mut self.state)?;
            match out.current {
                CurrentNode::Set(node) => self.current[element] = Some(node),
                CurrentNode::Cleared => self.current[element] = None,
                CurrentNode::Unchanged => {}
            }
            self.last = self.current[element];
            Ok(out)
        }

        pub fn run(
            &mut self,
            element: ElementId,
            action: &ActionKind,
        ) -> StepOutcome {
            self.try_run(element, action).unwrap()
        }

        /// Create the builder's default node for `element` and make it current.
        pub fn main_node(
            &mut self,
            element: ElementId,
        ) -> NodeId {
            let parent = self.parent_of(element);
            let ctx = ExecutionContext::new(&self.doc, element, parent, &self.builder, &self.api, None);
            let node = ctx.create_node(&mut self.state, NodeSpec::main());
            self.current[element] = Some(node);
            node
        }

        /// The node the last run left current.
        pub fn current(
            &self,
            out: &StepOutcome,
        ) -> NodeId {
            match out.current {
                CurrentNode::Set(node) => node,
                _ => self.last.unwrap(),
            }
        }

        pub fn props(
            &self,
            node: NodeId,
        ) -> Properties {
            self.state.graph.node(node).unwrap().properties.clone()
        }
    }

    #[test]
    fn test_decode_kinds() {
        let action = ActionKind::decode("create-token-nodes", &json!({ "splitBy": "" })).unwrap();
        assert_eq!(action.as_ref(), "create-token-nodes");
        assert!(matches!(action, ActionKind::CreateTokenNodes(ref c) if c.split_by.is_empty() && c.label == "Token"));

        let action = ActionKind::decode("skip", &json!({})).unwrap();
        assert_eq!(action.as_ref(), "skip");
    }

    #[test]
    fn test_decode_errors() {
        let err = ActionKind::decode("teleport-node", &json!({})).unwrap_err();
        assert!(matches!(err, XmlflowError::Action(ref m) if m.contains("teleport-node")));
        assert!(ActionKind::decode("set-property", &json!({ "value": 1 })).is_err());
        assert!(ActionKind::decode(GROUP_KIND, &json!({})).is_err());
    }
}
