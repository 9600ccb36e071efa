use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{
    Config,
    common::ApiData,
    graph::GraphAssembler,
    model::NodeId,
    pipeline::{Mapping, filter::TagFilter, tools::ApiClient},
    xml::{ElementId, XmlDocument},
};

use super::{
    context::{DeferredRelationship, ExecutionContext, GraphState, NodeSpec, SkipFlags},
    deferred::resolve_deferred,
    runner::StepRunner,
};

struct Frame {
    element: ElementId,
    /// Nearest ancestor node.
    parent: Option<NodeId>,
    depth: usize,
}

/// What visiting an element decided for its children.
#[derive(Default)]
struct Visit {
    parent: Option<NodeId>,
    flags: SkipFlags,
    child_filter: Option<TagFilter>,
}

/// Depth-first walk over the document, driving the builders that match each element.
pub struct Walker<'a> {
    mapping: &'a Mapping,
    runner: StepRunner<'a>,
    max_depth: usize,
}

impl<'a> Walker<'a> {
    pub fn new(
        mapping: &'a Mapping,
        config: &'a Config,
        client: &'a Arc<dyn ApiClient>,
    ) -> Self {
        Self {
            mapping,
            runner: StepRunner::new(mapping.steps(), client, &config.fetch),
            max_depth: config.max_depth,
        }
    }

    /// The element matching the start label's builder, or the document root.
    pub fn start_element(
        &self,
        doc: &XmlDocument,
    ) -> Option<ElementId> {
        let root = doc.root()?;
        let Some(label) = self.mapping.start_label() else {
            return Some(root);
        };
        match self.mapping.builder_by_label(label).and_then(|b| doc.find_first(&b.tag_key())) {
            Some(start) => Some(start),
            None => {
                debug!(label, "start label not present in document, walking from root");
                Some(root)
            }
        }
    }

    /// Walk the document and resolve deferred relationships.
    pub async fn walk(
        &self,
        doc: &XmlDocument,
        api_data: &ApiData,
        pending: &mut Vec<JoinHandle<()>>,
    ) -> GraphAssembler {
        let mut state = GraphState::new(GraphAssembler::new(self.mapping.schema()), doc.len());
        let mut deferred = Vec::new();

        let mut stack: Vec<Frame> = self
            .start_element(doc)
            .map(|element| Frame {
                element,
                parent: None,
                depth: 0,
            })
            .into_iter()
            .collect();

        while let Some(frame) = stack.pop() {
            let visit = self.visit(doc, &frame, &mut state, api_data, pending, &mut deferred).await;
            if visit.flags.blocks_descent() {
                continue;
            }
            if frame.depth >= self.max_depth {
                debug!(element = frame.element, depth = frame.depth, "depth ceiling reached");
                continue;
            }

            let skip_tags = match visit.flags.tag_patterns() {
                Ok(patterns) => Some(patterns),
                Err(err) => {
                    warn!(element = frame.element, "ignoring skipChildrenTags: {}", err);
                    None
                }
            };
            let children: Vec<ElementId> = doc
                .children(frame.element)
                .iter()
                .copied()
                .filter(|child| {
                    let tag = doc.tag_key(*child);
                    !skip_tags.as_ref().is_some_and(|p| p.is_match(&tag)) && visit.child_filter.as_ref().is_none_or(|f| f.admits(&tag))
                })
                .collect();
            stack.extend(children.into_iter().rev().map(|element| Frame {
                element,
                parent: visit.parent,
                depth: frame.depth + 1,
            }));
        }

        let resolved = resolve_deferred(doc, &mut state, deferred);
        debug!(resolved, nodes = state.graph.node_count(), relationships = state.graph.relationship_count(), "walk finished");
        state.graph
    }

    async fn visit(
        &self,
        doc: &XmlDocument,
        frame: &Frame,
        state: &mut GraphState,
        api_data: &ApiData,
        pending: &mut Vec<JoinHandle<()>>,
        deferred: &mut Vec<DeferredRelationship>,
    ) -> Visit {
        let tag = doc.tag_key(frame.element);
        let builders = self.mapping.builders_for(&tag);
        if builders.is_empty() {
            return Visit {
                parent: frame.parent,
                ..Default::default()
            };
        }
        debug!(element = frame.element, tag = %tag, builders = builders.len(), "matched element");

        // a node bound before the visit (by an ancestor's step) is shared by every builder
        let prebound = state.node_for(frame.element);
        let mut visit = Visit::default();
        let mut produced: Option<NodeId> = None;

        for builder in builders {
            let prebound = prebound.filter(|n| state.graph.contains_node(*n));
            let mut ctx = ExecutionContext::new(doc, frame.element, frame.parent, builder, api_data, prebound);
            self.runner.run(&builder.id, &mut ctx, state, pending).await;

            if ctx.current.is_none() && !ctx.node_handled && !ctx.flags.drops_node() {
                let node = ctx.create_node(state, NodeSpec::main());
                debug!(element = frame.element, node, label = %builder.label, "synthesized default node");
                ctx.current = Some(node);
                ctx.created.push(node);
            }
            if ctx.flags.drops_node() {
                // nodes reused from other elements stay; the element's own do not
                for node in ctx.created.iter().copied().chain(prebound) {
                    state.remove_node(node);
                }
                ctx.current = ctx.current.filter(|n| state.graph.contains_node(*n));
            }

            visit.flags.merge(&ctx.flags);
            if ctx.child_filter.is_some() {
                visit.child_filter = ctx.child_filter.take();
            }
            deferred.append(&mut ctx.deferred);
            if produced.is_none() {
                produced = ctx.current.filter(|n| state.graph.contains_node(*n));
            }
        }

        visit.parent = produced.or(frame.parent);
        visit
    }
}
