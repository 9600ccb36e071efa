use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
};

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use crate::{
    FetchConfig, Result,
    pipeline::{
        ActionBody, ActionStep, StepGraph, StepNode, ToolStep,
        tools::{ApiClient, ToolEnv, ToolOutput},
    },
};

use super::context::{ExecutionContext, GraphState};

/// A scheduled step and the payload its templates resolve against.
struct Pending<'g> {
    id: &'g str,
    payload: Option<Value>,
}

/// Payload a fetch tool hands to its successors.
///
/// An awaited fetch carries its own response data, and nothing when it failed.
/// A detached fetch has no response yet, so whatever `apiData` holds is used.
fn fetched_payload(
    output: &ToolOutput,
    key: &str,
    ctx: &ExecutionContext<'_>,
) -> Option<Value> {
    if output.output_path.is_none() {
        return ctx.api_data.get(&key.to_string());
    }
    match output.result.get("success") {
        Some(Value::Bool(true)) => output.result.get("data").cloned(),
        _ => None,
    }
}

/// Runs the steps attached to a builder node for one element.
///
/// Steps are scheduled breadth-first from the builder's outgoing edges; a tool
/// only continues along edges matching its output path. Each step runs at most
/// once per context.
pub struct StepRunner<'a> {
    steps: &'a StepGraph,
    client: &'a Arc<dyn ApiClient>,
    fetch: &'a FetchConfig,
}

impl<'a> StepRunner<'a> {
    pub fn new(
        steps: &'a StepGraph,
        client: &'a Arc<dyn ApiClient>,
        fetch: &'a FetchConfig,
    ) -> Self {
        Self { steps, client, fetch }
    }

    pub async fn run(
        &self,
        builder_id: &str,
        ctx: &mut ExecutionContext<'_>,
        state: &mut GraphState,
        pending: &mut Vec<JoinHandle<()>>,
    ) {
        let mut queue: VecDeque<Pending<'a>> = self.steps.entry_steps(builder_id).into_iter().map(|id| Pending { id, payload: None }).collect();
        let mut visited: HashSet<&'a str> = HashSet::new();

        while let Some(Pending { id, payload }) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            let next = match self.steps.step(id) {
                Some(StepNode::Tool(step)) => self.run_tool(step, payload, ctx, state, pending).await,
                Some(StepNode::Action(step)) => self.run_action(step, payload, ctx, state, &mut visited),
                _ => None,
            };
            if let Some((ids, payload)) = next {
                queue.extend(ids.into_iter().map(|id| Pending { id, payload: payload.clone() }));
            }
        }
    }

    /// Execute a tool; returns the successors to schedule and their payload.
    async fn run_tool(
        &self,
        step: &'a ToolStep,
        payload: Option<Value>,
        ctx: &mut ExecutionContext<'_>,
        state: &mut GraphState,
        pending: &mut Vec<JoinHandle<()>>,
    ) -> Option<(Vec<&'a str>, Option<Value>)> {
        if !step.enabled {
            trace!(step = %step.id, "tool disabled");
            return None;
        }
        trace!(step = %step.id, kind = step.tool.as_ref(), element = ctx.element, "running tool");

        let mut env = ToolEnv {
            client: self.client,
            fetch: self.fetch,
            pending,
        };
        let output: Result<ToolOutput> = match step.resolve(payload.as_ref()) {
            Ok(tool) => tool.execute(ctx, state, &mut env).await,
            Err(err) => Err(err),
        };
        let output = match output {
            Ok(output) => output,
            Err(err) => {
                warn!(step = %step.id, element = ctx.element, "tool failed: {}", err);
                return None;
            }
        };

        let successors = self.steps.tool_successors(&step.id, output.output_path.as_deref());
        let payload = match step.tool.result_key() {
            Some(key) => fetched_payload(&output, key, ctx),
            None => payload,
        };
        ctx.absorb(output.outcome);
        Some((successors, payload))
    }

    /// Execute an action or expand a group; successors inherit the payload.
    fn run_action(
        &self,
        step: &'a ActionStep,
        payload: Option<Value>,
        ctx: &mut ExecutionContext<'_>,
        state: &mut GraphState,
        visited: &mut HashSet<&'a str>,
    ) -> Option<(Vec<&'a str>, Option<Value>)> {
        if !step.enabled {
            trace!(step = %step.id, "action disabled");
            return None;
        }
        self.apply_action(step, payload.as_ref(), ctx, state, visited);
        Some((self.steps.action_successors(&step.id), payload))
    }

    fn apply_action(
        &self,
        step: &'a ActionStep,
        payload: Option<&Value>,
        ctx: &mut ExecutionContext<'_>,
        state: &mut GraphState,
        visited: &mut HashSet<&'a str>,
    ) {
        if let ActionBody::Group { children } = &step.body {
            trace!(step = %step.id, children = children.len(), "expanding group");
            for child in children {
                let Some(StepNode::Action(child)) = self.steps.step(child) else {
                    continue;
                };
                if child.enabled && visited.insert(child.id.as_str()) {
                    self.apply_action(child, payload, ctx, state, visited);
                }
            }
            return;
        }

        trace!(step = %step.id, element = ctx.element, "running action");
        let outcome = step.resolve(payload).and_then(|action| match action {
            Some(action) => action.execute(ctx, state).map(Some),
            None => Ok(None),
        });
        match outcome {
            Ok(Some(outcome)) => ctx.absorb(outcome),
            Ok(None) => {}
            Err(err) => warn!(step = %step.id, element = ctx.element, "action failed: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        Config,
        common::{ApiData, MemCache},
        graph::GraphAssembler,
        pipeline::{Mapping, tools::tests::EchoClient},
        xml::XmlDocument,
    };

    struct Harness {
        mapping: Mapping,
        doc: XmlDocument,
        api: ApiData,
        state: GraphState,
        config: Config,
        client: Arc<dyn ApiClient>,
    }

    impl Harness {
        fn new(
            mapping: serde_json::Value,
            xml: &str,
        ) -> Self {
            let config = Config::default();
            let mapping = Mapping::from_json(&mapping.to_string(), &config).unwrap();
            let doc = XmlDocument::parse(xml).unwrap();
            let state = GraphState::new(GraphAssembler::new(mapping.schema()), doc.len());
            Self {
                mapping,
                doc,
                api: Arc::new(MemCache::new(16)),
                state,
                config,
                client: Arc::new(EchoClient),
            }
        }

        /// Run the first builder against `element`; returns the context's current node and flags.
        async fn run(
            &mut self,
            element: usize,
        ) -> (Option<u64>, bool) {
            let builder = self.mapping.builders_for(&self.doc.tag_key(element))[0];
            let runner = StepRunner::new(self.mapping.steps(), &self.client, &self.config.fetch);
            let mut ctx = ExecutionContext::new(&self.doc, element, None, builder, &self.api, None);
            let mut pending = Vec::new();
            runner.run(&builder.id, &mut ctx, &mut self.state, &mut pending).await;
            (ctx.current, ctx.flags.drops_node())
        }
    }

    fn branching() -> serde_json::Value {
        json!({
            "builderNodes": [{ "id": "b", "label": "Word", "tag": "w" }],
            "tools": [{ "id": "t-if", "type": "if", "config": { "conditions": [{ "type": "attribute-equals", "name": "pos", "value": "DET" }] } }],
            "toolEdges": [{ "id": "e1", "source": "b", "target": "t-if" }],
            "actions": [
                { "id": "a-det", "type": "create-node", "config": { "label": "Determiner" } },
                { "id": "a-other", "type": "create-node", "config": { "label": "Other" } },
                { "id": "a-tag", "type": "set-property", "config": { "property": "seen", "value": true } }
            ],
            "actionEdges": [
                { "id": "e2", "source": "t-if", "target": "a-det", "sourceHandle": "true" },
                { "id": "e3", "source": "t-if", "target": "a-other", "sourceHandle": "false" },
                { "id": "e4", "source": "a-det", "target": "a-tag" },
                { "id": "e5", "source": "a-other", "target": "a-tag" }
            ]
        })
    }

    #[tokio::test]
    async fn test_follows_output_path() {
        let mut h = Harness::new(branching(), r#"<r><w pos="DET">li</w><w pos="NOM">rois</w></r>"#);

        let (node, _) = h.run(1).await;
        let node = h.state.graph.node(node.unwrap()).unwrap();
        assert_eq!(node.labels, vec!["Determiner"]);
        assert_eq!(node.properties.get("seen"), Some(&json!(true)));

        let (node, _) = h.run(2).await;
        assert_eq!(h.state.graph.node(node.unwrap()).unwrap().labels, vec!["Other"]);
        assert_eq!(h.state.graph.node_count(), 2);
    }

    #[tokio::test]
    async fn test_disabled_steps_stop_the_chain() {
        let mut mapping = branching();
        mapping["tools"][0]["enabled"] = json!(false);
        let mut h = Harness::new(mapping, r#"<r><w pos="DET">li</w></r>"#);
        let (node, _) = h.run(1).await;
        assert_eq!(node, None);
        assert_eq!(h.state.graph.node_count(), 0);
    }

    #[tokio::test]
    async fn test_group_runs_children_in_order() {
        let mapping = json!({
            "builderNodes": [{ "id": "b", "label": "Word", "tag": "w" }],
            "actions": [
                { "id": "a1", "type": "set-property", "config": { "property": "k", "value": "first" } },
                { "id": "a2", "type": "set-property", "config": { "property": "k", "value": "second" } },
                { "id": "g", "type": "group", "children": ["a1", "a2"] },
                { "id": "after", "type": "set-property", "config": { "property": "done", "value": true } }
            ],
            "actionEdges": [
                { "id": "e1", "source": "b", "target": "g" },
                { "id": "e2", "source": "g", "target": "after" }
            ]
        });
        let mut h = Harness::new(mapping.clone(), "<w>li</w>");
        let (node, _) = h.run(0).await;
        let node = h.state.graph.node(node.unwrap()).unwrap();
        assert_eq!(node.properties.get("k"), Some(&json!("second")));
        assert_eq!(node.properties.get("done"), Some(&json!(true)));

        let mut disabled = mapping;
        disabled["actions"][2]["enabled"] = json!(false);
        let mut h = Harness::new(disabled, "<w>li</w>");
        assert_eq!(h.run(0).await.0, None);
    }

    #[tokio::test]
    async fn test_failed_step_contributes_nothing() {
        let mapping = json!({
            "builderNodes": [{ "id": "b", "label": "Word", "tag": "w" }],
            "tools": [{ "id": "t", "type": "window", "config": { "size": 0, "target": "w" } }],
            "toolEdges": [{ "id": "e1", "source": "b", "target": "t" }],
            "actions": [{ "id": "a", "type": "create-node", "config": {} }],
            "actionEdges": [{ "id": "e2", "source": "t", "target": "a" }]
        });
        let mut h = Harness::new(mapping, "<w>li</w>");
        assert_eq!(h.run(0).await.0, None);
        assert_eq!(h.state.graph.node_count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_payload_feeds_templates() {
        let mapping = json!({
            "builderNodes": [{ "id": "b", "label": "Person", "tag": "persName" }],
            "tools": [{ "id": "t", "type": "fetch-api", "config": { "provider": "viaf", "key": "person" } }],
            "toolEdges": [{ "id": "e1", "source": "b", "target": "t" }],
            "actions": [
                { "id": "ok", "type": "set-property", "config": { "property": "name", "value": "{{ $json.name }}" } },
                { "id": "ko", "type": "set-property", "config": { "property": "unresolved", "value": true } },
                { "id": "ko-name", "type": "set-property", "config": { "property": "name", "value": "{{ $json.name }}" } }
            ],
            "actionEdges": [
                { "id": "e2", "source": "t", "target": "ok", "sourceHandle": "success" },
                { "id": "e3", "source": "t", "target": "ko", "sourceHandle": "error" },
                { "id": "e4", "source": "ko", "target": "ko-name" }
            ]
        });
        let mut h = Harness::new(mapping, r#"<r><persName ref="viaf:1"/><persName ref="missing"/></r>"#);

        let (node, _) = h.run(1).await;
        let node = h.state.graph.node(node.unwrap()).unwrap();
        assert_eq!(node.properties.get("name"), Some(&json!("Jean Bodel")));

        let (node, _) = h.run(2).await;
        let node = h.state.graph.node(node.unwrap()).unwrap();
        assert_eq!(node.properties.get("unresolved"), Some(&json!(true)));
        // no payload for a failed fetch, so the earlier element's data stays out
        assert_eq!(node.properties.get("name"), Some(&json!("{{ $json.name }}")));
    }
}
