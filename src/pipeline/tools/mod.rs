//! Control-flow, data-shaping, quality, and fetch steps.
//!
//! A tool returns a result value and optionally an output path; the step
//! graph follows the outgoing edges whose handle equals that path.

pub mod control;
pub mod fetch;
pub mod quality;
pub mod shaping;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::task::JoinHandle;

use crate::{
    FetchConfig, Result, XmlflowError,
    runtime::{ExecutionContext, GraphState, StepOutcome},
};

use control::*;
use fetch::*;
pub use fetch::{ApiClient, ApiResponse, Credentials, FetchRequest, HttpApiClient, HttpAuth, HttpCall, HttpMethod};
use quality::*;
use shaping::*;

pub const PATH_TRUE: &str = "true";
pub const PATH_FALSE: &str = "false";
pub const PATH_DEFAULT: &str = "default";
pub const PATH_VALID: &str = "valid";
pub const PATH_INVALID: &str = "invalid";
pub const PATH_VERIFIED: &str = "verified";
pub const PATH_UNVERIFIED: &str = "unverified";
pub const PATH_SUCCESS: &str = "success";
pub const PATH_ERROR: &str = "error";

/// What a tool produced for its context.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub result: Value,
    pub output_path: Option<String>,
    pub outcome: StepOutcome,
}

impl ToolOutput {
    pub fn value(result: Value) -> Self {
        Self {
            result,
            ..Default::default()
        }
    }

    pub fn path(
        result: Value,
        path: &str,
    ) -> Self {
        Self {
            result,
            output_path: Some(path.to_string()),
            ..Default::default()
        }
    }

    pub fn with_outcome(
        mut self,
        outcome: StepOutcome,
    ) -> Self {
        self.outcome = outcome;
        self
    }
}

/// Run-scoped collaborators of the fetch family.
pub struct ToolEnv<'a> {
    pub client: &'a Arc<dyn ApiClient>,
    pub fetch: &'a FetchConfig,
    /// Detached fetches still in flight.
    pub pending: &'a mut Vec<JoinHandle<()>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, strum::AsRefStr)]
#[serde(tag = "type", content = "config", rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ToolKind {
    // control flow
    If(IfConfig),
    Switch(SwitchConfig),

    // data shaping
    Aggregate(AggregateConfig),
    Sort(SortConfig),
    Collect(CollectConfig),
    Group(GroupConfig),
    Count(CollectConfig),
    Union(SetOperationConfig),
    Intersect(SetOperationConfig),
    Diff(SetOperationConfig),
    Distinct(CollectConfig),
    Window(WindowConfig),
    Join(JoinConfig),
    Partition(PartitionConfig),

    // quality
    Validate(ValidateConfig),
    Normalize(NormalizeConfig),
    Clean(CleanConfig),
    Standardize(StandardizeConfig),
    Verify(VerifyConfig),
    Enrich(EnrichConfig),
    Deduplicate(DeduplicateConfig),

    // external fetch
    FetchApi(FetchApiConfig),
    FetchAuthenticated(FetchAuthenticatedConfig),
    Http(HttpConfig),
}

impl ToolKind {
    pub fn decode(
        kind: &str,
        config: &Value,
    ) -> Result<Self> {
        serde_json::from_value(json!({ "type": kind, "config": config })).map_err(|err| XmlflowError::Tool(format!("invalid '{}' tool: {}", kind, err)))
    }

    /// `apiData` key a fetch tool stores its payload under.
    pub fn result_key(&self) -> Option<&str> {
        match self {
            ToolKind::FetchApi(cfg) => Some(cfg.result_key()),
            ToolKind::FetchAuthenticated(cfg) => Some(cfg.fetch.result_key()),
            ToolKind::Http(cfg) => Some(&cfg.key),
            _ => None,
        }
    }

    pub async fn execute(
        &self,
        ctx: &ExecutionContext<'_>,
        state: &mut GraphState,
        env: &mut ToolEnv<'_>,
    ) -> Result<ToolOutput> {
        match self {
            ToolKind::If(cfg) => Ok(if_tool(cfg, ctx)),
            ToolKind::Switch(cfg) => Ok(switch_tool(cfg, ctx, state)),

            ToolKind::Aggregate(cfg) => aggregate(cfg, ctx, state),
            ToolKind::Sort(cfg) => sort(cfg, ctx, state),
            ToolKind::Collect(cfg) => collect(cfg, ctx, state),
            ToolKind::Group(cfg) => group(cfg, ctx, state),
            ToolKind::Count(cfg) => count(cfg, ctx, state),
            ToolKind::Union(cfg) => union(cfg, ctx, state),
            ToolKind::Intersect(cfg) => intersect(cfg, ctx, state),
            ToolKind::Diff(cfg) => diff(cfg, ctx, state),
            ToolKind::Distinct(cfg) => distinct(cfg, ctx, state),
            ToolKind::Window(cfg) => window(cfg, ctx, state),
            ToolKind::Join(cfg) => join(cfg, ctx, state),
            ToolKind::Partition(cfg) => partition(cfg, ctx, state),

            ToolKind::Validate(cfg) => validate(cfg, ctx, state),
            ToolKind::Normalize(cfg) => normalize(cfg, ctx, state),
            ToolKind::Clean(cfg) => clean(cfg, ctx, state),
            ToolKind::Standardize(cfg) => standardize(cfg, ctx, state),
            ToolKind::Verify(cfg) => verify(cfg, ctx, state),
            ToolKind::Enrich(cfg) => enrich(cfg, ctx, state),
            ToolKind::Deduplicate(cfg) => deduplicate(cfg, ctx, state),

            ToolKind::FetchApi(cfg) => fetch_api(cfg, None, ctx, state, env).await,
            ToolKind::FetchAuthenticated(cfg) => fetch_api(&cfg.fetch, Some(&cfg.credentials), ctx, state, env).await,
            ToolKind::Http(cfg) => http(cfg, ctx, state, env).await,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::{
        Config,
        common::{ApiData, MemCache},
        graph::{GraphAssembler, SchemaIndex},
        model::{BuilderNode, NodeId, Properties},
        xml::{ElementId, XmlDocument},
    };

    /// Answers every request with a canned payload echoing the identifier.
    pub(crate) struct EchoClient;

    #[async_trait]
    impl ApiClient for EchoClient {
        async fn fetch(
            &self,
            request: FetchRequest,
        ) -> ApiResponse {
            if request.identifier == "missing" {
                return ApiResponse::failure(&request.provider, "not found");
            }
            ApiResponse::success(&request.provider, json!({ "id": request.identifier, "name": "Jean Bodel", "authenticated": request.credentials.is_some() }))
        }

        async fn send(
            &self,
            call: HttpCall,
        ) -> ApiResponse {
            ApiResponse::success("http", json!({ "url": call.url, "method": call.method.as_ref() }))
        }
    }

    /// Document, `Word` builder, and graph state for running single tools.
    pub(crate) struct ToolFixture {
        pub doc: XmlDocument,
        pub builder: BuilderNode,
        pub api: ApiData,
        pub state: GraphState,
        pub config: Config,
        pub client: Arc<dyn ApiClient>,
        pub pending: Vec<JoinHandle<()>>,
        current: Vec<Option<NodeId>>,
    }

    impl ToolFixture {
        pub fn new(xml: &str) -> Self {
            let doc = XmlDocument::parse(xml).unwrap();
            let builder: BuilderNode = serde_json::from_value(json!({ "id": "b", "label": "Word" })).unwrap();
            let state = GraphState::new(GraphAssembler::new(Arc::new(SchemaIndex::default())), doc.len());
            let current = vec![None; doc.len()];
            Self {
                doc,
                builder,
                api: Arc::new(MemCache::new(16)),
                state,
                config: Config::default(),
                client: Arc::new(EchoClient),
                pending: Vec::new(),
                current,
            }
        }

        pub async fn try_run(
            &mut self,
            element: ElementId,
            kind: &str,
            config: Value,
        ) -> Result<ToolOutput> {
            let tool = ToolKind::decode(kind, &config)?;
            let ctx = ExecutionContext::new(&self.doc, element, None, &self.builder, &self.api, self.current[element]);
            let mut env = ToolEnv {
                client: &self.client,
                fetch: &self.config.fetch,
                pending: &mut self.pending,
            };
            let out = tool.execute(&ctx, &mut self.state, &mut env).await?;
            if let crate::runtime::CurrentNode::Set(node) = out.outcome.current {
                self.current[element] = Some(node);
            }
            Ok(out)
        }

        pub async fn run(
            &mut self,
            element: ElementId,
            kind: &str,
            config: Value,
        ) -> ToolOutput {
            self.try_run(element, kind, config).await.unwrap()
        }

        pub fn node(
            &self,
            element: ElementId,
        ) -> NodeId {
            self.current[element].unwrap()
        }

        pub fn props(
            &self,
            element: ElementId,
        ) -> Properties {
            self.state.graph.node(self.node(element)).unwrap().properties.clone()
        }
    }

    #[test]
    fn test_decode_tools() {
        let tool = ToolKind::decode("fetch-api", &json!({ "provider": "viaf", "key": "person" })).unwrap();
        assert_eq!(tool.as_ref(), "fetch-api");
        assert_eq!(tool.result_key(), Some("person"));

        let tool = ToolKind::decode("if", &json!({ "conditions": [] })).unwrap();
        assert_eq!(tool.result_key(), None);

        assert!(matches!(ToolKind::decode("teleport", &json!({})), Err(XmlflowError::Tool(_))));
    }
}
