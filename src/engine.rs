//! Transformation engine - the main entry point for Xmlflow.
//!
//! The engine owns the configuration, the external API client used by fetch
//! tools, and a tokio runtime for callers outside an async context.

use std::sync::{Arc, OnceLock};

use futures::future::join_all;
use tokio::{
    runtime::{Builder, Runtime},
    task::JoinHandle,
};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::{
    Config, Result, XmlflowError,
    common::{ApiData, MemCache},
    model::{GraphNode, GraphRecord, GraphRelationship},
    pipeline::{Mapping, tools::ApiClient},
    runtime::Walker,
    utils,
    xml::XmlDocument,
};

/// The graph produced by one run, plus the run's fetched API data.
pub struct TransformOutput {
    /// Nodes followed by relationships, each in creation order.
    pub records: Vec<GraphRecord>,
    pub api_data: ApiData,
    /// Detached fetches that had not finished when the walk ended.
    pending: Vec<JoinHandle<()>>,
}

impl TransformOutput {
    fn empty(api_data: ApiData) -> Self {
        Self {
            records: Vec::new(),
            api_data,
            pending: Vec::new(),
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.records.iter().filter_map(GraphRecord::as_node)
    }

    pub fn relationships(&self) -> impl Iterator<Item = &GraphRelationship> {
        self.records.iter().filter_map(GraphRecord::as_relationship)
    }

    /// Number of detached fetches still outstanding.
    pub fn pending(&self) -> usize {
        self.pending.iter().filter(|h| !h.is_finished()).count()
    }

    /// Wait for every detached fetch to land in `api_data`.
    pub async fn settle(&mut self) {
        for res in join_all(self.pending.drain(..)).await {
            if let Err(err) = res {
                warn!("detached fetch did not complete: {}", err);
            }
        }
    }

    /// The flat record array as JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.records)?)
    }
}

/// The XML-to-graph engine.
///
/// # Example
///
/// ```rust,ignore
/// let engine = EngineBuilder::new().build()?;
/// let mapping = engine.compile(mapping_json)?;
///
/// let output = engine.transform_blocking(xml, &mapping)?;
/// println!("{}", output.to_json()?);
/// ```
pub struct Engine {
    config: Config,
    client: Arc<dyn ApiClient>,
    /// Runtime for blocking callers; built on first use unless supplied.
    runtime: OnceLock<Arc<Runtime>>,
    worker_threads: usize,
}

impl Engine {
    pub(crate) fn new(
        config: Config,
        client: Arc<dyn ApiClient>,
        runtime: Option<Arc<Runtime>>,
        worker_threads: usize,
    ) -> Self {
        let cell = OnceLock::new();
        if let Some(runtime) = runtime {
            let _ = cell.set(runtime);
        }
        Self {
            config,
            client,
            runtime: cell,
            worker_threads,
        }
    }

    fn runtime(&self) -> Result<&Arc<Runtime>> {
        if let Some(runtime) = self.runtime.get() {
            return Ok(runtime);
        }
        let runtime = Builder::new_multi_thread()
            .worker_threads(self.worker_threads)
            .enable_all()
            .build()
            .map_err(|err| XmlflowError::Engine(format!("failed to build runtime: {}", err)))?;
        Ok(self.runtime.get_or_init(|| Arc::new(runtime)))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Validate and compile a mapping document against this engine's config.
    pub fn compile(
        &self,
        mapping_json: &str,
    ) -> Result<Mapping> {
        Mapping::from_json(mapping_json, &self.config)
    }

    /// Transform an XML document into graph records.
    ///
    /// Malformed XML yields an empty output rather than an error.
    pub async fn transform(
        &self,
        xml: &str,
        mapping: &Mapping,
    ) -> TransformOutput {
        let run_id = utils::longid();
        let span = info_span!("transform", run_id = %run_id);
        self.run(xml, mapping).instrument(span).await
    }

    async fn run(
        &self,
        xml: &str,
        mapping: &Mapping,
    ) -> TransformOutput {
        let api_data: ApiData = Arc::new(MemCache::new(self.config.fetch.api_cache_capacity));
        let doc = match XmlDocument::parse(xml) {
            Ok(doc) => doc,
            Err(err) => {
                warn!("malformed XML, producing an empty graph: {}", err);
                return TransformOutput::empty(api_data);
            }
        };
        debug!(elements = doc.len(), "document parsed");

        let mut pending = Vec::new();
        let graph = Walker::new(mapping, &self.config, &self.client).walk(&doc, &api_data, &mut pending).await;
        info!(nodes = graph.node_count(), relationships = graph.relationship_count(), detached = pending.len(), "transform finished");

        TransformOutput {
            records: graph.into_records(),
            api_data,
            pending,
        }
    }

    /// Compile `mapping_json` and transform `xml` with it.
    pub async fn transform_json(
        &self,
        xml: &str,
        mapping_json: &str,
    ) -> Result<TransformOutput> {
        let mapping = self.compile(mapping_json)?;
        Ok(self.transform(xml, &mapping).await)
    }

    /// Run [`Engine::transform`] on the engine's runtime and settle detached fetches.
    ///
    /// Must not be called from within an async context.
    pub fn transform_blocking(
        &self,
        xml: &str,
        mapping: &Mapping,
    ) -> Result<TransformOutput> {
        Ok(self.runtime()?.block_on(async {
            let mut output = self.transform(xml, mapping).await;
            output.settle().await;
            output
        }))
    }
}
