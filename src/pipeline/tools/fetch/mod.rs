//! Tools that call external APIs and store payloads in the run's `apiData`.

mod client;
mod models;

pub use client::{ApiClient, HttpApiClient};
pub use models::*;

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::{
    FetchMode, Result,
    common::ApiData,
    pipeline::source::ValueSource,
    runtime::{ExecutionContext, GraphState},
};

use super::{PATH_ERROR, PATH_SUCCESS, ToolEnv, ToolOutput};

fn ref_attribute() -> ValueSource {
    ValueSource::Attribute { name: "ref".to_string() }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FetchApiConfig {
    pub provider: String,
    /// Where the entity identifier comes from; the `ref` attribute by default.
    #[serde(default = "ref_attribute")]
    pub identifier: ValueSource,
    /// `apiData` key for the payload; the provider name when absent.
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl FetchApiConfig {
    pub fn result_key(&self) -> &str {
        self.key.as_deref().unwrap_or(&self.provider)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FetchAuthenticatedConfig {
    #[serde(flatten)]
    pub fetch: FetchApiConfig,
    pub credentials: Credentials,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    /// May contain `{id}`, filled from `identifier`.
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub auth: HttpAuth,
    pub key: String,
    #[serde(default)]
    pub identifier: Option<ValueSource>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

enum Call {
    Fetch(FetchRequest),
    Http(HttpCall),
}

async fn dispatch(
    client: &dyn ApiClient,
    call: Call,
) -> ApiResponse {
    match call {
        Call::Fetch(request) => client.fetch(request).await,
        Call::Http(call) => client.send(call).await,
    }
}

/// Strip a leading `#` and, for URIs, keep the last path segment.
fn normalize_identifier(raw: &str) -> String {
    let trimmed = raw.trim().trim_start_matches('#');
    if trimmed.contains("://") {
        trimmed.trim_end_matches('/').rsplit('/').next().unwrap_or(trimmed).to_string()
    } else {
        trimmed.to_string()
    }
}

/// Store a successful payload under `key`; returns the output path.
fn store_response(
    api_data: &ApiData,
    key: &str,
    response: &ApiResponse,
) -> &'static str {
    if response.success {
        if let Some(data) = &response.data {
            api_data.set(key.to_string(), data.clone());
        }
        PATH_SUCCESS
    } else {
        warn!(provider = %response.provider, key, error = response.error.as_deref().unwrap_or_default(), "fetch failed");
        PATH_ERROR
    }
}

async fn run_call(
    call: Call,
    provider: &str,
    key: &str,
    timeout_ms: Option<u64>,
    ctx: &ExecutionContext<'_>,
    env: &mut ToolEnv<'_>,
) -> Result<ToolOutput> {
    let timeout = Duration::from_millis(timeout_ms.unwrap_or(env.fetch.timeout_ms));
    match env.fetch.mode {
        FetchMode::Await => {
            let response = tokio::time::timeout(timeout, dispatch(env.client.as_ref(), call)).await.unwrap_or_else(|_| ApiResponse::failure(provider, "request timed out"));
            let path = store_response(ctx.api_data, key, &response);
            Ok(ToolOutput::path(serde_json::to_value(&response)?, path))
        }
        FetchMode::Detached => {
            let client: Arc<dyn ApiClient> = env.client.clone();
            let api_data = ctx.api_data.clone();
            let (provider, task_key) = (provider.to_string(), key.to_string());
            env.pending.push(tokio::spawn(async move {
                let response = tokio::time::timeout(timeout, dispatch(client.as_ref(), call)).await.unwrap_or_else(|_| ApiResponse::failure(&provider, "request timed out"));
                store_response(&api_data, &task_key, &response);
            }));
            debug!(key, "fetch detached");
            Ok(ToolOutput::value(json!({ "pending": true, "key": key })))
        }
    }
}

fn missing_identifier(provider: &str) -> ToolOutput {
    debug!(provider, "no identifier to fetch");
    ToolOutput::path(serde_json::to_value(ApiResponse::failure(provider, "no identifier")).unwrap_or_default(), PATH_ERROR)
}

/// Look up the element's entity at a named provider.
pub async fn fetch_api(
    cfg: &FetchApiConfig,
    credentials: Option<&Credentials>,
    ctx: &ExecutionContext<'_>,
    state: &mut GraphState,
    env: &mut ToolEnv<'_>,
) -> Result<ToolOutput> {
    let Some(identifier) = cfg.identifier.read_string(ctx, &state.graph, ctx.current).map(|id| normalize_identifier(&id)).filter(|id| !id.is_empty()) else {
        return Ok(missing_identifier(&cfg.provider));
    };
    let request = FetchRequest {
        provider: cfg.provider.clone(),
        identifier,
        credentials: credentials.cloned(),
    };
    run_call(Call::Fetch(request), &cfg.provider, cfg.result_key(), cfg.timeout_ms, ctx, env).await
}

/// Generic HTTP request whose body lands in `apiData`.
pub async fn http(
    cfg: &HttpConfig,
    ctx: &ExecutionContext<'_>,
    state: &mut GraphState,
    env: &mut ToolEnv<'_>,
) -> Result<ToolOutput> {
    let mut url = cfg.url.clone();
    if let Some(source) = &cfg.identifier {
        match source.read_string(ctx, &state.graph, ctx.current) {
            Some(id) => url = url.replace("{id}", &normalize_identifier(&id)),
            None => return Ok(missing_identifier("http")),
        }
    }
    let call = HttpCall {
        method: cfg.method,
        url,
        headers: cfg.headers.clone(),
        query: cfg.query.clone(),
        body: cfg.body.clone(),
        auth: cfg.auth.clone(),
    };
    run_call(Call::Http(call), "http", &cfg.key, cfg.timeout_ms, ctx, env).await
}
