use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, InvalidHeaderValue};
use serde_json::{Value, json};
use tracing::debug;

use crate::{FetchConfig, Result, XmlflowError};

use super::models::*;

/// Provider name -> URL template. `{id}`, `{apiKey}`, `{username}`, and
/// `{token}` are substituted per request.
const BUILTIN_PROVIDERS: &[(&str, &str)] = &[
    ("viaf", "https://viaf.org/viaf/{id}/viaf.json"),
    ("wikidata", "https://www.wikidata.org/wiki/Special:EntityData/{id}.json"),
    ("gnd", "https://lobid.org/gnd/{id}.json"),
    ("orcid", "https://pub.orcid.org/v3.0/{id}"),
    ("geonames", "http://api.geonames.org/getJSON?geonameId={id}&username={username}"),
    ("europeana", "https://api.europeana.eu/record/v2/{id}.json?wskey={apiKey}"),
];

const HTTP_PROVIDER: &str = "http";

/// External lookups used by the fetch tools.
#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn fetch(
        &self,
        request: FetchRequest,
    ) -> ApiResponse;

    async fn send(
        &self,
        call: HttpCall,
    ) -> ApiResponse;
}

/// [`ApiClient`] over reqwest.
pub struct HttpApiClient {
    client: reqwest::Client,
    providers: HashMap<String, String>,
    timeout: Duration,
}

impl HttpApiClient {
    pub fn new(config: &FetchConfig) -> Self {
        let mut providers: HashMap<String, String> = BUILTIN_PROVIDERS.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        providers.extend(config.providers.clone());
        Self {
            client: reqwest::Client::new(),
            providers,
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    /// Resolve the provider's URL template for a request.
    pub fn provider_url(
        &self,
        request: &FetchRequest,
    ) -> Result<String> {
        let template = self.providers.get(&request.provider).ok_or_else(|| XmlflowError::Fetch(format!("unknown provider '{}'", request.provider)))?;
        let creds = request.credentials.clone().unwrap_or_default();
        Ok(template
            .replace("{id}", &request.identifier)
            .replace("{apiKey}", creds.api_key.as_deref().unwrap_or_default())
            .replace("{username}", creds.username.as_deref().unwrap_or_default())
            .replace("{token}", creds.token.as_deref().unwrap_or_default()))
    }

    fn auth_header(auth: &HttpAuth) -> Option<(String, String)> {
        match auth {
            HttpAuth::NoAuth => None,
            HttpAuth::Basic { username, password } => Some(("Authorization".to_string(), format!("Basic {}", STANDARD.encode(format!("{}:{}", username, password))))),
            HttpAuth::Bearer { token } => Some(("Authorization".to_string(), format!("Bearer {}", token))),
            HttpAuth::ApiKey { header, value } => Some((header.clone(), value.clone())),
        }
    }

    fn credentials_auth(credentials: Option<&Credentials>) -> HttpAuth {
        match credentials {
            Some(Credentials {
                username: Some(username),
                password,
                ..
            }) => HttpAuth::Basic {
                username: username.clone(),
                password: password.clone().unwrap_or_default(),
            },
            Some(Credentials { token: Some(token), .. }) => HttpAuth::Bearer { token: token.clone() },
            _ => HttpAuth::NoAuth,
        }
    }

    fn build_request(
        &self,
        call: &HttpCall,
    ) -> Result<reqwest::RequestBuilder> {
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("accept"), HeaderValue::from_static("application/json, */*;q=0.5"));

        let auth = Self::auth_header(&call.auth);
        for (key, value) in call.headers.iter().map(|(k, v)| (k.clone(), v.clone())).chain(auth) {
            headers.insert(
                key.parse::<HeaderName>().map_err(|err| XmlflowError::Fetch(err.to_string()))?,
                value.parse().map_err(|err: InvalidHeaderValue| XmlflowError::Fetch(err.to_string()))?,
            );
        }

        let method: reqwest::Method = call.method.as_ref().parse().map_err(|_| XmlflowError::Fetch(format!("invalid method '{:?}'", call.method)))?;
        let mut request = self.client.request(method, &call.url).headers(headers).query(&call.query).timeout(self.timeout);
        if let Some(body) = &call.body {
            request = request.json(body);
        }
        Ok(request)
    }

    async fn execute(
        &self,
        provider: &str,
        call: HttpCall,
    ) -> ApiResponse {
        let request = match self.build_request(&call) {
            Ok(request) => request,
            Err(err) => return ApiResponse::failure(provider, err.to_string()),
        };
        debug!(provider, url = %call.url, method = call.method.as_ref(), "sending request");

        let res = match request.send().await {
            Ok(res) => res,
            Err(err) => return ApiResponse::failure(provider, format!("http error: {}", err)),
        };
        let status = res.status();
        let body = match res.text().await {
            Ok(body) => body,
            Err(err) => return ApiResponse::failure(provider, err.to_string()),
        };
        if !status.is_success() {
            return ApiResponse::failure(provider, format!("HTTP {}", status.as_u16()));
        }
        ApiResponse::success(provider, decode_body(body))
    }
}

/// JSON bodies are parsed; anything else is kept raw under `_raw`.
fn decode_body(body: String) -> Value {
    match serde_json::from_str::<Value>(&body) {
        Ok(value) => value,
        Err(_) => {
            let format = if body.trim_start().starts_with('<') { "xml" } else { "text" };
            json!({ "_raw": body, "_format": format, "_note": "response body is not JSON" })
        }
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn fetch(
        &self,
        request: FetchRequest,
    ) -> ApiResponse {
        let url = match self.provider_url(&request) {
            Ok(url) => url,
            Err(err) => return ApiResponse::failure(&request.provider, err.to_string()),
        };
        let call = HttpCall {
            url,
            auth: Self::credentials_auth(request.credentials.as_ref()),
            ..Default::default()
        };
        self.execute(&request.provider, call).await
    }

    async fn send(
        &self,
        call: HttpCall,
    ) -> ApiResponse {
        self.execute(HTTP_PROVIDER, call).await
    }
}
