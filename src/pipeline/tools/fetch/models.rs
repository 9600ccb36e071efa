use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

fn authorization() -> String {
    "Authorization".to_string()
}

/// Credentials for an authenticated provider.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Lookup of one entity at a named provider.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    pub provider: String,
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

/// Outcome of a fetch; failures are values, not errors.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub provider: String,
}

impl ApiResponse {
    pub fn success(
        provider: &str,
        data: Value,
    ) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            provider: provider.to_string(),
        }
    }

    pub fn failure(
        provider: &str,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            provider: provider.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr)]
pub enum HttpMethod {
    #[default]
    GET,
    POST,
    PUT,
    PATCH,
    DELETE,
    HEAD,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HttpAuth {
    #[default]
    NoAuth,
    Basic {
        username: String,
        #[serde(default)]
        password: String,
    },
    Bearer {
        token: String,
    },
    /// Raw value in a custom header.
    ApiKey {
        #[serde(default = "authorization")]
        header: String,
        value: String,
    },
}

/// A generic HTTP request issued by the `http` tool.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpCall {
    #[serde(default)]
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub auth: HttpAuth,
}
