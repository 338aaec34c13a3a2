use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use shared::{
    domain::TransformMode,
    protocol::{GenerateContentRequest, GenerateContentResponse, RelayRequest},
};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRequest {
    pub mode: TransformMode,
    pub prompt: String,
}

/// Failure reported by a model gateway. `status` is `None` when no HTTP
/// response was received at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("model call failed with status {status:?}: {body}")]
pub struct ModelCallError {
    pub status: Option<u16>,
    pub body: String,
}

impl ModelCallError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            body: message.into(),
        }
    }

    pub fn http(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status: Some(status.as_u16()),
            body: body.into(),
        }
    }
}

#[async_trait]
pub trait ModelGateway: Send + Sync {
    async fn generate(
        &self,
        request: ModelRequest,
    ) -> Result<GenerateContentResponse, ModelCallError>;
}

pub struct MissingModelGateway;

#[async_trait]
impl ModelGateway for MissingModelGateway {
    async fn generate(
        &self,
        request: ModelRequest,
    ) -> Result<GenerateContentResponse, ModelCallError> {
        Err(ModelCallError::transport(format!(
            "no model gateway configured for {} request",
            request.mode.as_str()
        )))
    }
}

/// Talks to the relay service, which holds the upstream API key.
pub struct RelayModelGateway {
    http: Client,
    endpoint: Url,
}

impl RelayModelGateway {
    pub fn new(endpoint: &str) -> anyhow::Result<Self> {
        Ok(Self {
            http: build_http_client()?,
            endpoint: Url::parse(endpoint)?,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl ModelGateway for RelayModelGateway {
    async fn generate(
        &self,
        request: ModelRequest,
    ) -> Result<GenerateContentResponse, ModelCallError> {
        let body = RelayRequest {
            prompt: request.prompt,
            mode: Some(request.mode),
        };
        post_generate(&self.http, self.endpoint.clone(), &body).await
    }
}

/// Calls the upstream `generateContent` endpoint directly with a local key.
pub struct DirectModelGateway {
    http: Client,
    endpoint: Url,
}

impl DirectModelGateway {
    pub fn new(api_base: &str, model: &str, api_key: &str) -> anyhow::Result<Self> {
        Ok(Self {
            http: build_http_client()?,
            endpoint: generate_content_url(api_base, model, api_key)?,
        })
    }
}

#[async_trait]
impl ModelGateway for DirectModelGateway {
    async fn generate(
        &self,
        request: ModelRequest,
    ) -> Result<GenerateContentResponse, ModelCallError> {
        let body = GenerateContentRequest::user_prompt(request.prompt);
        post_generate(&self.http, self.endpoint.clone(), &body).await
    }
}

pub fn generate_content_url(api_base: &str, model: &str, api_key: &str) -> anyhow::Result<Url> {
    let base = if api_base.ends_with('/') {
        Url::parse(api_base)?
    } else {
        Url::parse(&format!("{api_base}/"))?
    };
    let mut url = base.join(&format!("v1beta/models/{model}:generateContent"))?;
    url.query_pairs_mut().append_pair("key", api_key);
    Ok(url)
}

fn build_http_client() -> anyhow::Result<Client> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .context("failed to build model http client")
}

async fn post_generate<B: Serialize + ?Sized>(
    http: &Client,
    url: Url,
    body: &B,
) -> Result<GenerateContentResponse, ModelCallError> {
    let response = http
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|err| ModelCallError::transport(err.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), "model call returned non-success status");
        return Err(ModelCallError::http(status, body));
    }

    let raw = response
        .text()
        .await
        .map_err(|err| ModelCallError::transport(format!("failed to read response body: {err}")))?;
    // A 2xx body without usable candidates reaches the caller as an empty response.
    let parsed = serde_json::from_str::<GenerateContentResponse>(&raw).unwrap_or_else(|err| {
        warn!(status = status.as_u16(), error = %err, "model response did not match the expected shape");
        GenerateContentResponse::default()
    });
    debug!(candidates = parsed.candidates.len(), "model call succeeded");
    Ok(parsed)
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
