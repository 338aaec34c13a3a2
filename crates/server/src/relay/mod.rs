//! Forwarding of prompts to the upstream `generateContent` endpoint. The API
//! key never leaves this process.

use std::time::Duration;

use anyhow::Context;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use reqwest::Client;
use shared::{
    error::{ApiError, ErrorCode},
    protocol::GenerateContentRequest,
};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::config::Settings;

const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub(crate) enum RelayFailure {
    #[error("invalid relay request: {0}")]
    InvalidRequest(String),
    #[error("API key is not available.")]
    MissingApiKey,
    #[error("upstream unreachable: {0}")]
    Unreachable(String),
    #[error("Gemini API error: {body}")]
    Rejected { status: StatusCode, body: String },
    #[error("upstream returned an undecodable body: {0}")]
    InvalidUpstreamBody(String),
}

impl IntoResponse for RelayFailure {
    fn into_response(self) -> Response {
        let message = self.to_string();
        match self {
            Self::InvalidRequest(_) => (
                StatusCode::BAD_REQUEST,
                Json(ApiError::new(ErrorCode::Validation, message)),
            )
                .into_response(),
            Self::MissingApiKey => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError::new(ErrorCode::Internal, message)),
            )
                .into_response(),
            Self::Unreachable(_) | Self::InvalidUpstreamBody(_) => (
                StatusCode::BAD_GATEWAY,
                Json(ApiError::new(ErrorCode::Upstream, message)),
            )
                .into_response(),
            Self::Rejected { status, .. } => (status, message).into_response(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct Upstream {
    http: Client,
    api_base: Url,
    model: String,
    api_key: Option<String>,
}

impl Upstream {
    pub(crate) fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        Self::new(
            settings.api_base_url()?,
            settings.gemini_model.clone(),
            settings.gemini_api_key.clone(),
        )
    }

    pub(crate) fn new(
        api_base: Url,
        model: String,
        api_key: Option<String>,
    ) -> anyhow::Result<Self> {
        let http = Client::builder()
            .connect_timeout(UPSTREAM_CONNECT_TIMEOUT)
            .timeout(UPSTREAM_TIMEOUT)
            .build()
            .context("failed to build upstream http client")?;
        Ok(Self {
            http,
            api_base,
            model,
            api_key,
        })
    }

    pub(crate) fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub(crate) fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self, api_key: &str) -> Result<Url, RelayFailure> {
        let mut url = self
            .api_base
            .join(&format!("v1beta/models/{}:generateContent", self.model))
            .map_err(|err| RelayFailure::Unreachable(format!("invalid upstream url: {err}")))?;
        url.query_pairs_mut().append_pair("key", api_key);
        Ok(url)
    }

    /// Sends one user turn upstream and returns the upstream JSON untouched.
    pub(crate) async fn forward(&self, prompt: &str) -> Result<serde_json::Value, RelayFailure> {
        let api_key = self.api_key.as_deref().ok_or(RelayFailure::MissingApiKey)?;
        let url = self.endpoint(api_key)?;

        let response = self
            .http
            .post(url)
            .json(&GenerateContentRequest::user_prompt(prompt))
            .send()
            .await
            .map_err(|err| {
                error!(error = %err, "upstream request failed");
                RelayFailure::Unreachable(err.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), %body, "Gemini API error");
            return Err(RelayFailure::Rejected {
                status: StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY),
                body,
            });
        }

        let body = response
            .json::<serde_json::Value>()
            .await
            .map_err(|err| RelayFailure::InvalidUpstreamBody(err.to_string()))?;
        info!(model = %self.model, "relayed prompt upstream");
        Ok(body)
    }
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
