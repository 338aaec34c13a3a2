use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Bytes,
    extract::State,
    routing::{get, post},
    Json, Router,
};
use shared::protocol::{RelayRequest, RELAY_PATH};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{info, warn};

mod app_state;
mod config;
mod relay;

use app_state::AppState;
use config::load_settings;
use relay::{RelayFailure, Upstream};

/// Serverless-era path still used by older front ends.
const LEGACY_RELAY_PATH: &str = "/.netlify/functions/gemini-proxy";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let upstream = Upstream::from_settings(&settings)?;
    if !upstream.has_api_key() {
        warn!("GEMINI_API_KEY is not set; relay requests will fail until it is configured");
    }
    info!(model = %upstream.model(), "relay upstream configured");

    let state = AppState {
        upstream,
        max_body_bytes: settings.max_body_bytes,
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.relay_bind.parse()?;
    info!(%addr, "relay listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = RequestBodyLimitLayer::new(state.max_body_bytes);
    Router::new()
        .route("/healthz", get(healthz))
        .route(RELAY_PATH, post(relay_prompt))
        .route(LEGACY_RELAY_PATH, post(relay_prompt))
        .layer(body_limit)
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn relay_prompt(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, RelayFailure> {
    let request: RelayRequest = serde_json::from_slice(&body)
        .map_err(|err| RelayFailure::InvalidRequest(err.to_string()))?;
    if request.prompt.trim().is_empty() {
        return Err(RelayFailure::InvalidRequest(
            "prompt must not be empty".to_string(),
        ));
    }

    let mode = request.mode.map(|mode| mode.as_str()).unwrap_or("unspecified");
    info!(mode, prompt_len = request.prompt.len(), "relaying prompt");
    let upstream_body = state.upstream.forward(&request.prompt).await?;
    Ok(Json(upstream_body))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
