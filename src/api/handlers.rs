//! Shared state and the small utility endpoints.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;

use crate::core::config::AppConfig;
use crate::core::error::{AppError, Result};
use crate::core::rate_limiter::AdaptiveRateLimiter;
use crate::services::upstream::UpstreamClient;

/// Application state shared across all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub upstream: UpstreamClient,
}

impl AppState {
    /// Build state from configuration and a shared HTTP client.
    ///
    /// Fails when the upstream base URL cannot be resolved.
    pub fn new(config: AppConfig, http_client: reqwest::Client) -> anyhow::Result<Self> {
        let base_url = config.upstream.resolve_base_url()?;
        let rate_limiter = Arc::new(AdaptiveRateLimiter::new(config.rate_limit));
        let upstream = UpstreamClient::new(http_client, base_url, &config.upstream, rate_limiter);
        Ok(Self { config, upstream })
    }
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "upstream": state.upstream.base_url(),
        "queued_requests": state.upstream.rate_limiter().queued(),
    }))
}

/// Prometheus metrics endpoint.
pub async fn metrics_handler() -> Result<Response> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response())
}

/// Sink for Claude Code telemetry batches.
///
/// Answers 200 so the CLI does not log a 404 for every batch.
pub async fn event_logging() -> impl IntoResponse {
    tracing::debug!("POST /api/event_logging/batch - telemetry request ignored");
    Json(json!({"status": "ok"}))
}
