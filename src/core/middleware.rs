//! HTTP middleware for request tracking and metrics.

use crate::core::metrics::{get_metrics, Metrics};
use axum::{
    extract::Request,
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

/// Upstream model name a handler attaches to its response for logging.
#[derive(Clone, Debug)]
pub struct ModelName(pub String);

/// Classified initiator a handler attaches to its response.
#[derive(Clone, Debug)]
pub struct InitiatorName(pub String);

/// Endpoints that forward to the upstream
const GATEWAY_ENDPOINTS: &[&str] = &["/v1/messages", "/v1/chat/completions", "/chat/completions"];

/// User-Agent substrings mapped to a metrics label. First match wins.
const CLIENT_PATTERNS: &[(&str, &str)] = &[
    ("claude-cli", "claude-code"),
    ("claude-code", "claude-code"),
    ("codex_cli_rs", "codex-cli"),
    ("codex", "codex"),
    ("anthropic-sdk", "anthropic-sdk"),
    ("Anthropic/", "anthropic-sdk"),
    ("OpenAI/", "openai-sdk"),
    ("openai-python", "openai-sdk"),
    ("opencode", "opencode"),
    ("Cursor", "cursor"),
    ("aider", "aider"),
    ("cline", "cline"),
    ("curl", "curl"),
];

/// Normalized client label from the User-Agent header.
///
/// Unknown agents fall back to their product token, cut to 30 characters.
pub fn extract_client(headers: &HeaderMap) -> String {
    let raw = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .trim();
    if raw.is_empty() {
        return "unknown".to_string();
    }

    if let Some((_, label)) = CLIENT_PATTERNS.iter().find(|(pattern, _)| raw.contains(pattern)) {
        return label.to_string();
    }

    let product: String = raw
        .split([' ', '/'])
        .next()
        .unwrap_or(raw)
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .take(30)
        .collect();

    if product.is_empty() {
        "other".to_string()
    } else {
        product
    }
}

/// Keeps the active-request gauge raised while a request is in flight.
struct ActiveRequest<'a> {
    metrics: &'a Metrics,
    endpoint: &'a str,
}

impl<'a> ActiveRequest<'a> {
    fn enter(metrics: &'a Metrics, endpoint: &'a str) -> Self {
        metrics.active_requests.with_label_values(&[endpoint]).inc();
        Self { metrics, endpoint }
    }
}

impl Drop for ActiveRequest<'_> {
    fn drop(&mut self) {
        self.metrics
            .active_requests
            .with_label_values(&[self.endpoint])
            .dec();
    }
}

/// Middleware for tracking request metrics.
pub struct MetricsMiddleware;

impl MetricsMiddleware {
    /// Record count, duration and initiator for every request except `/metrics`.
    ///
    /// Handlers report the model and initiator through [`ModelName`] and
    /// [`InitiatorName`] response extensions. For streaming responses the
    /// recorded duration is time to first byte.
    pub async fn track_metrics(request: Request, next: Next) -> Response {
        let endpoint = request.uri().path().to_string();
        if endpoint == "/metrics" {
            return next.run(request).await;
        }

        let method = request.method().to_string();
        let client = extract_client(request.headers());
        let metrics = get_metrics();

        let start = Instant::now();
        let response = {
            let _active = ActiveRequest::enter(metrics, &endpoint);
            next.run(request).await
        };
        let elapsed = start.elapsed().as_secs_f64();
        let status = response.status().as_u16().to_string();

        metrics
            .request_count
            .with_label_values(&[&method, &endpoint, &status, &client])
            .inc();
        metrics
            .request_duration
            .with_label_values(&[&method, &endpoint, &client])
            .observe(elapsed);

        let extensions = response.extensions();
        let initiator = extensions.get::<InitiatorName>().map(|i| i.0.as_str());
        if let Some(initiator) = initiator {
            metrics
                .initiator_count
                .with_label_values(&[&endpoint, initiator])
                .inc();
        }

        if GATEWAY_ENDPOINTS.contains(&endpoint.as_str()) {
            let streaming = response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|ct| ct.starts_with("text/event-stream"));
            let model = extensions
                .get::<ModelName>()
                .map_or("unknown", |m| m.0.as_str());

            tracing::info!(
                method = %method,
                endpoint = %endpoint,
                status = %status,
                client = %client,
                model = %model,
                initiator = initiator.unwrap_or("unknown"),
                streaming,
                elapsed_s = elapsed,
                "Gateway request served"
            );
        } else {
            tracing::debug!(
                "{} {} - status={} duration={:.3}s",
                method,
                endpoint,
                status,
                elapsed
            );
        }

        response
    }
}
