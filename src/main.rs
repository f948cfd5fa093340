//! Copilot Gateway - Main entry point
//!
//! This binary loads configuration from the environment and serves the
//! gateway router.

use anyhow::Result;
use chrono::Local;
use copilot_gateway_rust::{
    core::{init_metrics, AppConfig},
    create_router, AppState,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Custom time formatter that uses local timezone (respects TZ environment variable)
struct LocalTime;

impl tracing_subscriber::fmt::time::FormatTime for LocalTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%d %H:%M:%S"))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before reading any environment variables)
    dotenvy::dotenv().ok();

    init_tracing();
    init_metrics();

    let config = AppConfig::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    let http_client = create_http_client(&config)?;
    let state = Arc::new(AppState::new(config, http_client)?);

    tracing::info!(
        upstream = %state.upstream.base_url(),
        account_type = %state.config.upstream.account_type,
        interval_ms = state.config.rate_limit.interval_ms,
        burst = state.config.rate_limit.burst,
        max_queued = state.config.rate_limit.max_queued,
        api_key_required = state.config.api_key.is_some(),
        "Gateway configured"
    );

    let app = create_router(state);

    tracing::info!("Starting Copilot Gateway on {}", addr);
    tracing::info!("Anthropic API: /v1/messages");
    tracing::info!("OpenAI API: /v1/chat/completions, /chat/completions");
    tracing::info!("Metrics endpoint: /metrics");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing() {
    // Check if NO_COLOR environment variable is set (for file logging without ANSI codes)
    let no_color = std::env::var("NO_COLOR").is_ok();

    // Noisy HTTP library filters are always appended so a bare RUST_LOG=trace
    // does not let hyper's protocol logs through.
    let base_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info,copilot_gateway_rust=debug".to_string());
    let filter_str = format!(
        "{},hyper=warn,hyper::proto=warn,h2=warn,reqwest=warn",
        base_filter
    );
    let filter = tracing_subscriber::EnvFilter::new(filter_str);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(LocalTime)
                .with_ansi(!no_color),
        )
        .init();
}

/// Create HTTP client with connection pooling
fn create_http_client(config: &AppConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(!config.verify_ssl)
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .pool_max_idle_per_host(100)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .build()?;
    Ok(client)
}
