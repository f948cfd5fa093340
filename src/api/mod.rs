//! API layer for the gateway.
//!
//! This module contains the HTTP handlers, the API-key gate and the
//! disconnect-aware streaming body.

pub mod auth;
pub mod chat_completions;
pub mod disconnect;
pub mod handlers;
pub mod messages;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::core::middleware::MetricsMiddleware;

// Re-export commonly used types
pub use chat_completions::chat_completions;
pub use handlers::{event_logging, health, metrics_handler, AppState};
pub use messages::create_message;

/// Build the application router.
///
/// Gateway routes sit behind the API-key gate; `/health` and `/metrics`
/// stay open.
pub fn create_router(state: Arc<AppState>) -> Router {
    let gateway_routes = Router::new()
        .route("/v1/messages", post(create_message))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/chat/completions", post(chat_completions))
        .route("/api/event_logging/batch", post(event_logging))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .merge(gateway_routes)
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn(MetricsMiddleware::track_metrics))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
