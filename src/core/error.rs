//! Error types and handling for the gateway.
//!
//! This module provides a unified error type [`AppError`] that wraps various error sources
//! and implements HTTP response conversion with an Anthropic-compatible error body.

use crate::core::error_types::ErrorType;
use crate::core::rate_limiter::RateLimitError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Main error type for the application.
///
/// All errors in the application should be converted to this type for consistent handling.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    /// HTTP request errors from the reqwest client
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Missing or wrong client API key
    #[error("Unauthorized")]
    Unauthorized,

    /// Upstream answered with a non-success status
    #[error("Upstream error ({status}): {body}")]
    Upstream { status: u16, body: String },

    /// Local admission control refused the request
    #[error("Too many queued requests ({limit} waiting)")]
    RateLimitQueueFull { limit: usize },

    /// Request was cancelled while waiting for admission
    #[error("Request cancelled")]
    Cancelled,

    /// Generic internal server errors with custom message
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<RateLimitError> for AppError {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::Cancelled => AppError::Cancelled,
            RateLimitError::QueueFull { limit } => AppError::RateLimitQueueFull { limit },
        }
    }
}

impl AppError {
    /// HTTP status and user-facing message for this error.
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            AppError::Config(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            AppError::Request(e) => {
                if e.is_timeout() {
                    (StatusCode::GATEWAY_TIMEOUT, "Gateway timeout".to_string())
                } else if let Some(status) = e.status() {
                    (
                        StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY),
                        e.to_string(),
                    )
                } else {
                    (StatusCode::BAD_GATEWAY, e.to_string())
                }
            }
            AppError::Serialization(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Invalid or missing API key".to_string(),
            ),
            AppError::Upstream { status, body } => (
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
                upstream_message(body),
            ),
            AppError::RateLimitQueueFull { .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Too many requests queued, try again later".to_string(),
            ),
            AppError::Cancelled => (StatusCode::REQUEST_TIMEOUT, "Request cancelled".to_string()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        }
    }
}

/// Pull `error.message` out of an upstream JSON body, or use the raw text.
fn upstream_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        let error_type = ErrorType::from_status(status.as_u16());

        let body = Json(json!({
            "type": "error",
            "error": {
                "type": error_type.as_str(),
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Convenience type alias for Results using [`AppError`].
pub type Result<T> = std::result::Result<T, AppError>;
