//! Core functionality for the gateway.
//!
//! This module contains fundamental components used throughout the application:
//! - Configuration management
//! - Error handling
//! - Metrics collection and HTTP middleware
//! - Upstream admission control and cancellation

pub mod cancel;
pub mod config;
pub mod error;
pub mod error_types;
pub mod id_sanitizer;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod rate_limiter;

// Re-export commonly used types
pub use cancel::CancelToken;
pub use config::{AppConfig, RateLimitConfig, ServerConfig, UpstreamConfig};
pub use error::{AppError, Result};
pub use id_sanitizer::{is_valid_id, sanitize_id};
pub use logging::{get_initiator, get_request_id, INITIATOR, REQUEST_ID};
pub use metrics::{get_metrics, init_metrics, Metrics};
pub use middleware::MetricsMiddleware;
pub use rate_limiter::{AdaptiveRateLimiter, RateLimitError};
