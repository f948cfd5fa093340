//! Copilot Gateway - an Anthropic Messages API front door for an OpenAI-style
//! chat-completions upstream.
//!
//! This library provides the pieces of the gateway server:
//!
//! - **Protocol Translation**: Anthropic requests, responses and SSE events to and
//!   from Chat Completions, including tool calls and extended thinking
//! - **Adaptive Rate Limiting**: smooth admission with burst credit, cooldown on
//!   upstream 429s, cancellation and a bounded wait queue
//! - **Initiator Classification**: tells agent-driven turns from human ones for the
//!   upstream `X-Initiator` header
//! - **Metrics & Monitoring**: Prometheus metrics for observability
//!
//! # Architecture
//!
//! - [`core`]: config, errors, logging context, metrics, rate limiter, id sanitizer
//! - [`transformer`]: protocol models and pure translation functions
//! - [`services`]: initiator classifier and upstream client
//! - [`api`]: HTTP handlers and router
//!
//! # Configuration
//!
//! Required environment variables:
//! - `COPILOT_TOKEN`: bearer credential for the upstream
//!
//! Optional environment variables:
//! - `HOST` / `PORT`: bind address (default: 0.0.0.0:4141)
//! - `ACCOUNT_TYPE`: individual, business or enterprise (default: individual)
//! - `UPSTREAM_BASE_URL`: overrides the account-type base URL
//! - `API_KEY`: key clients must present
//! - `VERIFY_SSL`: verify upstream certificates (default: true)
//! - `REQUEST_TIMEOUT_SECS`: upstream timeout (default: 300)
//! - `RATE_LIMIT_INTERVAL_MS`, `RATE_LIMIT_BURST`, `RATE_LIMIT_MAX_QUEUE`: limiter tuning

pub mod api;
pub mod core;
pub mod services;
pub mod transformer;

// Re-export commonly used types for convenience
pub use crate::api::{create_router, AppState};
pub use crate::core::{AppConfig, AppError, Result};
