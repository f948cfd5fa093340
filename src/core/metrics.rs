//! Prometheus metrics for monitoring the gateway.
//!
//! This module provides a centralized metrics registry for request traffic,
//! initiator classification, token usage and rate limiter behaviour.

use prometheus::{
    register_gauge_vec, register_histogram, register_histogram_vec, register_int_counter,
    register_int_counter_vec, GaugeVec, Histogram, HistogramVec, IntCounter, IntCounterVec,
};
use std::sync::OnceLock;

/// Container for all application metrics.
pub struct Metrics {
    /// Total number of requests by method, endpoint, status and client
    pub request_count: IntCounterVec,

    /// Request duration histogram in seconds
    pub request_duration: HistogramVec,

    /// Number of currently active requests by endpoint
    pub active_requests: GaugeVec,

    /// Requests by classified initiator (agent/user)
    pub initiator_count: IntCounterVec,

    /// Total token usage by model and token type
    pub token_usage: IntCounterVec,

    /// Upstream 429 responses
    pub upstream_throttled: IntCounter,

    /// Time spent waiting for admission by the rate limiter
    pub rate_limit_wait: Histogram,

    /// Admissions refused by the rate limiter, by reason
    pub rate_limit_rejected: IntCounterVec,

    /// Streaming responses abandoned by the client, by initiator
    pub client_disconnects: IntCounterVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Initialize the metrics registry.
///
/// Safe to call more than once; every call returns the same instance.
pub fn init_metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let request_count = register_int_counter_vec!(
            "gateway_requests_total",
            "Total number of requests",
            &["method", "endpoint", "status_code", "client"]
        )
        .expect("Failed to register request_count metric");

        let request_duration = register_histogram_vec!(
            "gateway_request_duration_seconds",
            "Request duration in seconds",
            &["method", "endpoint", "client"],
            vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]
        )
        .expect("Failed to register request_duration metric");

        let active_requests = register_gauge_vec!(
            "gateway_active_requests",
            "Number of active requests",
            &["endpoint"]
        )
        .expect("Failed to register active_requests metric");

        let initiator_count = register_int_counter_vec!(
            "gateway_initiator_total",
            "Requests by classified initiator",
            &["endpoint", "initiator"]
        )
        .expect("Failed to register initiator_count metric");

        let token_usage = register_int_counter_vec!(
            "gateway_tokens_total",
            "Total number of tokens used",
            &["model", "token_type"]
        )
        .expect("Failed to register token_usage metric");

        let upstream_throttled = register_int_counter!(
            "gateway_upstream_throttled_total",
            "Upstream responses with status 429"
        )
        .expect("Failed to register upstream_throttled metric");

        let rate_limit_wait = register_histogram!(
            "gateway_rate_limit_wait_seconds",
            "Time spent waiting for rate limiter admission",
            vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]
        )
        .expect("Failed to register rate_limit_wait metric");

        let rate_limit_rejected = register_int_counter_vec!(
            "gateway_rate_limit_rejected_total",
            "Admissions refused by the rate limiter",
            &["reason"]
        )
        .expect("Failed to register rate_limit_rejected metric");

        let client_disconnects = register_int_counter_vec!(
            "gateway_client_disconnects_total",
            "Streaming responses abandoned by the client before completion",
            &["initiator"]
        )
        .expect("Failed to register client_disconnects metric");

        Metrics {
            request_count,
            request_duration,
            active_requests,
            initiator_count,
            token_usage,
            upstream_throttled,
            rate_limit_wait,
            rate_limit_rejected,
            client_disconnects,
        }
    })
}

/// Get the global metrics instance, registering it on first use.
pub fn get_metrics() -> &'static Metrics {
    init_metrics()
}

/// Record token usage for a translated response.
pub fn record_token_usage(model: &str, input: u64, output: u64, cache_read: Option<u64>) {
    let metrics = get_metrics();
    metrics
        .token_usage
        .with_label_values(&[model, "input"])
        .inc_by(input);
    metrics
        .token_usage
        .with_label_values(&[model, "output"])
        .inc_by(output);
    if let Some(cached) = cache_read {
        metrics
            .token_usage
            .with_label_values(&[model, "cache_read"])
            .inc_by(cached);
    }
}
