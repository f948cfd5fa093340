//! Adaptive rate limiter guarding every upstream call.
//!
//! Admission follows a virtual-schedule (GCRA style) with a burst allowance:
//! each admitted caller pushes the theoretical arrival line forward by one
//! interval, and a caller may proceed once `now` has caught up with that line
//! minus the burst window. Upstream throttling raises a cooldown floor that
//! the schedule cannot go below. All scheduling decisions are made under one
//! lock; callers then sleep out their delay without holding it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::core::cancel::CancelToken;
use crate::core::config::RateLimitConfig;
use crate::core::metrics::get_metrics;

const MAX_BACKOFF_MS: u64 = 60_000;
const BASE_BACKOFF_MS: u64 = 1_000;
const MAX_BACKOFF_EXPONENT: u32 = 6;
/// Ceiling for an upstream-supplied `retry-after`
const MAX_RETRY_AFTER_MS: u64 = 3_600_000;

/// Why an admission was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    #[error("Request cancelled while waiting for rate limiter")]
    Cancelled,

    #[error("Rate limiter queue is full ({limit} waiting)")]
    QueueFull { limit: usize },
}

/// Time source for the limiter.
pub trait Clock: Send + Sync + 'static {
    /// Milliseconds on a monotonic timeline.
    fn now_ms(&self) -> u64;

    fn sleep(&self, ms: u64) -> BoxFuture<'static, ()>;
}

/// Clock backed by the tokio timer, so paused-time tests drive it too.
pub struct TokioClock {
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn sleep(&self, ms: u64) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(Duration::from_millis(ms)))
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct LimiterState {
    theoretical_arrival_ms: u64,
    cooldown_until_ms: u64,
    consecutive_429: u32,
}

impl LimiterState {
    /// Admit one caller at `now`, returning how long it must wait.
    fn schedule(&mut self, now: u64, config: &RateLimitConfig) -> u64 {
        let interval = config.interval_ms;
        let burst_window = u64::from(config.burst.saturating_sub(1)).saturating_mul(interval);
        let allowed_at = self
            .cooldown_until_ms
            .max(self.theoretical_arrival_ms.saturating_sub(burst_window));

        if now < allowed_at {
            self.theoretical_arrival_ms = self
                .theoretical_arrival_ms
                .max(allowed_at)
                .saturating_add(interval);
            allowed_at - now
        } else {
            self.theoretical_arrival_ms = self.theoretical_arrival_ms.max(now).saturating_add(interval);
            0
        }
    }

    /// Apply a cooldown of `penalty_ms` starting at `now`. Never moves backward.
    fn throttle(&mut self, now: u64, penalty_ms: u64) -> u64 {
        let cooldown_ms = penalty_ms.max(1);
        self.cooldown_until_ms = self
            .cooldown_until_ms
            .max(now.saturating_add(cooldown_ms));
        self.theoretical_arrival_ms = self.theoretical_arrival_ms.max(self.cooldown_until_ms);
        cooldown_ms
    }

    fn succeed(&mut self, now: u64) {
        self.consecutive_429 = 0;
        if self.cooldown_until_ms <= now {
            self.cooldown_until_ms = 0;
        }
    }
}

/// Process-wide admission gate in front of the upstream.
pub struct AdaptiveRateLimiter {
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
    queued: AtomicUsize,
    clock: Arc<dyn Clock>,
}

/// Reserved queue slot; released on drop, including when the caller is cancelled.
struct QueueSlot<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AdaptiveRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(TokioClock::new()))
    }

    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            state: Mutex::new(LimiterState::default()),
            queued: AtomicUsize::new(0),
            clock,
        }
    }

    /// Number of callers currently inside [`acquire`](Self::acquire).
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Wait until the caller may contact the upstream.
    ///
    /// Returns the milliseconds spent waiting for the scheduled slot. Fails
    /// with [`RateLimitError::QueueFull`] without waiting when the queue bound
    /// is reached, and with [`RateLimitError::Cancelled`] as soon as `cancel`
    /// fires, whether the caller is waiting for the lock or for its slot.
    pub async fn acquire(&self, cancel: &CancelToken) -> Result<u64, RateLimitError> {
        if cancel.is_cancelled() {
            self.record_rejection("cancelled");
            return Err(RateLimitError::Cancelled);
        }

        let _slot = match self.reserve_slot() {
            Ok(slot) => slot,
            Err(err) => {
                tracing::warn!(
                    limit = self.config.max_queued,
                    "Rate limiter queue full, shedding request"
                );
                self.record_rejection("queue_full");
                return Err(err);
            }
        };

        let wait_ms = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.record_rejection("cancelled");
                return Err(RateLimitError::Cancelled);
            }
            mut state = self.state.lock() => {
                let now = self.clock.now_ms();
                state.schedule(now, &self.config)
            }
        };

        if wait_ms > 0 {
            tracing::warn!(
                wait_ms = wait_ms,
                "Rate limited, waiting {}s before upstream request",
                ceil_seconds(wait_ms)
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.record_rejection("cancelled");
                    return Err(RateLimitError::Cancelled);
                }
                _ = self.clock.sleep(wait_ms) => {}
            }
        }

        get_metrics()
            .rate_limit_wait
            .observe(wait_ms as f64 / 1000.0);
        Ok(wait_ms)
    }

    /// Record an upstream 429 and push the schedule out accordingly.
    ///
    /// `retry_after` is the raw `retry-after` header value, if any. Returns
    /// the cooldown applied in milliseconds.
    pub async fn report_throttled(&self, retry_after: Option<&str>) -> u64 {
        let mut state = self.state.lock().await;
        state.consecutive_429 = state.consecutive_429.saturating_add(1);

        let penalty_ms = retry_after
            .and_then(|value| parse_retry_after_ms(value, Utc::now()))
            .unwrap_or_else(|| compute_backoff_ms(state.consecutive_429));

        let now = self.clock.now_ms();
        let cooldown_ms = state.throttle(now, penalty_ms);

        get_metrics().upstream_throttled.inc();
        tracing::warn!(
            consecutive_429 = state.consecutive_429,
            cooldown_ms = cooldown_ms,
            "Upstream throttled, cooling down for {}s",
            ceil_seconds(cooldown_ms)
        );

        cooldown_ms
    }

    /// Record a successful upstream response.
    pub async fn report_success(&self) {
        let mut state = self.state.lock().await;
        let now = self.clock.now_ms();
        state.succeed(now);
    }

    fn reserve_slot(&self) -> Result<QueueSlot<'_>, RateLimitError> {
        let limit = self.config.max_queued;
        self.queued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < limit).then_some(n + 1)
            })
            .map_err(|_| RateLimitError::QueueFull { limit })?;
        Ok(QueueSlot {
            counter: &self.queued,
        })
    }

    fn record_rejection(&self, reason: &str) {
        get_metrics()
            .rate_limit_rejected
            .with_label_values(&[reason])
            .inc();
    }
}

/// Exponential backoff used when the upstream gives no usable `retry-after`.
pub fn compute_backoff_ms(consecutive_429: u32) -> u64 {
    let exponent = consecutive_429.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
    (BASE_BACKOFF_MS << exponent).min(MAX_BACKOFF_MS)
}

/// Parse a `retry-after` value (fractional seconds or an HTTP date) into milliseconds.
///
/// The result is capped at one hour.
pub fn parse_retry_after_ms(value: &str, now: DateTime<Utc>) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(seconds) = value.parse::<f64>() {
        if seconds.is_finite() && seconds >= 0.0 {
            return Some(((seconds * 1000.0).round() as u64).min(MAX_RETRY_AFTER_MS));
        }
        return None;
    }

    DateTime::parse_from_rfc2822(value).ok().map(|date| {
        let delta = date.with_timezone(&Utc) - now;
        (delta.num_milliseconds().max(0) as u64).min(MAX_RETRY_AFTER_MS)
    })
}

fn ceil_seconds(ms: u64) -> u64 {
    ms.div_ceil(1000).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use tokio::time::Instant;

    fn config(interval_ms: u64, burst: u32, max_queued: usize) -> RateLimitConfig {
        RateLimitConfig {
            interval_ms,
            burst,
            max_queued,
        }
    }

    #[test]
    fn test_schedule_burst_then_interval() {
        let cfg = config(250, 8, 100);
        let mut state = LimiterState::default();

        for _ in 0..8 {
            assert_eq!(state.schedule(0, &cfg), 0);
        }
        assert_eq!(state.schedule(0, &cfg), 250);
        assert_eq!(state.schedule(0, &cfg), 500);
    }

    #[test]
    fn test_schedule_recovers_after_idle() {
        let cfg = config(100, 2, 100);
        let mut state = LimiterState::default();

        assert_eq!(state.schedule(0, &cfg), 0);
        assert_eq!(state.schedule(0, &cfg), 0);
        assert_eq!(state.schedule(0, &cfg), 100);
        // Long idle period: the burst allowance is available again
        assert_eq!(state.schedule(10_000, &cfg), 0);
        assert_eq!(state.schedule(10_000, &cfg), 0);
    }

    #[test]
    fn test_throttle_never_moves_backward() {
        let mut state = LimiterState::default();
        state.throttle(0, 5_000);
        state.throttle(100, 1_000);
        assert_eq!(state.cooldown_until_ms, 5_000);
        assert!(state.theoretical_arrival_ms >= 5_000);
    }

    #[test]
    fn test_zero_penalty_still_cools_down() {
        let mut state = LimiterState::default();
        assert_eq!(state.throttle(10, 0), 1);
        assert_eq!(state.cooldown_until_ms, 11);
    }

    #[test]
    fn test_success_clears_only_elapsed_cooldown() {
        let mut state = LimiterState::default();
        state.consecutive_429 = 3;
        state.throttle(0, 1_000);

        state.succeed(500);
        assert_eq!(state.consecutive_429, 0);
        assert_eq!(state.cooldown_until_ms, 1_000);

        state.succeed(1_000);
        assert_eq!(state.cooldown_until_ms, 0);
    }

    #[test]
    fn test_compute_backoff() {
        assert_eq!(compute_backoff_ms(1), 1_000);
        assert_eq!(compute_backoff_ms(2), 2_000);
        assert_eq!(compute_backoff_ms(3), 4_000);
        assert_eq!(compute_backoff_ms(7), 60_000);
        assert_eq!(compute_backoff_ms(50), 60_000);
        assert_eq!(compute_backoff_ms(0), 1_000);
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        let now = Utc::now();
        assert_eq!(parse_retry_after_ms("0.05", now), Some(50));
        assert_eq!(parse_retry_after_ms("2", now), Some(2_000));
        assert_eq!(parse_retry_after_ms(" 1.5 ", now), Some(1_500));
        assert_eq!(parse_retry_after_ms("-1", now), None);
        assert_eq!(parse_retry_after_ms("soon", now), None);
        assert_eq!(parse_retry_after_ms("", now), None);
    }

    #[test]
    fn test_parse_retry_after_is_capped() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
        assert_eq!(parse_retry_after_ms("1e30", now), Some(MAX_RETRY_AFTER_MS));
        assert_eq!(parse_retry_after_ms("86400", now), Some(MAX_RETRY_AFTER_MS));
        assert_eq!(
            parse_retry_after_ms("Fri, 21 Oct 2044 07:28:00 GMT", now),
            Some(MAX_RETRY_AFTER_MS)
        );
    }

    #[test]
    fn test_state_saturates_near_max() {
        let cfg = config(250, 1, 100);
        let mut state = LimiterState::default();
        state.throttle(u64::MAX - 10, u64::MAX);
        assert_eq!(state.cooldown_until_ms, u64::MAX);
        assert_eq!(state.schedule(0, &cfg), u64::MAX);
        assert_eq!(state.theoretical_arrival_ms, u64::MAX);
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
        assert_eq!(
            parse_retry_after_ms("Wed, 21 Oct 2015 07:28:30 GMT", now),
            Some(30_000)
        );
        assert_eq!(
            parse_retry_after_ms("Wed, 21 Oct 2015 07:27:00 GMT", now),
            Some(0)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_admits_immediately_then_delays() {
        let limiter = AdaptiveRateLimiter::new(config(250, 8, 100));
        let token = CancelToken::new();
        let start = Instant::now();

        for _ in 0..8 {
            assert_eq!(limiter.acquire(&token).await.unwrap(), 0);
        }
        assert!(start.elapsed() < Duration::from_millis(250));

        let waited = limiter.acquire(&token).await.unwrap();
        assert!(waited >= 250);
        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_imposes_cooldown() {
        let limiter = AdaptiveRateLimiter::new(config(250, 8, 100));
        let token = CancelToken::new();

        let cooldown = limiter.report_throttled(Some("0.05")).await;
        assert_eq!(cooldown, 50);

        let start = Instant::now();
        let waited = limiter.acquire(&token).await.unwrap();
        assert!(waited >= 40);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_retry_after_is_capped() {
        let limiter = AdaptiveRateLimiter::new(config(250, 8, 100));
        let cooldown = limiter.report_throttled(Some("1e30")).await;
        assert_eq!(cooldown, MAX_RETRY_AFTER_MS);

        let state = limiter.state.lock().await;
        assert!(state.cooldown_until_ms <= MAX_RETRY_AFTER_MS + 1_000);
        assert_eq!(state.consecutive_429, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_retry_after_uses_backoff() {
        let limiter = AdaptiveRateLimiter::new(config(250, 8, 100));
        assert_eq!(limiter.report_throttled(None).await, 1_000);
        assert_eq!(limiter.report_throttled(Some("garbage")).await, 2_000);

        limiter.report_success().await;
        assert_eq!(limiter.state.lock().await.consecutive_429, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_entering() {
        let limiter = AdaptiveRateLimiter::new(config(250, 8, 100));
        let token = CancelToken::new();
        token.cancel();

        assert_matches!(limiter.acquire(&token).await, Err(RateLimitError::Cancelled));
        assert_eq!(limiter.queued(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting_for_lock() {
        let limiter = Arc::new(AdaptiveRateLimiter::new(config(250, 8, 100)));
        let guard = limiter.state.lock().await;

        let token = CancelToken::new();
        let waiter = {
            let limiter = limiter.clone();
            let token = token.clone();
            tokio::spawn(async move { limiter.acquire(&token).await })
        };

        let start = Instant::now();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(limiter.queued(), 1);
        token.cancel();

        let result = waiter.await.unwrap();
        assert_matches!(result, Err(RateLimitError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(limiter.queued(), 0);

        drop(guard);

        // The cancelled caller consumed no slot
        let waited = limiter.acquire(&CancelToken::new()).await.unwrap();
        assert_eq!(waited, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_sleeping() {
        let limiter = Arc::new(AdaptiveRateLimiter::new(config(10_000, 1, 100)));
        limiter.acquire(&CancelToken::new()).await.unwrap();

        let token = CancelToken::new();
        let waiter = {
            let limiter = limiter.clone();
            let token = token.clone();
            tokio::spawn(async move { limiter.acquire(&token).await })
        };

        let start = Instant::now();
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        assert_matches!(waiter.await.unwrap(), Err(RateLimitError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(limiter.queued(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_full_fails_immediately() {
        let limiter = Arc::new(AdaptiveRateLimiter::new(config(250, 8, 2)));
        let guard = limiter.state.lock().await;

        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.acquire(&CancelToken::new()).await })
            })
            .collect();

        while limiter.queued() < 2 {
            tokio::task::yield_now().await;
        }

        let start = Instant::now();
        assert_matches!(
            limiter.acquire(&CancelToken::new()).await,
            Err(RateLimitError::QueueFull { limit: 2 })
        );
        assert_eq!(start.elapsed(), Duration::ZERO);

        drop(guard);
        for waiter in waiters {
            assert!(waiter.await.unwrap().is_ok());
        }
        assert_eq!(limiter.queued(), 0);
    }

    #[test]
    fn test_ceil_seconds() {
        assert_eq!(ceil_seconds(0), 1);
        assert_eq!(ceil_seconds(50), 1);
        assert_eq!(ceil_seconds(1_000), 1);
        assert_eq!(ceil_seconds(1_001), 2);
    }
}
