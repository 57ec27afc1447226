//! Per-provider circuit breaker.
//!
//! A pure time gate: after `failure_threshold` consecutive failures the
//! circuit stays open until `cooldown` has elapsed, then every caller passes
//! again. There is no half-open probe limiting. A success zeroes the failure
//! counter but leaves an already-scheduled open window in place.
//!
//! Timestamps use `tokio::time::Instant` so paused-clock tests can drive the
//! cooldown.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::warn;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(30_000);

#[derive(Debug, Default)]
struct BreakerState {
    failures: u32,
    last_failure_at: Option<Instant>,
    open_until: Option<Instant>,
}

/// Failure tracker for one provider.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

/// Point-in-time view of a breaker, for health reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub failures: u32,
    pub open: bool,
    /// Milliseconds left until the circuit closes, when open.
    pub retry_in_ms: Option<u64>,
    /// Milliseconds since the last recorded failure.
    pub last_failure_ms_ago: Option<u64>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_COOLDOWN)
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            state: Mutex::new(BreakerState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `true` once the open window (if any) has passed.
    pub fn can_pass(&self) -> bool {
        let state = self.lock();
        match state.open_until {
            Some(until) => Instant::now() > until,
            None => true,
        }
    }

    pub fn record_success(&self) {
        self.lock().failures = 0;
    }

    pub fn record_failure(&self) {
        let mut state = self.lock();
        let now = Instant::now();
        state.failures += 1;
        state.last_failure_at = Some(now);

        if state.failures >= self.failure_threshold {
            let until = now + self.cooldown;
            // Only ever push the window forward.
            if state.open_until.map_or(true, |current| until > current) {
                state.open_until = Some(until);
            }
            warn!(
                failures = state.failures,
                cooldown_ms = self.cooldown.as_millis() as u64,
                "Circuit opened"
            );
        }
    }

    pub fn failures(&self) -> u32 {
        self.lock().failures
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.lock();
        let now = Instant::now();
        let retry_in = state
            .open_until
            .filter(|until| *until >= now)
            .map(|until| until.duration_since(now).as_millis() as u64);

        BreakerSnapshot {
            failures: state.failures,
            open: retry_in.is_some(),
            retry_in_ms: retry_in,
            last_failure_ms_ago: state
                .last_failure_at
                .map(|at| now.duration_since(at).as_millis() as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold() {
        let cb = CircuitBreaker::new(3, Duration::from_millis(30_000));
        assert!(cb.can_pass());

        cb.record_failure();
        cb.record_failure();
        assert!(cb.can_pass());

        cb.record_failure();
        assert!(!cb.can_pass());
        assert!(cb.snapshot().open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_before_threshold_resets_counter() {
        let cb = CircuitBreaker::default();
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.failures(), 0);

        cb.record_failure();
        cb.record_failure();
        assert!(cb.can_pass());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closes_after_cooldown_without_reset() {
        let cb = CircuitBreaker::new(3, Duration::from_millis(30_000));
        for _ in 0..3 {
            cb.record_failure();
        }
        assert!(!cb.can_pass());

        tokio::time::advance(Duration::from_millis(29_999)).await;
        assert!(!cb.can_pass());

        tokio::time::advance(Duration::from_millis(2)).await;
        assert!(cb.can_pass());
        assert!(!cb.snapshot().open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_does_not_clear_open_window() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(1_000));
        cb.record_failure();
        assert!(!cb.can_pass());

        cb.record_success();
        assert_eq!(cb.failures(), 0);
        assert!(!cb.can_pass());

        tokio::time::advance(Duration::from_millis(1_001)).await;
        assert!(cb.can_pass());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_past_threshold_extend_window() {
        let cb = CircuitBreaker::new(2, Duration::from_millis(1_000));
        cb.record_failure();
        cb.record_failure();

        tokio::time::advance(Duration::from_millis(600)).await;
        cb.record_failure();

        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(!cb.can_pass());
        assert_eq!(cb.snapshot().retry_in_ms, Some(400));
    }
}
