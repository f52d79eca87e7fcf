//! Circuit breaker in front of the external messaging API.
//!
//! One instance per API client, shared by every tenant. State is process-local
//! and never persisted.
//!
//! State transitions:
//! - Closed -> Open: `failure_threshold` consecutive failures
//! - Open -> HalfOpen: first `allow()` at or after `reset_at` (one trial granted)
//! - HalfOpen -> Closed: the trial succeeds
//! - HalfOpen -> Open: the trial fails (fresh `reset_at`)

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ports::Clock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Point-in-time view for observability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub failure_count: u32,
    pub reset_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failure_count: u32,
    reset_at: Option<DateTime<Utc>>,
    trial_in_flight: bool,
}

pub struct CircuitBreaker {
    settings: BreakerSettings,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(settings: BreakerSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings,
            clock,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                reset_at: None,
                trial_in_flight: false,
            }),
        }
    }

    // never held across .await
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn reopen(&self, inner: &mut Inner) {
        let timeout = chrono::Duration::from_std(self.settings.reset_timeout)
            .unwrap_or(chrono::Duration::MAX);
        let now = self.clock.now();
        inner.state = BreakerState::Open;
        inner.trial_in_flight = false;
        inner.reset_at = Some(now.checked_add_signed(timeout).unwrap_or(DateTime::<Utc>::MAX_UTC));
    }

    /// May a call go out now?
    pub fn allow(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let now = self.clock.now();
                if inner.reset_at.is_some_and(|at| now < at) {
                    return false;
                }
                inner.state = BreakerState::HalfOpen;
                inner.failure_count = 0;
                inner.trial_in_flight = true;
                tracing::info!("circuit half-open, allowing one trial call");
                true
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    false
                } else {
                    inner.trial_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != BreakerState::Closed {
            tracing::info!("circuit closed");
        }
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.reset_at = None;
        inner.trial_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                self.reopen(&mut inner);
                tracing::warn!("circuit trial failed, reopening");
            }
            BreakerState::Closed | BreakerState::Open => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                if inner.state == BreakerState::Closed
                    && inner.failure_count >= self.settings.failure_threshold
                {
                    self.reopen(&mut inner);
                    tracing::warn!(
                        failures = inner.failure_count,
                        reset_at = ?inner.reset_at,
                        "circuit opened"
                    );
                }
            }
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            reset_at: inner.reset_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use chrono::TimeZone;

    fn breaker() -> (CircuitBreaker, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        ));
        (CircuitBreaker::new(BreakerSettings::default(), clock.clone()), clock)
    }

    fn trip(breaker: &CircuitBreaker) {
        for _ in 0..5 {
            assert!(breaker.allow());
            breaker.record_failure();
        }
    }

    #[test]
    fn opens_after_threshold() {
        let (breaker, _clock) = breaker();
        for _ in 0..4 {
            breaker.record_failure();
        }
        assert!(breaker.allow());
        breaker.record_failure();

        assert!(!breaker.allow());
        let snap = breaker.snapshot();
        assert_eq!(snap.state, BreakerState::Open);
        assert_eq!(snap.failure_count, 5);
    }

    #[test]
    fn success_resets_the_count() {
        let (breaker, _clock) = breaker();
        for _ in 0..4 {
            breaker.record_failure();
        }
        breaker.record_success();
        breaker.record_failure();
        assert!(breaker.allow());
        assert_eq!(breaker.snapshot().failure_count, 1);
    }

    #[test]
    fn allows_exactly_one_trial_after_reset() {
        let (breaker, clock) = breaker();
        trip(&breaker);

        clock.advance(chrono::Duration::seconds(59));
        assert!(!breaker.allow());

        clock.advance(chrono::Duration::seconds(1));
        assert!(breaker.allow());
        assert!(!breaker.allow());
        assert!(!breaker.allow());

        let snap = breaker.snapshot();
        assert_eq!(snap.state, BreakerState::HalfOpen);
        assert_eq!(snap.failure_count, 0);
    }

    #[test]
    fn successful_trial_closes() {
        let (breaker, clock) = breaker();
        trip(&breaker);
        clock.advance(chrono::Duration::seconds(60));

        assert!(breaker.allow());
        breaker.record_success();
        assert!(breaker.allow());
        assert!(breaker.allow());
        assert_eq!(breaker.snapshot().state, BreakerState::Closed);
    }

    #[test]
    fn failed_trial_reopens_with_fresh_reset() {
        let (breaker, clock) = breaker();
        trip(&breaker);
        clock.advance(chrono::Duration::seconds(60));

        assert!(breaker.allow());
        breaker.record_failure();

        let snap = breaker.snapshot();
        assert_eq!(snap.state, BreakerState::Open);
        assert_eq!(snap.reset_at, Some(clock.now() + chrono::Duration::seconds(60)));
        assert!(!breaker.allow());
    }
}
