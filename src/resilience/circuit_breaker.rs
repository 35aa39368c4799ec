//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: service assumed down, requests fail fast
//! - Half-Open: a bounded number of trial calls probe for recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: volume reached AND (consecutive failures OR failure rate OR slow-call rate)
//! Open → Half-Open: timeout elapsed (evaluated lazily on query)
//! Half-Open → Closed: success_threshold consecutive successes
//! Half-Open → Open: any failure
//! ```
//!
//! # Design Decisions
//! - One breaker per logical service, created lazily by the registry
//! - All state lives behind a single lock so the trip decision cannot race
//! - Entering Closed clears the window; entering Half-Open resets trial counters
//! - A half-open trial whose call is dropped before reporting hands its slot back
//! - Every transition is published on the event bus

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::events::{EventBus, GatewayEvent};
use crate::resilience::window::SlidingWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStats {
    pub state: CircuitState,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub slow_calls: u64,
    pub failure_rate: f64,
    pub slow_call_rate: f64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub half_open_trials: u32,
    /// Milliseconds since the last transition.
    pub state_age_ms: u64,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    state_changed_at: Instant,
    consecutive_successes: u32,
    consecutive_failures: u32,
    half_open_trials: u32,
    /// Bumped on every transition; ties a trial slot to one half-open period.
    epoch: u64,
    window: SlidingWindow,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    service: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    events: EventBus,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: CircuitBreakerConfig, events: EventBus) -> Self {
        let window = SlidingWindow::new(config.window_buckets, config.bucket_duration());
        Self {
            service: service.into(),
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                state_changed_at: Instant::now(),
                consecutive_successes: 0,
                consecutive_failures: 0,
                half_open_trials: 0,
                epoch: 0,
                window,
            }),
            config,
            events,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether a call may proceed. Admitting a half-open trial consumes a slot.
    pub fn can_execute(&self) -> bool {
        self.admit().is_some()
    }

    /// Admit one call and return a permit that reports its outcome.
    ///
    /// Dropping the permit without [`success`](CallPermit::success) or
    /// [`failure`](CallPermit::failure) returns a half-open trial slot, so a
    /// cancelled call cannot leave the breaker stuck in Half-Open.
    pub fn try_acquire(self: &Arc<Self>) -> Option<CallPermit> {
        self.admit().map(|trial_epoch| CallPermit {
            breaker: self.clone(),
            trial_epoch,
        })
    }

    /// `None` when rejected; `Some(Some(epoch))` for a half-open trial.
    fn admit(&self) -> Option<Option<u64>> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let event = self.refresh(&mut inner, now);

        let admitted = match inner.state {
            CircuitState::Closed => Some(None),
            CircuitState::Open => None,
            CircuitState::HalfOpen => {
                if inner.half_open_trials < self.config.half_open_requests {
                    inner.half_open_trials += 1;
                    Some(Some(inner.epoch))
                } else {
                    None
                }
            }
        };
        drop(inner);
        self.emit(event);
        admitted
    }

    fn release_trial(&self, epoch: u64) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen
            && inner.epoch == epoch
            && inner.half_open_trials > 0
        {
            inner.half_open_trials -= 1;
            tracing::debug!(service = %self.service, "Half-open trial abandoned, slot released");
        }
    }

    pub fn record_success(&self, duration: Duration) {
        let now = Instant::now();
        let slow = duration > self.config.slow_call_threshold();
        let mut inner = self.inner.lock();
        let mut event = self.refresh(&mut inner, now);

        inner.window.record_success(now, slow);
        inner.consecutive_failures = 0;
        inner.consecutive_successes += 1;

        match inner.state {
            CircuitState::HalfOpen => {
                if inner.consecutive_successes >= self.config.success_threshold {
                    event = self.transition(&mut inner, CircuitState::Closed, now);
                }
            }
            CircuitState::Closed => {
                if self.should_trip(&inner, now) {
                    event = self.transition(&mut inner, CircuitState::Open, now);
                }
            }
            CircuitState::Open => {}
        }
        drop(inner);
        self.emit(event);
    }

    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let mut event = self.refresh(&mut inner, now);

        inner.window.record_failure(now);
        inner.consecutive_successes = 0;
        inner.consecutive_failures += 1;

        match inner.state {
            CircuitState::HalfOpen => {
                event = self.transition(&mut inner, CircuitState::Open, now);
            }
            CircuitState::Closed => {
                if self.should_trip(&inner, now) {
                    event = self.transition(&mut inner, CircuitState::Open, now);
                }
            }
            CircuitState::Open => {}
        }
        drop(inner);
        self.emit(event);
    }

    pub fn force_open(&self) {
        self.force(CircuitState::Open);
    }

    pub fn force_close(&self) {
        self.force(CircuitState::Closed);
    }

    /// Clear window and counters and force Closed.
    pub fn reset(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let event = self.transition(&mut inner, CircuitState::Closed, now);
        inner.consecutive_failures = 0;
        drop(inner);
        self.emit(event);
    }

    /// Current state, applying the time-based Open → Half-Open transition.
    pub fn state(&self) -> CircuitState {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let event = self.refresh(&mut inner, now);
        let state = inner.state;
        drop(inner);
        self.emit(event);
        state
    }

    pub fn stats(&self) -> CircuitStats {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let event = self.refresh(&mut inner, now);
        let stats = self.snapshot(&inner, now);
        drop(inner);
        self.emit(event);
        stats
    }

    fn force(&self, target: CircuitState) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let event = if inner.state == target {
            None
        } else {
            self.transition(&mut inner, target, now)
        };
        drop(inner);
        if event.is_some() {
            tracing::info!(service = %self.service, state = ?target, "Circuit forced");
        }
        self.emit(event);
    }

    fn refresh(&self, inner: &mut Inner, now: Instant) -> Option<GatewayEvent> {
        if inner.state == CircuitState::Open
            && now.saturating_duration_since(inner.state_changed_at) >= self.config.timeout()
        {
            return self.transition(inner, CircuitState::HalfOpen, now);
        }
        None
    }

    fn should_trip(&self, inner: &Inner, now: Instant) -> bool {
        let counts = inner.window.counts(now);
        if counts.total() < self.config.volume_threshold {
            return false;
        }
        inner.consecutive_failures >= self.config.failure_threshold
            || counts.failure_rate() >= self.config.failure_rate_threshold
            || counts.slow_call_rate() >= self.config.slow_call_rate_threshold
    }

    fn transition(
        &self,
        inner: &mut Inner,
        to: CircuitState,
        now: Instant,
    ) -> Option<GatewayEvent> {
        let previous = inner.state;
        inner.state = to;
        inner.state_changed_at = now;
        inner.epoch = inner.epoch.wrapping_add(1);

        match to {
            CircuitState::Closed => {
                inner.window.clear();
                inner.consecutive_successes = 0;
                inner.consecutive_failures = 0;
                inner.half_open_trials = 0;
            }
            CircuitState::HalfOpen => {
                inner.half_open_trials = 0;
                inner.consecutive_successes = 0;
            }
            CircuitState::Open => {
                inner.consecutive_successes = 0;
            }
        }

        if previous == to {
            return None;
        }
        Some(GatewayEvent::CircuitStateChanged {
            service: self.service.clone(),
            previous,
            current: to,
            stats: self.snapshot(inner, now),
        })
    }

    fn snapshot(&self, inner: &Inner, now: Instant) -> CircuitStats {
        let counts = inner.window.counts(now);
        CircuitStats {
            state: inner.state,
            total_requests: counts.total(),
            successful_requests: counts.successes,
            failed_requests: counts.failures,
            slow_calls: counts.slow,
            failure_rate: counts.failure_rate(),
            slow_call_rate: counts.slow_call_rate(),
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            half_open_trials: inner.half_open_trials,
            state_age_ms: now.saturating_duration_since(inner.state_changed_at).as_millis() as u64,
        }
    }

    fn emit(&self, event: Option<GatewayEvent>) {
        if let Some(event) = event {
            self.events.publish(event);
        }
    }

    #[cfg(test)]
    fn window_is_empty(&self) -> bool {
        self.inner.lock().window.is_empty()
    }
}

/// Outcome handle for one admitted call.
#[derive(Debug)]
#[must_use = "dropping a permit without an outcome records nothing"]
pub struct CallPermit {
    breaker: Arc<CircuitBreaker>,
    trial_epoch: Option<u64>,
}

impl CallPermit {
    pub fn success(mut self, duration: Duration) {
        self.trial_epoch = None;
        self.breaker.record_success(duration);
    }

    pub fn failure(mut self) {
        self.trial_epoch = None;
        self.breaker.record_failure();
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if let Some(epoch) = self.trial_epoch.take() {
            self.breaker.release_trial(epoch);
        }
    }
}
