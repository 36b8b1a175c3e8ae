use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};
use strum::Display;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl CircuitState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

/// Process-wide failure gate in front of the pipeline.
///
/// Trips open after `failure_threshold` consecutive downstream failures and
/// stays open for `recovery_window`, after which one or more trial requests
/// are let through. Every transition is a single atomic operation, so callers
/// never need a lock.
pub struct CircuitBreaker {
    state: AtomicU8,
    failures: AtomicU64,
    /// Milliseconds since `epoch` of the most recent failure.
    last_failure_ms: AtomicU64,
    epoch: Instant,
    failure_threshold: u64,
    recovery_window: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u64, recovery_window: Duration) -> Self {
        metrics::gauge!("pipeline_circuit_open").set(0.0);
        Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            failures: AtomicU64::new(0),
            last_failure_ms: AtomicU64::new(0),
            epoch: Instant::now(),
            failure_threshold: failure_threshold.max(1),
            recovery_window,
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Consecutive failures recorded since the last reset.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Acquire)
    }

    /// Whether new work must be refused. Moves Open to HalfOpen once the
    /// recovery window has passed.
    pub fn is_open(&self) -> bool {
        match self.state() {
            CircuitState::Open => {
                if self.since_last_failure() < self.recovery_window {
                    return true;
                }
                if self.transition(CircuitState::Open, CircuitState::HalfOpen) {
                    tracing::info!("Circuit breaker half-open, allowing trial request");
                }
                false
            }
            CircuitState::HalfOpen | CircuitState::Closed => false,
        }
    }

    pub fn record_failure(&self) {
        self.last_failure_ms
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::Release);

        if self.transition(CircuitState::HalfOpen, CircuitState::Open) {
            let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
            metrics::gauge!("pipeline_circuit_open").set(1.0);
            tracing::warn!(failures, "Trial request failed, circuit breaker reopened");
            return;
        }

        let threshold = self.failure_threshold;
        let previous = self
            .failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(if n + 1 >= threshold { 0 } else { n + 1 })
            })
            .unwrap_or_else(|n| n);

        if previous + 1 >= threshold {
            let before = self.state.swap(CircuitState::Open as u8, Ordering::AcqRel);
            metrics::gauge!("pipeline_circuit_open").set(1.0);
            if CircuitState::from_raw(before) != CircuitState::Open {
                tracing::warn!(
                    threshold,
                    recovery_secs = self.recovery_window.as_secs_f64(),
                    "Circuit breaker opened"
                );
            }
        }
    }

    /// Reset after a successful downstream call. A success reported while the
    /// breaker is Open comes from work admitted before it tripped and does not
    /// shorten the recovery window.
    pub fn record_success(&self) {
        if self.state() == CircuitState::Open {
            return;
        }
        self.failures.store(0, Ordering::Release);
        if self.transition(CircuitState::HalfOpen, CircuitState::Closed) {
            metrics::gauge!("pipeline_circuit_open").set(0.0);
            tracing::info!("Circuit breaker closed");
        }
    }

    fn transition(&self, from: CircuitState, to: CircuitState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn since_last_failure(&self) -> Duration {
        let now = self.epoch.elapsed().as_millis() as u64;
        let last = self.last_failure_ms.load(Ordering::Acquire);
        Duration::from_millis(now.saturating_sub(last))
    }
}
