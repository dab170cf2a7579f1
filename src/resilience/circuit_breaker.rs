//! Circuit breaker for downstream protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: downstream assumed down, requests fail fast
//! - Half-Open: testing if downstream recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= threshold, or one call times out
//! Open → Half-Open: break duration elapsed since the last transition
//! Half-Open → Closed: probe request succeeds, failures reset
//! Half-Open → Open: probe request fails or times out, break restarts
//! ```
//!
//! # Design Decisions
//! - Per-route circuit breaker (not global)
//! - Fail fast in Open state (no dispatch attempted)
//! - Single probe in Half-Open; everything else is treated as Open
//! - State, counter and timestamp change together under one lock

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::CircuitBreakerOptions;
use crate::error::GatewayError;
use crate::observability::metrics;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Consistent view of a breaker at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_transition: Instant,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: u32,
    since: Instant,
    probe_in_flight: bool,
}

/// Thresholds in runtime units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub break_duration: Duration,
    pub timeout: Duration,
}

impl From<&CircuitBreakerOptions> for BreakerSettings {
    fn from(options: &CircuitBreakerOptions) -> Self {
        Self {
            failure_threshold: options.failure_threshold.max(1),
            break_duration: Duration::from_millis(options.break_duration_ms),
            timeout: Duration::from_millis(options.timeout_ms),
        }
    }
}

/// Per-route circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    route: String,
    settings: BreakerSettings,
    inner: Mutex<Inner>,
}

/// Admission ticket for one call.
///
/// A probe permit dropped without an outcome (the caller was cancelled) frees
/// the probe slot so the next request can probe instead.
#[derive(Debug)]
pub struct Permit {
    breaker: Arc<CircuitBreaker>,
    probe: bool,
    settled: bool,
}

impl Permit {
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.probe);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.probe);
    }

    /// The call ran past the timeout. Opens the circuit whatever the count.
    pub fn timed_out(mut self) {
        self.settled = true;
        self.breaker.on_timeout(self.probe);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            self.breaker.abandon_probe();
        }
    }
}

impl CircuitBreaker {
    pub fn new(route: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            route: route.into(),
            settings,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                since: Instant::now(),
                probe_in_flight: false,
            }),
        }
    }

    pub fn settings(&self) -> BreakerSettings {
        self.settings
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        CircuitSnapshot {
            state: inner.state,
            consecutive_failures: inner.failures,
            last_transition: inner.since,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.snapshot().state
    }

    /// Admit a call, or fail fast with CircuitOpen.
    pub fn admit(self: &Arc<Self>) -> Result<Permit, GatewayError> {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        let probe = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                if inner.since.elapsed() < self.settings.break_duration {
                    return Err(self.open_error());
                }
                self.transition(&mut inner, CircuitState::HalfOpen);
                inner.probe_in_flight = true;
                true
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    return Err(self.open_error());
                }
                inner.probe_in_flight = true;
                true
            }
        };

        Ok(Permit {
            breaker: self.clone(),
            probe,
            settled: false,
        })
    }

    /// Run `call` under the breaker with the configured timeout.
    ///
    /// Errors for which `is_failure` holds count against the circuit. A
    /// timeout opens it immediately; the call future is dropped, which
    /// cancels it.
    pub async fn call<F, T>(
        self: &Arc<Self>,
        call: F,
        is_failure: impl Fn(&GatewayError) -> bool,
    ) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        let permit = self.admit()?;

        match tokio::time::timeout(self.settings.timeout, call).await {
            Ok(Ok(value)) => {
                permit.success();
                Ok(value)
            }
            Ok(Err(error)) => {
                if is_failure(&error) {
                    permit.failure();
                } else {
                    permit.success();
                }
                Err(error)
            }
            Err(_elapsed) => {
                tracing::warn!(
                    route = %self.route,
                    timeout_ms = self.settings.timeout.as_millis() as u64,
                    "Downstream call timed out"
                );
                permit.timed_out();
                Err(GatewayError::DownstreamTimeout(self.settings.timeout))
            }
        }
    }

    fn on_success(&self, probe: bool) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        match inner.state {
            CircuitState::HalfOpen if probe => {
                inner.probe_in_flight = false;
                inner.failures = 0;
                self.transition(&mut inner, CircuitState::Closed);
            }
            CircuitState::Closed => inner.failures = 0,
            // A call admitted before the circuit opened does not close it.
            _ => {}
        }
    }

    fn on_failure(&self, probe: bool) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        match inner.state {
            CircuitState::HalfOpen if probe => {
                inner.probe_in_flight = false;
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.settings.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                } else {
                    tracing::warn!(
                        route = %self.route,
                        failures = inner.failures,
                        threshold = self.settings.failure_threshold,
                        "Circuit breaker failure recorded"
                    );
                }
            }
            _ => {}
        }
    }

    fn on_timeout(&self, probe: bool) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        match inner.state {
            CircuitState::HalfOpen if probe => {
                inner.probe_in_flight = false;
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Closed => {
                inner.failures += 1;
                self.transition(&mut inner, CircuitState::Open);
            }
            _ => {}
        }
    }

    fn abandon_probe(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.since = Instant::now();

        match to {
            CircuitState::Open => tracing::error!(
                route = %self.route,
                from = from.as_str(),
                failures = inner.failures,
                break_ms = self.settings.break_duration.as_millis() as u64,
                "Circuit breaker OPENED"
            ),
            _ => tracing::info!(
                route = %self.route,
                from = from.as_str(),
                to = to.as_str(),
                "Circuit breaker transition"
            ),
        }
        metrics::record_circuit_transition(&self.route, to.as_str());
    }

    fn open_error(&self) -> GatewayError {
        GatewayError::CircuitOpen {
            route: self.route.clone(),
        }
    }
}
