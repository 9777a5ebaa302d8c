use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::duration_serde;
use crate::error::{MeshError, Result};
use crate::resilience::clock::{Clock, SystemClock};

/// The state of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests are failing and not being sent
    Open,
    /// A single probe is allowed through to test recovery
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

/// Configuration for circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,
    /// Duration to keep the circuit open before admitting a probe
    #[serde(default = "default_open_timeout", with = "duration_serde")]
    pub open_timeout: Duration,
}

fn default_failure_threshold() -> usize {
    5
}

fn default_open_timeout() -> Duration {
    Duration::from_secs(60)
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            open_timeout: default_open_timeout(),
        }
    }
}

/// How a call was let through the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Regular call while the circuit is closed; `generation` identifies the
    /// closed period it was admitted in
    Normal { generation: u64 },
    /// The single recovery probe while half-open
    Probe,
}

// Open carries its timestamp so an open circuit always knows when it opened.
#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed,
    Open { opened_at: Instant },
    HalfOpen { probe_in_flight: bool },
}

#[derive(Debug)]
struct BreakerState {
    phase: Phase,
    failure_count: usize,
    /// Bumped on every Closed -> Open and HalfOpen -> Closed transition
    generation: u64,
}

impl BreakerState {
    fn open(&mut self, now: Instant) {
        self.phase = Phase::Open { opened_at: now };
        self.generation += 1;
    }

    fn close(&mut self) {
        self.phase = Phase::Closed;
        self.failure_count = 0;
        self.generation += 1;
    }
}

/// Point-in-time view of a breaker, for reporting
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: usize,
    pub opened_at: Option<Instant>,
}

/// Per-dependency circuit breaker.
///
/// Every read-modify-write of the state happens under one mutex and never
/// across an await point, so concurrent callers cannot lose updates or both
/// claim the half-open probe.
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Dependency this breaker guards, used in errors and logs
    name: String,
    state: Mutex<BreakerState>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    /// Create a circuit breaker that reads time from `clock`
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(BreakerState {
                phase: Phase::Closed,
                failure_count: 0,
                generation: 0,
            }),
            config,
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        // state is plain data, a panic elsewhere cannot leave it half-written
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decide whether a call may proceed.
    ///
    /// Fails with `CircuitOpen` while the open timeout runs and while another
    /// caller holds the half-open probe.
    pub fn allow_request(&self) -> Result<Admission> {
        let mut state = self.lock();

        match state.phase {
            Phase::Closed => Ok(Admission::Normal {
                generation: state.generation,
            }),
            Phase::Open { opened_at } => {
                let elapsed = self.clock.now().saturating_duration_since(opened_at);
                if elapsed >= self.config.open_timeout {
                    state.phase = Phase::HalfOpen {
                        probe_in_flight: true,
                    };
                    info!(service = %self.name, "Circuit breaker half-open, admitting probe");
                    Ok(Admission::Probe)
                } else {
                    Err(MeshError::CircuitOpen {
                        service: self.name.clone(),
                        retry_after: self.config.open_timeout - elapsed,
                    })
                }
            }
            Phase::HalfOpen {
                probe_in_flight: true,
            } => {
                debug!(service = %self.name, "Probe already in flight, rejecting call");
                Err(MeshError::CircuitOpen {
                    service: self.name.clone(),
                    retry_after: Duration::ZERO,
                })
            }
            Phase::HalfOpen {
                probe_in_flight: false,
            } => {
                state.phase = Phase::HalfOpen {
                    probe_in_flight: true,
                };
                Ok(Admission::Probe)
            }
        }
    }

    /// Record a successful operation
    pub fn record_success(&self, admission: Admission) {
        let mut state = self.lock();

        match (state.phase, admission) {
            (Phase::Closed, Admission::Normal { generation }) if generation == state.generation => {
                state.failure_count = 0;
            }
            (Phase::HalfOpen { .. }, Admission::Probe) => {
                state.close();
                info!(service = %self.name, "Circuit breaker closed after successful probe");
            }
            _ => {
                // admitted in an earlier closed period; its outcome is stale
                debug!(service = %self.name, "Ignoring stale success");
            }
        }
    }

    /// Record a failed operation
    pub fn record_failure(&self, admission: Admission) {
        let mut state = self.lock();

        match (state.phase, admission) {
            (Phase::Closed, Admission::Normal { generation }) if generation == state.generation => {
                state.failure_count += 1;

                if state.failure_count >= self.config.failure_threshold {
                    state.open(self.clock.now());
                    warn!(
                        service = %self.name,
                        failures = state.failure_count,
                        "Circuit breaker opened after {} consecutive failures",
                        state.failure_count
                    );
                }
            }
            (Phase::HalfOpen { .. }, Admission::Probe) => {
                // Any failure of the probe opens the circuit again
                state.open(self.clock.now());
                warn!(service = %self.name, "Circuit breaker re-opened after failed probe");
            }
            _ => {
                debug!(service = %self.name, "Ignoring stale failure");
            }
        }
    }

    /// Give back an admission without reporting an outcome.
    ///
    /// A released probe frees the slot for the next caller; the circuit stays
    /// half-open.
    pub fn release(&self, admission: Admission) {
        if admission != Admission::Probe {
            return;
        }

        let mut state = self.lock();
        if let Phase::HalfOpen { .. } = state.phase {
            state.phase = Phase::HalfOpen {
                probe_in_flight: false,
            };
            debug!(service = %self.name, "Probe released without outcome");
        }
    }

    /// Run `operation` through the breaker.
    ///
    /// The operation is not invoked when the circuit rejects the call. Errors
    /// for which [`MeshError::counts_against_breaker`] is false leave the
    /// failure count untouched.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let admission = self.allow_request()?;
        let guard = AdmissionGuard::new(self, admission);

        let result = operation().await;

        match &result {
            Ok(_) => guard.success(),
            Err(e) if e.counts_against_breaker() => guard.failure(),
            Err(_) => guard.release(),
        }

        result
    }

    /// Get the current state of the circuit breaker
    pub fn get_state(&self) -> CircuitState {
        match self.lock().phase {
            Phase::Closed => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    pub fn failure_count(&self) -> usize {
        self.lock().failure_count
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.lock();
        let (circuit, opened_at) = match state.phase {
            Phase::Closed => (CircuitState::Closed, None),
            Phase::Open { opened_at } => (CircuitState::Open, Some(opened_at)),
            Phase::HalfOpen { .. } => (CircuitState::HalfOpen, None),
        };

        BreakerSnapshot {
            name: self.name.clone(),
            state: circuit,
            failure_count: state.failure_count,
            opened_at,
        }
    }
}

/// Releases the admission if the call future is dropped before settling
struct AdmissionGuard<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl<'a> AdmissionGuard<'a> {
    fn new(breaker: &'a CircuitBreaker, admission: Admission) -> Self {
        Self {
            breaker,
            admission,
            settled: false,
        }
    }

    fn success(mut self) {
        self.settled = true;
        self.breaker.record_success(self.admission);
    }

    fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure(self.admission);
    }

    fn release(mut self) {
        self.settled = true;
        self.breaker.release(self.admission);
    }
}

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release(self.admission);
        }
    }
}
