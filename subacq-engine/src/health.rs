//! Per-source health tracking and circuit breaking
//!
//! Every source has a [`SourceHealth`] record holding a consecutive-failure
//! counter, a fixed-size window of recent response times, and a circuit
//! breaker state. Records live for the whole process and are shared by all
//! concurrent acquisition attempts.
//!
//! # Circuit breaker
//!
//! ```text
//!   Closed ──(failure_threshold consecutive failures)──> Open
//!   Open ──(cooldown elapsed, next before_call)────────> HalfOpen
//!   HalfOpen ──(probe succeeds)────────────────────────> Closed
//!   HalfOpen ──(probe fails)───────────────────────────> Open (fresh cooldown)
//! ```
//!
//! Each record sits behind its own mutex, so the check-and-transition in
//! [`HealthTracker::before_call`] is atomic: once one caller has claimed
//! the half-open probe, concurrent callers are skipped until the probe
//! reports back.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use subacq_common::config::{CircuitConfig, TimeoutConfig};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Verdict of [`HealthTracker::before_call`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPermit {
    Allow,
    Skip,
}

/// Classification of a failed source call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network failure or provider-side error
    Transient,
    /// Call exceeded its dynamic timeout and was cancelled
    Timeout,
    /// Response could not be interpreted
    Malformed,
    /// Credentials rejected; will fail every call until reconfigured
    Auth,
}

/// Result of one source call, as reported to the tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure { kind: FailureKind, message: String },
}

impl CallOutcome {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        CallOutcome::Failure {
            kind,
            message: message.into(),
        }
    }
}

/// Circuit state change caused by [`HealthTracker::after_call`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitTransition {
    Opened {
        consecutive_failures: u32,
        cooldown: Duration,
    },
    Closed,
}

// ============================================================================
// Rolling response-time window
// ============================================================================

/// Fixed-capacity circular buffer of response times
///
/// Memory is bounded by the capacity regardless of how many samples are
/// recorded; once full, each new sample overwrites the oldest.
#[derive(Debug, Clone)]
pub struct ResponseWindow {
    samples: Vec<Duration>,
    next: usize,
    capacity: usize,
}

impl ResponseWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Vec::with_capacity(capacity),
            next: 0,
            capacity,
        }
    }

    pub fn record(&mut self, sample: Duration) {
        if self.samples.len() < self.capacity {
            self.samples.push(sample);
        } else {
            self.samples[self.next] = sample;
        }
        self.next = (self.next + 1) % self.capacity;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn average(&self) -> Option<Duration> {
        subacq_common::time::mean_duration(&self.samples)
    }
}

// ============================================================================
// Per-source record
// ============================================================================

#[derive(Debug)]
struct SourceHealth {
    state: CircuitState,
    disabled_until: Option<Instant>,
    probe_in_flight: bool,
    consecutive_failures: u32,
    window: ResponseWindow,
    total_successes: u64,
    total_failures: u64,
    last_error: Option<String>,
}

impl SourceHealth {
    fn new(window_size: usize) -> Self {
        Self {
            state: CircuitState::Closed,
            disabled_until: None,
            probe_in_flight: false,
            consecutive_failures: 0,
            window: ResponseWindow::new(window_size),
            total_successes: 0,
            total_failures: 0,
            last_error: None,
        }
    }

    fn open(&mut self, now: Instant, cooldown: Duration) {
        self.state = CircuitState::Open;
        self.disabled_until = Some(now + cooldown);
        self.probe_in_flight = false;
    }
}

/// Serialisable snapshot of one source's health
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceHealthReport {
    pub source: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub samples: usize,
    pub average_response_ms: Option<u64>,
    pub current_timeout_ms: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub last_error: Option<String>,
    pub cooldown_remaining_ms: Option<u64>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Tracker
// ============================================================================

/// Process-wide health tracker for all sources
#[derive(Debug)]
pub struct HealthTracker {
    timeouts: TimeoutConfig,
    circuit: CircuitConfig,
    sources: RwLock<HashMap<String, Arc<Mutex<SourceHealth>>>>,
}

impl HealthTracker {
    pub fn new(timeouts: TimeoutConfig, circuit: CircuitConfig) -> Self {
        Self {
            timeouts,
            circuit,
            sources: RwLock::new(HashMap::new()),
        }
    }

    /// Ensure a record exists for `source`
    pub fn register(&self, source: &str) {
        let _ = self.record(source);
    }

    fn record(&self, source: &str) -> Arc<Mutex<SourceHealth>> {
        {
            let sources = self.sources.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(record) = sources.get(source) {
                return Arc::clone(record);
            }
        }
        let mut sources = self.sources.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            sources
                .entry(source.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(SourceHealth::new(self.timeouts.window_size)))),
        )
    }

    /// Gate a call to `source`
    ///
    /// Returns `Skip` while the circuit is open and cooling down, and for
    /// every caller except the first once the cooldown has elapsed (that
    /// caller gets the single half-open probe).
    pub fn before_call(&self, source: &str) -> CallPermit {
        let record = self.record(source);
        let mut health = lock(&record);

        match health.state {
            CircuitState::Closed => CallPermit::Allow,
            CircuitState::Open => {
                let now = Instant::now();
                match health.disabled_until {
                    Some(until) if now < until => CallPermit::Skip,
                    _ => {
                        health.state = CircuitState::HalfOpen;
                        health.probe_in_flight = true;
                        health.disabled_until = None;
                        info!(source = %source, "Circuit half-open, allowing probe call");
                        CallPermit::Allow
                    }
                }
            }
            CircuitState::HalfOpen => {
                if health.probe_in_flight {
                    CallPermit::Skip
                } else {
                    health.probe_in_flight = true;
                    CallPermit::Allow
                }
            }
        }
    }

    /// Record the outcome of a call to `source`
    pub fn after_call(
        &self,
        source: &str,
        outcome: &CallOutcome,
        duration: Duration,
    ) -> Option<CircuitTransition> {
        let record = self.record(source);
        let mut health = lock(&record);
        health.window.record(duration);

        match outcome {
            CallOutcome::Success => {
                health.consecutive_failures = 0;
                health.total_successes += 1;
                if health.state == CircuitState::HalfOpen {
                    health.state = CircuitState::Closed;
                    health.probe_in_flight = false;
                    info!(source = %source, "Probe succeeded, circuit closed");
                    return Some(CircuitTransition::Closed);
                }
                None
            }
            CallOutcome::Failure { kind, message } => {
                health.consecutive_failures = health.consecutive_failures.saturating_add(1);
                health.total_failures += 1;
                health.last_error = Some(message.clone());

                let cooldown = self.circuit.cooldown();
                let should_open = match health.state {
                    CircuitState::HalfOpen => true,
                    CircuitState::Closed => {
                        *kind == FailureKind::Auth
                            || health.consecutive_failures >= self.circuit.failure_threshold
                    }
                    // A call started before the trip; the cooldown already runs.
                    CircuitState::Open => false,
                };

                if should_open {
                    health.open(Instant::now(), cooldown);
                    warn!(
                        source = %source,
                        consecutive_failures = health.consecutive_failures,
                        failure = ?kind,
                        cooldown_secs = cooldown.as_secs(),
                        "Circuit opened"
                    );
                    return Some(CircuitTransition::Opened {
                        consecutive_failures: health.consecutive_failures,
                        cooldown,
                    });
                }

                debug!(
                    source = %source,
                    consecutive_failures = health.consecutive_failures,
                    failure = ?kind,
                    "Source call failed"
                );
                None
            }
        }
    }

    /// Dynamic timeout for the next call to `source`
    pub fn timeout_for(&self, source: &str) -> Duration {
        let record = self.record(source);
        let health = lock(&record);
        self.compute_timeout(&health.window)
    }

    fn compute_timeout(&self, window: &ResponseWindow) -> Duration {
        if window.len() < self.timeouts.min_samples {
            return self.timeouts.default_timeout();
        }
        let Some(avg) = window.average() else {
            return self.timeouts.default_timeout();
        };
        // Overflowing or non-finite products saturate at the ceiling
        Duration::try_from_secs_f64(avg.as_secs_f64() * self.timeouts.multiplier)
            .unwrap_or_else(|_| self.timeouts.max_timeout())
            .max(self.timeouts.min_timeout())
            .min(self.timeouts.max_timeout())
    }

    pub fn state_of(&self, source: &str) -> CircuitState {
        let record = self.record(source);
        let state = lock(&record).state;
        state
    }

    pub fn consecutive_failures(&self, source: &str) -> u32 {
        let record = self.record(source);
        let failures = lock(&record).consecutive_failures;
        failures
    }

    /// Snapshot of every tracked source, sorted by name
    pub fn report(&self) -> Vec<SourceHealthReport> {
        let records: Vec<(String, Arc<Mutex<SourceHealth>>)> = {
            let sources = self.sources.read().unwrap_or_else(PoisonError::into_inner);
            sources
                .iter()
                .map(|(name, record)| (name.clone(), Arc::clone(record)))
                .collect()
        };

        let now = Instant::now();
        let mut reports: Vec<SourceHealthReport> = records
            .into_iter()
            .map(|(name, record)| {
                let health = lock(&record);
                SourceHealthReport {
                    source: name,
                    state: health.state,
                    consecutive_failures: health.consecutive_failures,
                    samples: health.window.len(),
                    average_response_ms: health.window.average().map(|d| d.as_millis() as u64),
                    current_timeout_ms: self.compute_timeout(&health.window).as_millis() as u64,
                    total_successes: health.total_successes,
                    total_failures: health.total_failures,
                    last_error: health.last_error.clone(),
                    cooldown_remaining_ms: health
                        .disabled_until
                        .map(|until| until.saturating_duration_since(now).as_millis() as u64),
                }
            })
            .collect();
        reports.sort_by(|a, b| a.source.cmp(&b.source));
        reports
    }
}
