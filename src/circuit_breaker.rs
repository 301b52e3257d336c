//! Per-host circuit breaker. Repeated failures open the circuit; after a
//! reset timeout a probe is admitted, and enough consecutive successes
//! close it again.
//!
//! Timestamps use `tokio::time::Instant` so tests can drive transitions
//! with a paused clock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::ResilienceConfig;
use crate::url_utils;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    /// Failure timestamps within the sliding window
    failures: VecDeque<Instant>,
    half_open_successes: usize,
    opened_at: Option<Instant>,
    last_state_change: Instant,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            half_open_successes: 0,
            opened_at: None,
            last_state_change: Instant::now(),
        }
    }

    fn prune_window(&mut self, window: Duration) {
        let now = Instant::now();
        while let Some(oldest) = self.failures.front() {
            if now.duration_since(*oldest) > window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn transition(&mut self, next: CircuitState) {
        self.state = next;
        self.last_state_change = Instant::now();
        match next {
            CircuitState::Open => {
                self.opened_at = Some(Instant::now());
                self.half_open_successes = 0;
            }
            CircuitState::HalfOpen => {
                self.half_open_successes = 0;
            }
            CircuitState::Closed => {
                self.failures.clear();
                self.opened_at = None;
                self.half_open_successes = 0;
            }
        }
    }
}

/// Outcome of a breaker check
#[derive(Debug, Clone)]
pub struct CircuitDecision {
    pub allowed: bool,
    pub state: CircuitState,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub host: String,
    pub state: CircuitState,
    pub recent_failures: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub total_blocked: u64,
    pub circuits: Vec<CircuitSnapshot>,
}

pub struct CircuitBreaker {
    enabled: bool,
    failure_threshold: usize,
    failure_window: Duration,
    reset_timeout: Duration,
    success_threshold: usize,
    circuits: DashMap<String, Arc<Mutex<Circuit>>>,
    total_blocked: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(config: &ResilienceConfig) -> Self {
        Self {
            enabled: config.breaker_enabled,
            failure_threshold: config.breaker_threshold.max(1),
            failure_window: Duration::from_millis(config.breaker_window_ms),
            reset_timeout: Duration::from_millis(config.breaker_reset_ms),
            success_threshold: config.breaker_success_threshold.max(1),
            circuits: DashMap::new(),
            total_blocked: AtomicU64::new(0),
        }
    }

    fn circuit_for(&self, host: &str) -> Arc<Mutex<Circuit>> {
        self.circuits
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Circuit::new())))
            .clone()
    }

    /// Gate a fetch. An OPEN circuit denies with the seconds remaining
    /// until a probe will be admitted; reaching the reset timeout flips
    /// the circuit to HALF_OPEN and admits the caller as the probe.
    pub fn check(&self, url: &str) -> CircuitDecision {
        if !self.enabled {
            return CircuitDecision {
                allowed: true,
                state: CircuitState::Closed,
                reason: None,
            };
        }

        let host = url_utils::extract_host(url).unwrap_or_default();
        let circuit = self.circuit_for(&host);
        let mut c = circuit.lock();

        match c.state {
            CircuitState::Closed | CircuitState::HalfOpen => CircuitDecision {
                allowed: true,
                state: c.state,
                reason: None,
            },
            CircuitState::Open => {
                let elapsed = c
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(self.reset_timeout);
                if elapsed >= self.reset_timeout {
                    c.transition(CircuitState::HalfOpen);
                    CircuitDecision {
                        allowed: true,
                        state: CircuitState::HalfOpen,
                        reason: None,
                    }
                } else {
                    self.total_blocked.fetch_add(1, Ordering::Relaxed);
                    let remaining = (self.reset_timeout - elapsed).as_secs().max(1);
                    CircuitDecision {
                        allowed: false,
                        state: CircuitState::Open,
                        reason: Some(format!(
                            "circuit open for {}, retry in {}s",
                            host, remaining
                        )),
                    }
                }
            }
        }
    }

    pub fn record_success(&self, url: &str) {
        if !self.enabled {
            return;
        }
        let host = url_utils::extract_host(url).unwrap_or_default();
        let circuit = self.circuit_for(&host);
        let mut c = circuit.lock();

        if c.state == CircuitState::HalfOpen {
            c.half_open_successes += 1;
            if c.half_open_successes >= self.success_threshold {
                c.transition(CircuitState::Closed);
                tracing::info!(host = %host, "circuit closed after successful probes");
            }
        }
    }

    pub fn record_failure(&self, url: &str) {
        if !self.enabled {
            return;
        }
        let host = url_utils::extract_host(url).unwrap_or_default();
        let circuit = self.circuit_for(&host);
        let mut c = circuit.lock();

        c.failures.push_back(Instant::now());
        c.prune_window(self.failure_window);

        match c.state {
            CircuitState::HalfOpen => {
                c.transition(CircuitState::Open);
                tracing::warn!(host = %host, "circuit re-opened by half-open failure");
            }
            CircuitState::Closed => {
                if c.failures.len() >= self.failure_threshold {
                    c.transition(CircuitState::Open);
                    tracing::warn!(
                        host = %host,
                        failures = c.failures.len(),
                        "circuit opened by failure threshold"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn state_of(&self, host: &str) -> CircuitState {
        self.circuits
            .get(host)
            .map(|c| c.lock().state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let circuits = self
            .circuits
            .iter()
            .map(|entry| {
                let c = entry.value().lock();
                CircuitSnapshot {
                    host: entry.key().clone(),
                    state: c.state,
                    recent_failures: c.failures.len(),
                }
            })
            .collect();
        CircuitBreakerStats {
            total_blocked: self.total_blocked.load(Ordering::Relaxed),
            circuits,
        }
    }
}
