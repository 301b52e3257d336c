//! Per-host politeness: minimum inter-request spacing and an in-flight
//! cap, with the required delay sourced from robots.txt crawl-delay.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::robots::RobotsCache;
use crate::url_utils;

#[derive(Debug)]
struct HostRateState {
    /// When the last request to this host started
    last_request: Option<Instant>,
    /// Required spacing, updated from robots on every acquire
    delay_ms: u64,
    in_flight: usize,
    total_requests: u64,
    blocked_requests: u64,
}

impl HostRateState {
    fn new() -> Self {
        Self {
            last_request: None,
            delay_ms: 0,
            in_flight: 0,
            total_requests: 0,
            blocked_requests: 0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("blocked by robots.txt: {0}")]
    RobotsDenied(String),

    #[error("rate limiter wait cancelled")]
    Cancelled,
}

/// Releases the in-flight slot on drop, floored at zero
#[derive(Debug)]
pub struct RatePermit {
    state: Arc<Mutex<HostRateState>>,
}

impl Drop for RatePermit {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub total_requests: u64,
    pub blocked_requests: u64,
    pub tracked_hosts: usize,
}

pub struct RateLimiter {
    robots: Arc<RobotsCache>,
    hosts: DashMap<String, Arc<Mutex<HostRateState>>>,
    max_concurrent_per_host: usize,
    total_requests: AtomicU64,
    blocked_requests: AtomicU64,
}

impl RateLimiter {
    pub fn new(robots: Arc<RobotsCache>, max_concurrent_per_host: usize) -> Self {
        Self {
            robots,
            hosts: DashMap::new(),
            max_concurrent_per_host: max_concurrent_per_host.max(1),
            total_requests: AtomicU64::new(0),
            blocked_requests: AtomicU64::new(0),
        }
    }

    fn state_for(&self, host: &str) -> Arc<Mutex<HostRateState>> {
        self.hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(HostRateState::new())))
            .clone()
    }

    /// Wait until a request to `url` is polite, then book the slot.
    ///
    /// Robots denial surfaces as a non-retryable error. The returned
    /// permit frees the host's in-flight slot when dropped.
    pub async fn acquire(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<RatePermit, RateLimitError> {
        if !self.robots.is_allowed(url).await {
            self.blocked_requests.fetch_add(1, Ordering::Relaxed);
            let host = url_utils::extract_host(url).unwrap_or_default();
            self.state_for(&host).lock().blocked_requests += 1;
            return Err(RateLimitError::RobotsDenied(url.to_string()));
        }

        let delay_ms = self.robots.crawl_delay_ms(url).await;
        let host = url_utils::extract_host(url).unwrap_or_default();
        let state = self.state_for(&host);

        loop {
            let wait = {
                let mut s = state.lock();
                s.delay_ms = delay_ms;

                if s.in_flight >= self.max_concurrent_per_host {
                    Some(Duration::from_millis(delay_ms.max(1)))
                } else {
                    let pending = s.last_request.and_then(|last| {
                        Duration::from_millis(delay_ms).checked_sub(last.elapsed())
                    });
                    match pending {
                        Some(remaining) if !remaining.is_zero() => Some(remaining),
                        _ => {
                            s.in_flight += 1;
                            s.last_request = Some(Instant::now());
                            s.total_requests += 1;
                            None
                        }
                    }
                }
            };

            match wait {
                Some(duration) => {
                    tokio::select! {
                        _ = tokio::time::sleep(duration) => {}
                        _ = cancel.cancelled() => return Err(RateLimitError::Cancelled),
                    }
                }
                None => break,
            }
        }

        self.total_requests.fetch_add(1, Ordering::Relaxed);
        Ok(RatePermit { state })
    }

    /// Current in-flight count for a host. Zero for untracked hosts.
    pub fn in_flight(&self, host: &str) -> usize {
        self.hosts
            .get(host)
            .map(|s| s.lock().in_flight)
            .unwrap_or(0)
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            blocked_requests: self.blocked_requests.load(Ordering::Relaxed),
            tracked_hosts: self.hosts.len(),
        }
    }
}
