//! Read-only aggregate view of subsystem counters for the health surface.

use serde::Serialize;

use crate::change_detection::ChangeDetectionStats;
use crate::circuit_breaker::CircuitBreakerStats;
use crate::domain_filter::FilterStats;
use crate::queue::QueueStats;
use crate::rate_limiter::RateLimiterStats;
use crate::retry::RetryStats;

/// One snapshot across every subsystem. Serializes directly for a
/// health endpoint or a periodic log line.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub circuits: CircuitBreakerStats,
    pub rate_limiter: RateLimiterStats,
    pub retries: RetryStats,
    pub filter: FilterStats,
    pub queue: QueueStats,
    pub change_detection: ChangeDetectionStats,
}
