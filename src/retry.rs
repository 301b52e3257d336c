//! Retry control: exponential backoff with jitter, driven by an error
//! classification that separates transient faults from permanent ones.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ResilienceConfig;

/// HTTP statuses worth retrying: timeouts, throttling, server errors,
/// and the Cloudflare 52x variants.
const RETRYABLE_STATUSES: &[u16] = &[408, 429, 520, 521, 522, 523, 524];

/// Case-insensitive substrings marking an error as transient
const TRANSIENT_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "connection closed",
    "econnreset",
    "econnrefused",
    "socket hang up",
    "dns",
    "name resolution",
    "temporary failure",
    "eai_again",
    "network",
];

/// Case-insensitive substrings marking an error as permanent
const PERMANENT_PATTERNS: &[&str] = &[
    "not found",
    "forbidden",
    "unauthorized",
    "invalid url",
    "malformed",
    "blocked by robots",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
    Unknown,
}

/// Implemented by error types the controller can classify
pub trait RetryableError: std::fmt::Display {
    /// HTTP status carried by the error, when there is one
    fn status_code(&self) -> Option<u16> {
        None
    }

    /// Stable name for per-error counters
    fn error_name(&self) -> &'static str;
}

/// Classify by status code first, then by message patterns
pub fn classify<E: RetryableError>(error: &E) -> ErrorClass {
    if let Some(status) = error.status_code() {
        if RETRYABLE_STATUSES.contains(&status) || (500..600).contains(&status) {
            return ErrorClass::Transient;
        }
        if (400..500).contains(&status) {
            return ErrorClass::Permanent;
        }
    }

    let message = error.to_string().to_ascii_lowercase();
    if TRANSIENT_PATTERNS.iter().any(|p| message.contains(p)) {
        return ErrorClass::Transient;
    }
    if PERMANENT_PATTERNS.iter().any(|p| message.contains(p)) {
        return ErrorClass::Permanent;
    }
    ErrorClass::Unknown
}

/// Result of a retried operation
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub success: bool,
    pub value: Option<T>,
    /// Attempts made, including the first
    pub attempts: u32,
    pub total_duration: Duration,
    pub last_error: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct RetryStats {
    pub total_attempts: u64,
    pub successful_retries: u64,
    pub failed_retries: u64,
    pub permanent_failures: u64,
    pub errors_by_name: HashMap<String, u64>,
}

pub struct RetryController {
    max_retries: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: f64,
    retry_unknown: bool,
    stats: Mutex<RetryStats>,
}

impl RetryController {
    pub fn new(config: &ResilienceConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.backoff_multiplier.max(1.0),
            jitter: config.jitter.clamp(0.0, 1.0),
            retry_unknown: config.retry_unknown_errors,
            stats: Mutex::new(RetryStats::default()),
        }
    }

    /// Backoff before retry number `attempt` (0-based): exponential growth
    /// capped at the max, with symmetric jitter applied after the cap.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64
            * self.multiplier.powi(attempt.min(20) as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);

        let with_jitter = if self.jitter > 0.0 {
            let spread = capped * self.jitter;
            capped + rand::thread_rng().gen_range(-spread..=spread)
        } else {
            capped
        };

        Duration::from_millis(with_jitter.max(0.0) as u64)
    }

    /// Run `op`, retrying transient (and, when configured, unknown)
    /// failures with backoff. Stops after `max_retries` additional
    /// attempts, on a permanent failure, or on cancellation.
    pub async fn execute<T, E, F, Fut>(
        &self,
        op_name: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError,
    {
        let start = Instant::now();
        let mut attempts = 0u32;
        let mut last_error: Option<String> = None;

        loop {
            attempts += 1;
            self.stats.lock().total_attempts += 1;

            match op().await {
                Ok(value) => {
                    if attempts > 1 {
                        self.stats.lock().successful_retries += 1;
                    }
                    return RetryOutcome {
                        success: true,
                        value: Some(value),
                        attempts,
                        total_duration: start.elapsed(),
                        last_error,
                    };
                }
                Err(error) => {
                    let class = classify(&error);
                    {
                        let mut stats = self.stats.lock();
                        *stats
                            .errors_by_name
                            .entry(error.error_name().to_string())
                            .or_insert(0) += 1;
                    }
                    last_error = Some(error.to_string());

                    let retryable = match class {
                        ErrorClass::Transient => true,
                        ErrorClass::Permanent => false,
                        ErrorClass::Unknown => self.retry_unknown,
                    };

                    if !retryable {
                        self.stats.lock().permanent_failures += 1;
                        tracing::debug!(op = op_name, error = %error, "permanent failure, not retrying");
                        break;
                    }

                    // attempts - 1 retries have been used so far
                    if attempts > self.max_retries {
                        self.stats.lock().failed_retries += 1;
                        tracing::debug!(op = op_name, attempts, "retries exhausted");
                        break;
                    }

                    let delay = self.backoff_delay(attempts - 1);
                    tracing::debug!(op = op_name, attempt = attempts, delay_ms = delay.as_millis() as u64, error = %error, "retrying after backoff");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => break,
                    }
                }
            }
        }

        RetryOutcome {
            success: false,
            value: None,
            attempts,
            total_duration: start.elapsed(),
            last_error,
        }
    }

    pub fn stats(&self) -> RetryStats {
        self.stats.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError {
        message: String,
        status: Option<u16>,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.message)
        }
    }

    impl RetryableError for TestError {
        fn status_code(&self) -> Option<u16> {
            self.status
        }
        fn error_name(&self) -> &'static str {
            "test"
        }
    }

    fn http(status: u16) -> TestError {
        TestError {
            message: format!("http status {}", status),
            status: Some(status),
        }
    }

    fn msg(message: &str) -> TestError {
        TestError {
            message: message.to_string(),
            status: None,
        }
    }

    fn controller(max_retries: u32) -> RetryController {
        RetryController::new(&ResilienceConfig {
            max_retries,
            initial_delay_ms: 1,
            max_delay_ms: 10,
            backoff_multiplier: 2.0,
            jitter: 0.0,
            ..ResilienceConfig::default()
        })
    }

    #[test]
    fn test_classify_statuses() {
        assert_eq!(classify(&http(503)), ErrorClass::Transient);
        assert_eq!(classify(&http(429)), ErrorClass::Transient);
        assert_eq!(classify(&http(408)), ErrorClass::Transient);
        assert_eq!(classify(&http(522)), ErrorClass::Transient);
        assert_eq!(classify(&http(404)), ErrorClass::Permanent);
        assert_eq!(classify(&http(403)), ErrorClass::Permanent);
    }

    #[test]
    fn test_classify_messages() {
        assert_eq!(classify(&msg("Connection RESET by peer")), ErrorClass::Transient);
        assert_eq!(classify(&msg("operation timed out")), ErrorClass::Transient);
        assert_eq!(classify(&msg("blocked by robots.txt: x")), ErrorClass::Permanent);
        assert_eq!(classify(&msg("page Not Found")), ErrorClass::Permanent);
        assert_eq!(classify(&msg("something odd happened")), ErrorClass::Unknown);
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        let c = RetryController::new(&ResilienceConfig {
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            backoff_multiplier: 2.0,
            jitter: 0.0,
            ..ResilienceConfig::default()
        });
        assert_eq!(c.backoff_delay(0).as_millis(), 100);
        assert_eq!(c.backoff_delay(1).as_millis(), 200);
        assert_eq!(c.backoff_delay(2).as_millis(), 400);
        assert_eq!(c.backoff_delay(10).as_millis(), 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let c = controller(2);
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let outcome = c
            .execute("fetch", &cancel, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(http(503))
                    } else {
                        Ok(42u32)
                    }
                }
            })
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.value, Some(42));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(c.stats().successful_retries, 1);
    }

    #[tokio::test]
    async fn test_permanent_stops_immediately() {
        let c = controller(5);
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let outcome: RetryOutcome<u32> = c
            .execute("fetch", &cancel, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(http(404)) }
            })
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(c.stats().permanent_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let c = controller(2);
        let cancel = CancellationToken::new();

        let outcome: RetryOutcome<u32> = c
            .execute("fetch", &cancel, || async { Err(msg("timeout")) })
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.last_error.unwrap().contains("timeout"));
        assert_eq!(c.stats().failed_retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_respects_config_flag() {
        let c = RetryController::new(&ResilienceConfig {
            max_retries: 3,
            initial_delay_ms: 1,
            jitter: 0.0,
            retry_unknown_errors: false,
            ..ResilienceConfig::default()
        });
        let cancel = CancellationToken::new();

        let outcome: RetryOutcome<u32> = c
            .execute("fetch", &cancel, || async { Err(msg("mystery")) })
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_backoff() {
        let c = RetryController::new(&ResilienceConfig {
            max_retries: 5,
            initial_delay_ms: 60_000,
            jitter: 0.0,
            ..ResilienceConfig::default()
        });
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome: RetryOutcome<u32> = c
            .execute("fetch", &cancel, || async { Err(msg("timeout")) })
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 1);
    }
}
