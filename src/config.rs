//! Runtime configuration in three groups: crawler scale, politeness, and
//! resilience. Every tunable can be overridden from the environment using
//! the variable named on each field.

use std::time::Duration;

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

/// How the fetcher waits for a page to settle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderingMode {
    /// DOMContentLoaded only
    Fast,
    /// Network idle, capped at 15s, falling back to DOMContentLoaded
    Complete,
    /// DOMContentLoaded; wait for network idle up to 10s when the body
    /// text is shorter than `min_content_length`
    Adaptive,
}

impl RenderingMode {
    fn from_env(default: Self) -> Self {
        match std::env::var("CRAWLER_RENDERING_MODE").as_deref() {
            Ok("fast") => RenderingMode::Fast,
            Ok("complete") => RenderingMode::Complete,
            Ok("adaptive") => RenderingMode::Adaptive,
            _ => default,
        }
    }
}

/// Crawler scale settings (`CRAWLER_*`)
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// CRAWLER_MAX_REQUESTS: hard cap on processed pages per run
    pub max_requests: usize,
    /// CRAWLER_DISCOVERY_CONCURRENCY: worker count for page processing
    pub discovery_concurrency: usize,
    /// Per-worker concurrent page slots
    pub per_worker_concurrency: usize,
    /// CRAWLER_NAV_TIMEOUT_SECS: per-request navigation timeout
    pub nav_timeout: Duration,
    /// CRAWLER_HANDLER_TIMEOUT_SECS: overall budget for fetch + scrape
    pub handler_timeout: Duration,
    /// CRAWLER_MAX_DEPTH
    pub max_depth: u32,
    /// CRAWLER_HEADLESS
    pub headless: bool,
    /// CRAWLER_RENDERING_MODE: fast | complete | adaptive
    pub rendering_mode: RenderingMode,
    /// CRAWLER_MIN_CONTENT_LENGTH: adaptive-mode threshold
    pub min_content_length: usize,
    /// Queue capacity before enqueues are dropped with an overflow signal
    pub max_queue_size: usize,
    /// Queue batch size per get_batch call
    pub queue_batch_size: usize,
    /// Max URLs per host within one batch
    pub domain_batch_size: usize,
    /// Longest admissible URL
    pub max_url_length: usize,
    /// Records buffered by the result writer before an automatic flush
    pub writer_flush_interval: usize,
    /// Writer buffer ceiling in bytes; reaching it forces a flush
    pub writer_max_buffer_bytes: usize,
    /// Fingerprints older than this are re-crawled unconditionally
    pub fingerprint_max_age: Duration,
    /// Where result files land
    pub output_dir: String,
    /// Where fingerprint caches land
    pub data_dir: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_requests: 100_000,
            discovery_concurrency: 4,
            per_worker_concurrency: 4,
            nav_timeout: Duration::from_secs(30),
            handler_timeout: Duration::from_secs(60),
            max_depth: 3,
            headless: true,
            rendering_mode: RenderingMode::Adaptive,
            min_content_length: 200,
            max_queue_size: 200_000,
            queue_batch_size: 32,
            domain_batch_size: 8,
            max_url_length: 2048,
            writer_flush_interval: 50,
            writer_max_buffer_bytes: 1 << 20,
            fingerprint_max_age: Duration::from_secs(7 * 24 * 3600),
            output_dir: "./data/results".to_string(),
            data_dir: "./data".to_string(),
        }
    }
}

impl CrawlerConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_requests: env_parse("CRAWLER_MAX_REQUESTS", d.max_requests),
            discovery_concurrency: env_parse(
                "CRAWLER_DISCOVERY_CONCURRENCY",
                d.discovery_concurrency,
            ),
            nav_timeout: Duration::from_secs(env_parse(
                "CRAWLER_NAV_TIMEOUT_SECS",
                d.nav_timeout.as_secs(),
            )),
            handler_timeout: Duration::from_secs(env_parse(
                "CRAWLER_HANDLER_TIMEOUT_SECS",
                d.handler_timeout.as_secs(),
            )),
            max_depth: env_parse("CRAWLER_MAX_DEPTH", d.max_depth),
            headless: env_bool("CRAWLER_HEADLESS", d.headless),
            rendering_mode: RenderingMode::from_env(d.rendering_mode),
            min_content_length: env_parse("CRAWLER_MIN_CONTENT_LENGTH", d.min_content_length),
            ..d
        }
    }
}

/// Politeness settings (`CRAWL_*`, `ROBOTS_*`)
#[derive(Debug, Clone)]
pub struct PolitenessConfig {
    /// CRAWL_DELAY_MS: default inter-request spacing per host
    pub default_delay_ms: u64,
    /// CRAWL_MIN_DELAY_MS: lower clamp for robots crawl-delay
    pub min_delay_ms: u64,
    /// CRAWL_MAX_DELAY_MS: upper clamp for robots crawl-delay
    pub max_delay_ms: u64,
    /// RESPECT_ROBOTS_TXT
    pub respect_robots: bool,
    /// CRAWL_USER_AGENT
    pub user_agent: String,
    /// ROBOTS_TXT_CACHE_TTL (seconds)
    pub robots_cache_ttl: Duration,
    /// MAX_CONCURRENT_PER_DOMAIN
    pub max_concurrent_per_domain: usize,
    /// ROBOTS_TXT_TIMEOUT (seconds)
    pub robots_timeout: Duration,
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            default_delay_ms: 1000,
            min_delay_ms: 500,
            max_delay_ms: 30_000,
            respect_robots: true,
            user_agent: "SiteGrazer/0.4 (+https://github.com/sitegrazer)".to_string(),
            robots_cache_ttl: Duration::from_secs(3600),
            max_concurrent_per_domain: 2,
            robots_timeout: Duration::from_secs(10),
        }
    }
}

impl PolitenessConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            default_delay_ms: env_parse("CRAWL_DELAY_MS", d.default_delay_ms),
            min_delay_ms: env_parse("CRAWL_MIN_DELAY_MS", d.min_delay_ms),
            max_delay_ms: env_parse("CRAWL_MAX_DELAY_MS", d.max_delay_ms),
            respect_robots: env_bool("RESPECT_ROBOTS_TXT", d.respect_robots),
            user_agent: std::env::var("CRAWL_USER_AGENT").unwrap_or(d.user_agent),
            robots_cache_ttl: Duration::from_secs(env_parse(
                "ROBOTS_TXT_CACHE_TTL",
                d.robots_cache_ttl.as_secs(),
            )),
            max_concurrent_per_domain: env_parse(
                "MAX_CONCURRENT_PER_DOMAIN",
                d.max_concurrent_per_domain,
            ),
            robots_timeout: Duration::from_secs(env_parse(
                "ROBOTS_TXT_TIMEOUT",
                d.robots_timeout.as_secs(),
            )),
        }
    }
}

/// Resilience settings (`RETRY_*`, `CIRCUIT_BREAKER_*`, `REQUEST_TIMEOUT`)
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    /// MAX_RETRIES: additional attempts after the first
    pub max_retries: u32,
    /// RETRY_INITIAL_DELAY_MS
    pub initial_delay_ms: u64,
    /// RETRY_MAX_DELAY_MS
    pub max_delay_ms: u64,
    /// RETRY_BACKOFF_MULTIPLIER
    pub backoff_multiplier: f64,
    /// RETRY_JITTER: symmetric jitter fraction in [0,1]
    pub jitter: f64,
    /// RETRY_UNKNOWN_ERRORS: treat unclassified errors as transient
    pub retry_unknown_errors: bool,
    /// REQUEST_TIMEOUT (seconds)
    pub request_timeout: Duration,
    /// CIRCUIT_BREAKER_ENABLED
    pub breaker_enabled: bool,
    /// CIRCUIT_BREAKER_THRESHOLD: failures within window to open
    pub breaker_threshold: usize,
    /// CIRCUIT_BREAKER_WINDOW_MS: sliding failure window
    pub breaker_window_ms: u64,
    /// CIRCUIT_BREAKER_RESET_MS: OPEN -> HALF_OPEN probe delay
    pub breaker_reset_ms: u64,
    /// CIRCUIT_BREAKER_SUCCESS_THRESHOLD: HALF_OPEN -> CLOSED successes
    pub breaker_success_threshold: usize,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: 0.1,
            retry_unknown_errors: true,
            request_timeout: Duration::from_secs(30),
            breaker_enabled: true,
            breaker_threshold: 5,
            breaker_window_ms: 60_000,
            breaker_reset_ms: 30_000,
            breaker_success_threshold: 2,
        }
    }
}

impl ResilienceConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_retries: env_parse("MAX_RETRIES", d.max_retries),
            initial_delay_ms: env_parse("RETRY_INITIAL_DELAY_MS", d.initial_delay_ms),
            max_delay_ms: env_parse("RETRY_MAX_DELAY_MS", d.max_delay_ms),
            backoff_multiplier: env_parse("RETRY_BACKOFF_MULTIPLIER", d.backoff_multiplier),
            jitter: env_parse("RETRY_JITTER", d.jitter),
            retry_unknown_errors: env_bool("RETRY_UNKNOWN_ERRORS", d.retry_unknown_errors),
            request_timeout: Duration::from_secs(env_parse(
                "REQUEST_TIMEOUT",
                d.request_timeout.as_secs(),
            )),
            breaker_enabled: env_bool("CIRCUIT_BREAKER_ENABLED", d.breaker_enabled),
            breaker_threshold: env_parse("CIRCUIT_BREAKER_THRESHOLD", d.breaker_threshold),
            breaker_window_ms: env_parse("CIRCUIT_BREAKER_WINDOW_MS", d.breaker_window_ms),
            breaker_reset_ms: env_parse("CIRCUIT_BREAKER_RESET_MS", d.breaker_reset_ms),
            breaker_success_threshold: env_parse(
                "CIRCUIT_BREAKER_SUCCESS_THRESHOLD",
                d.breaker_success_threshold,
            ),
        }
    }
}

/// Everything the engine needs, bundled
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub crawler: CrawlerConfig,
    pub politeness: PolitenessConfig,
    pub resilience: ResilienceConfig,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            crawler: CrawlerConfig::from_env(),
            politeness: PolitenessConfig::from_env(),
            resilience: ResilienceConfig::from_env(),
        }
    }
}
