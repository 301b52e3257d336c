//! Polite, large-scale web crawler and content extractor.
//!
//! A seed URL is filtered, queued, and drained batch by batch through a
//! worker pool; every fetch passes the per-host circuit breaker, the
//! robots-aware rate limiter, and the retry controller before its page
//! is scraped, checked against stored fingerprints, and streamed to the
//! result sink.

pub mod change_detection;
pub mod circuit_breaker;
pub mod cli;
pub mod config;
pub mod domain_filter;
pub mod engine;
pub mod fetcher;
pub mod health;
pub mod language;
pub mod logging;
pub mod models;
pub mod queue;
pub mod rate_limiter;
pub mod retry;
pub mod robots;
pub mod scrape;
pub mod url_utils;
pub mod worker_pool;
pub mod writer;

// Re-export main types for library usage
pub use config::{Config, CrawlerConfig, PolitenessConfig, RenderingMode, ResilienceConfig};
pub use engine::{CrawlEngine, CrawlReport, EngineError};
pub use fetcher::{FetchError, FetcherFactory, HttpFetcher, HttpFetcherFactory, PageFetcher, PageResponse};
pub use models::{
    CrawlRequest, OperationMode, OutputFormat, ScrapeStatus, ScrapedContent, UrlTask,
};
pub use queue::{QueueEvent, UrlQueue};
pub use writer::{StreamFormat, StreamingWriter};
