//! Single-pass crawl orchestration. The engine validates the operator
//! request, seeds the queue, and drains it batch by batch through the
//! worker pool, feeding change detection and the result stream, until
//! discovery completes, a limit trips, or the run is cancelled.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::change_detection::{ChangeDetector, FingerprintError};
use crate::circuit_breaker::CircuitBreaker;
use crate::config::Config;
use crate::domain_filter::{DomainFilter, FilterConfig};
use crate::fetcher::{FetchError, FetcherFactory};
use crate::health::HealthSnapshot;
use crate::models::{
    CrawlRequest, DiscoveredUrl, LinkType, OperationMode, OutputFormat, RequestError,
};
use crate::queue::{QueueEvent, UrlQueue};
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryController;
use crate::robots::RobotsCache;
use crate::url_utils;
use crate::worker_pool::{TaskOutcome, WorkerPool, WorkerPoolConfig};
use crate::writer::{StreamFormat, StreamingWriter, WriterError};

/// Idle poll interval while in-flight work drains
const LOOP_YIELD: Duration = Duration::from_millis(10);

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] RequestError),

    #[error("seed URL rejected by domain filter: {0}")]
    SeedRejected(String),

    #[error(transparent)]
    Writer(#[from] WriterError),

    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),

    #[error(transparent)]
    Fetcher(#[from] FetchError),
}

/// End-of-run summary
#[derive(Debug, Clone, Serialize)]
pub struct CrawlReport {
    pub job_id: String,
    pub seed_url: String,
    /// Unique URLs that entered the queue
    pub discovered: u64,
    /// Records emitted to the result stream
    pub processed: u64,
    /// Policy-denied URLs (robots, circuit, cancellation)
    pub skipped: u64,
    /// Pages change detection declared unchanged
    pub unchanged: u64,
    /// Terminal fetch failures
    pub failed: u64,
    pub duration_ms: u64,
    pub avg_page_time_ms: u64,
    pub pages_per_second: f64,
    pub output_path: String,
}

pub struct CrawlEngine {
    config: Config,
    filter: Arc<DomainFilter>,
    robots: Arc<RobotsCache>,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    retry: Arc<RetryController>,
    detector: Arc<ChangeDetector>,
    queue: Arc<UrlQueue>,
    cancel: CancellationToken,
    url_subscribers: Mutex<Vec<flume::Sender<DiscoveredUrl>>>,
}

impl CrawlEngine {
    pub fn new(config: Config) -> Result<Self, EngineError> {
        let filter = Arc::new(DomainFilter::new(FilterConfig {
            max_url_length: config.crawler.max_url_length,
            ..FilterConfig::default()
        }));
        let robots = Arc::new(RobotsCache::new(config.politeness.clone()).map_err(|e| {
            EngineError::Fetcher(FetchError::ClientBuild(e.to_string()))
        })?);
        let limiter = Arc::new(RateLimiter::new(
            Arc::clone(&robots),
            config.politeness.max_concurrent_per_domain,
        ));
        let breaker = Arc::new(CircuitBreaker::new(&config.resilience));
        let retry = Arc::new(RetryController::new(&config.resilience));
        let detector = Arc::new(ChangeDetector::new(
            &config.crawler.data_dir,
            config.crawler.fingerprint_max_age,
        ));
        let queue = Arc::new(UrlQueue::new(
            config.crawler.max_queue_size,
            config.crawler.queue_batch_size,
            config.crawler.domain_batch_size,
        ));

        Ok(Self {
            config,
            filter,
            robots,
            limiter,
            breaker,
            retry,
            detector,
            queue,
            cancel: CancellationToken::new(),
            url_subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Token observed by every blocking step; cancel it to stop the run
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Subscribe to queue lifecycle events
    pub fn queue_events(&self) -> flume::Receiver<QueueEvent> {
        self.queue.subscribe()
    }

    /// Subscribe to annotated per-URL outcomes. A progress-tracking
    /// façade consumes this stream; the engine never blocks on it.
    pub fn url_events(&self) -> flume::Receiver<DiscoveredUrl> {
        let (tx, rx) = flume::unbounded();
        self.url_subscribers.lock().push(tx);
        rx
    }

    fn emit_url(&self, record: DiscoveredUrl) {
        self.url_subscribers
            .lock()
            .retain(|tx| tx.send(record.clone()).is_ok());
    }

    pub fn robots(&self) -> Arc<RobotsCache> {
        Arc::clone(&self.robots)
    }

    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            circuits: self.breaker.stats(),
            rate_limiter: self.limiter.stats(),
            retries: self.retry.stats(),
            filter: self.filter.stats(),
            queue: self.queue.stats(),
            change_detection: self.detector.stats(),
        }
    }

    /// Run one crawl to completion.
    #[tracing::instrument(skip(self, request, factory), fields(seed = %request.seed_url))]
    pub async fn run(
        &self,
        request: CrawlRequest,
        factory: &dyn FetcherFactory,
    ) -> Result<CrawlReport, EngineError> {
        let request = request.validate()?;
        let seed_url = url_utils::normalize_url(&request.seed_url);
        let seed_host = url_utils::extract_host(&seed_url)
            .ok_or_else(|| EngineError::SeedRejected("seed URL has no host".to_string()))?;

        // A filtered seed fails the whole run
        let seed_decision = self.filter.allow(&seed_url, None);
        if !seed_decision.allowed {
            let reason = seed_decision
                .reason
                .map(|r| format!("{:?}", r))
                .unwrap_or_default();
            return Err(EngineError::SeedRejected(reason));
        }

        let started = Instant::now();
        tracing::info!(host = %seed_host, depth = request.depth, "crawl started");

        // Warm politeness and fingerprint state for the seed host before
        // the first batch dispatches
        if self.config.politeness.respect_robots {
            let _ = self.robots.rules_for(&seed_url).await;
        }
        self.detector.load_domain(&seed_host);

        let job_id = request
            .process_id
            .clone()
            .unwrap_or_else(|| {
                format!(
                    "{}-{}",
                    url_utils::sanitize_host(&seed_host),
                    Utc::now().timestamp()
                )
            });

        // The engine streams records; MARKDOWN/SUMMARY/HTML renderers
        // post-process the stream outside the engine, so every
        // non-JSON-array format streams as JSONL.
        let stream_format = match request.output_format {
            OutputFormat::Json => StreamFormat::Json,
            _ => StreamFormat::Jsonl,
        };
        let writer = StreamingWriter::open(
            &self.config.crawler.output_dir,
            &job_id,
            stream_format,
            self.config.crawler.writer_flush_interval,
            self.config.crawler.writer_max_buffer_bytes,
        )?;

        let pool = WorkerPool::initialize(
            factory,
            WorkerPoolConfig {
                workers: self.config.crawler.discovery_concurrency,
                per_worker_concurrency: self.config.crawler.per_worker_concurrency,
                nav_timeout: self.config.crawler.nav_timeout,
                handler_timeout: self.config.crawler.handler_timeout,
            },
            Arc::clone(&self.breaker),
            Arc::clone(&self.limiter),
            Arc::clone(&self.retry),
        )
        .await?;

        let max_depth = request.depth.min(self.config.crawler.max_depth);
        let emit_records = request.operation_mode != OperationMode::CrawlOnly;
        let discover_links =
            request.include_subpages && request.operation_mode != OperationMode::ScrapeOnly;

        self.queue.add(&seed_url, 0, None);
        let mut discovered = 1u64;
        let mut processed = 0u64;
        let mut skipped = 0u64;
        let mut unchanged = 0u64;
        let mut failed = 0u64;
        let mut dispatched = 0usize;
        let mut fetch_time_total_ms = 0u64;
        let mut fetched_pages = 0u64;

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("cancellation requested, draining");
                break;
            }
            if dispatched >= self.config.crawler.max_requests {
                tracing::info!(dispatched, "request budget reached");
                break;
            }

            let batch = self.queue.get_batch();
            if batch.is_empty() {
                if self.queue.is_idle() {
                    break;
                }
                tokio::time::sleep(LOOP_YIELD).await;
                continue;
            }
            dispatched += batch.len();
            let batch_urls: Vec<String> = batch.iter().map(|t| t.url.clone()).collect();

            let results = pool.process(batch, &self.cancel, None).await;

            // A panicked worker loses its share; fail those tasks so the
            // queue's in-progress set cannot leak and stall completion
            let returned: std::collections::HashSet<&str> =
                results.iter().map(|r| r.task.url.as_str()).collect();
            for url in &batch_urls {
                if !returned.contains(url.as_str()) {
                    tracing::warn!(url = %url, "task result lost, marking failed");
                    failed += 1;
                    self.queue.fail(url, false);
                }
            }

            for result in results {
                let url = result.task.url.clone();
                let depth = result.task.depth;
                let link_type = if url_utils::extract_host(&url)
                    .map(|h| url_utils::is_same_or_subdomain(&h, &seed_host))
                    .unwrap_or(false)
                {
                    LinkType::Internal
                } else {
                    LinkType::External
                };

                match result.outcome {
                    TaskOutcome::Fetched { meta, content } => {
                        fetch_time_total_ms += meta.fetch_duration_ms;
                        fetched_pages += 1;

                        let decision = self.detector.check(
                            &url,
                            meta.etag.as_deref(),
                            meta.last_modified.as_deref(),
                        );

                        if decision.recrawl() {
                            self.detector.update(
                                &url,
                                &content.body_text,
                                &content.links,
                                &content.headings,
                                meta.etag.clone(),
                                meta.last_modified.clone(),
                            );
                            if emit_records {
                                writer.write(&content)?;
                                processed += 1;
                            }
                        } else {
                            // Unchanged pages are not re-emitted, but their
                            // links still feed discovery below
                            unchanged += 1;
                        }

                        if discover_links && depth < max_depth {
                            for link in &content.links {
                                let allowed =
                                    self.filter.allow(link, Some(&seed_host)).allowed;
                                if allowed && self.queue.add(link, depth + 1, Some(url.clone()))
                                {
                                    discovered += 1;
                                }
                            }
                        }

                        self.queue.complete(&url);
                        self.emit_url(DiscoveredUrl {
                            url,
                            depth,
                            parent_url: result.task.parent_url.clone(),
                            status_code: Some(meta.status_code),
                            content_type: meta.content_type.clone(),
                            discovered_at: result.task.enqueued_at,
                            fetch_duration_ms: Some(meta.fetch_duration_ms),
                            link_type,
                            skip_reason: None,
                        });
                    }
                    TaskOutcome::Skipped { reason } => {
                        tracing::debug!(url = %url, reason = %reason, "task skipped");
                        skipped += 1;
                        self.queue.complete(&url);
                        self.emit_url(DiscoveredUrl {
                            url,
                            depth,
                            parent_url: result.task.parent_url.clone(),
                            status_code: None,
                            content_type: None,
                            discovered_at: result.task.enqueued_at,
                            fetch_duration_ms: None,
                            link_type,
                            skip_reason: Some(reason),
                        });
                    }
                    TaskOutcome::Failed { error, attempts } => {
                        tracing::debug!(url = %url, attempts, error = %error, "task failed");
                        failed += 1;
                        self.queue.fail(&url, false);
                        self.emit_url(DiscoveredUrl {
                            url,
                            depth,
                            parent_url: result.task.parent_url.clone(),
                            status_code: None,
                            content_type: None,
                            discovered_at: result.task.enqueued_at,
                            fetch_duration_ms: None,
                            link_type,
                            skip_reason: Some(error),
                        });
                    }
                }
            }

            let elapsed = started.elapsed().as_secs_f64();
            let rate = if elapsed > 0.0 {
                fetched_pages as f64 / elapsed
            } else {
                0.0
            };
            tracing::info!(
                discovered,
                processed,
                unchanged,
                skipped,
                failed,
                queued = self.queue.stats().queued,
                rate_per_sec = rate,
                "crawl progress"
            );
        }

        self.queue.mark_discovery_complete();

        // Finalization is best-effort on both sides: fingerprints persist
        // even when the writer close fails and vice versa
        let save_result = self.detector.save_all();
        let close_result = writer.close();
        pool.shutdown().await;
        save_result?;
        let meta = close_result?;

        let duration_ms = started.elapsed().as_millis() as u64;
        let report = CrawlReport {
            job_id,
            seed_url,
            discovered,
            processed,
            skipped,
            unchanged,
            failed,
            duration_ms,
            avg_page_time_ms: if fetched_pages > 0 {
                fetch_time_total_ms / fetched_pages
            } else {
                0
            },
            pages_per_second: if duration_ms > 0 {
                fetched_pages as f64 * 1000.0 / duration_ms as f64
            } else {
                0.0
            },
            output_path: meta.output_path,
        };

        tracing::info!(
            processed = report.processed,
            unchanged = report.unchanged,
            failed = report.failed,
            duration_ms = report.duration_ms,
            "crawl finished"
        );
        Ok(report)
    }
}
