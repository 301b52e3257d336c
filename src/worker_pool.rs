//! Worker pool: fans URL tasks across fetcher contexts with bounded
//! per-worker parallelism. Each task runs the admission pipeline
//! (circuit breaker, rate limiter, retry-wrapped fetch) and then the
//! scraper, so the engine only sees finished outcomes.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::circuit_breaker::CircuitBreaker;
use crate::fetcher::{FetchError, FetcherFactory, PageFetcher};
use crate::models::UrlTask;
use crate::rate_limiter::{RateLimitError, RateLimiter};
use crate::retry::{RetryController, RetryableError};
use crate::scrape::{scrape_blocking, ScrapeInput};

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub workers: usize,
    pub per_worker_concurrency: usize,
    pub nav_timeout: Duration,
    /// Overall budget for fetch plus scrape of one task
    pub handler_timeout: Duration,
}

/// Response metadata the engine needs ahead of emission decisions
#[derive(Debug, Clone)]
pub struct ResponseMeta {
    pub status_code: u16,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub fetch_duration_ms: u64,
}

#[derive(Debug)]
pub enum TaskOutcome {
    /// Page fetched and scraped
    Fetched {
        meta: ResponseMeta,
        content: crate::models::ScrapedContent,
    },
    /// Policy denied the task; processed with a skip reason, never retried
    Skipped { reason: String },
    /// Fetch failed terminally after retries
    Failed { error: String, attempts: u32 },
}

#[derive(Debug)]
pub struct TaskResult {
    pub task: UrlTask,
    pub outcome: TaskOutcome,
}

/// Progress callback: (completed, total, worker_id)
pub type ProgressFn = Arc<dyn Fn(usize, usize, usize) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
enum TaskError {
    #[error("{0}")]
    RateLimit(#[from] RateLimitError),

    #[error("{0}")]
    Fetch(#[from] FetchError),

    #[error("handler timeout after {0:?}")]
    HandlerTimeout(Duration),
}

impl RetryableError for TaskError {
    fn status_code(&self) -> Option<u16> {
        match self {
            TaskError::Fetch(e) => e.status_code(),
            _ => None,
        }
    }

    fn error_name(&self) -> &'static str {
        match self {
            TaskError::RateLimit(RateLimitError::RobotsDenied(_)) => "robots_denied",
            TaskError::RateLimit(RateLimitError::Cancelled) => "cancelled",
            TaskError::Fetch(e) => e.error_name(),
            TaskError::HandlerTimeout(_) => "handler_timeout",
        }
    }
}

pub struct WorkerPool {
    config: WorkerPoolConfig,
    fetchers: Vec<Arc<dyn PageFetcher>>,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    retry: Arc<RetryController>,
}

impl WorkerPool {
    /// Spin up one fetcher context per worker, in parallel
    pub async fn initialize(
        factory: &dyn FetcherFactory,
        config: WorkerPoolConfig,
        breaker: Arc<CircuitBreaker>,
        limiter: Arc<RateLimiter>,
        retry: Arc<RetryController>,
    ) -> Result<Self, FetchError> {
        let workers = config.workers.max(1);
        let created = join_all((0..workers).map(|_| factory.create())).await;

        let mut fetchers = Vec::with_capacity(workers);
        for result in created {
            fetchers.push(result?);
        }

        tracing::debug!(workers, "worker pool initialized");
        Ok(Self {
            config,
            fetchers,
            breaker,
            limiter,
            retry,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.fetchers.len()
    }

    /// Process a batch of tasks. Tasks are distributed round-robin over
    /// the workers; each worker runs its share in slices of the
    /// configured concurrency, reporting progress after every slice.
    pub async fn process(
        &self,
        tasks: Vec<UrlTask>,
        cancel: &CancellationToken,
        on_progress: Option<ProgressFn>,
    ) -> Vec<TaskResult> {
        let worker_count = self.fetchers.len();
        let mut shares: Vec<Vec<UrlTask>> = (0..worker_count).map(|_| Vec::new()).collect();
        for (i, task) in tasks.into_iter().enumerate() {
            shares[i % worker_count].push(task);
        }

        let handles = shares
            .into_iter()
            .enumerate()
            .filter(|(_, share)| !share.is_empty())
            .map(|(worker_id, share)| {
                let fetcher = Arc::clone(&self.fetchers[worker_id]);
                let breaker = Arc::clone(&self.breaker);
                let limiter = Arc::clone(&self.limiter);
                let retry = Arc::clone(&self.retry);
                let config = self.config.clone();
                let cancel = cancel.clone();
                let on_progress = on_progress.clone();

                tokio::spawn(async move {
                    Self::run_worker(
                        worker_id,
                        share,
                        fetcher,
                        breaker,
                        limiter,
                        retry,
                        config,
                        cancel,
                        on_progress,
                    )
                    .await
                })
            });

        let mut results = Vec::new();
        for handle in join_all(handles).await {
            match handle {
                Ok(worker_results) => results.extend(worker_results),
                Err(e) => tracing::error!(error = %e, "worker task panicked"),
            }
        }
        results
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_worker(
        worker_id: usize,
        share: Vec<UrlTask>,
        fetcher: Arc<dyn PageFetcher>,
        breaker: Arc<CircuitBreaker>,
        limiter: Arc<RateLimiter>,
        retry: Arc<RetryController>,
        config: WorkerPoolConfig,
        cancel: CancellationToken,
        on_progress: Option<ProgressFn>,
    ) -> Vec<TaskResult> {
        let total = share.len();
        let slice_size = config.per_worker_concurrency.max(1);
        let mut results = Vec::with_capacity(total);
        let mut completed = 0usize;

        for slice in share.chunks(slice_size) {
            if cancel.is_cancelled() {
                for task in slice {
                    results.push(TaskResult {
                        task: task.clone(),
                        outcome: TaskOutcome::Skipped {
                            reason: "cancelled".to_string(),
                        },
                    });
                }
                completed += slice.len();
                continue;
            }

            let slice_results = join_all(slice.iter().map(|task| {
                Self::process_task(
                    task.clone(),
                    Arc::clone(&fetcher),
                    Arc::clone(&breaker),
                    Arc::clone(&limiter),
                    Arc::clone(&retry),
                    &config,
                    cancel.clone(),
                )
            }))
            .await;

            completed += slice_results.len();
            results.extend(slice_results);

            if let Some(progress) = &on_progress {
                progress(completed, total, worker_id);
            }
        }

        results
    }

    async fn process_task(
        task: UrlTask,
        fetcher: Arc<dyn PageFetcher>,
        breaker: Arc<CircuitBreaker>,
        limiter: Arc<RateLimiter>,
        retry: Arc<RetryController>,
        config: &WorkerPoolConfig,
        cancel: CancellationToken,
    ) -> TaskResult {
        let url = task.url.clone();

        let decision = breaker.check(&url);
        if !decision.allowed {
            return TaskResult {
                task,
                outcome: TaskOutcome::Skipped {
                    reason: decision
                        .reason
                        .unwrap_or_else(|| "circuit open".to_string()),
                },
            };
        }

        let nav_timeout = config.nav_timeout;
        let handler_timeout = config.handler_timeout;

        let outcome = retry
            .execute("fetch_page", &cancel, || {
                let url = url.clone();
                let fetcher = Arc::clone(&fetcher);
                let limiter = Arc::clone(&limiter);
                let cancel = cancel.clone();
                async move {
                    let permit = limiter.acquire(&url, &cancel).await?;
                    let response =
                        match tokio::time::timeout(handler_timeout, fetcher.navigate(&url, nav_timeout))
                            .await
                        {
                            Ok(result) => result?,
                            Err(_) => return Err(TaskError::HandlerTimeout(handler_timeout)),
                        };
                    drop(permit);
                    Ok::<_, TaskError>(response)
                }
            })
            .await;

        match outcome.value {
            Some(response) => {
                breaker.record_success(&url);
                let meta = ResponseMeta {
                    status_code: response.status_code,
                    content_type: response.content_type.clone(),
                    etag: response.etag.clone(),
                    last_modified: response.last_modified.clone(),
                    fetch_duration_ms: response.fetch_duration.as_millis() as u64,
                };
                let content = scrape_blocking(ScrapeInput {
                    url: url.clone(),
                    final_url: response.final_url,
                    html: response.html,
                    depth: task.depth,
                    parent_url: task.parent_url.clone(),
                    status_code: response.status_code,
                    content_type: response.content_type,
                    fetch_duration_ms: meta.fetch_duration_ms,
                    crawled_at: chrono::Utc::now(),
                })
                .await;

                TaskResult {
                    task,
                    outcome: TaskOutcome::Fetched { meta, content },
                }
            }
            None => {
                let error = outcome
                    .last_error
                    .unwrap_or_else(|| "unknown failure".to_string());

                // Policy denials and cancellations are skips, not
                // failures: terminal, and they must not trip the circuit
                // for the host.
                if error.contains("blocked by robots") || error.contains("cancelled") {
                    TaskResult {
                        task,
                        outcome: TaskOutcome::Skipped { reason: error },
                    }
                } else {
                    breaker.record_failure(&url);
                    TaskResult {
                        task,
                        outcome: TaskOutcome::Failed {
                            error,
                            attempts: outcome.attempts,
                        },
                    }
                }
            }
        }
    }

    /// Release all fetcher contexts
    pub async fn shutdown(&self) {
        join_all(self.fetchers.iter().map(|f| f.close())).await;
        tracing::debug!("worker pool shut down");
    }
}
