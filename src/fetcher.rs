//! Page fetching. The crawl engine never talks to a browser directly;
//! it drives the `PageFetcher` trait, so a headless-browser binding can
//! be injected while the default implementation rides on reqwest.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::{PolitenessConfig, RenderingMode};
use crate::retry::RetryableError;
use crate::url_utils;

/// Upper bound on fetched page bodies
pub const MAX_CONTENT_SIZE: usize = 10 * 1024 * 1024;

/// What a navigation produced: status line, the conditional headers used
/// by change detection, and the document markup.
#[derive(Debug, Clone)]
pub struct PageResponse {
    pub status_code: u16,
    /// First `;`-delimited Content-Type token
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// URL after redirects
    pub final_url: String,
    pub html: String,
    pub fetch_duration: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("connection refused")]
    ConnectionRefused,

    #[error("dns resolution failed")]
    Dns,

    #[error("request timeout")]
    Timeout,

    #[error("http status {0}")]
    HttpStatus(u16),

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("content too large: {0} bytes (max {1})")]
    ContentTooLarge(usize, usize),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("failed to build http client: {0}")]
    ClientBuild(String),

    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return FetchError::Timeout;
        }

        let message = error.to_string().to_ascii_lowercase();
        if error.is_connect() {
            if message.contains("connection refused") {
                return FetchError::ConnectionRefused;
            }
            if message.contains("dns") || message.contains("name resolution") {
                return FetchError::Dns;
            }
        }

        FetchError::Network(error.to_string())
    }
}

impl RetryableError for FetchError {
    fn status_code(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus(status) => Some(*status),
            _ => None,
        }
    }

    fn error_name(&self) -> &'static str {
        match self {
            FetchError::Network(_) => "network",
            FetchError::ConnectionRefused => "connection_refused",
            FetchError::Dns => "dns",
            FetchError::Timeout => "timeout",
            FetchError::HttpStatus(_) => "http_status",
            FetchError::Body(_) => "body",
            FetchError::ContentTooLarge(_, _) => "content_too_large",
            FetchError::InvalidUrl(_) => "invalid_url",
            FetchError::ClientBuild(_) => "client_build",
            FetchError::Cancelled => "cancelled",
        }
    }
}

/// Injected page-loading capability. Browser-backed implementations
/// honour the rendering mode (DOMContentLoaded vs network idle); the
/// HTTP implementation performs a single load for every mode.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<PageResponse, FetchError>;

    /// Release the underlying context
    async fn close(&self) {}
}

/// Creates fetcher contexts for the worker pool
#[async_trait]
pub trait FetcherFactory: Send + Sync {
    async fn create(&self) -> Result<std::sync::Arc<dyn PageFetcher>, FetchError>;
}

/// Default fetcher over reqwest. Follows redirects the way a browser
/// would and enforces the content size ceiling. `request_timeout` caps
/// the whole exchange; `navigate` may tighten it per call.
pub struct HttpFetcher {
    client: reqwest::Client,
    rendering_mode: RenderingMode,
}

impl HttpFetcher {
    pub fn new(
        config: &PolitenessConfig,
        rendering_mode: RenderingMode,
        request_timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(request_timeout)
            .pool_max_idle_per_host(8)
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| FetchError::ClientBuild(e.to_string()))?;
        Ok(Self {
            client,
            rendering_mode,
        })
    }

    pub fn rendering_mode(&self) -> RenderingMode {
        self.rendering_mode
    }

    fn header<'a>(response: &'a reqwest::Response, name: &str) -> Option<String> {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<PageResponse, FetchError> {
        url::Url::parse(url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;

        let start = std::time::Instant::now();
        let response = self
            .client
            .get(url)
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header("Accept-Language", "en-US,en;q=0.5")
            .timeout(timeout)
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        if let Some(length) = response.content_length() {
            if length as usize > MAX_CONTENT_SIZE {
                return Err(FetchError::ContentTooLarge(length as usize, MAX_CONTENT_SIZE));
            }
        }

        let content_type = Self::header(&response, "content-type")
            .map(|raw| url_utils::content_type_token(&raw));
        let etag = Self::header(&response, "etag");
        let last_modified = Self::header(&response, "last-modified");
        let final_url = response.url().to_string();

        let html = response
            .text()
            .await
            .map_err(|e| FetchError::Body(e.to_string()))?;
        if html.len() > MAX_CONTENT_SIZE {
            return Err(FetchError::ContentTooLarge(html.len(), MAX_CONTENT_SIZE));
        }

        Ok(PageResponse {
            status_code: status.as_u16(),
            content_type,
            etag,
            last_modified,
            final_url,
            html,
            fetch_duration: start.elapsed(),
        })
    }
}

/// Factory producing independent `HttpFetcher` contexts
pub struct HttpFetcherFactory {
    config: PolitenessConfig,
    rendering_mode: RenderingMode,
    request_timeout: Duration,
}

impl HttpFetcherFactory {
    pub fn new(
        config: PolitenessConfig,
        rendering_mode: RenderingMode,
        request_timeout: Duration,
    ) -> Self {
        Self {
            config,
            rendering_mode,
            request_timeout,
        }
    }
}

#[async_trait]
impl FetcherFactory for HttpFetcherFactory {
    async fn create(&self) -> Result<std::sync::Arc<dyn PageFetcher>, FetchError> {
        Ok(std::sync::Arc::new(HttpFetcher::new(
            &self.config,
            self.rendering_mode,
            self.request_timeout,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::{classify, ErrorClass};

    #[test]
    fn test_fetch_error_classification() {
        assert_eq!(classify(&FetchError::Timeout), ErrorClass::Transient);
        assert_eq!(classify(&FetchError::HttpStatus(503)), ErrorClass::Transient);
        assert_eq!(classify(&FetchError::HttpStatus(429)), ErrorClass::Transient);
        assert_eq!(classify(&FetchError::HttpStatus(404)), ErrorClass::Permanent);
        assert_eq!(
            classify(&FetchError::InvalidUrl("nope".to_string())),
            ErrorClass::Permanent
        );
        assert_eq!(
            classify(&FetchError::ConnectionRefused),
            ErrorClass::Transient
        );
    }

    #[test]
    fn test_status_code_surface() {
        assert_eq!(FetchError::HttpStatus(503).status_code(), Some(503));
        assert_eq!(FetchError::Timeout.status_code(), None);
    }

    #[tokio::test]
    async fn test_navigate_rejects_invalid_url() {
        let fetcher = HttpFetcher::new(
            &PolitenessConfig::default(),
            RenderingMode::Fast,
            Duration::from_secs(30),
        )
        .unwrap();
        let err = fetcher
            .navigate("not-a-url", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)));
    }
}
