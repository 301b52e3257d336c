//! Core data model for crawl tasks, scraped pages, and operator requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::url_utils;

/// The unit of work in the crawl queue. A task's URL is its identity;
/// duplicates are rejected by the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlTask {
    /// Absolute URL to process
    pub url: String,

    /// Link distance from the seed
    pub depth: u32,

    /// URL of the page this one was discovered on
    pub parent_url: Option<String>,

    /// Hostname component, lower-cased
    pub host: String,

    /// Insertion priority; lower is higher
    pub priority: u32,

    /// When the task entered the queue
    pub enqueued_at: DateTime<Utc>,
}

impl UrlTask {
    pub fn new(url: String, depth: u32, parent_url: Option<String>, priority: u32) -> Self {
        let host = url_utils::extract_host(&url).unwrap_or_default();
        Self {
            url,
            depth,
            parent_url,
            host,
            priority,
            enqueued_at: Utc::now(),
        }
    }
}

/// Whether a link targets the seed host or leaves it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Internal,
    External,
}

/// A task annotated with its fetch outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredUrl {
    pub url: String,
    pub depth: u32,
    pub parent_url: Option<String>,
    pub status_code: Option<u16>,
    pub content_type: Option<String>,
    pub discovered_at: DateTime<Utc>,
    pub fetch_duration_ms: Option<u64>,
    pub link_type: LinkType,
    pub skip_reason: Option<String>,
}

/// Scrape outcome for a single page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScrapeStatus {
    Success,
    Failed,
    Partial,
}

/// Extracted content and metadata for one page. This is the record
/// written to the result stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedContent {
    pub url: String,
    pub title: String,
    /// h1-h6 texts in document order
    pub headings: Vec<String>,
    /// Whitespace-collapsed plain text of the main content region
    pub body_text: String,
    /// Deduplicated absolute http(s) links found on the page
    pub links: Vec<String>,
    /// Inner HTML of the main content region after element removal
    pub cleaned_html: String,
    pub metadata: ScrapeMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeMetadata {
    pub crawled_at: DateTime<Utc>,
    pub scraped_at: DateTime<Utc>,
    pub fetch_duration_ms: u64,
    pub depth: u32,
    pub parent_url: Option<String>,
    pub status_code: u16,
    pub content_type: Option<String>,
    pub word_count: usize,
    /// ISO 639-1 code or "unknown"
    pub language: String,
    /// First 16 hex chars of the SHA-256 of the body text; empty for empty bodies
    pub content_hash: String,
    pub status: ScrapeStatus,
    pub error_message: Option<String>,
}

impl ScrapedContent {
    /// A FAILED record carrying only the error context
    pub fn failed(url: String, depth: u32, parent_url: Option<String>, error: String) -> Self {
        let now = Utc::now();
        Self {
            url,
            title: String::new(),
            headings: Vec::new(),
            body_text: String::new(),
            links: Vec::new(),
            cleaned_html: String::new(),
            metadata: ScrapeMetadata {
                crawled_at: now,
                scraped_at: now,
                fetch_duration_ms: 0,
                depth,
                parent_url,
                status_code: 0,
                content_type: None,
                word_count: 0,
                language: "unknown".to_string(),
                content_hash: String::new(),
                status: ScrapeStatus::Failed,
                error_message: Some(error),
            },
        }
    }
}

/// Persisted per-URL fingerprint used to decide re-crawl need
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageFingerprint {
    pub url: String,
    /// MD5 of the body text
    pub content_hash: String,
    /// MD5 of a canonicalised structure summary
    pub structure_hash: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub last_crawled: DateTime<Utc>,
    pub crawl_count: u64,
    pub change_count: u64,
    /// Mean interval between observed changes, in seconds
    pub mean_change_interval_secs: f64,
}

/// What the operator asked for: discovery, extraction, or both
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationMode {
    CrawlOnly,
    ScrapeOnly,
    CrawlAndScrape,
}

/// Output rendering requested by the operator. The engine itself emits
/// the streaming formats; MARKDOWN/SUMMARY/HTML renderers live outside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputFormat {
    Json,
    Markdown,
    Summary,
    LinksOnly,
    Html,
}

/// Operator request accepted by the crawl engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlRequest {
    pub seed_url: String,
    pub include_subpages: bool,
    pub depth: u32,
    pub operation_mode: OperationMode,
    pub output_format: OutputFormat,
    pub university_name: Option<String>,
    pub process_id: Option<String>,
}

/// Validation failure for an operator request. Carries an HTTP-style
/// code so API adapters can map it directly.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct RequestError {
    pub code: u16,
    pub message: String,
}

impl RequestError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            code: 400,
            message: message.into(),
        }
    }
}

/// Depth ceiling applied to every request regardless of what was asked for
pub const MAX_REQUEST_DEPTH: u32 = 5;

impl CrawlRequest {
    /// Validate the request and clamp depth to engine policy.
    /// The seed must be an absolute http(s) URL with a host.
    pub fn validate(mut self) -> Result<Self, RequestError> {
        let parsed = url::Url::parse(&self.seed_url)
            .map_err(|e| RequestError::bad_request(format!("invalid seed URL: {}", e)))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(RequestError::bad_request(format!(
                "seed URL must be http or https, got {}",
                parsed.scheme()
            )));
        }

        if parsed.host_str().is_none() {
            return Err(RequestError::bad_request("seed URL has no host"));
        }

        if self.depth > 10 {
            return Err(RequestError::bad_request(format!(
                "depth {} out of range [0,10]",
                self.depth
            )));
        }

        self.depth = self.depth.min(MAX_REQUEST_DEPTH);
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(seed: &str, depth: u32) -> CrawlRequest {
        CrawlRequest {
            seed_url: seed.to_string(),
            include_subpages: true,
            depth,
            operation_mode: OperationMode::CrawlAndScrape,
            output_format: OutputFormat::Json,
            university_name: None,
            process_id: None,
        }
    }

    #[test]
    fn test_validate_clamps_depth() {
        let req = request("https://example.com", 9).validate().unwrap();
        assert_eq!(req.depth, 5);
    }

    #[test]
    fn test_validate_rejects_bad_scheme() {
        let err = request("ftp://example.com", 1).validate().unwrap_err();
        assert_eq!(err.code, 400);
    }

    #[test]
    fn test_validate_rejects_depth_out_of_range() {
        assert!(request("https://example.com", 11).validate().is_err());
    }

    #[test]
    fn test_task_derives_host() {
        let task = UrlTask::new("https://WWW.Example.com/a".to_string(), 1, None, 1);
        assert_eq!(task.host, "www.example.com");
    }

    #[test]
    fn test_failed_record_shape() {
        let rec = ScrapedContent::failed(
            "https://ex.com/x".to_string(),
            2,
            Some("https://ex.com".to_string()),
            "timeout".to_string(),
        );
        assert_eq!(rec.metadata.status, ScrapeStatus::Failed);
        assert!(rec.body_text.is_empty());
        assert_eq!(rec.metadata.error_message.as_deref(), Some("timeout"));
    }
}
