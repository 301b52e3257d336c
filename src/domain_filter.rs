//! URL admission control. Decides which URLs enter the queue, with
//! per-reason counters exposed as a read-only snapshot.

use parking_lot::Mutex;
use serde::Serialize;

use crate::url_utils;

/// File extensions never worth fetching, matched case-insensitively
/// against the path suffix.
const SKIP_EXTENSIONS: &[&str] = &[
    ".pdf", ".jpg", ".jpeg", ".png", ".gif", ".svg", ".ico", ".css", ".js", ".zip", ".mp4",
    ".avi", ".mov", ".mp3", ".wav", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx", ".tar",
    ".gz", ".tgz", ".bz2", ".7z", ".rar", ".exe", ".msi", ".dmg", ".iso", ".apk", ".woff",
    ".woff2", ".ttf",
];

/// Host suffixes recognised as university domains
const UNIVERSITY_SUFFIXES: &[&str] = &[".edu", ".ac.uk", ".edu.au", ".ac.jp", ".uni", ".ac.in"];

/// Filter policy. Hosts ending in any blacklist entry (or equal to it)
/// are rejected; whitelist entries bypass the seed-host and strict checks.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub max_url_length: usize,
    pub blacklist: Vec<String>,
    pub whitelist: Vec<String>,
    pub blocked_paths: Vec<String>,
    /// Permit sibling subdomains of the seed host
    pub allow_subdomains: bool,
    /// Require a university host suffix when no whitelist entry matches
    pub strict_university: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_url_length: 2048,
            blacklist: Vec::new(),
            whitelist: Vec::new(),
            blocked_paths: vec!["/cgi-bin/".to_string(), "/wp-admin/".to_string()],
            allow_subdomains: true,
            strict_university: false,
        }
    }
}

/// Why a URL was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    TooLong,
    Unparseable,
    Blacklisted,
    SkippedExtension,
    BlockedPath,
    OffSeedHost,
    NotUniversity,
}

/// Admission decision
#[derive(Debug, Clone)]
pub struct FilterDecision {
    pub allowed: bool,
    pub reason: Option<BlockReason>,
}

/// Pure classification of a URL's host
#[derive(Debug, Clone)]
pub struct Classification {
    pub domain: String,
    pub is_university: bool,
    pub is_whitelisted: bool,
    pub is_blacklisted: bool,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct FilterStats {
    pub total_checked: u64,
    pub allowed: u64,
    pub blocked: u64,
    pub blocked_too_long: u64,
    pub blocked_unparseable: u64,
    pub blocked_blacklisted: u64,
    pub blocked_extension: u64,
    pub blocked_path: u64,
    pub blocked_off_host: u64,
    pub blocked_not_university: u64,
}

pub struct DomainFilter {
    config: FilterConfig,
    stats: Mutex<FilterStats>,
}

impl DomainFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self {
            config,
            stats: Mutex::new(FilterStats::default()),
        }
    }

    /// Classify a URL without touching counters. Pure with respect to
    /// filter state: calling it twice on the same input yields the same
    /// result and advances nothing.
    pub fn classify(&self, url: &str) -> Classification {
        let domain = url_utils::extract_host(url).unwrap_or_default();
        Classification {
            is_university: Self::is_university_host(&domain),
            is_whitelisted: self.matches_any(&domain, &self.config.whitelist),
            is_blacklisted: self.matches_any(&domain, &self.config.blacklist),
            domain,
        }
    }

    /// Admission check. Rules short-circuit in a fixed order; every call
    /// bumps the total and the bucket of the decision taken.
    pub fn allow(&self, url: &str, seed_host: Option<&str>) -> FilterDecision {
        let decision = self.evaluate(url, seed_host);
        let mut stats = self.stats.lock();
        stats.total_checked += 1;
        match decision.reason {
            None => stats.allowed += 1,
            Some(reason) => {
                stats.blocked += 1;
                match reason {
                    BlockReason::TooLong => stats.blocked_too_long += 1,
                    BlockReason::Unparseable => stats.blocked_unparseable += 1,
                    BlockReason::Blacklisted => stats.blocked_blacklisted += 1,
                    BlockReason::SkippedExtension => stats.blocked_extension += 1,
                    BlockReason::BlockedPath => stats.blocked_path += 1,
                    BlockReason::OffSeedHost => stats.blocked_off_host += 1,
                    BlockReason::NotUniversity => stats.blocked_not_university += 1,
                }
            }
        }
        decision
    }

    fn evaluate(&self, url: &str, seed_host: Option<&str>) -> FilterDecision {
        if url.len() > self.config.max_url_length {
            return Self::blocked(BlockReason::TooLong);
        }

        let parsed = match url::Url::parse(url) {
            Ok(p) => p,
            Err(_) => return Self::blocked(BlockReason::Unparseable),
        };
        let host = match parsed.host_str() {
            Some(h) => h.to_ascii_lowercase(),
            None => return Self::blocked(BlockReason::Unparseable),
        };

        if self.matches_any(&host, &self.config.blacklist) {
            return Self::blocked(BlockReason::Blacklisted);
        }

        let path = parsed.path().to_ascii_lowercase();
        if SKIP_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
            return Self::blocked(BlockReason::SkippedExtension);
        }

        if self
            .config
            .blocked_paths
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
        {
            return Self::blocked(BlockReason::BlockedPath);
        }

        if self.matches_any(&host, &self.config.whitelist) {
            return Self::allowed();
        }

        if let Some(seed) = seed_host {
            let on_host = if self.config.allow_subdomains {
                url_utils::is_same_or_subdomain(&host, seed)
            } else {
                host == seed
            };
            if !on_host {
                return Self::blocked(BlockReason::OffSeedHost);
            }
        }

        if self.config.strict_university && !Self::is_university_host(&host) {
            return Self::blocked(BlockReason::NotUniversity);
        }

        Self::allowed()
    }

    fn allowed() -> FilterDecision {
        FilterDecision {
            allowed: true,
            reason: None,
        }
    }

    fn blocked(reason: BlockReason) -> FilterDecision {
        FilterDecision {
            allowed: false,
            reason: Some(reason),
        }
    }

    /// Exact match or dot-suffix match against a host list
    fn matches_any(&self, host: &str, list: &[String]) -> bool {
        list.iter().any(|entry| {
            let entry = entry.to_ascii_lowercase();
            host == entry || host.ends_with(&format!(".{}", entry))
        })
    }

    fn is_university_host(host: &str) -> bool {
        UNIVERSITY_SUFFIXES
            .iter()
            .any(|suffix| host.ends_with(suffix))
    }

    pub fn stats(&self) -> FilterStats {
        self.stats.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> DomainFilter {
        DomainFilter::new(FilterConfig::default())
    }

    #[test]
    fn test_allows_plain_page() {
        let f = filter();
        let d = f.allow("https://example.com/page", Some("example.com"));
        assert!(d.allowed);
    }

    #[test]
    fn test_blocks_overlong_url() {
        let f = DomainFilter::new(FilterConfig {
            max_url_length: 30,
            ..FilterConfig::default()
        });
        let long = format!("https://example.com/{}", "a".repeat(40));
        let d = f.allow(&long, None);
        assert_eq!(d.reason, Some(BlockReason::TooLong));
    }

    #[test]
    fn test_blocks_unparseable() {
        let f = filter();
        assert_eq!(
            f.allow("not a url", None).reason,
            Some(BlockReason::Unparseable)
        );
    }

    #[test]
    fn test_blocks_blacklisted_suffix() {
        let f = DomainFilter::new(FilterConfig {
            blacklist: vec!["tracker.net".to_string()],
            ..FilterConfig::default()
        });
        assert_eq!(
            f.allow("https://ads.tracker.net/x", None).reason,
            Some(BlockReason::Blacklisted)
        );
        assert_eq!(
            f.allow("https://tracker.net/x", None).reason,
            Some(BlockReason::Blacklisted)
        );
    }

    #[test]
    fn test_blocks_extension_case_insensitive() {
        let f = filter();
        assert_eq!(
            f.allow("https://example.com/report.PDF", None).reason,
            Some(BlockReason::SkippedExtension)
        );
    }

    #[test]
    fn test_blocks_path_prefix() {
        let f = filter();
        assert_eq!(
            f.allow("https://example.com/wp-admin/login", None).reason,
            Some(BlockReason::BlockedPath)
        );
    }

    #[test]
    fn test_whitelist_bypasses_seed_scope() {
        let f = DomainFilter::new(FilterConfig {
            whitelist: vec!["partner.org".to_string()],
            ..FilterConfig::default()
        });
        let d = f.allow("https://partner.org/page", Some("example.com"));
        assert!(d.allowed);
    }

    #[test]
    fn test_seed_host_scoping() {
        let f = filter();
        assert!(
            f.allow("https://sub.example.com/a", Some("example.com"))
                .allowed
        );
        assert_eq!(
            f.allow("https://other.com/a", Some("example.com")).reason,
            Some(BlockReason::OffSeedHost)
        );
    }

    #[test]
    fn test_exact_host_mode() {
        let f = DomainFilter::new(FilterConfig {
            allow_subdomains: false,
            ..FilterConfig::default()
        });
        assert_eq!(
            f.allow("https://sub.example.com/a", Some("example.com"))
                .reason,
            Some(BlockReason::OffSeedHost)
        );
    }

    #[test]
    fn test_strict_university_mode() {
        let f = DomainFilter::new(FilterConfig {
            strict_university: true,
            ..FilterConfig::default()
        });
        assert!(f.allow("https://cs.stanford.edu/", None).allowed);
        assert_eq!(
            f.allow("https://example.com/", None).reason,
            Some(BlockReason::NotUniversity)
        );
    }

    #[test]
    fn test_classify_is_pure() {
        let f = filter();
        let before = f.stats().total_checked;
        let c = f.classify("https://cs.ox.ac.uk/people");
        assert_eq!(c.domain, "cs.ox.ac.uk");
        assert!(c.is_university);
        assert_eq!(f.stats().total_checked, before);
    }

    #[test]
    fn test_counters_bucket_by_reason() {
        let f = filter();
        f.allow("https://example.com/a", None);
        f.allow("https://example.com/b.pdf", None);
        f.allow("nope", None);
        let stats = f.stats();
        assert_eq!(stats.total_checked, 3);
        assert_eq!(stats.allowed, 1);
        assert_eq!(stats.blocked, 2);
        assert_eq!(stats.blocked_extension, 1);
        assert_eq!(stats.blocked_unparseable, 1);
    }
}
