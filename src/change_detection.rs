//! Incremental re-crawl decisions backed by per-host fingerprint files.
//!
//! Fingerprints live in `{data_dir}/fingerprints/{sanitized-host}.json`,
//! one JSON object per host mapping URL to fingerprint. Files load lazily
//! on first touch of a host; corrupt files are treated as empty and
//! overwritten at the next save. Writes are batched: `save_all` runs once
//! at crawl end over the hosts marked dirty.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::models::PageFingerprint;
use crate::url_utils;

/// Why a page needs re-crawling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Never seen before
    New,
    /// Fingerprint older than the freshness window
    Expired,
    /// Server ETag differs from the stored one
    Etag,
    /// Optimistic re-fetch; verified against hashes after scraping
    Content,
}

/// Outcome of a pre-fetch change check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeDecision {
    Recrawl(ChangeKind),
    Unchanged(&'static str),
}

impl ChangeDecision {
    pub fn recrawl(&self) -> bool {
        matches!(self, ChangeDecision::Recrawl(_))
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ChangeDetectionStats {
    pub checks: u64,
    pub recrawls: u64,
    pub unchanged: u64,
    pub updates: u64,
    pub changes_observed: u64,
}

struct DomainCache {
    fingerprints: HashMap<String, PageFingerprint>,
    dirty: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    #[error("fingerprint io: {0}")]
    Io(#[from] std::io::Error),

    #[error("fingerprint serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub struct ChangeDetector {
    dir: PathBuf,
    max_age: Duration,
    domains: DashMap<String, Mutex<DomainCache>>,
    stats: Mutex<ChangeDetectionStats>,
}

impl ChangeDetector {
    pub fn new<P: AsRef<Path>>(data_dir: P, max_age: std::time::Duration) -> Self {
        Self {
            dir: data_dir.as_ref().join("fingerprints"),
            max_age: Duration::from_std(max_age).unwrap_or_else(|_| Duration::days(7)),
            domains: DashMap::new(),
            stats: Mutex::new(ChangeDetectionStats::default()),
        }
    }

    fn cache_path(&self, host: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", url_utils::sanitize_host(host)))
    }

    /// Load a host's fingerprint file on first touch
    fn ensure_domain(&self, host: &str) {
        if self.domains.contains_key(host) {
            return;
        }

        let fingerprints = match std::fs::read_to_string(self.cache_path(host)) {
            Ok(raw) => match serde_json::from_str::<HashMap<String, PageFingerprint>>(&raw) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!(host, error = %e, "corrupt fingerprint cache, starting empty");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        self.domains.insert(
            host.to_string(),
            Mutex::new(DomainCache {
                fingerprints,
                dirty: false,
            }),
        );
    }

    /// Decide whether a URL needs re-crawling given any conditional
    /// headers the server returned for it.
    pub fn check(
        &self,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> ChangeDecision {
        let host = url_utils::extract_host(url).unwrap_or_default();
        self.ensure_domain(&host);

        let decision = {
            let entry = self.domains.get(&host).expect("domain loaded above");
            let cache = entry.lock();
            match cache.fingerprints.get(url) {
                None => ChangeDecision::Recrawl(ChangeKind::New),
                Some(fp) => self.decide(fp, etag, last_modified),
            }
        };

        let mut stats = self.stats.lock();
        stats.checks += 1;
        if decision.recrawl() {
            stats.recrawls += 1;
        } else {
            stats.unchanged += 1;
        }
        decision
    }

    fn decide(
        &self,
        fp: &PageFingerprint,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> ChangeDecision {
        if Utc::now() - fp.last_crawled > self.max_age {
            return ChangeDecision::Recrawl(ChangeKind::Expired);
        }

        if let (Some(stored), Some(fresh)) = (fp.etag.as_deref(), etag) {
            return if stored == fresh {
                ChangeDecision::Unchanged("etag-unchanged")
            } else {
                ChangeDecision::Recrawl(ChangeKind::Etag)
            };
        }

        if let (Some(stored), Some(fresh)) = (fp.last_modified.as_deref(), last_modified) {
            if let (Ok(stored_time), Ok(fresh_time)) = (
                DateTime::parse_from_rfc2822(stored),
                DateTime::parse_from_rfc2822(fresh),
            ) {
                if fresh_time <= stored_time {
                    return ChangeDecision::Unchanged("lm-unchanged");
                }
            }
        }

        ChangeDecision::Recrawl(ChangeKind::Content)
    }

    /// Record a scrape. Computes content and structure hashes, compares
    /// with any prior fingerprint, and rewrites the record. Pages the
    /// check declared unchanged are never passed back through here, so a
    /// structure-only evolution (same body, new outbound links) leaves
    /// the stored structure hash stale until the next content change.
    ///
    /// Returns true when the page changed relative to the prior record.
    pub fn update(
        &self,
        url: &str,
        body_text: &str,
        links: &[String],
        headings: &[String],
        etag: Option<String>,
        last_modified: Option<String>,
    ) -> bool {
        let host = url_utils::extract_host(url).unwrap_or_default();
        self.ensure_domain(&host);

        let content_hash = format!("{:x}", md5::compute(body_text.as_bytes()));
        let structure_hash = Self::structure_hash(links, headings);
        let now = Utc::now();

        let changed = {
            let entry = self.domains.get(&host).expect("domain loaded above");
            let mut cache = entry.lock();

            let (changed, crawl_count, change_count, mean_interval) =
                match cache.fingerprints.get(url) {
                    Some(prior) => {
                        let changed = prior.content_hash != content_hash
                            || prior.structure_hash != structure_hash;
                        let crawl_count = prior.crawl_count + 1;
                        let change_count = prior.change_count + u64::from(changed);
                        let mean = if changed {
                            let interval = (now - prior.last_crawled).num_seconds().max(0) as f64;
                            let prior_changes = prior.change_count as f64;
                            (prior.mean_change_interval_secs * prior_changes + interval)
                                / change_count as f64
                        } else {
                            prior.mean_change_interval_secs
                        };
                        (changed, crawl_count, change_count, mean)
                    }
                    None => (true, 1, 1, 0.0),
                };

            cache.fingerprints.insert(
                url.to_string(),
                PageFingerprint {
                    url: url.to_string(),
                    content_hash,
                    structure_hash,
                    etag,
                    last_modified,
                    last_crawled: now,
                    crawl_count,
                    change_count,
                    mean_change_interval_secs: mean_interval,
                },
            );
            cache.dirty = true;
            changed
        };

        let mut stats = self.stats.lock();
        stats.updates += 1;
        if changed {
            stats.changes_observed += 1;
        }
        changed
    }

    /// MD5 over a canonical JSON summary of the page structure: link and
    /// heading counts plus a sorted prefix of each list.
    fn structure_hash(links: &[String], headings: &[String]) -> String {
        let mut top_links: Vec<&String> = links.iter().collect();
        top_links.sort();
        top_links.truncate(10);

        let mut top_headings: Vec<&String> = headings.iter().collect();
        top_headings.sort();
        top_headings.truncate(10);

        let summary = serde_json::json!({
            "linkCount": links.len(),
            "headingCount": headings.len(),
            "links": top_links,
            "headings": top_headings,
        });
        format!("{:x}", md5::compute(summary.to_string().as_bytes()))
    }

    pub fn fingerprint(&self, url: &str) -> Option<PageFingerprint> {
        let host = url_utils::extract_host(url).unwrap_or_default();
        self.ensure_domain(&host);
        self.domains
            .get(&host)
            .and_then(|entry| entry.lock().fingerprints.get(url).cloned())
    }

    /// Preload a host's cache so the first batch of checks avoids disk
    pub fn load_domain(&self, host: &str) {
        self.ensure_domain(host);
    }

    /// Write every dirty host cache to disk
    pub fn save_all(&self) -> Result<(), FingerprintError> {
        std::fs::create_dir_all(&self.dir)?;

        for entry in self.domains.iter() {
            let host = entry.key();
            let mut cache = entry.value().lock();
            if !cache.dirty {
                continue;
            }
            let path = self.cache_path(host);
            let json = serde_json::to_string_pretty(&cache.fingerprints)?;
            std::fs::write(&path, json)?;
            cache.dirty = false;
            tracing::debug!(host = %host, path = %path.display(), "fingerprint cache saved");
        }
        Ok(())
    }

    pub fn stats(&self) -> ChangeDetectionStats {
        self.stats.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const WEEK: std::time::Duration = std::time::Duration::from_secs(7 * 24 * 3600);

    fn detector(dir: &TempDir) -> ChangeDetector {
        ChangeDetector::new(dir.path(), WEEK)
    }

    #[test]
    fn test_unknown_url_is_new() {
        let dir = TempDir::new().unwrap();
        let d = detector(&dir);
        assert_eq!(
            d.check("https://ex.com/a", None, None),
            ChangeDecision::Recrawl(ChangeKind::New)
        );
    }

    #[test]
    fn test_etag_match_skips_recrawl() {
        let dir = TempDir::new().unwrap();
        let d = detector(&dir);
        d.update(
            "https://ex.com/a",
            "body",
            &[],
            &[],
            Some("\"v1\"".to_string()),
            None,
        );

        assert_eq!(
            d.check("https://ex.com/a", Some("\"v1\""), None),
            ChangeDecision::Unchanged("etag-unchanged")
        );
        assert_eq!(
            d.check("https://ex.com/a", Some("\"v2\""), None),
            ChangeDecision::Recrawl(ChangeKind::Etag)
        );
    }

    #[test]
    fn test_last_modified_not_newer_skips() {
        let dir = TempDir::new().unwrap();
        let d = detector(&dir);
        d.update(
            "https://ex.com/a",
            "body",
            &[],
            &[],
            None,
            Some("Wed, 01 Jan 2025 00:00:00 GMT".to_string()),
        );

        assert_eq!(
            d.check(
                "https://ex.com/a",
                None,
                Some("Wed, 01 Jan 2025 00:00:00 GMT")
            ),
            ChangeDecision::Unchanged("lm-unchanged")
        );
        assert_eq!(
            d.check(
                "https://ex.com/a",
                None,
                Some("Thu, 01 Jan 2026 00:00:00 GMT")
            ),
            ChangeDecision::Recrawl(ChangeKind::Content)
        );
    }

    #[test]
    fn test_no_headers_is_optimistic_content() {
        let dir = TempDir::new().unwrap();
        let d = detector(&dir);
        d.update("https://ex.com/a", "body", &[], &[], None, None);
        assert_eq!(
            d.check("https://ex.com/a", None, None),
            ChangeDecision::Recrawl(ChangeKind::Content)
        );
    }

    #[test]
    fn test_update_tracks_changes_and_invariant() {
        let dir = TempDir::new().unwrap();
        let d = detector(&dir);
        let url = "https://ex.com/a";

        assert!(d.update(url, "v1", &[], &[], None, None));
        assert!(!d.update(url, "v1", &[], &[], None, None));
        assert!(d.update(url, "v2", &[], &[], None, None));

        let fp = d.fingerprint(url).unwrap();
        assert_eq!(fp.crawl_count, 3);
        assert_eq!(fp.change_count, 2);
        assert!(fp.change_count <= fp.crawl_count);
    }

    #[test]
    fn test_structure_change_detected() {
        let dir = TempDir::new().unwrap();
        let d = detector(&dir);
        let url = "https://ex.com/a";

        d.update(url, "same", &["https://ex.com/x".to_string()], &[], None, None);
        let changed = d.update(
            url,
            "same",
            &[
                "https://ex.com/x".to_string(),
                "https://ex.com/y".to_string(),
            ],
            &[],
            None,
            None,
        );
        assert!(changed);
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = TempDir::new().unwrap();
        {
            let d = detector(&dir);
            d.update("https://ex.com/a", "body", &[], &[], Some("\"e\"".to_string()), None);
            d.save_all().unwrap();
        }
        {
            let d = detector(&dir);
            let fp = d.fingerprint("https://ex.com/a").unwrap();
            assert_eq!(fp.etag.as_deref(), Some("\"e\""));
            assert_eq!(fp.crawl_count, 1);
        }
    }

    #[test]
    fn test_corrupt_cache_treated_as_empty() {
        let dir = TempDir::new().unwrap();
        let fingerprints = dir.path().join("fingerprints");
        std::fs::create_dir_all(&fingerprints).unwrap();
        std::fs::write(fingerprints.join("ex.com.json"), "{ not json").unwrap();

        let d = detector(&dir);
        assert_eq!(
            d.check("https://ex.com/a", None, None),
            ChangeDecision::Recrawl(ChangeKind::New)
        );
    }

    #[test]
    fn test_stats_counters() {
        let dir = TempDir::new().unwrap();
        let d = detector(&dir);
        d.check("https://ex.com/a", None, None);
        d.update("https://ex.com/a", "body", &[], &[], Some("\"v\"".to_string()), None);
        d.check("https://ex.com/a", Some("\"v\""), None);

        let stats = d.stats();
        assert_eq!(stats.checks, 2);
        assert_eq!(stats.recrawls, 1);
        assert_eq!(stats.unchanged, 1);
        assert_eq!(stats.updates, 1);
        assert_eq!(stats.changes_observed, 1);
    }
}
