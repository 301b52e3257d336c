//! robots.txt fetching, parsing, and per-host caching.
//!
//! Rules are fetched lazily on first touch of a host and expire by TTL.
//! A fetch failure of any kind yields allow-everything rules so a broken
//! robots endpoint never stalls a crawl.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::PolitenessConfig;
use crate::url_utils;

/// Parsed rules for one host
#[derive(Debug, Clone)]
pub struct RobotsRules {
    pub host: String,
    /// Crawl-delay in seconds, when a relevant section declared one
    pub crawl_delay: Option<f64>,
    pub disallow: Vec<String>,
    pub allow: Vec<String>,
    pub sitemaps: Vec<String>,
    pub fetched_at: Instant,
    pub expires_at: Instant,
}

impl RobotsRules {
    /// Permissive rules used when robots.txt is missing or unreadable
    pub fn allow_all(host: String, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            host,
            crawl_delay: None,
            disallow: Vec::new(),
            allow: Vec::new(),
            sitemaps: Vec::new(),
            fetched_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Evaluate a path (with query) against the rules.
    ///
    /// Allow takes precedence: a matching Allow pattern wins as long as it
    /// is at least as specific (as long) as the longest matching Disallow
    /// pattern. A Disallow of greater specificity than every matching
    /// Allow blocks the path.
    pub fn is_path_allowed(&self, path: &str) -> bool {
        let best_allow = self
            .allow
            .iter()
            .filter(|p| pattern_matches(p, path))
            .map(|p| p.len())
            .max();
        let best_disallow = self
            .disallow
            .iter()
            .filter(|p| pattern_matches(p, path))
            .map(|p| p.len())
            .max();

        match (best_allow, best_disallow) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(a), Some(d)) => a >= d,
        }
    }
}

/// Match a robots path pattern against a path. `*` matches any run of
/// characters; a trailing `$` anchors the match at end-of-string. A
/// pattern without metacharacters is a literal prefix match.
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(stripped) => (stripped, true),
        None => (pattern, false),
    };

    if !pattern.contains('*') {
        return if anchored {
            path == pattern
        } else {
            path.starts_with(pattern)
        };
    }

    let segments: Vec<&str> = pattern.split('*').collect();

    // First segment anchors at the start of the path
    let first = segments[0];
    if !path.starts_with(first) {
        return false;
    }
    let mut pos = first.len();

    let (middle, last) = segments[1..].split_at(segments.len() - 2);
    for segment in middle {
        if segment.is_empty() {
            continue;
        }
        match path[pos..].find(segment) {
            Some(found) => pos += found + segment.len(),
            None => return false,
        }
    }

    // A pattern ending in `*` leaves an empty last segment, which matches
    // any tail whether anchored or not.
    let last = last.first().copied().unwrap_or("");
    if last.is_empty() {
        return true;
    }

    if anchored {
        path.len() >= pos + last.len() && path.ends_with(last)
    } else {
        path[pos..].contains(last)
    }
}

/// Parse robots.txt content into rules for the given user agent.
///
/// Directive names are case-insensitive. Sections group consecutive
/// User-agent lines; a rule line closes the group. Sitemap directives are
/// collected regardless of section. Empty Disallow values are ignored and
/// Crawl-delay must be a positive float to take effect.
pub fn parse_robots(host: &str, content: &str, user_agent: &str, ttl: Duration) -> RobotsRules {
    let mut rules = RobotsRules::allow_all(host.to_string(), ttl);

    let ua_lower = user_agent.to_ascii_lowercase();
    // Product token: the part before '/' in "Name/1.0"
    let product_token = ua_lower.split('/').next().unwrap_or("").trim().to_string();

    let mut current_agents: Vec<String> = Vec::new();
    let mut group_has_rules = false;

    let section_relevant = |agents: &[String]| -> bool {
        agents.iter().any(|agent| {
            agent == "*"
                || ua_lower.contains(agent.as_str())
                || (!product_token.is_empty() && agent.contains(&product_token))
        })
    };

    for raw_line in content.lines() {
        // Strip comments, then whitespace
        let line = raw_line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        match key.as_str() {
            "user-agent" => {
                if group_has_rules {
                    current_agents.clear();
                    group_has_rules = false;
                }
                current_agents.push(value.to_ascii_lowercase());
            }
            "sitemap" => {
                if !value.is_empty() {
                    rules.sitemaps.push(value.to_string());
                }
            }
            "allow" => {
                group_has_rules = true;
                if !value.is_empty() && section_relevant(&current_agents) {
                    rules.allow.push(value.to_string());
                }
            }
            "disallow" => {
                group_has_rules = true;
                if !value.is_empty() && section_relevant(&current_agents) {
                    rules.disallow.push(value.to_string());
                }
            }
            "crawl-delay" => {
                group_has_rules = true;
                if section_relevant(&current_agents) {
                    if let Ok(delay) = value.parse::<f64>() {
                        if delay > 0.0 {
                            rules.crawl_delay = Some(delay);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    rules
}

/// Per-host robots.txt cache with TTL expiry
pub struct RobotsCache {
    client: reqwest::Client,
    config: PolitenessConfig,
    cache: DashMap<String, Arc<RobotsRules>>,
}

impl RobotsCache {
    pub fn new(config: PolitenessConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.robots_timeout)
            .build()?;
        Ok(Self {
            client,
            config,
            cache: DashMap::new(),
        })
    }

    /// Rules for the host of `url`, fetching on first touch or after expiry
    pub async fn rules_for(&self, url: &str) -> Arc<RobotsRules> {
        let host = url_utils::extract_host(url).unwrap_or_default();

        if let Some(cached) = self.cache.get(&host) {
            if !cached.is_expired() {
                return Arc::clone(&cached);
            }
        }

        let rules = Arc::new(self.fetch_and_parse(url, &host).await);
        self.cache.insert(host, Arc::clone(&rules));
        rules
    }

    async fn fetch_and_parse(&self, url: &str, host: &str) -> RobotsRules {
        let ttl = self.config.robots_cache_ttl;

        let Some(robots_url) = url_utils::robots_url(url) else {
            return RobotsRules::allow_all(host.to_string(), ttl);
        };

        match self.client.get(&robots_url).send().await {
            Ok(response) if response.status().as_u16() == 200 => match response.text().await {
                Ok(body) => parse_robots(host, &body, &self.config.user_agent, ttl),
                Err(e) => {
                    tracing::debug!(host, error = %e, "robots.txt body read failed, allowing all");
                    RobotsRules::allow_all(host.to_string(), ttl)
                }
            },
            Ok(response) => {
                tracing::debug!(host, status = response.status().as_u16(), "robots.txt non-200, allowing all");
                RobotsRules::allow_all(host.to_string(), ttl)
            }
            Err(e) => {
                tracing::debug!(host, error = %e, "robots.txt fetch failed, allowing all");
                RobotsRules::allow_all(host.to_string(), ttl)
            }
        }
    }

    /// Whether robots rules permit fetching `url`. Always true when
    /// robots compliance is disabled.
    pub async fn is_allowed(&self, url: &str) -> bool {
        if !self.config.respect_robots {
            return true;
        }
        let rules = self.rules_for(url).await;
        rules.is_path_allowed(&url_utils::path_and_query(url))
    }

    /// Required inter-request delay for the host of `url`, in milliseconds,
    /// clamped to the configured bounds. Falls back to the default delay
    /// when robots declared none or compliance is disabled.
    pub async fn crawl_delay_ms(&self, url: &str) -> u64 {
        if !self.config.respect_robots {
            return self.config.default_delay_ms;
        }
        let rules = self.rules_for(url).await;
        match rules.crawl_delay {
            Some(secs) => ((secs * 1000.0) as u64)
                .clamp(self.config.min_delay_ms, self.config.max_delay_ms),
            None => self.config.default_delay_ms,
        }
    }

    /// Seed the cache without a network fetch. Used by tests and by the
    /// engine when it pre-fetched robots itself.
    pub fn insert_rules(&self, rules: RobotsRules) {
        self.cache.insert(rules.host.clone(), Arc::new(rules));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(3600);

    fn parse(content: &str) -> RobotsRules {
        parse_robots("ex.com", content, "SiteGrazer/0.4", TTL)
    }

    #[test]
    fn test_parse_collects_relevant_sections() {
        let rules = parse(
            "User-agent: *\nDisallow: /private\nAllow: /private/ok\nCrawl-delay: 2.5\nSitemap: https://ex.com/sitemap.xml",
        );
        assert_eq!(rules.disallow, vec!["/private"]);
        assert_eq!(rules.allow, vec!["/private/ok"]);
        assert_eq!(rules.crawl_delay, Some(2.5));
        assert_eq!(rules.sitemaps, vec!["https://ex.com/sitemap.xml"]);
    }

    #[test]
    fn test_parse_ignores_other_agents() {
        let rules = parse("User-agent: OtherBot\nDisallow: /\n\nUser-agent: *\nDisallow: /tmp");
        assert_eq!(rules.disallow, vec!["/tmp"]);
    }

    #[test]
    fn test_parse_matches_product_token() {
        let rules = parse("User-agent: sitegrazer\nDisallow: /internal");
        assert_eq!(rules.disallow, vec!["/internal"]);
    }

    #[test]
    fn test_parse_sitemaps_always_collected() {
        let rules = parse("User-agent: OtherBot\nSitemap: https://ex.com/map.xml\nDisallow: /");
        assert_eq!(rules.sitemaps, vec!["https://ex.com/map.xml"]);
    }

    #[test]
    fn test_parse_ignores_empty_disallow_and_bad_delay() {
        let rules = parse("User-agent: *\nDisallow:\nCrawl-delay: -3\nCrawl-delay: zero");
        assert!(rules.disallow.is_empty());
        assert_eq!(rules.crawl_delay, None);
    }

    #[test]
    fn test_parse_case_insensitive_directives() {
        let rules = parse("USER-AGENT: *\nDISALLOW: /admin");
        assert_eq!(rules.disallow, vec!["/admin"]);
    }

    #[test]
    fn test_pattern_prefix_match() {
        assert!(pattern_matches("/private", "/private/x"));
        assert!(pattern_matches("/private", "/private"));
        assert!(!pattern_matches("/private", "/public"));
    }

    #[test]
    fn test_pattern_wildcard() {
        assert!(pattern_matches("/*/download", "/files/download"));
        assert!(pattern_matches("/a*z", "/abcz-more"));
        assert!(!pattern_matches("/a*z", "/abc"));
    }

    #[test]
    fn test_pattern_end_anchor() {
        assert!(pattern_matches("/exact$", "/exact"));
        assert!(!pattern_matches("/exact$", "/exact/more"));
        assert!(pattern_matches("/*.php$", "/index.php"));
        assert!(!pattern_matches("/*.php$", "/index.php?x=1"));
        assert!(pattern_matches("/*.php$", "/a.php/b.php"));
    }

    #[test]
    fn test_allow_precedence() {
        let rules = parse("User-agent: *\nDisallow: /private\nAllow: /private/public");
        assert!(!rules.is_path_allowed("/private/secret"));
        assert!(rules.is_path_allowed("/private/public/page"));
        assert!(rules.is_path_allowed("/open"));
    }

    #[test]
    fn test_specific_disallow_beats_general_allow() {
        let rules = parse("User-agent: *\nAllow: /a\nDisallow: /a/secret");
        assert!(rules.is_path_allowed("/a/page"));
        assert!(!rules.is_path_allowed("/a/secret/x"));
    }

    #[test]
    fn test_allow_all_when_empty() {
        let rules = RobotsRules::allow_all("ex.com".to_string(), TTL);
        assert!(rules.is_path_allowed("/anything"));
        assert!(!rules.is_expired());
    }

    #[tokio::test]
    async fn test_cache_crawl_delay_clamped() {
        let config = PolitenessConfig {
            min_delay_ms: 500,
            max_delay_ms: 5000,
            default_delay_ms: 1000,
            ..PolitenessConfig::default()
        };
        let cache = RobotsCache::new(config).unwrap();

        let mut rules = RobotsRules::allow_all("ex.com".to_string(), TTL);
        rules.crawl_delay = Some(60.0);
        cache.insert_rules(rules);

        // 60s clamps down to the 5s ceiling
        assert_eq!(cache.crawl_delay_ms("https://ex.com/a").await, 5000);
    }

    #[tokio::test]
    async fn test_cache_is_allowed_uses_seeded_rules() {
        let cache = RobotsCache::new(PolitenessConfig::default()).unwrap();
        let mut rules = RobotsRules::allow_all("ex.com".to_string(), TTL);
        rules.disallow.push("/private".to_string());
        cache.insert_rules(rules);

        assert!(!cache.is_allowed("https://ex.com/private/x").await);
        assert!(cache.is_allowed("https://ex.com/open").await);
    }

    #[tokio::test]
    async fn test_disabled_robots_allows_everything() {
        let cache = RobotsCache::new(PolitenessConfig {
            respect_robots: false,
            ..PolitenessConfig::default()
        })
        .unwrap();
        let mut rules = RobotsRules::allow_all("ex.com".to_string(), TTL);
        rules.disallow.push("/".to_string());
        cache.insert_rules(rules);

        assert!(cache.is_allowed("https://ex.com/private").await);
    }
}
