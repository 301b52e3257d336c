//! Content extraction. Parses fetched markup server-side and replicates
//! the removal-selector semantics a browser-side cleaner would apply:
//! boilerplate elements are skipped during traversal rather than
//! mutated out, since the DOM here is read-only.

use chrono::Utc;
use scraper::{ElementRef, Html, Selector};
use sha2::{Digest, Sha256};

use crate::language::detect_language;
use crate::models::{ScrapeMetadata, ScrapeStatus, ScrapedContent};
use crate::url_utils;

/// Tags stripped from the content region
const REMOVE_TAGS: &[&str] = &[
    "script", "style", "noscript", "iframe", "nav", "footer", "header", "aside",
];

/// Class tokens marking boilerplate containers
const REMOVE_CLASSES: &[&str] = &["advertisement", "ads", "sidebar", "cookie-banner", "popup"];

/// ARIA roles marking page chrome
const REMOVE_ROLES: &[&str] = &["banner", "navigation", "contentinfo"];

/// Main-region candidates, most specific first
const MAIN_SELECTORS: &[&str] = &["main", "article", "[role=main]", ".content", "#content", "body"];

/// Tags that force a line break in the extracted text
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "br", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "tr", "table",
    "section", "article", "blockquote", "pre",
];

/// Nesting ceiling for the HTML serializer; exceeding it degrades the
/// record to PARTIAL instead of recursing further
const MAX_SERIALIZE_DEPTH: usize = 256;

/// Everything the scraper needs about one fetched page
#[derive(Debug, Clone)]
pub struct ScrapeInput {
    pub url: String,
    /// URL after redirects, used as the base for link resolution
    pub final_url: String,
    pub html: String,
    pub depth: u32,
    pub parent_url: Option<String>,
    pub status_code: u16,
    pub content_type: Option<String>,
    pub fetch_duration_ms: u64,
    pub crawled_at: chrono::DateTime<Utc>,
}

/// First 16 hex chars of the SHA-256 of the body text; empty input
/// yields an empty hash.
pub fn content_hash(body_text: &str) -> String {
    if body_text.is_empty() {
        return String::new();
    }
    let digest = Sha256::digest(body_text.as_bytes());
    let hex = format!("{:x}", digest);
    hex[..16].to_string()
}

fn is_removed(element: &ElementRef) -> bool {
    let value = element.value();
    let tag = value.name();
    if REMOVE_TAGS.contains(&tag) {
        return true;
    }

    if let Some(classes) = value.attr("class") {
        for token in classes.split_whitespace() {
            let token = token.to_ascii_lowercase();
            if REMOVE_CLASSES.contains(&token.as_str()) {
                return true;
            }
        }
    }

    if let Some(role) = value.attr("role") {
        if REMOVE_ROLES.contains(&role.to_ascii_lowercase().as_str()) {
            return true;
        }
    }

    false
}

/// Collapse intra-line whitespace, reduce blank-line runs to one, trim
fn normalize_text(raw: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut previous_blank = false;

    for line in raw.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            if !previous_blank && !lines.is_empty() {
                lines.push(String::new());
            }
            previous_blank = true;
        } else {
            lines.push(collapsed);
            previous_blank = false;
        }
    }

    while lines.last().map(|l| l.is_empty()).unwrap_or(false) {
        lines.pop();
    }
    lines.join("\n")
}

/// Walk an element's subtree accumulating text, skipping removed
/// elements and breaking lines at block boundaries.
fn collect_text(element: ElementRef, out: &mut String) {
    for child in element.children() {
        match child.value() {
            scraper::Node::Text(text) => out.push_str(&text.text),
            scraper::Node::Element(_) => {
                if let Some(child_ref) = ElementRef::wrap(child) {
                    if is_removed(&child_ref) {
                        continue;
                    }
                    let is_block = BLOCK_TAGS.contains(&child_ref.value().name());
                    if is_block {
                        out.push('\n');
                    }
                    collect_text(child_ref, out);
                    if is_block {
                        out.push('\n');
                    }
                }
            }
            _ => {}
        }
    }
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Serialize an element's children to HTML, skipping removed subtrees.
/// Returns false once the depth ceiling is hit.
fn serialize_children(element: ElementRef, out: &mut String, depth: usize) -> bool {
    if depth > MAX_SERIALIZE_DEPTH {
        return false;
    }

    let mut intact = true;
    for child in element.children() {
        match child.value() {
            scraper::Node::Text(text) => out.push_str(&escape_text(&text.text)),
            scraper::Node::Element(_) => {
                if let Some(child_ref) = ElementRef::wrap(child) {
                    if is_removed(&child_ref) {
                        continue;
                    }
                    let value = child_ref.value();
                    out.push('<');
                    out.push_str(value.name());
                    for (name, attr_value) in value.attrs() {
                        out.push(' ');
                        out.push_str(name);
                        out.push_str("=\"");
                        out.push_str(&attr_value.replace('"', "&quot;"));
                        out.push('"');
                    }
                    out.push('>');
                    intact &= serialize_children(child_ref, out, depth + 1);
                    out.push_str("</");
                    out.push_str(value.name());
                    out.push('>');
                }
            }
            _ => {}
        }
    }
    intact
}

/// Extract content and metadata from fetched markup. Pure and
/// CPU-bound; run it through [`scrape_blocking`] from async contexts.
pub fn scrape(input: &ScrapeInput) -> ScrapedContent {
    let document = Html::parse_document(&input.html);

    // Title
    let title_selector = Selector::parse("title").expect("static selector");
    let title = document
        .select(&title_selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .unwrap_or_default();

    // Headings in document order, skipping any that live inside a
    // removed container
    let heading_selector = Selector::parse("h1,h2,h3,h4,h5,h6").expect("static selector");
    let headings: Vec<String> = document
        .select(&heading_selector)
        .filter(|el| {
            !is_removed(el)
                && !el.ancestors().any(|ancestor| {
                    ElementRef::wrap(ancestor)
                        .map(|r| is_removed(&r))
                        .unwrap_or(false)
                })
        })
        .map(|el| {
            el.text()
                .collect::<String>()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|text| !text.is_empty())
        .collect();

    // Links from the pre-removal DOM, absolutized and deduplicated.
    // The <base href> wins over the page URL, matching browser behaviour.
    let base_selector = Selector::parse("base[href]").expect("static selector");
    let base_url = document
        .select(&base_selector)
        .next()
        .and_then(|el| el.value().attr("href"))
        .map(|href| href.to_string())
        .unwrap_or_else(|| input.final_url.clone());

    let link_selector = Selector::parse("a[href]").expect("static selector");
    let mut links: Vec<String> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for el in document.select(&link_selector) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let Ok(absolute) = url_utils::absolutize(href, &base_url) else {
            continue;
        };
        if !absolute.starts_with("http") {
            continue;
        }
        let normalized = url_utils::normalize_url(&absolute);
        if seen.insert(normalized.clone()) {
            links.push(normalized);
        }
    }

    // Main content region, first selector that matches
    let main_region = MAIN_SELECTORS.iter().find_map(|selector_str| {
        let selector = Selector::parse(selector_str).ok()?;
        document.select(&selector).next()
    });

    let (body_text, cleaned_html, serializer_intact) = match main_region {
        Some(region) => {
            let mut raw_text = String::new();
            collect_text(region, &mut raw_text);

            let mut html = String::new();
            let intact = serialize_children(region, &mut html, 0);
            (normalize_text(&raw_text), html, intact)
        }
        None => (String::new(), String::new(), true),
    };

    let word_count = body_text.split_whitespace().count();
    let language = if body_text.is_empty() {
        "unknown".to_string()
    } else {
        detect_language(&body_text)
    };
    let hash = content_hash(&body_text);

    let (status, error_message) = if serializer_intact {
        (ScrapeStatus::Success, None)
    } else {
        (
            ScrapeStatus::Partial,
            Some("content region exceeded nesting limit, cleaned HTML truncated".to_string()),
        )
    };

    ScrapedContent {
        url: input.url.clone(),
        title,
        headings,
        body_text,
        links,
        cleaned_html,
        metadata: ScrapeMetadata {
            crawled_at: input.crawled_at,
            scraped_at: Utc::now(),
            fetch_duration_ms: input.fetch_duration_ms,
            depth: input.depth,
            parent_url: input.parent_url.clone(),
            status_code: input.status_code,
            content_type: input.content_type.clone(),
            word_count,
            language,
            content_hash: hash,
            status,
            error_message,
        },
    }
}

/// Run the scraper on the blocking thread pool
pub async fn scrape_blocking(input: ScrapeInput) -> ScrapedContent {
    let url = input.url.clone();
    let depth = input.depth;
    let parent = input.parent_url.clone();
    match tokio::task::spawn_blocking(move || scrape(&input)).await {
        Ok(content) => content,
        Err(e) => ScrapedContent::failed(url, depth, parent, format!("scrape task failed: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(html: &str) -> ScrapeInput {
        ScrapeInput {
            url: "https://ex.com/page".to_string(),
            final_url: "https://ex.com/page".to_string(),
            html: html.to_string(),
            depth: 1,
            parent_url: Some("https://ex.com/".to_string()),
            status_code: 200,
            content_type: Some("text/html".to_string()),
            fetch_duration_ms: 5,
            crawled_at: Utc::now(),
        }
    }

    const PAGE: &str = r#"<html><head><title>  Test Page  </title></head>
        <body>
          <nav><a href="/nav-link">Nav</a></nav>
          <main>
            <h1>Welcome</h1>
            <p>The quick brown   fox jumps over the lazy dog.</p>
            <script>var x = 1;</script>
            <div class="sidebar">ignore me</div>
            <p>Second    paragraph with the usual words in it.</p>
            <a href="/about">About</a>
            <a href="https://other.org/x">Other</a>
            <a href="/about">About again</a>
            <a href="mailto:a@b.c">Mail</a>
          </main>
          <footer>footer text</footer>
          <h2>Trailing heading</h2>
        </body></html>"#;

    #[test]
    fn test_title_and_headings() {
        let content = scrape(&input(PAGE));
        assert_eq!(content.title, "Test Page");
        assert_eq!(content.headings, vec!["Welcome", "Trailing heading"]);
    }

    #[test]
    fn test_headings_inside_removed_containers_excluded() {
        let html = r#"<html><body><nav><h2>Menu</h2></nav>
            <main><h1>Real</h1></main></body></html>"#;
        let content = scrape(&input(html));
        assert_eq!(content.headings, vec!["Real"]);
    }

    #[test]
    fn test_links_absolutized_and_deduplicated() {
        let content = scrape(&input(PAGE));
        assert!(content.links.contains(&"https://ex.com/about".to_string()));
        assert!(content.links.contains(&"https://other.org/x".to_string()));
        // nav link comes from the pre-removal DOM
        assert!(content.links.contains(&"https://ex.com/nav-link".to_string()));
        // mailto filtered, duplicate /about collapsed
        assert_eq!(
            content.links.iter().filter(|l| l.ends_with("/about")).count(),
            1
        );
        assert!(!content.links.iter().any(|l| l.starts_with("mailto")));
    }

    #[test]
    fn test_body_text_excludes_removed_elements() {
        let content = scrape(&input(PAGE));
        assert!(content.body_text.contains("quick brown fox"));
        assert!(!content.body_text.contains("var x"));
        assert!(!content.body_text.contains("ignore me"));
        assert!(!content.body_text.contains("footer text"));
        // Whitespace collapsed
        assert!(!content.body_text.contains("   "));
    }

    #[test]
    fn test_cleaned_html_skips_boilerplate() {
        let content = scrape(&input(PAGE));
        assert!(content.cleaned_html.contains("<h1>"));
        assert!(!content.cleaned_html.contains("<script"));
        assert!(!content.cleaned_html.contains("sidebar"));
    }

    #[test]
    fn test_word_count_and_language() {
        let content = scrape(&input(PAGE));
        assert!(content.metadata.word_count > 10);
        assert_eq!(content.metadata.language, "en");
        assert_eq!(content.metadata.status, ScrapeStatus::Success);
    }

    #[test]
    fn test_content_hash_prefix() {
        let hash = content_hash("hello");
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(content_hash(""), "");
        // Deterministic
        assert_eq!(content_hash("hello"), content_hash("hello"));
    }

    #[test]
    fn test_main_region_priority() {
        let html = r#"<html><body>
            <div id="content">fallback region</div>
            <article>article text here</article>
        </body></html>"#;
        let content = scrape(&input(html));
        // <article> outranks #content
        assert!(content.body_text.contains("article text"));
        assert!(!content.body_text.contains("fallback region"));
    }

    #[test]
    fn test_body_fallback_when_no_region_matches() {
        let html = "<html><body><p>just a paragraph</p></body></html>";
        let content = scrape(&input(html));
        assert!(content.body_text.contains("just a paragraph"));
    }

    #[test]
    fn test_role_removal() {
        let html = r#"<html><body><main>
            <div role="navigation">skip nav</div>
            <div role="Banner">skip banner</div>
            <p>keep this</p>
        </main></body></html>"#;
        let content = scrape(&input(html));
        assert!(!content.body_text.contains("skip nav"));
        assert!(!content.body_text.contains("skip banner"));
        assert!(content.body_text.contains("keep this"));
    }

    #[test]
    fn test_base_href_wins_for_links() {
        let html = r#"<html><head><base href="https://cdn.ex.com/root/"></head>
            <body><main><a href="page">rel</a></main></body></html>"#;
        let content = scrape(&input(html));
        assert_eq!(content.links, vec!["https://cdn.ex.com/root/page"]);
    }

    #[test]
    fn test_empty_body_yields_unknown_language_and_empty_hash() {
        let html = "<html><body><main><script>x</script></main></body></html>";
        let content = scrape(&input(html));
        assert_eq!(content.metadata.word_count, 0);
        assert_eq!(content.metadata.language, "unknown");
        assert_eq!(content.metadata.content_hash, "");
    }

    #[tokio::test]
    async fn test_scrape_blocking_wrapper() {
        let content = scrape_blocking(input(PAGE)).await;
        assert_eq!(content.title, "Test Page");
    }
}
