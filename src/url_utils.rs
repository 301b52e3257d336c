//! URL helper functions used throughout the crawler

use url::Url;

/// Extract the host portion of a URL, lower-cased
pub fn extract_host(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|s| s.to_ascii_lowercase()))
}

/// Check whether two hosts match, including subdomain variants in either direction
pub fn is_same_or_subdomain(host: &str, base_host: &str) -> bool {
    host == base_host
        || host.ends_with(&format!(".{}", base_host))
        || base_host.ends_with(&format!(".{}", host))
}

/// Resolve a link against the provided base URL
pub fn absolutize(link: &str, base_url: &str) -> Result<String, String> {
    let base = Url::parse(base_url).map_err(|e| e.to_string())?;
    let absolute = base.join(link).map_err(|e| e.to_string())?;
    Ok(absolute.to_string())
}

/// Remove the fragment portion from a URL
pub fn normalize_url(url: &str) -> String {
    if let Ok(mut parsed) = Url::parse(url) {
        parsed.set_fragment(None);
        parsed.to_string()
    } else {
        url.to_string()
    }
}

/// Path plus query string, as evaluated against robots.txt rules
pub fn path_and_query(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => {
            let mut s = parsed.path().to_string();
            if let Some(q) = parsed.query() {
                s.push('?');
                s.push_str(q);
            }
            if s.is_empty() {
                s.push('/');
            }
            s
        }
        Err(_) => "/".to_string(),
    }
}

/// Build the robots.txt URL for the given page URL
pub fn robots_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let scheme = parsed.scheme();
    let host = parsed.host_str()?;
    Some(format!("{}://{}/robots.txt", scheme, host))
}

/// First `;`-delimited token of a Content-Type header, trimmed and lower-cased
pub fn content_type_token(header: &str) -> String {
    header
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Check if a content type represents HTML
pub fn is_html_content_type(content_type: &str) -> bool {
    let token = content_type_token(content_type);
    token == "text/html" || token == "application/xhtml+xml"
}

/// Sanitize a host for use as a cache file name.
/// Any character outside `[A-Za-z0-9.-]` becomes `_`.
pub fn sanitize_host(host: &str) -> String {
    host.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Normalize CLI input by adding https:// when no scheme is provided
pub fn normalize_url_for_cli(url: &str) -> String {
    let trimmed = url.trim();

    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return trimmed.to_string();
    }

    format!("https://{}", trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_host() {
        assert_eq!(
            extract_host("https://Example.COM/path"),
            Some("example.com".to_string())
        );
        assert_eq!(extract_host("invalid"), None);
    }

    #[test]
    fn test_is_same_or_subdomain() {
        assert!(is_same_or_subdomain("test.local", "test.local"));
        assert!(is_same_or_subdomain("www.test.local", "test.local"));
        assert!(is_same_or_subdomain("test.local", "www.test.local"));
        assert!(!is_same_or_subdomain("other.local", "test.local"));
    }

    #[test]
    fn test_absolutize() {
        assert_eq!(
            absolutize("/page1", "https://test.local/foo").unwrap(),
            "https://test.local/page1"
        );
        assert_eq!(
            absolutize("page1", "https://test.local/foo/").unwrap(),
            "https://test.local/foo/page1"
        );
        assert_eq!(
            absolutize("https://other.local/page", "https://test.local").unwrap(),
            "https://other.local/page"
        );
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("https://example.com/page#section"),
            "https://example.com/page"
        );
    }

    #[test]
    fn test_path_and_query() {
        assert_eq!(path_and_query("https://ex.com/a/b?x=1"), "/a/b?x=1");
        assert_eq!(path_and_query("https://ex.com"), "/");
    }

    #[test]
    fn test_robots_url() {
        assert_eq!(
            robots_url("https://example.com/some/path"),
            Some("https://example.com/robots.txt".to_string())
        );
    }

    #[test]
    fn test_content_type_token() {
        assert_eq!(content_type_token("text/html; charset=utf-8"), "text/html");
        assert_eq!(content_type_token("TEXT/HTML"), "text/html");
    }

    #[test]
    fn test_is_html_content_type() {
        assert!(is_html_content_type("text/html"));
        assert!(is_html_content_type("text/html; charset=utf-8"));
        assert!(is_html_content_type("application/xhtml+xml"));
        assert!(!is_html_content_type("application/json"));
    }

    #[test]
    fn test_sanitize_host() {
        assert_eq!(sanitize_host("www.example.com"), "www.example.com");
        assert_eq!(sanitize_host("host:8080"), "host_8080");
    }
}
