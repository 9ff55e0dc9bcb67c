//! Frontier expansion: extracting follow-up links from fetched pages
//!
//! Given a page and the depth it was found at, produce the absolute URLs
//! the crawl should consider next, filtered by the recursion policy.

use scraper::{Html, Selector};
use url::Url;

/// Recursion policy applied while extracting links
#[derive(Debug, Clone, Default)]
pub struct LinkPolicy {
    /// Maximum recursion depth; pages deeper than this emit no links
    pub level: u32,

    /// Follow links onto other hosts
    pub span_hosts: bool,

    /// Also collect `src=` attributes (images, scripts, media)
    pub search_src: bool,
}

/// Extracts the candidate frontier links from an HTML page
///
/// Relative hrefs are resolved against `base_url` and fragments are
/// stripped. Unless `span_hosts` is set, only links whose hostname
/// matches the page's hostname (ports ignored) are kept. Unparseable
/// base URLs and non-HTML content yield an empty list rather than an
/// error; a page that cannot be expanded is not a crawl failure.
///
/// # Arguments
///
/// * `base_url` - The URL the content was fetched from
/// * `content` - The page body
/// * `current_depth` - How many hops from the seed this page is
/// * `policy` - The recursion policy in effect
pub fn extract_links(
    base_url: &str,
    content: &str,
    current_depth: u32,
    policy: &LinkPolicy,
) -> Vec<String> {
    if current_depth > policy.level {
        return Vec::new();
    }

    let Ok(base) = Url::parse(base_url) else {
        return Vec::new();
    };

    let document = Html::parse_document(content);
    let mut links = Vec::new();

    if let Ok(selector) = Selector::parse("a[href]") {
        for element in document.select(&selector) {
            if let Some(href) = element.value().attr("href") {
                if let Some(absolute) = resolve_link(href, &base, policy) {
                    links.push(absolute);
                }
            }
        }
    }

    if policy.search_src {
        if let Ok(selector) = Selector::parse("[src]") {
            for element in document.select(&selector) {
                if let Some(src) = element.value().attr("src") {
                    if let Some(absolute) = resolve_link(src, &base, policy) {
                        links.push(absolute);
                    }
                }
            }
        }
    }

    links
}

/// Resolves one href/src to an absolute URL, or rejects it
///
/// Returns None for `javascript:` and other non-HTTP schemes,
/// fragment-only anchors, and off-host links when not spanning hosts.
fn resolve_link(href: &str, base: &Url, policy: &LinkPolicy) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    if href.starts_with("javascript:") {
        return None;
    }

    let mut absolute = base.join(href).ok()?;
    if absolute.scheme() != "http" && absolute.scheme() != "https" {
        return None;
    }

    if !policy.span_hosts {
        // Hostname comparison only; a different port is still in scope
        if absolute.host_str() != base.host_str() {
            return None;
        }
    }

    absolute.set_fragment(None);
    Some(absolute.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(level: u32) -> LinkPolicy {
        LinkPolicy {
            level,
            ..Default::default()
        }
    }

    #[test]
    fn test_relative_links_resolve_against_base() {
        let html = r#"<html><body><a href="/next">Next</a></body></html>"#;
        let links = extract_links("http://example.com/start", html, 0, &policy(1));
        assert_eq!(links, vec!["http://example.com/next"]);
    }

    #[test]
    fn test_depth_past_level_emits_nothing() {
        let html = r#"<html><body><a href="/next">Next</a></body></html>"#;
        assert!(extract_links("http://example.com/", html, 2, &policy(1)).is_empty());
        // At the level boundary links still flow
        assert_eq!(
            extract_links("http://example.com/", html, 1, &policy(1)).len(),
            1
        );
    }

    #[test]
    fn test_off_host_links_filtered_unless_spanning() {
        let html = r#"
            <html><body>
                <a href="http://example.com/in-scope">a</a>
                <a href="http://elsewhere.com/out">b</a>
            </body></html>
        "#;
        let scoped = extract_links("http://example.com/", html, 0, &policy(1));
        assert_eq!(scoped, vec!["http://example.com/in-scope"]);

        let spanning = extract_links(
            "http://example.com/",
            html,
            0,
            &LinkPolicy {
                level: 1,
                span_hosts: true,
                search_src: false,
            },
        );
        assert_eq!(spanning.len(), 2);
    }

    #[test]
    fn test_port_difference_stays_in_scope() {
        let html = r#"<html><body><a href="http://example.com:8080/alt">a</a></body></html>"#;
        let links = extract_links("http://example.com/", html, 0, &policy(1));
        assert_eq!(links, vec!["http://example.com:8080/alt"]);
    }

    #[test]
    fn test_javascript_and_fragments_rejected() {
        let html = r##"
            <html><body>
                <a href="javascript:void(0)">js</a>
                <a href="#top">anchor</a>
                <a href="/page#section">mixed</a>
            </body></html>
        "##;
        let links = extract_links("http://example.com/", html, 0, &policy(1));
        assert_eq!(links, vec!["http://example.com/page"]);
    }

    #[test]
    fn test_src_attributes_only_when_requested() {
        let html = r#"
            <html><body>
                <a href="/linked">a</a>
                <img src="/image.png">
            </body></html>
        "#;
        let without = extract_links("http://example.com/", html, 0, &policy(1));
        assert_eq!(without, vec!["http://example.com/linked"]);

        let with = extract_links(
            "http://example.com/",
            html,
            0,
            &LinkPolicy {
                level: 1,
                span_hosts: false,
                search_src: true,
            },
        );
        assert_eq!(
            with,
            vec!["http://example.com/linked", "http://example.com/image.png"]
        );
    }

    #[test]
    fn test_unparseable_base_yields_empty() {
        let html = r#"<html><body><a href="/next">Next</a></body></html>"#;
        assert!(extract_links("not a url", html, 0, &policy(1)).is_empty());
    }

    #[test]
    fn test_non_html_yields_empty() {
        assert!(extract_links("http://example.com/", "{\"json\": true}", 0, &policy(1)).is_empty());
    }
}
