//! Link extraction and filtering (design §4.10): walks anchor tags, resolves
//! them against the page URL, and keeps only links worth following.

use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

const BINARY_EXTENSIONS: &[&str] = &[
    ".pdf", ".zip", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".mp4", ".mp3", ".css", ".js", ".woff", ".woff2",
];

const NOISY_QUERY_PARAMS: &[&str] = &["utm_source", "utm_medium", "utm_campaign", "sessionid", "fbclid", "gclid"];

/// Extracts `<a href>` targets from `html`, resolves them against `base_url`,
/// and filters to http(s) links on `allowed_hosts`, excluding admin paths,
/// binary extensions and noisy tracking-only query strings. Fragments are
/// stripped (they never produce a distinct page); real query strings are
/// preserved.
pub fn extract_links(html: &str, base_url: &Url, allowed_hosts: &HashSet<String>) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else { continue };
        let Ok(mut resolved) = base_url.join(href) else { continue };
        resolved.set_fragment(None);

        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }
        let Some(host) = resolved.host_str() else { continue };
        if !allowed_hosts.is_empty() && !allowed_hosts.contains(host) {
            continue;
        }
        if is_binary_path(resolved.path()) || is_admin_path(resolved.path()) {
            continue;
        }

        strip_noisy_query_params(&mut resolved);
        let normalized = resolved.to_string();
        if seen.insert(normalized.clone()) {
            out.push(normalized);
        }
    }
    out
}

fn is_binary_path(path: &str) -> bool {
    let lowered = path.to_lowercase();
    BINARY_EXTENSIONS.iter().any(|ext| lowered.ends_with(ext))
}

fn is_admin_path(path: &str) -> bool {
    let lowered = path.to_lowercase();
    lowered.contains("/wp-admin") || lowered.contains("/wp-login") || lowered.contains("/admin/")
}

fn strip_noisy_query_params(url: &mut Url) {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !NOISY_QUERY_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        let query = kept.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&");
        url.set_query(Some(&query));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/help/").unwrap()
    }

    #[test]
    fn resolves_relative_links_and_drops_fragments() {
        let html = r#"<a href="/help/faq#section-2">FAQ</a>"#;
        let links = extract_links(html, &base(), &HashSet::new());
        assert_eq!(links, vec!["https://example.com/help/faq"]);
    }

    #[test]
    fn filters_binary_and_admin_paths() {
        let html = r#"<a href="/file.pdf">PDF</a><a href="/wp-admin/edit">Edit</a><a href="/help/guide">Guide</a>"#;
        let links = extract_links(html, &base(), &HashSet::new());
        assert_eq!(links, vec!["https://example.com/help/guide"]);
    }

    #[test]
    fn strips_tracking_params_but_keeps_real_query() {
        let html = r#"<a href="/search?q=refunds&utm_source=newsletter">Search</a>"#;
        let links = extract_links(html, &base(), &HashSet::new());
        assert_eq!(links, vec!["https://example.com/search?q=refunds"]);
    }

    #[test]
    fn restricts_to_allowed_hosts() {
        let html = r#"<a href="https://other.com/page">Other</a><a href="/local">Local</a>"#;
        let mut allowed = HashSet::new();
        allowed.insert("example.com".to_string());
        let links = extract_links(html, &base(), &allowed);
        assert_eq!(links, vec!["https://example.com/local"]);
    }
}
