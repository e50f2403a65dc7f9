//! Content extraction (design §4.10): strips chrome out of a fetched page and
//! keeps the readable body plus enough metadata (title, canonical URL, OG
//! tags) to decide whether a re-crawled page actually changed.

use scraper::{ElementRef, Html, Node, Selector};

const NOISE_TAGS: &[&str] = &["script", "style", "nav", "footer", "header", "aside", "iframe", "noscript"];

#[derive(Debug, Clone, Default)]
pub struct PageContent {
    pub title: Option<String>,
    pub canonical_url: Option<String>,
    pub meta_description: Option<String>,
    pub og_title: Option<String>,
    pub text: String,
}

fn select_one(document: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    document.select(&sel).next().map(|el| el.text().collect::<Vec<_>>().join(" ").trim().to_string())
}

fn attr(document: &Html, selector: &str, attr_name: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    document.select(&sel).next().and_then(|el| el.value().attr(attr_name)).map(|s| s.to_string())
}

/// Text of every node under `root`, skipping anything nested inside a
/// `NOISE_TAGS` element (script bodies, nav chrome, etc.) without needing to
/// mutate the tree.
fn visible_text(root: ElementRef) -> String {
    let mut out = String::new();
    for node in root.descendants() {
        let Node::Text(text) = node.value() else { continue };
        let inside_noise = node
            .ancestors()
            .filter_map(|a| a.value().as_element())
            .any(|el| NOISE_TAGS.contains(&el.name()));
        if !inside_noise {
            out.push_str(text);
            out.push(' ');
        }
    }
    out
}

/// Prefers `<main>`, then `<article>`, then `<body>`, so navigation-heavy
/// templates don't drown out the actual content.
fn main_content_text(document: &Html) -> String {
    for selector in ["main", "article", "body"] {
        let Ok(sel) = Selector::parse(selector) else { continue };
        if let Some(el) = document.select(&sel).next() {
            let text = visible_text(el);
            if !text.trim().is_empty() {
                return text;
            }
        }
    }
    String::new()
}

/// Parses `html` and returns the readable content, with script/style/nav/
/// footer/header/aside/iframe/noscript subtrees excluded, plus identifying
/// metadata used downstream for change detection.
pub fn extract(html: &str) -> PageContent {
    let document = Html::parse_document(html);
    let raw_text = main_content_text(&document);
    let collapsed = raw_text.split_whitespace().collect::<Vec<_>>().join(" ");

    PageContent {
        title: select_one(&document, "title"),
        canonical_url: attr(&document, "link[rel=canonical]", "href"),
        meta_description: attr(&document, "meta[name=description]", "content"),
        og_title: attr(&document, "meta[property='og:title']", "content"),
        text: collapsed,
    }
}

/// SHA-256 over the cleaned text, used to classify a re-crawled page as
/// new/changed/removed/unchanged against its previously stored hash.
pub fn content_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_title_and_body_text() {
        let html = r#"<html><head><title>Help Center</title>
            <meta name="description" content="Support articles">
            <link rel="canonical" href="https://example.com/help">
            </head><body><nav>menu</nav><main><p>How to reset your password.</p></main></body></html>"#;
        let content = extract(html);
        assert_eq!(content.title.as_deref(), Some("Help Center"));
        assert_eq!(content.canonical_url.as_deref(), Some("https://example.com/help"));
        assert_eq!(content.meta_description.as_deref(), Some("Support articles"));
        assert!(content.text.contains("reset your password"));
    }

    #[test]
    fn identical_text_hashes_identically() {
        assert_eq!(content_hash("hello world"), content_hash("hello world"));
        assert_ne!(content_hash("hello world"), content_hash("goodbye world"));
    }
}
