use knowbase::crawl::content::{content_hash, extract};
use knowbase::crawl::links::extract_links;
use std::collections::HashSet;
use url::Url;

fn page(body: &str) -> String {
    format!(
        r#"<html><head><title>Help Center</title></head><body><nav><a href="/account">Account</a></nav><main>{body}</main></body></html>"#
    )
}

#[test]
fn recrawling_identical_content_does_not_register_as_changed() {
    let html = page("<p>Our refund policy allows returns within 30 days.</p>");
    let first = content_hash(&extract(&html).text);
    let second = content_hash(&extract(&html).text);
    assert_eq!(first, second);
}

#[test]
fn edited_page_content_hashes_differently() {
    let before = page("<p>Our refund policy allows returns within 30 days.</p>");
    let after = page("<p>Our refund policy allows returns within 60 days.</p>");
    assert_ne!(content_hash(&extract(&before).text), content_hash(&extract(&after).text));
}

#[test]
fn nav_chrome_never_pollutes_extracted_text() {
    let html = page("<p>How to reset your password.</p>");
    let content = extract(&html);
    assert!(!content.text.contains("Account"));
    assert!(content.text.contains("reset your password"));
}

#[test]
fn crawl_frontier_expansion_follows_in_host_links_only() {
    let html = r#"
        <a href="/help/shipping">Shipping</a>
        <a href="https://other-domain.example/page">External</a>
        <a href="/assets/logo.png">Logo</a>
    "#;
    let base = Url::parse("https://example.com/help/").unwrap();
    let mut allowed = HashSet::new();
    allowed.insert("example.com".to_string());

    let links = extract_links(html, &base, &allowed);
    assert_eq!(links, vec!["https://example.com/help/shipping"]);
}
