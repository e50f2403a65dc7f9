use knowbase::chunker::{chunk, chunk_hierarchical, detect_content_type};
use knowbase::model::{ChunkType, ContentType};

#[test]
fn detects_faq_before_documentation_or_code() {
    let text = "Q: How do I reset my password?\nA: Click forgot password on the login page.\n\nQ: How do I cancel?\nA: Visit account settings.";
    assert_eq!(detect_content_type(text, None), ContentType::Faq);
}

#[test]
fn file_type_hint_overrides_sniffing() {
    let text = "some ordinary prose about a refund policy that goes on for a while.";
    assert_eq!(detect_content_type(text, Some("notes.py")), ContentType::Code);
}

#[test]
fn chunking_a_faq_document_yields_faq_chunks() {
    let text = "Q: How do I reset my password?\nA: Click forgot password on the login page.\n\nQ: How do I cancel my plan?\nA: Go to account settings and choose cancel.";
    let chunks = chunk(text, Some("faq.md"), true);
    assert!(!chunks.is_empty());
    assert!(chunks.iter().any(|c| c.chunk_type == ChunkType::Faq));
}

#[test]
fn chunking_respects_a_size_ceiling_regardless_of_content_type() {
    let paragraph = "word ".repeat(2000);
    let chunks = chunk(&paragraph, None, true);
    assert!(chunks.len() > 1);
    assert!(chunks.iter().all(|c| c.content.len() <= 2000));
}

#[test]
fn empty_input_produces_no_chunks() {
    assert!(chunk("", None, true).is_empty());
    assert!(chunk_hierarchical("").is_empty());
}

#[test]
fn hierarchical_chunking_links_children_to_a_parent_index() {
    let text = "# Introduction\n\nThis section explains onboarding.\n\n# Billing\n\nThis section explains billing and refunds and covers a lot of detail across several sentences so that it gets split into smaller child chunks once it is processed hierarchically.";
    let chunks = chunk_hierarchical(text);
    assert!(!chunks.is_empty());
    let has_linked_child = chunks.iter().any(|c| c.metadata.parent_index.is_some());
    assert!(has_linked_child, "expected at least one child chunk carrying a parent_index");
}
