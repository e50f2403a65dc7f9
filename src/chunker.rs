//! Content-aware chunker (design §4.1). Detects a content type, selects a
//! chunk-size/overlap/separator-ladder configuration for it, and recursively
//! splits while trying hard not to cut through headings, lists or tables.

use crate::config::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
use crate::model::{ChunkMetadata, ChunkType, ContentType};
use regex::Regex;
use std::sync::OnceLock;

#[derive(Clone, Debug)]
pub struct TypedChunk {
    pub index: usize,
    pub content: String,
    pub content_type: ContentType,
    pub chunk_type: ChunkType,
    pub metadata: ChunkMetadata,
}

struct ChunkConfig {
    size: usize,
    overlap: usize,
    separators: &'static [&'static str],
}

fn config_for(content_type: ContentType) -> ChunkConfig {
    match content_type {
        ContentType::Documentation => ChunkConfig {
            size: 600,
            overlap: 80,
            separators: &["\n## ", "\n### ", "\n\n", "\n", ". ", " ", ""],
        },
        ContentType::Code => ChunkConfig {
            size: 800,
            overlap: 100,
            separators: &["\nclass ", "\ndef ", "\nfunction ", "\n\n", "\n", " ", ""],
        },
        ContentType::Tabular => ChunkConfig {
            size: 400,
            overlap: 0,
            separators: &["\n\n", "\n", " ", ""],
        },
        ContentType::Faq => ChunkConfig {
            size: 500,
            overlap: 50,
            separators: &["\n\n", "\n", ". ", " ", ""],
        },
        ContentType::Narrative => ChunkConfig {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
            separators: &["\n\n", "\n", ". ", "! ", "? ", " ", ""],
        },
        ContentType::General => ChunkConfig {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
            separators: &["\n\n", "\n", ". ", " ", ""],
        },
    }
}

fn regexes() -> &'static ChunkerRegexes {
    static CELL: OnceLock<ChunkerRegexes> = OnceLock::new();
    CELL.get_or_init(ChunkerRegexes::new)
}

struct ChunkerRegexes {
    heading: Regex,
    instructions: Regex,
    list_item: Regex,
    code_fence: Regex,
    code_keyword: Regex,
    faq_marker: Regex,
    faq_pair: Regex,
    all_caps_line: Regex,
}

impl ChunkerRegexes {
    fn new() -> Self {
        Self {
            heading: Regex::new(r"(?m)^#+\s").unwrap(),
            instructions: Regex::new(r"(?m)^\s*\d+[\.\)]\s").unwrap(),
            list_item: Regex::new(r"(?m)^\s*[-*+]\s").unwrap(),
            code_fence: Regex::new(r"```").unwrap(),
            code_keyword: Regex::new(r"\b(def|function|class|import|const|let|var|return|public|private)\b").unwrap(),
            faq_marker: Regex::new(r"(?im)^\s*(Q:|Question:)").unwrap(),
            faq_pair: Regex::new(r"(?is)(Q:|Question:)\s*(.+?)\s*(A:|Answer:)\s*(.+?)(?=(Q:|Question:)|$)").unwrap(),
            all_caps_line: Regex::new(r"(?m)^[A-Z][A-Z \t]{3,}$").unwrap(),
        }
    }
}

/// Decision order per the content-type detection rules: FAQ > code > tabular >
/// documentation > narrative > general.
pub fn detect_content_type(text: &str, file_type_hint: Option<&str>) -> ContentType {
    if let Some(hint) = file_type_hint {
        let hint = hint.to_lowercase();
        if hint.ends_with(".csv") || hint.ends_with(".xlsx") || hint.ends_with(".xls") {
            return ContentType::Tabular;
        }
        if [".py", ".js", ".ts", ".go", ".rs", ".java", ".php", ".c", ".cpp"]
            .iter()
            .any(|ext| hint.ends_with(ext))
        {
            return ContentType::Code;
        }
        if hint.ends_with(".md") || hint.ends_with(".rst") {
            return ContentType::Documentation;
        }
    }

    let re = regexes();
    let faq_markers = re.faq_marker.find_iter(text).count();
    let qa_pairs = re.faq_pair.find_iter(text).count();
    if faq_markers >= 2 || qa_pairs >= 3 {
        return ContentType::Faq;
    }

    let code_fences = re.code_fence.find_iter(text).count();
    let code_keywords = re.code_keyword.find_iter(text).count();
    let code_score = code_fences * 3 + code_keywords;
    if code_score > 5 {
        return ContentType::Code;
    }

    let pipes = text.matches('|').count();
    let tab_runs = text.matches('\t').count();
    if pipes + tab_runs > 5 {
        return ContentType::Tabular;
    }

    let headings = re.heading.find_iter(text).count();
    let lists = re.list_item.find_iter(text).count();
    if headings > 0 && lists > 0 {
        return ContentType::Documentation;
    }
    if headings >= 2 {
        return ContentType::Documentation;
    }

    let paragraphs: Vec<&str> = text.split("\n\n").filter(|p| !p.trim().is_empty()).collect();
    if !paragraphs.is_empty() {
        let mean_paragraph_len: f64 =
            paragraphs.iter().map(|p| p.len() as f64).sum::<f64>() / paragraphs.len() as f64;
        let sentences: Vec<&str> = text.split(['.', '!', '?']).filter(|s| !s.trim().is_empty()).collect();
        let mean_sentence_len: f64 = if sentences.is_empty() {
            0.0
        } else {
            sentences.iter().map(|s| s.len() as f64).sum::<f64>() / sentences.len() as f64
        };
        if mean_paragraph_len > 400.0 && mean_sentence_len > 80.0 {
            return ContentType::Narrative;
        }
    }

    ContentType::General
}

/// Tags the fine-grained, open-set classification a chunk's content looks like;
/// the caller maps this onto the closed [`ChunkType`] enum and keeps the raw
/// label as `original_chunk_type` metadata for downstream boosting.
fn classify_original(content: &str) -> (&'static str, ChunkType) {
    let re = regexes();
    if re.instructions.is_match(content) {
        return ("instructions", ChunkType::Text);
    }
    if re.heading.is_match(content) || content.starts_with("## Page") {
        return ("heading", ChunkType::Heading);
    }
    if re.faq_marker.is_match(content) && content.to_lowercase().contains('a') {
        return ("faq", ChunkType::Faq);
    }
    if content.matches('|').count() > 3 {
        return ("table", ChunkType::Table);
    }
    if re.code_fence.is_match(content) || re.code_keyword.find_iter(content).count() >= 3 {
        return ("code", ChunkType::Code);
    }
    if re.list_item.is_match(content) {
        return ("list", ChunkType::Text);
    }
    ("text", ChunkType::Text)
}

fn build_metadata(content: &str, original_chunk_type: &'static str) -> ChunkMetadata {
    let re = regexes();
    ChunkMetadata {
        char_count: content.chars().count(),
        word_count: content.split_whitespace().count(),
        has_code: re.code_fence.is_match(content) || re.code_keyword.is_match(content),
        has_list: re.list_item.is_match(content),
        has_table: content.matches('|').count() > 3,
        has_heading: re.heading.is_match(content),
        has_steps: re.instructions.is_match(content),
        original_chunk_type: original_chunk_type.to_string(),
        parent_index: None,
        extra: Default::default(),
    }
}

/// Protects list runs and ALL-CAPS headers from the separator ladder by
/// surrounding them with blank lines so they are never split mid-run.
fn protect_boundaries(text: &str) -> String {
    let re = regexes();
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let is_boundary = re.list_item.is_match(line) || re.all_caps_line.is_match(line);
        if is_boundary && !out.ends_with("\n\n") && !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

fn split_once_by_separator<'a>(text: &'a str, separators: &[&str]) -> Vec<&'a str> {
    for sep in separators {
        if sep.is_empty() {
            return text.split("").filter(|s| !s.is_empty()).collect();
        }
        if text.contains(sep) {
            return text.split(sep).filter(|s| !s.trim().is_empty()).collect();
        }
    }
    vec![text]
}

/// The recursive-character splitter: tries each separator from strongest to
/// weakest, merging adjacent pieces up to `size` and overlapping by `overlap`.
fn recursive_split(text: &str, size: usize, overlap: usize, separators: &[&str]) -> Vec<String> {
    if text.chars().count() <= size {
        return vec![text.to_string()];
    }

    let pieces = split_once_by_separator(text, separators);
    if pieces.len() <= 1 && !separators.is_empty() {
        return recursive_split(text, size, overlap, &separators[1.min(separators.len() - 1)..]);
    }

    let mut windows: Vec<String> = Vec::new();
    let mut current = String::new();
    for piece in &pieces {
        if piece.chars().count() > size {
            if !current.is_empty() {
                windows.push(std::mem::take(&mut current));
            }
            windows.extend(recursive_split(piece, size, overlap, &separators[1.min(separators.len().saturating_sub(1))..]));
            continue;
        }
        if current.chars().count() + piece.chars().count() > size && !current.is_empty() {
            windows.push(current.clone());
            if overlap > 0 {
                let keep: String = current.chars().rev().take(overlap).collect::<Vec<_>>().into_iter().rev().collect();
                current = keep;
            } else {
                current.clear();
            }
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(piece);
    }
    if !current.trim().is_empty() {
        windows.push(current);
    }
    windows
}

fn faq_pairs(text: &str) -> Vec<String> {
    let re = regexes();
    re.faq_pair
        .captures_iter(text)
        .map(|c| format!("Q: {}\nA: {}", c[2].trim(), c[4].trim()))
        .collect()
}

/// Splits documentation text on markdown headers first, prefixing each
/// section's children with the header path so context survives chunking.
fn header_split(text: &str, cfg: &ChunkConfig) -> Vec<String> {
    let header_re = Regex::new(r"(?m)^(#{1,6})\s+(.+)$").unwrap();

    let header_positions: Vec<(usize, usize, String)> = header_re
        .captures_iter(text)
        .map(|c| {
            let m = c.get(0).unwrap();
            (m.start(), c[1].len(), c[2].trim().to_string())
        })
        .collect();

    if header_positions.is_empty() {
        return recursive_split(text, cfg.size, cfg.overlap, cfg.separators);
    }

    let mut sections: Vec<(String, String)> = Vec::new();
    let mut path: Vec<String> = Vec::new();

    if header_positions[0].0 > 0 {
        let preamble = &text[0..header_positions[0].0];
        if !preamble.trim().is_empty() {
            sections.push((String::new(), preamble.to_string()));
        }
    }

    for (i, (start, level, title)) in header_positions.iter().enumerate() {
        let end = header_positions.get(i + 1).map(|n| n.0).unwrap_or(text.len());
        path.truncate(level.saturating_sub(1));
        path.push(title.clone());
        let prefix = path.join(" > ");
        let body = &text[*start..end];
        sections.push((prefix, body.to_string()));
    }

    let mut out = Vec::new();
    for (prefix, section) in sections {
        if section.chars().count() <= cfg.size {
            out.push(section);
        } else {
            let re_split = recursive_split(&section, cfg.size, cfg.overlap, cfg.separators);
            for (i, piece) in re_split.into_iter().enumerate() {
                if i == 0 || prefix.is_empty() {
                    out.push(piece);
                } else {
                    out.push(format!("{prefix}\n{piece}"));
                }
            }
        }
    }
    out
}

/// `chunk(text, file_type_hint, preserve_structure) -> [TypedChunk]`. Never
/// fails: empty text yields an empty sequence, and any unexpected input falls
/// back to a size-bounded fixed splitter.
pub fn chunk(text: &str, file_type_hint: Option<&str>, preserve_structure: bool) -> Vec<TypedChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let content_type = detect_content_type(text, file_type_hint);
    let cfg = config_for(content_type);
    let working = if preserve_structure { protect_boundaries(text) } else { text.to_string() };

    let pieces: Vec<String> = match content_type {
        ContentType::Faq => {
            let pairs = faq_pairs(&working);
            if pairs.is_empty() {
                recursive_split(&working, cfg.size, cfg.overlap, cfg.separators)
            } else {
                pairs
            }
        }
        ContentType::Documentation if preserve_structure => header_split(&working, &cfg),
        _ => recursive_split(&working, cfg.size, cfg.overlap, cfg.separators),
    };

    pieces
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .enumerate()
        .map(|(index, content)| {
            let (original_chunk_type, chunk_type) = classify_original(&content);
            let metadata = build_metadata(&content, original_chunk_type);
            TypedChunk {
                index,
                content,
                content_type,
                chunk_type,
                metadata,
            }
        })
        .collect()
}

/// Emits parent chunks at the normal size and child chunks at ~1/3 size
/// carrying a `parent_index`, for small-context/large-context retrieval.
pub fn chunk_hierarchical(text: &str) -> Vec<TypedChunk> {
    let parents = chunk(text, None, true);
    let mut out = Vec::new();
    let mut next_index = 0usize;
    for parent in &parents {
        let mut parent = parent.clone();
        parent.index = next_index;
        next_index += 1;
        let parent_idx = parent.index;
        out.push(parent.clone());

        let child_cfg = config_for(parent.content_type);
        let child_size = (child_cfg.size / 3).max(50);
        for child_text in recursive_split(&parent.content, child_size, child_cfg.overlap / 3, child_cfg.separators) {
            let content = child_text.trim().to_string();
            if content.is_empty() {
                continue;
            }
            let (original_chunk_type, chunk_type) = classify_original(&content);
            let mut metadata = build_metadata(&content, original_chunk_type);
            metadata.parent_index = Some(parent_idx);
            out.push(TypedChunk {
                index: next_index,
                content,
                content_type: parent.content_type,
                chunk_type,
                metadata,
            });
            next_index += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_returns_no_chunks() {
        assert!(chunk("", None, true).is_empty());
        assert!(chunk("   \n  ", None, true).is_empty());
    }

    #[test]
    fn detects_faq_content() {
        let text = "Q: What is the refund policy?\nA: 30 days.\n\nQ: How do I return an item?\nA: Contact support.\n\nQ: Is shipping free?\nA: Yes.";
        assert_eq!(detect_content_type(text, None), ContentType::Faq);
        let chunks = chunk(text, None, true);
        assert!(chunks.iter().any(|c| c.chunk_type == ChunkType::Faq));
    }

    #[test]
    fn detects_code_from_hint() {
        assert_eq!(detect_content_type("print('hi')", Some("script.py")), ContentType::Code);
    }

    #[test]
    fn detects_tabular_from_pipes() {
        let text = "| a | b | c |\n| - | - | - |\n| 1 | 2 | 3 |\n| 4 | 5 | 6 |";
        assert_eq!(detect_content_type(text, None), ContentType::Tabular);
    }

    #[test]
    fn chunk_never_exceeds_max_size_wildly() {
        let text = "word ".repeat(5000);
        let chunks = chunk(&text, None, true);
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(c.content.chars().count() <= MAX_CHUNK_SIZE * 2);
        }
    }

    #[test]
    fn hierarchical_children_reference_parent() {
        let text = "# Heading one\n\n".to_string() + &"Some narrative sentence about things. ".repeat(200);
        let chunks = chunk_hierarchical(&text);
        assert!(chunks.iter().any(|c| c.metadata.parent_index.is_some()));
    }

    #[test]
    fn concatenating_chunks_preserves_tokens() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa ".repeat(100);
        let chunks = chunk(&text, None, true);
        let joined: String = chunks.iter().map(|c| c.content.as_str()).collect::<Vec<_>>().join(" ");
        for word in ["alpha", "beta", "gamma"] {
            assert!(joined.contains(word));
        }
    }
}
