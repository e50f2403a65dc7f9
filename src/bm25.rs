//! Local BM25 scoring (design §4.8, open question: scored over the dense
//! search's candidate set only, never the full corpus — this keeps term
//! statistics cheap and avoids a second full-corpus index just for lexical
//! blending).

use crate::config::{BM25_B, BM25_K1};
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::OnceLock;

static STOPWORDS: OnceLock<HashSet<&'static str>> = OnceLock::new();

fn stopwords() -> &'static HashSet<&'static str> {
    STOPWORDS.get_or_init(|| {
        [
            "a", "about", "above", "am", "an", "and", "any", "are", "aren't", "as", "at", "be", "because", "been",
            "before", "being", "below", "between", "both", "but", "by", "can't", "cannot", "could", "couldn't", "did",
            "didn't", "do", "does", "doesn't", "doing", "don't", "down", "during", "each", "few", "for", "from",
            "further", "had", "hadn't", "has", "hasn't", "have", "haven't", "having", "he", "he'd", "he'll", "he's",
            "her", "here", "here's", "hers", "herself", "him", "himself", "his", "how", "how's", "i", "i'd", "i'll",
            "i'm", "i've", "if", "in", "into", "is", "isn't", "it", "it's", "its", "itself", "let's", "me", "more",
            "most", "mustn't", "my", "myself", "of", "off", "on", "once", "only", "or", "other", "ought", "our",
            "ours", "ourselves", "out", "over", "own", "same", "shan't", "she", "she'd", "she'll", "she's", "should",
            "shouldn't", "so", "some", "such", "than", "that", "that's", "the", "their", "theirs", "them",
            "themselves", "then", "there", "there's", "these", "they", "they'd", "they'll", "they're", "they've",
            "this", "those", "through", "to", "too", "under", "until", "up", "us", "very", "was", "wasn't", "we",
            "we'd", "we'll", "we're", "we've", "were", "weren't", "what", "what's", "when", "when's", "where",
            "where's", "which", "while", "who", "who's", "whom", "why", "why's", "will", "with", "won't", "would",
            "wouldn't", "you", "you'd", "you'll", "you're", "you've", "your", "yours", "yourself", "yourselves",
        ]
        .into_iter()
        .collect()
    })
}

/// Lowercases and collapses everything but alphanumerics to whitespace.
fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn tokenize(text: &str) -> Vec<String> {
    normalize_text(text)
        .split_whitespace()
        .filter(|t| !stopwords().contains(t) && t.len() > 1)
        .map(|t| t.to_string())
        .collect()
}

pub struct Bm25Candidate<'a> {
    pub id: &'a str,
    pub tokens: Vec<String>,
}

/// Scores each candidate document's tokens against the query terms using
/// BM25 with term statistics (avg length, df) computed over the candidate
/// set itself, returning `(id, score)` pairs in input order.
pub fn score_candidates(query: &str, candidates: &[Bm25Candidate]) -> HashMap<String, f32> {
    let query_terms = tokenize(query);
    if query_terms.is_empty() || candidates.is_empty() {
        return HashMap::new();
    }

    let n = candidates.len() as f32;
    let avg_len: f32 = candidates.iter().map(|c| c.tokens.len() as f32).sum::<f32>() / n;

    let mut doc_freq: HashMap<&str, u32> = HashMap::new();
    for term in &query_terms {
        let df = candidates
            .iter()
            .filter(|c| c.tokens.iter().any(|t| t == term))
            .count() as u32;
        doc_freq.insert(term.as_str(), df);
    }

    let mut scores = HashMap::new();
    for candidate in candidates {
        let doc_len = candidate.tokens.len() as f32;
        let mut term_counts: HashMap<&str, u32> = HashMap::new();
        for t in &candidate.tokens {
            *term_counts.entry(t.as_str()).or_insert(0) += 1;
        }

        let mut score = 0.0f32;
        for term in &query_terms {
            let tf = *term_counts.get(term.as_str()).unwrap_or(&0) as f32;
            if tf == 0.0 {
                continue;
            }
            let df = *doc_freq.get(term.as_str()).unwrap_or(&0) as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            let denom = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * doc_len / avg_len.max(1.0));
            score += idf * (tf * (BM25_K1 + 1.0)) / denom.max(1e-6);
        }
        scores.insert(candidate.id.to_string(), score);
    }
    scores
}

/// Min-max normalizes raw BM25 scores into `[0, 1]` so they can be blended
/// with cosine similarity without one signal dominating by scale alone.
pub fn normalize_scores(scores: &HashMap<String, f32>) -> HashMap<String, f32> {
    if scores.is_empty() {
        return HashMap::new();
    }
    let max = scores.values().cloned().fold(f32::MIN, f32::max);
    let min = scores.values().cloned().fold(f32::MAX, f32::min);
    let range = max - min;
    scores
        .iter()
        .map(|(k, v)| {
            let normalized = if range > 1e-6 { (v - min) / range } else { 0.0 };
            (k.clone(), normalized)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_term_match_outscores_unrelated_doc() {
        let candidates = vec![
            Bm25Candidate {
                id: "a",
                tokens: tokenize("how to reset your password"),
            },
            Bm25Candidate {
                id: "b",
                tokens: tokenize("shipping rates for international orders"),
            },
        ];
        let scores = score_candidates("reset password", &candidates);
        assert!(scores["a"] > scores["b"]);
    }

    #[test]
    fn empty_query_yields_no_scores() {
        let candidates = vec![Bm25Candidate { id: "a", tokens: tokenize("hello") }];
        assert!(score_candidates("", &candidates).is_empty());
    }

    #[test]
    fn normalize_scores_bounds_to_unit_interval() {
        let mut scores = HashMap::new();
        scores.insert("a".to_string(), 5.0);
        scores.insert("b".to_string(), 1.0);
        let normalized = normalize_scores(&scores);
        assert!((normalized["a"] - 1.0).abs() < 1e-6);
        assert!((normalized["b"] - 0.0).abs() < 1e-6);
    }
}
