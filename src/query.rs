//! Query Expander & Rewriter (design §4.6). The expander is rule-based and
//! free; the rewriter is an optional LLM collaborator invoked only when
//! conversation history makes the query non-standalone.

use crate::bm25::tokenize;
use std::collections::HashMap;
use std::sync::OnceLock;

const MAX_VARIATIONS: usize = 5;
const REWRITE_LENGTH_MULTIPLIER: usize = 3;

static SYNONYMS: OnceLock<HashMap<&'static str, Vec<&'static str>>> = OnceLock::new();
static ROMAN_URDU: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();

fn synonyms() -> &'static HashMap<&'static str, Vec<&'static str>> {
    SYNONYMS.get_or_init(|| {
        HashMap::from([
            ("create", vec!["make", "generate", "add"]),
            ("make", vec!["create", "generate"]),
            ("find", vec!["search", "locate", "look up"]),
            ("delete", vec!["remove", "erase"]),
            ("remove", vec!["delete", "erase"]),
            ("update", vec!["edit", "modify", "change"]),
            ("edit", vec!["update", "modify"]),
            ("buy", vec!["purchase", "order"]),
            ("purchase", vec!["buy", "order"]),
            ("cancel", vec!["void", "revoke"]),
            ("fix", vec!["resolve", "repair", "troubleshoot"]),
            ("show", vec!["display", "list"]),
            ("configure", vec!["setup", "set up"]),
            ("issue", vec!["problem", "error"]),
            ("problem", vec!["issue", "error"]),
        ])
    })
}

fn roman_urdu_map() -> &'static HashMap<&'static str, &'static str> {
    ROMAN_URDU.get_or_init(|| {
        HashMap::from([
            ("kaise", "how"),
            ("kaise banaye", "how to create"),
            ("kaise karen", "how to do"),
            ("order kaise karen", "how to order"),
            ("kya hai", "what is"),
            ("kyun", "why"),
            ("madad", "help"),
            ("dikhao", "show"),
            ("banaye", "create"),
            ("hatao", "remove"),
        ])
    })
}

/// Lowercases, strips `?!`, and collapses whitespace.
pub fn normalize(query: &str) -> String {
    query
        .to_lowercase()
        .chars()
        .filter(|c| *c != '?' && *c != '!')
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn has_consecutive_duplicate_words(text: &str) -> bool {
    text.split_whitespace().collect::<Vec<_>>().windows(2).any(|w| w[0] == w[1])
}

fn is_valid_variation(candidate: &str, original: &str, normalized: &str) -> bool {
    let word_count = candidate.split_whitespace().count();
    word_count >= 2 && candidate != original && candidate != normalized && !has_consecutive_duplicate_words(candidate)
}

/// Produces up to `MAX_VARIATIONS` rule-based paraphrases of `query` by
/// substituting synonyms and expanding Roman-Urdu phrases.
pub fn expand(query: &str) -> Vec<String> {
    let normalized = normalize(query);
    let mut variations = Vec::new();

    for (phrase, english) in roman_urdu_map() {
        if normalized.contains(phrase) {
            let candidate = normalized.replace(phrase, english);
            if is_valid_variation(&candidate, query, &normalized) {
                variations.push(candidate);
            }
        }
    }

    let words: Vec<&str> = normalized.split_whitespace().collect();
    for (idx, word) in words.iter().enumerate() {
        if let Some(syns) = synonyms().get(word) {
            for syn in syns {
                let mut replaced = words.clone();
                replaced[idx] = *syn;
                let candidate = replaced.join(" ");
                if is_valid_variation(&candidate, query, &normalized) {
                    variations.push(candidate);
                }
            }
        }
    }

    variations.dedup();
    variations.truncate(MAX_VARIATIONS);
    variations
}

/// Deduped non-stopword tokens plus their top-2 synonyms, used exclusively
/// to drive BM25 term weighting — never to spawn additional vector searches.
pub fn get_search_terms(query: &str) -> Vec<String> {
    let mut terms = Vec::new();
    for token in tokenize(query) {
        if !terms.contains(&token) {
            terms.push(token.clone());
        }
        if let Some(syns) = synonyms().get(token.as_str()) {
            for syn in syns.iter().take(2) {
                let syn = syn.to_string();
                if !terms.contains(&syn) {
                    terms.push(syn);
                }
            }
        }
    }
    terms
}

fn looks_standalone(query: &str) -> bool {
    let word_count = query.split_whitespace().count();
    if word_count >= 6 {
        return true;
    }
    let lowered = query.to_lowercase();
    const CONTINUATION_MARKERS: &[&str] = &["it", "that", "this", "those", "these", "them", "he", "she", "also", "and what about"];
    !CONTINUATION_MARKERS.iter().any(|m| lowered.split_whitespace().any(|w| w == *m))
}

/// When history is present and the query looks like a continuation (short,
/// pronoun-laden), an LLM collaborator is asked to produce a standalone
/// query. The rewrite is rejected if it balloons past 3x the input length.
pub async fn rewrite_with_history(
    query: &str,
    history: &[String],
    rewriter: &dyn QueryRewriteClient,
) -> crate::error::AppResult<Option<String>> {
    if history.is_empty() || looks_standalone(query) {
        return Ok(None);
    }
    let recent: Vec<&String> = history.iter().rev().take(3).collect();
    let recent: Vec<String> = recent.into_iter().rev().cloned().collect();
    let rewritten = rewriter.rewrite(query, &recent).await?;
    if rewritten.len() > query.len() * REWRITE_LENGTH_MULTIPLIER {
        tracing::warn!("rewritten query exceeded length guard, keeping original");
        return Ok(None);
    }
    Ok(Some(rewritten))
}

#[async_trait::async_trait]
pub trait QueryRewriteClient: Send + Sync {
    async fn rewrite(&self, query: &str, recent_turns: &[String]) -> crate::error::AppResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_punctuation_and_collapses_space() {
        assert_eq!(normalize("How do I   reset my password?!"), "how do i reset my password");
    }

    #[test]
    fn expand_produces_synonym_variation() {
        let variations = expand("create a new order");
        assert!(variations.iter().any(|v| v.contains("make")));
    }

    #[test]
    fn expand_rejects_trivial_or_duplicate_variations() {
        let variations = expand("hello");
        assert!(variations.iter().all(|v| v.split_whitespace().count() >= 2));
    }

    #[test]
    fn search_terms_include_synonyms() {
        let terms = get_search_terms("create purchase order");
        assert!(terms.contains(&"create".to_string()));
        assert!(terms.iter().any(|t| t == "make" || t == "generate" || t == "add"));
    }

    struct EchoRewriter;

    #[async_trait::async_trait]
    impl QueryRewriteClient for EchoRewriter {
        async fn rewrite(&self, _query: &str, recent_turns: &[String]) -> crate::error::AppResult<String> {
            Ok(format!("standalone version of: {}", recent_turns.join(" ")))
        }
    }

    #[tokio::test]
    async fn rewrite_skipped_when_query_is_standalone() {
        let result = rewrite_with_history(
            "what is the refund policy for international orders",
            &["earlier turn".to_string()],
            &EchoRewriter,
        )
        .await
        .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn rewrite_invoked_for_continuation_query() {
        let result = rewrite_with_history("what about it", &["refund policy".to_string()], &EchoRewriter)
            .await
            .unwrap();
        assert!(result.is_some());
    }
}
