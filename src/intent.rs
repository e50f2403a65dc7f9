//! Intent Detector (design §4.7): classifies a query into one of a small set
//! of action intents via a regex set per class, and — for create-intent
//! queries only — scores a chunk's surrounding wording as supporting or
//! undermining that intent.

use regex::Regex;
use std::sync::OnceLock;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Create,
    Find,
    Explain,
    Configure,
    Troubleshoot,
    List,
    Unknown,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Intent::Create => "create",
            Intent::Find => "find",
            Intent::Explain => "explain",
            Intent::Configure => "configure",
            Intent::Troubleshoot => "troubleshoot",
            Intent::List => "list",
            Intent::Unknown => "unknown",
        }
    }
}

struct ClassPattern {
    intent: Intent,
    pattern: &'static str,
}

const CLASS_PATTERNS: &[ClassPattern] = &[
    ClassPattern { intent: Intent::Create, pattern: r"\b(create|make|generate|add|new|set up)\b" },
    ClassPattern { intent: Intent::Troubleshoot, pattern: r"\b(error|fail|broken|not working|issue|problem|fix|trouble)\b" },
    ClassPattern { intent: Intent::Configure, pattern: r"\b(configure|setup|set up|enable|disable|change settings)\b" },
    ClassPattern { intent: Intent::Explain, pattern: r"\b(what is|why|explain|how does|meaning of)\b" },
    ClassPattern { intent: Intent::List, pattern: r"\b(list|show all|show me all|enumerate)\b" },
    ClassPattern { intent: Intent::Find, pattern: r"\b(find|search|where is|look up|locate)\b" },
];

static COMPILED_PATTERNS: OnceLock<Vec<(Intent, Regex)>> = OnceLock::new();
static STOPWORD_PATTERN: OnceLock<Regex> = OnceLock::new();
static RIGHT_CONTEXT: OnceLock<Regex> = OnceLock::new();
static WRONG_CONTEXT: OnceLock<Regex> = OnceLock::new();

fn compiled_patterns() -> &'static Vec<(Intent, Regex)> {
    COMPILED_PATTERNS.get_or_init(|| {
        CLASS_PATTERNS
            .iter()
            .map(|cp| (cp.intent, Regex::new(cp.pattern).expect("static intent pattern is valid")))
            .collect()
    })
}

fn subject_strip_pattern() -> &'static Regex {
    STOPWORD_PATTERN.get_or_init(|| {
        Regex::new(r"\b(how|to|a|an|the|do|does|did|is|are|was|were|i|can|could|would|should|please|for|of|in|on)\b")
            .expect("static stopword pattern is valid")
    })
}

fn right_context_pattern() -> &'static Regex {
    RIGHT_CONTEXT.get_or_init(|| {
        Regex::new(r"(?i)\b(create|make|generate|how to create|new|add)\b").expect("static right-context pattern is valid")
    })
}

fn wrong_context_pattern() -> &'static Regex {
    WRONG_CONTEXT.get_or_init(|| {
        Regex::new(r"(?i)\b(against the|from the|mentioned in|received|grn|existing)\b")
            .expect("static wrong-context pattern is valid")
    })
}

/// Classifies the query's dominant intent; the first matching class in
/// [`CLASS_PATTERNS`] order wins, falling back to `Unknown`.
pub fn classify(query: &str) -> Intent {
    let lowered = query.to_lowercase();
    compiled_patterns()
        .iter()
        .find(|(_, re)| re.is_match(&lowered))
        .map(|(intent, _)| *intent)
        .unwrap_or(Intent::Unknown)
}

/// Strips stopwords and question words to surface the query's subject noun
/// phrase, e.g. "how do I create a purchase order" -> "purchase order".
pub fn extract_subject(query: &str) -> String {
    let lowered = query.to_lowercase();
    let stripped = subject_strip_pattern().replace_all(&lowered, " ");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Per the dominance rule: >=2 wrong-context hits dominant -> -0.15; >=2
/// right-context hits dominant -> +0.15; a single-hit lean -> +/-0.10;
/// no signal -> 0.0. Only meaningful for create-intent queries.
pub fn context_score_modifier(intent: Intent, chunk_text: &str) -> f32 {
    if intent != Intent::Create {
        return 0.0;
    }
    let right = right_context_pattern().find_iter(chunk_text).count();
    let wrong = wrong_context_pattern().find_iter(chunk_text).count();

    if wrong >= 2 && wrong > right {
        -0.15
    } else if right >= 2 && right > wrong {
        0.15
    } else if wrong > right {
        -0.10
    } else if right > wrong {
        0.10
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_create_intent() {
        assert_eq!(classify("how do I create a purchase order"), Intent::Create);
    }

    #[test]
    fn classifies_troubleshoot_intent() {
        assert_eq!(classify("payment is failing with an error"), Intent::Troubleshoot);
    }

    #[test]
    fn unknown_when_no_pattern_matches() {
        assert_eq!(classify("banana smoothie recipe"), Intent::Unknown);
    }

    #[test]
    fn subject_extraction_strips_stopwords() {
        assert_eq!(extract_subject("how do I create a purchase order"), "create purchase order");
    }

    #[test]
    fn dominant_wrong_context_penalizes_strongly() {
        let text = "checked against the purchase order and mentioned in the existing GRN";
        assert_eq!(context_score_modifier(Intent::Create, text), -0.15);
    }

    #[test]
    fn dominant_right_context_boosts_strongly() {
        let text = "to create a new purchase order, add the following and generate it";
        assert_eq!(context_score_modifier(Intent::Create, text), 0.15);
    }

    #[test]
    fn non_create_intent_has_no_modifier() {
        assert_eq!(context_score_modifier(Intent::Find, "create create create"), 0.0);
    }
}
