//! Maximal Marginal Relevance diversification (design §4.8): greedily picks
//! results that balance relevance against novelty relative to what's already
//! been selected, using word-overlap similarity rather than a second
//! embedding pass since the candidate set at this stage is already small.

use crate::config::MMR_LAMBDA;
use crate::util::jaccard_word_similarity;

pub struct MmrCandidate {
    pub id: String,
    pub relevance: f32,
    pub text: String,
}

/// Selects up to `k` candidates from `candidates`, ordered by
/// `lambda * relevance - (1 - lambda) * max_similarity_to_selected`.
pub fn diversify(candidates: Vec<MmrCandidate>, k: usize, lambda: f32) -> Vec<MmrCandidate> {
    if candidates.is_empty() || k == 0 {
        return Vec::new();
    }
    let mut remaining = candidates;
    let mut selected = Vec::with_capacity(k.min(remaining.len()));

    while !remaining.is_empty() && selected.len() < k {
        let mut best_idx = 0;
        let mut best_score = f32::MIN;
        for (idx, candidate) in remaining.iter().enumerate() {
            let max_sim = selected
                .iter()
                .map(|s: &MmrCandidate| jaccard_word_similarity(&candidate.text, &s.text))
                .fold(0.0f32, f32::max);
            let mmr_score = lambda * candidate.relevance - (1.0 - lambda) * max_sim;
            if mmr_score > best_score {
                best_score = mmr_score;
                best_idx = idx;
            }
        }
        selected.push(remaining.remove(best_idx));
    }
    selected
}

pub fn diversify_default(candidates: Vec<MmrCandidate>, k: usize) -> Vec<MmrCandidate> {
    diversify(candidates, k, MMR_LAMBDA)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_relevance_when_no_redundancy() {
        let candidates = vec![
            MmrCandidate { id: "a".into(), relevance: 0.9, text: "password reset instructions".into() },
            MmrCandidate { id: "b".into(), relevance: 0.5, text: "shipping policy details".into() },
        ];
        let result = diversify(candidates, 2, 0.7);
        assert_eq!(result[0].id, "a");
    }

    #[test]
    fn penalizes_near_duplicate_text() {
        let candidates = vec![
            MmrCandidate { id: "a".into(), relevance: 0.9, text: "reset your password here".into() },
            MmrCandidate { id: "b".into(), relevance: 0.89, text: "reset your password here now".into() },
            MmrCandidate { id: "c".into(), relevance: 0.6, text: "shipping takes five days".into() },
        ];
        let result = diversify(candidates, 2, 0.5);
        assert_eq!(result[0].id, "a");
        assert_eq!(result[1].id, "c");
    }

    #[test]
    fn truncates_to_k() {
        let candidates = vec![
            MmrCandidate { id: "a".into(), relevance: 0.9, text: "x".into() },
            MmrCandidate { id: "b".into(), relevance: 0.5, text: "y".into() },
            MmrCandidate { id: "c".into(), relevance: 0.2, text: "z".into() },
        ];
        assert_eq!(diversify(candidates, 1, 0.7).len(), 1);
    }
}
