//! Query complexity classification and strategy selection.
//!
//! Deterministic, additive scoring over the original (non-normalized,
//! non-expanded) query text; see the scoring table this mirrors.

use std::collections::HashMap;

use ragq_core::RetrievalStrategy;

const WH_WORDS: &[&str] = &["how", "why", "compare", "analyze", "explain"];
const PRONOUN_CONJUNCTIONS: &[&str] = &["and", "or", "vs"];

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierOutput {
    pub complexity_score: i32,
    /// Factor name to its point contribution toward `complexity_score`
    /// (spec §3's `factors: mapping from factor-name to int`).
    pub factors: HashMap<String, i32>,
    pub strategy: RetrievalStrategy,
}

pub fn classify(query: &str) -> ClassifierOutput {
    let mut score = 0;
    let mut factors = HashMap::new();

    let tokens: Vec<&str> = query.split_whitespace().collect();
    let token_count = tokens.len();

    if token_count >= 20 {
        score += 3;
        factors.insert("length>=20".to_string(), 3);
    } else if token_count >= 12 {
        score += 2;
        factors.insert("length>=12".to_string(), 2);
    }

    let first_word = tokens
        .first()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .unwrap_or_default();
    if WH_WORDS.contains(&first_word.as_str()) {
        score += 3;
        factors.insert("wh-word".to_string(), 3);
    }

    let lower_query = query.to_lowercase();
    if contains_word_any(&lower_query, PRONOUN_CONJUNCTIONS) {
        score += 1;
        factors.insert("conjunction".to_string(), 1);
    }

    if query.contains(',') || query.contains(';') {
        score += 1;
        factors.insert("multi-clause".to_string(), 1);
    }

    let strategy = if score < 2 {
        RetrievalStrategy::SimpleDense
    } else if score <= 4 {
        RetrievalStrategy::HybridReranked
    } else {
        RetrievalStrategy::AdvancedExpanded
    };

    ClassifierOutput {
        complexity_score: score,
        factors,
        strategy,
    }
}

fn contains_word_any(text: &str, words: &[&str]) -> bool {
    text.split_whitespace().any(|w| words.contains(&w))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_plain_query_is_simple_dense() {
        let out = classify("gold loan rate");
        assert!(out.complexity_score < 2);
        assert_eq!(out.strategy, RetrievalStrategy::SimpleDense);
    }

    #[test]
    fn wh_word_alone_selects_hybrid_reranked() {
        let out = classify("how does the gold loan process work");
        assert_eq!(out.strategy, RetrievalStrategy::HybridReranked);
        assert_eq!(out.factors.get("wh-word"), Some(&3));
    }

    #[test]
    fn long_multi_clause_wh_query_selects_advanced_expanded() {
        let out = classify(
            "compare the gold loan interest rates across banks, and explain which offers better terms for long tenure borrowers today",
        );
        assert!(out.complexity_score > 4);
        assert_eq!(out.strategy, RetrievalStrategy::AdvancedExpanded);
    }

    #[test]
    fn ties_break_toward_simpler_strategy() {
        // Exactly 12 plain tokens, no other factors -> score 2, hybrid_reranked.
        let out = classify("one two three four five six seven eight nine ten eleven twelve");
        assert_eq!(out.complexity_score, 2);
        assert_eq!(out.strategy, RetrievalStrategy::HybridReranked);
    }

    #[test]
    fn multi_clause_adds_one_point() {
        let out = classify("gold loan rates, processing fee");
        assert_eq!(out.factors.get("multi-clause"), Some(&1));
    }
}
