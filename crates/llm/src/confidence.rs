//! Confidence Scorer (§4.8): a weighted combination of rerank quality,
//! answer-to-source coverage, and source agreement. Monotonic in each input
//! with the others held fixed.

use std::collections::HashSet;

use ragq_core::{Answer, ScoredChunk};

const WEIGHT_RERANK: f32 = 0.4;
const WEIGHT_COVERAGE: f32 = 0.4;
const WEIGHT_SOURCE_AGREEMENT: f32 = 0.2;

#[derive(Debug, Default, Clone, Copy)]
pub struct ConfidenceScorer;

impl ConfidenceScorer {
    pub fn new() -> Self {
        Self
    }

    /// `final_k` is the configured target source count (spec's denominator
    /// for source agreement), not just `sources.len()` — a query that only
    /// turned up 2 of a possible 8 sources should score lower than one that
    /// used all 8, even if both cite every source they were given.
    pub fn score(&self, answer: &Answer, sources: &[ScoredChunk], final_k: usize) -> f32 {
        if sources.is_empty() {
            return 0.0;
        }

        let mean_rerank = mean_rerank_score(sources);
        let coverage = coverage_score(answer, sources);
        let agreement = source_agreement(answer, final_k);

        WEIGHT_RERANK * mean_rerank + WEIGHT_COVERAGE * coverage + WEIGHT_SOURCE_AGREEMENT * agreement
    }
}

fn mean_rerank_score(sources: &[ScoredChunk]) -> f32 {
    let sum: f32 = sources.iter().map(|s| s.rerank_score.unwrap_or(0.0)).sum();
    sum / sources.len() as f32
}

/// Fraction of answer sentences that share at least one 3+ character word
/// with at least one cited source's text.
fn coverage_score(answer: &Answer, sources: &[ScoredChunk]) -> f32 {
    let sentences = split_sentences(&answer.text);
    if sentences.is_empty() {
        return 0.0;
    }

    let cited_ids: HashSet<&str> = answer.citations.iter().map(|c| c.chunk_id.as_str()).collect();
    let cited_texts: Vec<&str> = sources
        .iter()
        .filter(|s| cited_ids.contains(s.chunk.id.as_str()))
        .map(|s| s.chunk.text.as_str())
        .collect();

    let texts_to_check: Vec<&str> = if cited_texts.is_empty() {
        sources.iter().map(|s| s.chunk.text.as_str()).collect()
    } else {
        cited_texts
    };

    let covered = sentences
        .iter()
        .filter(|sentence| texts_to_check.iter().any(|text| shares_phrase(sentence, text)))
        .count();

    covered as f32 / sentences.len() as f32
}

fn source_agreement(answer: &Answer, final_k: usize) -> f32 {
    if final_k == 0 {
        return 0.0;
    }
    let distinct: HashSet<&str> = answer.citations.iter().map(|c| c.chunk_id.as_str()).collect();
    (distinct.len() as f32 / final_k as f32).min(1.0)
}

fn split_sentences(text: &str) -> Vec<String> {
    text.split(|c| c == '.' || c == '!' || c == '?')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn shares_phrase(sentence: &str, source_text: &str) -> bool {
    let sentence_words: HashSet<String> = words(sentence);
    let source_words: HashSet<String> = words(source_text);
    sentence_words.intersection(&source_words).count() > 0
}

fn words(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| w.len() >= 3)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragq_core::{Citation, DocumentChunk, Explanation};

    fn chunk(id: &str, text: &str, rerank: f32) -> ScoredChunk {
        let mut c = ScoredChunk::new(DocumentChunk::new(id, text));
        c.rerank_score = Some(rerank);
        c
    }

    fn answer(text: &str, cited_ids: &[&str]) -> Answer {
        Answer {
            text: text.to_string(),
            citations: cited_ids
                .iter()
                .enumerate()
                .map(|(i, id)| Citation {
                    index: i + 1,
                    chunk_id: id.to_string(),
                })
                .collect(),
            sources: Vec::new(),
            confidence: 0.0,
            explanation: Explanation::default(),
            timing: Default::default(),
            from_cache: false,
            cache_stage: None,
        }
    }

    #[test]
    fn empty_sources_yield_zero_confidence() {
        let scorer = ConfidenceScorer::new();
        let a = answer("some text.", &[]);
        assert_eq!(scorer.score(&a, &[], 8), 0.0);
    }

    #[test]
    fn increasing_mean_rerank_score_never_decreases_confidence() {
        let scorer = ConfidenceScorer::new();
        let sources_low = vec![chunk("a", "gold loan interest rates explained", 0.2)];
        let sources_high = vec![chunk("a", "gold loan interest rates explained", 0.9)];
        let a = answer("Gold loan interest rates are explained here. [1]", &["a"]);

        let low = scorer.score(&a, &sources_low, 1);
        let high = scorer.score(&a, &sources_high, 1);
        assert!(high >= low);
    }

    #[test]
    fn increasing_coverage_never_decreases_confidence() {
        let scorer = ConfidenceScorer::new();
        let sources = vec![chunk("a", "gold loan interest rates are explained in detail", 0.5)];

        let uncovered = answer("This is a totally unrelated sentence about cooking pasta.", &["a"]);
        let covered = answer("Gold loan interest rates are explained in detail here.", &["a"]);

        let low = scorer.score(&uncovered, &sources, 1);
        let high = scorer.score(&covered, &sources, 1);
        assert!(high >= low);
    }

    #[test]
    fn increasing_source_agreement_never_decreases_confidence() {
        let scorer = ConfidenceScorer::new();
        let sources = vec![
            chunk("a", "gold loan interest rates", 0.5),
            chunk("b", "gold loan repayment schedule", 0.5),
        ];
        let text = "Gold loan interest rates and repayment schedule are covered.";

        let one_cited = answer(text, &["a"]);
        let two_cited = answer(text, &["a", "b"]);

        let low = scorer.score(&one_cited, &sources, 2);
        let high = scorer.score(&two_cited, &sources, 2);
        assert!(high >= low);
    }

    #[test]
    fn confidence_is_bounded_between_zero_and_one() {
        let scorer = ConfidenceScorer::new();
        let sources = vec![chunk("a", "gold loan interest rates", 1.0)];
        let a = answer("Gold loan interest rates covered fully. [1]", &["a"]);
        let score = scorer.score(&a, &sources, 1);
        assert!((0.0..=1.0).contains(&score));
    }
}
