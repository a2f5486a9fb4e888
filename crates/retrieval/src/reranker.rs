//! Cross-encoder reranking, implementing `ragq_core::Reranker`.
//!
//! ## Cascaded reranking
//!
//! Standard ONNX cross-encoders don't expose intermediate layer outputs, so
//! true per-layer early exit isn't available through `ort`. Instead this
//! reranker cascades: a fast keyword pre-filter eliminates obvious
//! non-matches, the cross-encoder only runs on the remaining candidates, and
//! scoring stops once enough high-confidence documents have been found.

use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;
use ragq_core::{Reranker, Result};

#[cfg(feature = "onnx")]
use ndarray::Array2;
#[cfg(feature = "onnx")]
use ort::{session::Session, session::builder::GraphOptimizationLevel, value::Tensor};
#[cfg(feature = "onnx")]
use tokenizers::Tokenizer;

use crate::RetrievalError;

#[derive(Debug, Clone)]
pub struct RerankerConfig {
    pub max_seq_len: usize,
    pub cascaded_enabled: bool,
    /// Documents scoring below this on the keyword pre-filter skip the
    /// cross-encoder entirely.
    pub prefilter_threshold: f32,
    /// Cap on how many pre-filter survivors run through the full model.
    pub max_full_model_docs: usize,
    /// Stop scoring once this many documents clear this score.
    pub early_termination_threshold: f32,
    pub early_termination_min_results: usize,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            max_seq_len: 256,
            cascaded_enabled: true,
            prefilter_threshold: 0.05,
            max_full_model_docs: 30,
            early_termination_threshold: 0.9,
            early_termination_min_results: 8,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RerankerStats {
    pub total_calls: usize,
    pub prefilter_filtered: usize,
    pub full_model_runs: usize,
    pub early_terminations: usize,
}

/// Cascading reranker. Without the `onnx` feature, every document is scored
/// by `SimpleScorer` alone.
pub struct CascadedReranker {
    #[cfg(feature = "onnx")]
    session: Session,
    #[cfg(feature = "onnx")]
    tokenizer: Tokenizer,
    config: RerankerConfig,
    stats: Mutex<RerankerStats>,
}

impl CascadedReranker {
    #[cfg(feature = "onnx")]
    pub fn new(
        model_path: impl AsRef<Path>,
        tokenizer_path: impl AsRef<Path>,
        config: RerankerConfig,
    ) -> std::result::Result<Self, RetrievalError> {
        let session = Session::builder()
            .map_err(|e| RetrievalError::Reranker(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| RetrievalError::Reranker(e.to_string()))?
            .with_intra_threads(2)
            .map_err(|e| RetrievalError::Reranker(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| RetrievalError::Reranker(e.to_string()))?;

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| RetrievalError::Reranker(e.to_string()))?;

        Ok(Self {
            session,
            tokenizer,
            config,
            stats: Mutex::new(RerankerStats::default()),
        })
    }

    #[cfg(not(feature = "onnx"))]
    pub fn new(
        _model_path: impl AsRef<Path>,
        _tokenizer_path: impl AsRef<Path>,
        config: RerankerConfig,
    ) -> std::result::Result<Self, RetrievalError> {
        Ok(Self::simple(config))
    }

    #[cfg(not(feature = "onnx"))]
    pub fn simple(config: RerankerConfig) -> Self {
        Self {
            config,
            stats: Mutex::new(RerankerStats::default()),
        }
    }

    pub fn stats(&self) -> RerankerStats {
        self.stats.lock().clone()
    }

    fn score_one(&self, query: &str, document: &str) -> std::result::Result<f32, RetrievalError> {
        #[cfg(feature = "onnx")]
        {
            self.score_pair_onnx(query, document)
        }
        #[cfg(not(feature = "onnx"))]
        {
            Ok(SimpleScorer::score(query, document))
        }
    }

    #[cfg(feature = "onnx")]
    fn score_pair_onnx(
        &self,
        query: &str,
        document: &str,
    ) -> std::result::Result<f32, RetrievalError> {
        let encoding = self
            .tokenizer
            .encode((query, document), true)
            .map_err(|e| RetrievalError::Reranker(e.to_string()))?;

        let ids: Vec<i64> = encoding
            .get_ids()
            .iter()
            .take(self.config.max_seq_len)
            .map(|&id| id as i64)
            .collect();

        let mut padded_ids = vec![0i64; self.config.max_seq_len];
        let mut padded_mask = vec![0i64; self.config.max_seq_len];
        padded_ids[..ids.len()].copy_from_slice(&ids);
        for m in padded_mask.iter_mut().take(ids.len()) {
            *m = 1;
        }

        let input_ids = Array2::from_shape_vec((1, self.config.max_seq_len), padded_ids)
            .map_err(|e| RetrievalError::Reranker(e.to_string()))?;
        let attention = Array2::from_shape_vec((1, self.config.max_seq_len), padded_mask)
            .map_err(|e| RetrievalError::Reranker(e.to_string()))?;

        let input_ids_tensor =
            Tensor::from_array(input_ids).map_err(|e| RetrievalError::Reranker(e.to_string()))?;
        let attention_tensor =
            Tensor::from_array(attention).map_err(|e| RetrievalError::Reranker(e.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs![
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_tensor,
            ])
            .map_err(|e| RetrievalError::Reranker(e.to_string()))?;

        let (_, logits) = outputs
            .get("logits")
            .ok_or_else(|| RetrievalError::Reranker("missing logits output".to_string()))?
            .try_extract_tensor::<f32>()
            .map_err(|e| RetrievalError::Reranker(e.to_string()))?;

        Ok(softmax_relevance(logits))
    }

    /// Rerank `(query, document)` pairs. Returns scores in the same order as
    /// `documents`, same contract as the `Reranker` trait.
    fn rerank_sync(
        &self,
        query: &str,
        documents: &[&str],
    ) -> std::result::Result<Vec<f32>, RetrievalError> {
        if !self.config.cascaded_enabled {
            let scores = documents
                .iter()
                .map(|doc| self.score_one(query, doc))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let mut stats = self.stats.lock();
            stats.total_calls += 1;
            stats.full_model_runs += documents.len();
            return Ok(scores);
        }

        let prefilter: Vec<f32> = documents
            .iter()
            .map(|doc| SimpleScorer::score(query, doc))
            .collect();

        let mut order: Vec<usize> = (0..documents.len()).collect();
        order.sort_by(|&a, &b| prefilter[b].partial_cmp(&prefilter[a]).unwrap());

        let mut final_scores = vec![0.0f32; documents.len()];
        let mut high_confidence = 0usize;
        let mut full_model_runs = 0usize;
        let mut prefilter_filtered = 0usize;
        let mut early_terminated = false;
        let mut terminated_at = documents.len();

        for (rank, &idx) in order.iter().enumerate() {
            if prefilter[idx] < self.config.prefilter_threshold
                || full_model_runs >= self.config.max_full_model_docs
                || early_terminated
            {
                final_scores[idx] = prefilter[idx] * 0.5;
                prefilter_filtered += 1;
                continue;
            }

            let score = self.score_one(query, documents[idx])?;
            final_scores[idx] = score;
            full_model_runs += 1;

            if score >= self.config.early_termination_threshold {
                high_confidence += 1;
            }
            if high_confidence >= self.config.early_termination_min_results {
                early_terminated = true;
                terminated_at = rank + 1;
            }
        }

        let mut stats = self.stats.lock();
        stats.total_calls += 1;
        stats.full_model_runs += full_model_runs;
        stats.prefilter_filtered += prefilter_filtered;
        if early_terminated {
            stats.early_terminations += 1;
            tracing::debug!(
                terminated_at,
                full_model_runs,
                "reranker early-terminated after enough high-confidence results"
            );
        }

        Ok(final_scores)
    }
}

#[cfg(feature = "onnx")]
fn softmax_relevance(logits: &[f32]) -> f32 {
    if logits.len() >= 2 {
        let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let exp_sum: f32 = logits.iter().map(|&x| (x - max).exp()).sum();
        (logits[1] - max).exp() / exp_sum
    } else if logits.len() == 1 {
        1.0 / (1.0 + (-logits[0]).exp())
    } else {
        0.0
    }
}

#[async_trait]
impl Reranker for CascadedReranker {
    async fn rerank(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>> {
        Ok(self.rerank_sync(query, documents)?)
    }
}

/// Keyword-overlap fallback scorer: term frequency, a length-based IDF
/// approximation, and a coverage bonus for matching more query terms.
pub struct SimpleScorer;

impl SimpleScorer {
    const STOPWORDS: &'static [&'static str] = &[
        "the", "a", "an", "is", "are", "was", "were", "be", "been", "to", "of", "in", "for", "on",
        "with", "at", "by", "from", "as", "and", "or", "but", "if", "i", "you", "we", "they",
        "it", "this", "that", "what", "which", "who",
    ];

    pub fn score(query: &str, document: &str) -> f32 {
        let query_lower = query.to_lowercase();
        let doc_lower = document.to_lowercase();

        let stopwords: std::collections::HashSet<&str> = Self::STOPWORDS.iter().copied().collect();

        let query_terms: Vec<&str> = query_lower
            .split_whitespace()
            .filter(|w| w.len() > 1 && !stopwords.contains(*w))
            .collect();

        if query_terms.is_empty() {
            return 0.0;
        }

        let doc_words: Vec<&str> = doc_lower.split_whitespace().collect();
        let doc_len = doc_words.len().max(1) as f32;

        let mut total_score = 0.0f32;
        let mut matched_terms = 0usize;

        for (pos, term) in query_terms.iter().enumerate() {
            let tf = doc_words.iter().filter(|w| **w == *term).count() as f32;
            if tf > 0.0 {
                matched_terms += 1;
                let tf_score = tf.sqrt();
                let idf_approx = (1.0 + term.len() as f32).ln();
                let position_weight = 1.0 / (1.0 + pos as f32 * 0.1);
                let length_norm = 1.0 / (1.0 + (doc_len / 50.0).sqrt());
                total_score += tf_score * idf_approx * position_weight * length_norm;
            }
        }

        let coverage = matched_terms as f32 / query_terms.len() as f32;
        let raw_score = total_score + coverage * 0.3;
        (raw_score / (raw_score + 1.0)).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_scorer_scores_overlapping_terms() {
        let score = SimpleScorer::score(
            "gold loan interest rate",
            "The interest rate for gold loan is 10%",
        );
        assert!(score > 0.0);
    }

    #[test]
    fn simple_scorer_prefers_specific_matches() {
        let specific = SimpleScorer::score(
            "kotak gold loan eligibility",
            "Kotak gold loan eligibility requires minimum 10 grams gold",
        );
        let generic = SimpleScorer::score(
            "kotak gold loan eligibility",
            "The bank offers various loan products to customers",
        );
        assert!(specific > generic);
    }

    #[cfg(not(feature = "onnx"))]
    #[tokio::test]
    async fn cascaded_reranking_ranks_relevant_docs_higher() {
        let reranker = CascadedReranker::simple(RerankerConfig::default());

        let documents = vec![
            "gold loan interest rate from kotak",
            "weather forecast for tomorrow",
            "gold loan processing fee",
        ];

        let scores = Reranker::rerank(&reranker, "gold loan interest", &documents)
            .await
            .unwrap();

        assert!(scores[0] > scores[1]);
        assert!(scores[2] > scores[1]);
    }

    #[cfg(not(feature = "onnx"))]
    #[tokio::test]
    async fn cascaded_reranking_tracks_prefilter_stats() {
        let mut config = RerankerConfig::default();
        config.prefilter_threshold = 0.2;
        let reranker = CascadedReranker::simple(config);

        let documents = vec![
            "gold loan interest rate",
            "unrelated topic here",
            "another unrelated doc",
        ];
        let _ = Reranker::rerank(&reranker, "gold loan", &documents)
            .await
            .unwrap();

        let stats = reranker.stats();
        assert_eq!(stats.total_calls, 1);
        assert!(stats.prefilter_filtered >= 1);
    }
}
