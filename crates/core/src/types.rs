//! Shared data model.
//!
//! Field shapes follow the data model in spec §3; this module is the single
//! place every other crate imports these types from so retrieval, cache,
//! memory and generation all agree on shape without re-deriving it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A single retrievable unit of text. Chunking/ingestion happens upstream of
/// this workspace (spec §1 out-of-scope); a `DocumentChunk` is what comes
/// back from a vector or sparse index search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentChunk {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl DocumentChunk {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            title: None,
            source: None,
            metadata: HashMap::new(),
        }
    }
}

/// A chunk annotated with the scores accumulated as it moves through
/// retrieval → fusion → rerank. Later stages populate more fields; earlier
/// ones are left `None` rather than overwritten, so the ordering rule in
/// spec §4.4 ("rerank_score if present else fused_score else dense_score")
/// can be applied directly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    #[serde(default)]
    pub dense_score: Option<f32>,
    #[serde(default)]
    pub sparse_score: Option<f32>,
    #[serde(default)]
    pub fused_score: Option<f32>,
    #[serde(default)]
    pub rerank_score: Option<f32>,
}

impl ScoredChunk {
    pub fn new(chunk: DocumentChunk) -> Self {
        Self {
            chunk,
            dense_score: None,
            sparse_score: None,
            fused_score: None,
            rerank_score: None,
        }
    }

    /// The score used for final ordering: rerank, else fusion, else dense.
    pub fn ordering_score(&self) -> f32 {
        self.rerank_score
            .or(self.fused_score)
            .or(self.dense_score)
            .unwrap_or(0.0)
    }
}

/// Which of the three adaptive-retrieval strategies was used for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    SimpleDense,
    HybridReranked,
    AdvancedExpanded,
}

impl RetrievalStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalStrategy::SimpleDense => "simple_dense",
            RetrievalStrategy::HybridReranked => "hybrid_reranked",
            RetrievalStrategy::AdvancedExpanded => "advanced_expanded",
        }
    }
}

/// Per-request tuning knobs. Every field has a default matching spec §6's
/// options table; callers normally only override a handful.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryParams {
    pub final_k: usize,
    pub rerank_k: usize,
    pub initial_k: usize,
    pub rrf_k: f32,
    pub semantic_threshold: f32,
    pub validation_threshold: f32,
    pub max_semantic_candidates: usize,
    pub ttl_exact_secs: u64,
    pub ttl_semantic_secs: u64,
    pub max_chars_per_doc: usize,
    pub max_query_chars: usize,
    pub memory_window: usize,
    pub summarize_every: usize,
    pub temperature: f32,
    pub max_tokens: usize,
    /// Force a specific strategy instead of letting the classifier pick one.
    pub strategy_override: Option<RetrievalStrategy>,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            final_k: 8,
            rerank_k: 30,
            initial_k: 100,
            rrf_k: 60.0,
            semantic_threshold: 0.98,
            validation_threshold: 0.80,
            max_semantic_candidates: 3,
            ttl_exact_secs: 3600,
            ttl_semantic_secs: 600,
            max_chars_per_doc: 3200,
            max_query_chars: 10_000,
            memory_window: 10,
            summarize_every: 5,
            temperature: 0.2,
            max_tokens: 512,
            strategy_override: None,
        }
    }
}

/// A user query plus its resolved parameters and optional session binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    #[serde(default)]
    pub params: QueryParams,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: QueryParams::default(),
            session_id: None,
        }
    }
}

/// Non-authoritative diagnostics attached to a result: which strategy ran,
/// why the classifier picked it, which synonyms got expanded in, any
/// degradations that happened along the way, and timing. Never affects the
/// answer text or citations, only explains how they were produced (spec §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Explanation {
    pub strategy: Option<RetrievalStrategy>,
    /// The classifier's additive complexity score (spec §3/§4.3).
    #[serde(default)]
    pub complexity_score: i32,
    /// Factor name to its point contribution toward `complexity_score`.
    #[serde(default)]
    pub factors: HashMap<String, i32>,
    /// Synonym terms the expander actually matched and added (spec §4.2),
    /// not the full configured synonym table.
    #[serde(default)]
    pub synonyms_applied: HashSet<String>,
    /// A short human-readable account of why this strategy/these synonyms
    /// were chosen, distinct from `warnings` (which records degradations).
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub reformulations: Vec<String>,
    #[serde(default)]
    pub stage_timings_ms: HashMap<String, u64>,
}

impl Explanation {
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// The output of `AdaptiveRetriever::retrieve`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub chunks: Vec<ScoredChunk>,
    pub explanation: Explanation,
}

impl RetrievalResult {
    pub fn empty(strategy: RetrievalStrategy) -> Self {
        Self {
            chunks: Vec::new(),
            explanation: Explanation {
                strategy: Some(strategy),
                ..Default::default()
            },
        }
    }

    pub fn chunk_ids(&self) -> Vec<String> {
        self.chunks.iter().map(|c| c.chunk.id.clone()).collect()
    }
}

/// A single citation in a generated answer: the index matches the source's
/// position in the numbered prompt (spec §4.7/§6 invariant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub index: usize,
    pub chunk_id: String,
}

/// One entry in `Answer::sources`: the chunk a citation points at, the
/// excerpt actually shown to the model, and the score it was ordered by
/// (spec §3's `(chunk_id, excerpt, score)` tuple).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub chunk_id: String,
    pub excerpt: String,
    pub score: f32,
}

/// Wall-clock breakdown of a single `QueryEngine::query` call (spec §3).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Timing {
    pub retrieval_ms: u64,
    pub generation_ms: u64,
    pub total_ms: u64,
}

/// Which layer of the multi-stage cache served a hit (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStage {
    Exact,
    Normalized,
    Semantic,
}

/// The final result of `QueryEngine::query`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
    pub sources: Vec<SourceRef>,
    pub confidence: f32,
    pub explanation: Explanation,
    pub timing: Timing,
    #[serde(default)]
    pub from_cache: bool,
    #[serde(default)]
    pub cache_stage: Option<CacheStage>,
}

/// What the multi-stage cache stores per key. `embedding`/`retrieved_chunk_ids`
/// are only populated when the caller had them available at put-time
/// (spec §4.6's Put rule); their absence is what keeps a key out of the
/// semantic layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub answer: Answer,
    pub retrieved_chunk_ids: Vec<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    pub stored_at: DateTime<Utc>,
}

/// One exchange in a session's conversation memory (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub query: String,
    pub answer: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(query: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            answer: answer.into(),
            metadata: HashMap::new(),
            at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_score_prefers_rerank_then_fused_then_dense() {
        let mut sc = ScoredChunk::new(DocumentChunk::new("1", "text"));
        assert_eq!(sc.ordering_score(), 0.0);
        sc.dense_score = Some(0.5);
        assert_eq!(sc.ordering_score(), 0.5);
        sc.fused_score = Some(0.7);
        assert_eq!(sc.ordering_score(), 0.7);
        sc.rerank_score = Some(0.9);
        assert_eq!(sc.ordering_score(), 0.9);
    }

    #[test]
    fn query_params_defaults_match_spec_table() {
        let p = QueryParams::default();
        assert_eq!(p.final_k, 8);
        assert_eq!(p.rerank_k, 30);
        assert_eq!(p.initial_k, 100);
        assert_eq!(p.rrf_k, 60.0);
        assert_eq!(p.semantic_threshold, 0.98);
        assert_eq!(p.validation_threshold, 0.80);
        assert_eq!(p.max_semantic_candidates, 3);
        assert_eq!(p.ttl_exact_secs, 3600);
        assert_eq!(p.ttl_semantic_secs, 600);
        assert_eq!(p.max_chars_per_doc, 3200);
        assert_eq!(p.max_query_chars, 10_000);
        assert_eq!(p.memory_window, 10);
        assert_eq!(p.summarize_every, 5);
    }

    #[test]
    fn empty_retrieval_result_records_strategy() {
        let r = RetrievalResult::empty(RetrievalStrategy::SimpleDense);
        assert!(r.chunks.is_empty());
        assert_eq!(r.explanation.strategy, Some(RetrievalStrategy::SimpleDense));
    }
}
