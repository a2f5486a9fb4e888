//! `AdaptiveRetriever`: ties the embedder, vector index, sparse index and
//! reranker together into the three retrieval strategies.

use std::collections::HashMap;
use std::sync::Arc;

use ragq_core::{
    DocumentChunk, Embedder, Error, QueryParams, Reranker, Result, RetrievalResult,
    RetrievalStrategy, ScoredChunk, SparseIndex, VectorIndex, VectorSearchHit,
};

use crate::SynonymExpander;

pub struct RetrieverDeps {
    pub embedder: Arc<dyn Embedder>,
    pub vector_index: Arc<dyn VectorIndex>,
    pub sparse_index: Option<Arc<dyn SparseIndex>>,
    pub reranker: Arc<dyn Reranker>,
    pub expander: SynonymExpander,
}

pub struct AdaptiveRetriever {
    embedder: Arc<dyn Embedder>,
    vector_index: Arc<dyn VectorIndex>,
    sparse_index: Option<Arc<dyn SparseIndex>>,
    reranker: Arc<dyn Reranker>,
    expander: SynonymExpander,
}

impl AdaptiveRetriever {
    pub fn new(deps: RetrieverDeps) -> Self {
        Self {
            embedder: deps.embedder,
            vector_index: deps.vector_index,
            sparse_index: deps.sparse_index,
            reranker: deps.reranker,
            expander: deps.expander,
        }
    }

    /// `normalized_query` has already passed through `normalizer::normalize`.
    pub async fn retrieve(
        &self,
        normalized_query: &str,
        strategy: RetrievalStrategy,
        params: &QueryParams,
    ) -> Result<RetrievalResult> {
        match strategy {
            RetrievalStrategy::SimpleDense => self.simple_dense(normalized_query, params).await,
            RetrievalStrategy::HybridReranked => {
                self.hybrid_reranked(normalized_query, params).await
            }
            RetrievalStrategy::AdvancedExpanded => {
                self.advanced_expanded(normalized_query, params).await
            }
        }
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embedder.embed(text).await
    }

    async fn dense_search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<VectorSearchHit>> {
        self.vector_index
            .search(embedding, top_k)
            .await
            .map_err(|e| Error::BackendUnavailable(e.to_string()))
    }

    async fn simple_dense(
        &self,
        normalized_query: &str,
        params: &QueryParams,
    ) -> Result<RetrievalResult> {
        let (text, synonyms_applied) = self.expander.expand_with_matches(normalized_query);
        let strategy = RetrievalStrategy::SimpleDense;

        let embedding = self.embed_query(&text).await?;
        let hits = self.dense_search(&embedding, params.initial_k).await?;

        if hits.is_empty() {
            let mut result = RetrievalResult::empty(strategy);
            result.explanation.synonyms_applied = synonyms_applied;
            return Ok(result);
        }

        let mut chunks: Vec<ScoredChunk> = hits
            .into_iter()
            .map(|hit| {
                let mut sc = ScoredChunk::new(hit.chunk);
                sc.dense_score = Some(hit.score);
                sc
            })
            .collect();

        order_chunks(&mut chunks);
        chunks.truncate(params.final_k);

        Ok(RetrievalResult {
            chunks,
            explanation: ragq_core::Explanation {
                strategy: Some(strategy),
                synonyms_applied,
                ..Default::default()
            },
        })
    }

    async fn hybrid_reranked(
        &self,
        normalized_query: &str,
        params: &QueryParams,
    ) -> Result<RetrievalResult> {
        let (text, synonyms_applied) = self.expander.expand_with_matches(normalized_query);
        let strategy = RetrievalStrategy::HybridReranked;
        let mut explanation = ragq_core::Explanation {
            strategy: Some(strategy),
            synonyms_applied,
            ..Default::default()
        };

        let embedding = self.embed_query(&text).await?;

        let (dense_result, sparse_result) = tokio::join!(
            self.dense_search(&embedding, params.initial_k),
            self.sparse_search(&text, params.initial_k)
        );

        let dense_hits = dense_result?;

        let sparse_hits = match sparse_result {
            Ok(hits) => hits,
            Err(warning) => {
                explanation.warn(warning);
                Vec::new()
            }
        };

        if dense_hits.is_empty() && sparse_hits.is_empty() {
            let mut result = RetrievalResult::empty(strategy);
            result.explanation = explanation;
            return Ok(result);
        }

        let mut fused = rrf_fuse(vec![dense_hits], vec![sparse_hits], params.rrf_k);
        order_chunks(&mut fused);
        fused.truncate(params.rerank_k);

        self.rerank_and_finish(&text, fused, params, strategy, explanation)
            .await
    }

    async fn advanced_expanded(
        &self,
        normalized_query: &str,
        params: &QueryParams,
    ) -> Result<RetrievalResult> {
        let strategy = RetrievalStrategy::AdvancedExpanded;
        let mut explanation = ragq_core::Explanation {
            strategy: Some(strategy),
            ..Default::default()
        };

        let (reformulations, synonyms_applied) = self.reformulate(normalized_query);
        explanation.reformulations = reformulations.clone();
        explanation.synonyms_applied = synonyms_applied;

        let mut dense_batches = Vec::with_capacity(reformulations.len());
        let mut sparse_batches = Vec::with_capacity(reformulations.len());

        for reformulation in &reformulations {
            let embedding = self.embed_query(reformulation).await?;
            let (dense_result, sparse_result) = tokio::join!(
                self.dense_search(&embedding, params.initial_k),
                self.sparse_search(reformulation, params.initial_k)
            );

            dense_batches.push(dense_result?);

            match sparse_result {
                Ok(hits) => sparse_batches.push(hits),
                Err(warning) => {
                    explanation.warn(warning);
                    sparse_batches.push(Vec::new());
                }
            }
        }

        if dense_batches.iter().all(|b| b.is_empty()) && sparse_batches.iter().all(|b| b.is_empty())
        {
            let mut result = RetrievalResult::empty(strategy);
            result.explanation = explanation;
            return Ok(result);
        }

        let mut fused = rrf_fuse(dense_batches, sparse_batches, params.rrf_k);
        order_chunks(&mut fused);
        fused.truncate(params.rerank_k);

        self.rerank_and_finish(normalized_query, fused, params, strategy, explanation)
            .await
    }

    /// Up to 3 rule-based reformulations: the query itself, its
    /// synonym-expanded form, and a keyword-only form with leading
    /// question/analysis words stripped. Near-duplicate reformulations are
    /// dropped.
    fn reformulate(&self, normalized_query: &str) -> (Vec<String>, std::collections::HashSet<String>) {
        let mut reformulations = vec![normalized_query.to_string()];

        let (expanded, synonyms_applied) = self.expander.expand_with_matches(normalized_query);
        if expanded != normalized_query {
            reformulations.push(expanded);
        }

        const LEADING_WH: &[&str] = &[
            "how", "why", "what", "when", "where", "compare", "analyze", "explain",
        ];
        let keyword_only: String = normalized_query
            .split_whitespace()
            .filter(|w| !LEADING_WH.contains(w))
            .collect::<Vec<_>>()
            .join(" ");
        if !keyword_only.is_empty()
            && keyword_only != normalized_query
            && !reformulations.contains(&keyword_only)
        {
            reformulations.push(keyword_only);
        }

        reformulations.truncate(3);
        (reformulations, synonyms_applied)
    }

    async fn sparse_search(
        &self,
        text: &str,
        top_k: usize,
    ) -> std::result::Result<Vec<ragq_core::SparseSearchHit>, String> {
        match &self.sparse_index {
            None => Ok(Vec::new()),
            Some(index) => index
                .search(text, top_k)
                .await
                .map_err(|e| format!("sparse index unavailable, degrading to dense-only: {e}")),
        }
    }

    async fn rerank_and_finish(
        &self,
        query: &str,
        mut candidates: Vec<ScoredChunk>,
        params: &QueryParams,
        strategy: RetrievalStrategy,
        explanation: ragq_core::Explanation,
    ) -> Result<RetrievalResult> {
        if candidates.is_empty() {
            let mut result = RetrievalResult::empty(strategy);
            result.explanation = explanation;
            return Ok(result);
        }

        let truncated: Vec<String> = candidates
            .iter()
            .map(|c| truncate_chars(&c.chunk.text, params.max_chars_per_doc))
            .collect();
        let doc_refs: Vec<&str> = truncated.iter().map(|s| s.as_str()).collect();

        let scores = self
            .reranker
            .rerank(query, &doc_refs)
            .await
            .map_err(|e| Error::Retrieval(e.to_string()))?;

        for (chunk, score) in candidates.iter_mut().zip(scores.into_iter()) {
            chunk.rerank_score = Some(score);
        }

        order_chunks(&mut candidates);
        candidates.truncate(params.final_k);

        Ok(RetrievalResult {
            chunks: candidates,
            explanation,
        })
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

/// Stable final ordering: by `ordering_score()` descending, ties broken by
/// chunk id ascending.
fn order_chunks(chunks: &mut [ScoredChunk]) {
    chunks.sort_by(|a, b| {
        b.ordering_score()
            .partial_cmp(&a.ordering_score())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
}

/// Reciprocal rank fusion across any number of dense and sparse result
/// batches (one batch per reformulation). `score(c) = sum(1 / (rrf_k + rank + 1))`
/// over every list `c` appears in.
fn rrf_fuse(
    dense_batches: Vec<Vec<VectorSearchHit>>,
    sparse_batches: Vec<Vec<ragq_core::SparseSearchHit>>,
    rrf_k: f32,
) -> Vec<ScoredChunk> {
    let mut merged: HashMap<String, ScoredChunk> = HashMap::new();
    let mut fused_scores: HashMap<String, f32> = HashMap::new();

    for batch in dense_batches {
        for (rank, hit) in batch.into_iter().enumerate() {
            let rrf = 1.0 / (rrf_k + rank as f32 + 1.0);
            *fused_scores.entry(hit.chunk.id.clone()).or_insert(0.0) += rrf;
            let entry = merged
                .entry(hit.chunk.id.clone())
                .or_insert_with(|| ScoredChunk::new(hit.chunk.clone()));
            entry.dense_score = Some(entry.dense_score.unwrap_or(0.0).max(hit.score));
        }
    }

    for batch in sparse_batches {
        for (rank, hit) in batch.into_iter().enumerate() {
            let rrf = 1.0 / (rrf_k + rank as f32 + 1.0);
            *fused_scores.entry(hit.chunk.id.clone()).or_insert(0.0) += rrf;
            let entry = merged
                .entry(hit.chunk.id.clone())
                .or_insert_with(|| ScoredChunk::new(hit.chunk.clone()));
            entry.sparse_score = Some(entry.sparse_score.unwrap_or(0.0).max(hit.score));
        }
    }

    for (id, chunk) in merged.iter_mut() {
        chunk.fused_score = fused_scores.get(id).copied();
    }

    merged.into_values().collect()
}
