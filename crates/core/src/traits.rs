//! Pluggable-backend traits.
//!
//! # Trait Hierarchy
//!
//! ```text
//! Retrieval:
//!   - Embedder:      text -> dense vector
//!   - VectorIndex:   dense nearest-neighbour search over DocumentChunks
//!   - SparseIndex:   keyword/BM25-style search over DocumentChunks
//!   - Reranker:      cross-encoder (or fallback) relevance scoring
//!
//! Generation:
//!   - LanguageModel:  prompt -> text, with optional token streaming
//! ```
//!
//! Each trait has exactly one capability; a startup routine picks one
//! concrete implementation per trait and wires it into the engine, rather
//! than dispatching on a config-driven backend enum at call time (spec §9's
//! "fixed capability set" redesign flag).

use crate::error::Result;
use crate::types::DocumentChunk;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Produces a dense embedding for a piece of text.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for t in texts {
            out.push(self.embed(t).await?);
        }
        Ok(out)
    }

    fn dim(&self) -> usize;
}

/// A single hit from a dense vector search.
#[derive(Debug, Clone)]
pub struct VectorSearchHit {
    pub chunk: DocumentChunk,
    pub score: f32,
}

/// Dense nearest-neighbour search over an externally managed vector store.
/// Read-only from this workspace's perspective (spec §1: no ingestion, no
/// concurrent corpus writes during serving).
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(&self, query_embedding: &[f32], top_k: usize) -> Result<Vec<VectorSearchHit>>;
}

/// A single hit from a sparse/keyword search.
#[derive(Debug, Clone)]
pub struct SparseSearchHit {
    pub chunk: DocumentChunk,
    pub score: f32,
}

/// Keyword/BM25-style search, run in parallel with `VectorIndex::search` in
/// the hybrid and advanced strategies.
#[async_trait]
pub trait SparseIndex: Send + Sync {
    async fn search(&self, query_text: &str, top_k: usize) -> Result<Vec<SparseSearchHit>>;
}

/// Cross-encoder relevance scoring of (query, document) pairs. Implementors
/// may apply their own internal cascading/prefiltering; callers only see
/// final per-document scores, in the same order as the input slice.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>>;
}

/// One chunk of a streamed generation.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    pub delta: String,
    pub is_final: bool,
}

/// A generation request: a fully composed prompt plus sampling parameters.
/// Prompt composition (system instructions, numbered sources, conversation
/// summary) happens in the Answer Generator (spec §4.7); this trait only
/// sees the final string.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

#[derive(Debug, Clone)]
pub struct GenerateResponse {
    pub text: String,
    pub tokens: usize,
}

/// Text generation, with streaming as a first-class, cancellable operation
/// (spec §4.7/§5: dropping the returned stream must stop generation at the
/// next suspension point).
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse>;

    fn generate_stream<'a>(
        &'a self,
        request: GenerateRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send + 'a>>;

    async fn is_available(&self) -> bool;

    fn model_name(&self) -> &str;
}
