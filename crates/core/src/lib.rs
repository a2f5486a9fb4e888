//! Core types and traits for the retrieval-augmented query engine.
//!
//! This crate provides the foundations every other crate in the workspace
//! builds on:
//! - the data model shared across retrieval, caching, memory and generation
//! - the top-level error type
//! - the pluggable-backend traits (`Embedder`, `VectorIndex`, `SparseIndex`,
//!   `Reranker`, `LanguageModel`) that let concrete implementations be
//!   selected at startup instead of dispatched on at runtime

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    Answer, CacheEntry, CacheStage, Citation, ConversationTurn, DocumentChunk, Explanation,
    Query, QueryParams, RetrievalResult, RetrievalStrategy, ScoredChunk, SourceRef, Timing,
};

pub use traits::{
    Embedder, GenerateRequest, GenerateResponse, LanguageModel, Reranker, SparseIndex,
    SparseSearchHit, StreamChunk, VectorIndex, VectorSearchHit,
};
