//! Adaptive retrieval: query normalization, synonym expansion, complexity
//! classification, and dense/sparse fusion with reranking.
//!
//! - `normalizer`: canonical-form query normalization
//! - `expander`: additive synonym expansion
//! - `classifier`: complexity scoring and strategy selection
//! - `embeddings`: `Embedder` implementations (ONNX + deterministic fallback)
//! - `vector_store`: Qdrant-backed `VectorIndex`
//! - `sparse_search`: Tantivy-backed `SparseIndex`
//! - `reranker`: cascaded cross-encoder `Reranker`
//! - `retriever`: `AdaptiveRetriever`, tying the above into the three
//!   strategies

pub mod classifier;
pub mod embeddings;
pub mod expander;
pub mod normalizer;
pub mod reranker;
pub mod retriever;
pub mod sparse_search;
pub mod vector_store;

pub use classifier::{ClassifierOutput, classify};
pub use embeddings::{EmbeddingConfig, OnnxEmbedder, SimpleEmbedder};
pub use expander::SynonymExpander;
pub use normalizer::normalize;
pub use reranker::{CascadedReranker, RerankerConfig, SimpleScorer};
pub use retriever::{AdaptiveRetriever, RetrieverDeps};
pub use sparse_search::{SparseConfig, TantivySparseIndex};
pub use vector_store::{QdrantVectorIndex, VectorStoreConfig};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("vector store error: {0}")]
    VectorStore(String),

    #[error("search error: {0}")]
    Search(String),

    #[error("reranker error: {0}")]
    Reranker(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("connection error: {0}")]
    Connection(String),
}

impl From<RetrievalError> for ragq_core::Error {
    fn from(err: RetrievalError) -> Self {
        ragq_core::Error::Retrieval(err.to_string())
    }
}
