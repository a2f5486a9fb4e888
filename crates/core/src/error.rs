//! Workspace-wide error type.
//!
//! Every crate defines its own `thiserror` error enum for its internal
//! failure modes and converts into this one at the crate boundary, mirroring
//! how the retrieval/llm/server layers each keep a local error type that
//! folds into a single top-level type the HTTP façade maps to status codes.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type. Variants line up with the failure modes in spec §7
/// so `ragq-server` can map each one to a fixed HTTP status without
/// inspecting the message text.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or oversized input (empty query, query over `max_query_chars`).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Bounded work queue is full; caller should back off and retry.
    #[error("overloaded")]
    Overloaded,

    /// A required external dependency (vector index, sparse index, LLM,
    /// cache store) did not respond after retries.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The global per-request deadline elapsed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Retrieval found no usable evidence; the engine still returns a
    /// well-formed low-confidence answer, this variant is for callers that
    /// need to distinguish it from a real failure.
    #[error("insufficient evidence")]
    InsufficientEvidence,

    #[error("retrieval error: {0}")]
    Retrieval(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("memory error: {0}")]
    Memory(String),

    #[error("llm error: {0}")]
    Llm(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}
