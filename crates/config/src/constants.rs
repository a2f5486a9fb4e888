//! Centralized constants for the query engine.
//!
//! This module holds generic infrastructure defaults only: service
//! endpoints and timeouts. Tuning values that are genuinely per-request
//! overridable (final_k, rrf_k, thresholds, TTLs...) live on
//! `ragq_core::QueryParams`/`Settings`, not here.
//!
//! DO NOT add business-specific constants here.

/// Service endpoints (env-overridable, with fallback defaults).
pub mod endpoints {
    use once_cell::sync::Lazy;

    /// Ollama-compatible LLM endpoint (env: `OLLAMA_URL`).
    pub static OLLAMA_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("OLLAMA_URL").unwrap_or_else(|_| "http://localhost:11434".to_string())
    });

    /// Qdrant vector store endpoint (env: `QDRANT_URL`).
    pub static QDRANT_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("QDRANT_URL").unwrap_or_else(|_| "http://127.0.0.1:6333".to_string())
    });
}

/// Timeouts, in milliseconds unless noted.
pub mod timeouts {
    /// Per-stage suspension-point timeout (embed/vector/sparse/rerank call).
    pub const STAGE_DEFAULT_MS: u64 = 5_000;

    /// LLM generation request timeout.
    pub const LLM_REQUEST_MS: u64 = 60_000;

    /// Global per-request deadline (spec §5/§7 `DeadlineExceeded`).
    pub const GLOBAL_DEADLINE_MS: u64 = 30_000;

    /// Cache-store I/O timeout; cache failures never fail the request
    /// (spec §7), so this only bounds how long we wait before degrading.
    pub const CACHE_IO_MS: u64 = 200;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_positive() {
        assert!(timeouts::STAGE_DEFAULT_MS > 0);
        assert!(timeouts::LLM_REQUEST_MS > 0);
        assert!(timeouts::GLOBAL_DEADLINE_MS > 0);
        assert!(timeouts::CACHE_IO_MS > 0);
    }
}
