//! Application State
//!
//! Shared state across all handlers.

use std::sync::Arc;

use parking_lot::RwLock;
use ragq_config::{load_settings, Settings};
use ragq_engine::QueryEngine;

use crate::rate_limit::RateLimiter;

/// Application state. Cheap to `Clone` (every field is an `Arc`), as axum
/// requires for its `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// Wrapped in `RwLock` to support `/admin/reload-config` hot-reload.
    pub config: Arc<RwLock<Settings>>,
    pub engine: Arc<QueryEngine>,
    pub rate_limiter: Arc<RateLimiter>,
    env: Option<String>,
}

impl AppState {
    pub fn new(config: Settings, engine: QueryEngine) -> Self {
        let rate_limiter =
            RateLimiter::new(config.rate_limit.requests_per_minute, config.rate_limit.burst, config.rate_limit.enabled);
        Self {
            config: Arc::new(RwLock::new(config)),
            engine: Arc::new(engine),
            rate_limiter: Arc::new(rate_limiter),
            env: None,
        }
    }

    pub fn with_env(mut self, env: Option<String>) -> Self {
        self.env = env;
        self
    }

    pub fn get_config(&self) -> parking_lot::RwLockReadGuard<'_, Settings> {
        self.config.read()
    }

    /// Reloads configuration from disk. Some settings (CORS, server port)
    /// only take effect on the next process start.
    pub fn reload_config(&self) -> Result<(), String> {
        let new_config =
            load_settings(self.env.as_deref()).map_err(|e| format!("failed to reload config: {e}"))?;
        *self.config.write() = new_config;
        tracing::info!("configuration reloaded successfully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragq_cache::{DashMapCacheStore, MultiStageCache};
    use ragq_llm::DeterministicLanguageModel;
    use ragq_memory::{MemoryConfig, SessionStore};
    use ragq_retrieval::{AdaptiveRetriever, CascadedReranker, EmbeddingConfig, RerankerConfig, RetrieverDeps, SimpleEmbedder, SynonymExpander};
    use std::collections::HashSet;
    use std::time::Duration;

    fn test_engine() -> QueryEngine {
        let embedder = Arc::new(SimpleEmbedder::new(EmbeddingConfig::default()));
        let deps = RetrieverDeps {
            embedder: embedder.clone(),
            vector_index: Arc::new(NullVectorIndex),
            sparse_index: None,
            reranker: Arc::new(CascadedReranker::simple(RerankerConfig::default())),
            expander: SynonymExpander::empty(),
        };
        QueryEngine::new(ragq_engine::QueryEngineDeps {
            retriever: AdaptiveRetriever::new(deps),
            cache: MultiStageCache::new(Arc::new(DashMapCacheStore::new())),
            sessions: SessionStore::new(MemoryConfig::default()),
            model: Arc::new(DeterministicLanguageModel::default()),
            embedder,
            domain_vocabulary: HashSet::new(),
            max_chars_per_doc: 3200,
            max_concurrent_requests: 16,
            global_deadline: Duration::from_secs(10),
        })
    }

    struct NullVectorIndex;

    #[async_trait::async_trait]
    impl ragq_core::VectorIndex for NullVectorIndex {
        async fn search(&self, _query_embedding: &[f32], _top_k: usize) -> ragq_core::Result<Vec<ragq_core::VectorSearchHit>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn new_state_wires_rate_limiter_from_config() {
        let mut config = Settings::default();
        config.rate_limit.requests_per_minute = 42;
        let state = AppState::new(config, test_engine());
        assert_eq!(state.get_config().rate_limit.requests_per_minute, 42);
    }
}
