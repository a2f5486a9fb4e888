//! Query engine server entry point.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ragq_cache::{DashMapCacheStore, MultiStageCache};
use ragq_config::{load_settings, Settings};
use ragq_core::{Embedder, Reranker, VectorIndex};
use ragq_engine::{QueryEngine, QueryEngineDeps};
use ragq_llm::{DeterministicLanguageModel, OllamaConfig, OllamaLanguageModel};
use ragq_memory::{MemoryConfig, SessionStore};
use ragq_retrieval::{
    AdaptiveRetriever, CascadedReranker, EmbeddingConfig, RerankerConfig, RetrieverDeps, SimpleEmbedder,
    SparseConfig, SynonymExpander, TantivySparseIndex, VectorStoreConfig,
};
#[cfg(feature = "onnx")]
use ragq_retrieval::SimpleScorer;
use ragq_server::{create_router, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env = std::env::var("RAGQ_ENV").ok();
    let config = match load_settings(env.as_deref()) {
        Ok(settings) => {
            eprintln!("loaded configuration (env: {})", env.as_deref().unwrap_or("default"));
            settings
        }
        Err(e) => {
            eprintln!("warning: failed to load config: {e}. Using defaults.");
            Settings::default()
        }
    };

    init_tracing(&config);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting query engine server");
    tracing::info!(environment = ?config.environment, "configuration loaded");

    let engine = build_engine(&config).await;
    let state = AppState::new(config.clone(), engine).with_env(env);

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shutdown complete");
    Ok(())
}

/// Wires the retrieval/generation collaborators from `Settings`. Each
/// backend that talks to an external service (vector index, sparse index,
/// reranker, LLM) falls back to an in-process stand-in on init failure so
/// the process still starts in a degraded-but-useful state, mirroring the
/// teacher's persistence/vector-store fallback in its own startup sequence.
async fn build_engine(config: &Settings) -> QueryEngine {
    let embedder: Arc<dyn Embedder> = Arc::new(SimpleEmbedder::new(EmbeddingConfig::default()));

    let vector_index: Arc<dyn VectorIndex> = {
        let vs_config = VectorStoreConfig {
            endpoint: config.retrieval.vector_index_endpoint.clone(),
            collection: config.retrieval.vector_collection.clone(),
            ..VectorStoreConfig::default()
        };
        match ragq_retrieval::QdrantVectorIndex::new(vs_config).await {
            Ok(index) => {
                tracing::info!(endpoint = %config.retrieval.vector_index_endpoint, "vector index connected");
                Arc::new(index)
            }
            Err(e) => {
                tracing::warn!(error = %e, "vector index unavailable, retrieval will find no dense candidates");
                Arc::new(NullVectorIndex)
            }
        }
    };

    let sparse_index = {
        let sparse_config =
            SparseConfig { index_path: Some(config.retrieval.sparse_index_path.clone()), ..SparseConfig::default() };
        match TantivySparseIndex::new(sparse_config) {
            Ok(index) => Some(Arc::new(index) as Arc<dyn ragq_core::SparseIndex>),
            Err(e) => {
                tracing::warn!(error = %e, "sparse index unavailable, hybrid/advanced strategies fall back to dense-only");
                None
            }
        }
    };

    let reranker: Arc<dyn Reranker> = build_reranker(config);

    let retriever = AdaptiveRetriever::new(RetrieverDeps {
        embedder: embedder.clone(),
        vector_index,
        sparse_index,
        reranker,
        expander: SynonymExpander::empty(),
    });

    let model = build_language_model(config);

    let cache = MultiStageCache::new(Arc::new(DashMapCacheStore::new()));
    let sessions = SessionStore::new(MemoryConfig { window: config.memory.window, summarize_every: config.memory.summarize_every });

    QueryEngine::new(QueryEngineDeps {
        retriever,
        cache,
        sessions,
        model,
        embedder,
        domain_vocabulary: HashSet::new(),
        max_chars_per_doc: config.retrieval.max_chars_per_doc,
        max_concurrent_requests: 64,
        global_deadline: Duration::from_secs(30),
    })
}

#[cfg(feature = "onnx")]
fn build_reranker(config: &Settings) -> Arc<dyn Reranker> {
    match (&config.retrieval.reranker_model_path, &config.retrieval.embedder_tokenizer_path) {
        (Some(model_path), Some(tokenizer_path)) => {
            match CascadedReranker::new(model_path, tokenizer_path, RerankerConfig::default()) {
                Ok(reranker) => return Arc::new(reranker),
                Err(e) => tracing::warn!(error = %e, "onnx reranker init failed, falling back to the keyword scorer"),
            }
        }
        _ => tracing::info!("no reranker model path configured, using the keyword scorer"),
    }
    Arc::new(KeywordReranker)
}

/// Keyword-overlap fallback for onnx builds with no model configured;
/// `CascadedReranker::simple` covers the same role in non-onnx builds.
#[cfg(feature = "onnx")]
struct KeywordReranker;

#[cfg(feature = "onnx")]
#[async_trait::async_trait]
impl Reranker for KeywordReranker {
    async fn rerank(&self, query: &str, documents: &[&str]) -> ragq_core::Result<Vec<f32>> {
        Ok(documents.iter().map(|doc| SimpleScorer::score(query, doc)).collect())
    }
}

#[cfg(not(feature = "onnx"))]
fn build_reranker(_config: &Settings) -> Arc<dyn Reranker> {
    Arc::new(CascadedReranker::simple(RerankerConfig::default()))
}

fn build_language_model(config: &Settings) -> Arc<dyn ragq_core::LanguageModel> {
    let ollama_config = OllamaConfig {
        endpoint: config.llm.endpoint.clone(),
        model: config.llm.model.clone(),
        timeout: Duration::from_millis(config.llm.timeout_ms),
        max_retries: config.llm.max_retries,
        ..OllamaConfig::default()
    };
    match OllamaLanguageModel::new(ollama_config) {
        Ok(model) => Arc::new(model),
        Err(e) => {
            tracing::warn!(error = %e, "Ollama backend unavailable, falling back to the deterministic model");
            Arc::new(DeterministicLanguageModel::default())
        }
    }
}

struct NullVectorIndex;

#[async_trait::async_trait]
impl VectorIndex for NullVectorIndex {
    async fn search(&self, _query_embedding: &[f32], _top_k: usize) -> ragq_core::Result<Vec<ragq_core::VectorSearchHit>> {
        Ok(Vec::new())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c, initiating graceful shutdown"),
        _ = terminate => tracing::info!("received SIGTERM, initiating graceful shutdown"),
    }
}

fn init_tracing(config: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("ragq={},tower_http=debug", config.observability.log_level).into());

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if config.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).init();
}
