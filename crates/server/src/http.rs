//! HTTP endpoints (§6): `POST /query`, `POST /query/stream` (SSE),
//! `POST /conversation/clear`, `GET /health`, `GET /ready`, `GET /metrics`,
//! `POST /admin/reload-config`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use futures::stream::Stream;
use futures::StreamExt;
use ragq_core::{Error, Query, RetrievalStrategy};
use serde::{Deserialize, Serialize};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::metrics::{init_metrics, record_error, record_query_latency_ms, record_request};
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let config = state.get_config();
    let cors_layer = build_cors_layer(&config.server.cors_origins, config.server.cors_enabled);
    drop(config);

    let prometheus_handle = init_metrics();

    Router::new()
        .route("/query", post(query_handler))
        .route("/query/stream", post(query_stream_handler))
        .route("/conversation/clear", post(clear_conversation_handler))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(move || metrics_handler(prometheus_handle.clone())))
        .route("/admin/reload-config", post(reload_config_handler))
        .layer(Extension(state.config.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors_layer)
        .with_state(state)
}

/// Configured origins over wildcard, the same precedence the teacher's
/// `build_cors_layer` used: disabled means permissive (dev only), an empty
/// allowlist falls back to localhost, and §6 requires rejecting `*` in
/// production — enforced earlier by `Settings::validate_server` at startup,
/// so by the time this runs the list is already known-safe.
fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled - allowing all origins (not for production)");
        return CorsLayer::permissive();
    }

    if origins.is_empty() {
        tracing::info!("no CORS origins configured, defaulting to localhost:3000");
        return CorsLayer::new()
            .allow_origin("http://localhost:3000".parse::<HeaderValue>().unwrap())
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!(origin, "invalid CORS origin, skipping");
                None
            })
        })
        .collect();

    if parsed.is_empty() {
        tracing::error!("all configured CORS origins are invalid, falling back to localhost");
        return CorsLayer::new()
            .allow_origin("http://localhost:3000".parse::<HeaderValue>().unwrap())
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any);
    }

    tracing::info!(count = parsed.len(), "CORS configured with explicit origins");
    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .allow_credentials(true)
}

/// §6 `POST /query` request body. `query`/`question` are accepted as
/// aliases, `mode` maps to a `RetrievalStrategy` override.
#[derive(Debug, Deserialize)]
struct QueryRequest {
    #[serde(alias = "question")]
    query: String,
    #[serde(default)]
    mode: Option<QueryMode>,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    include_conversation: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum QueryMode {
    Simple,
    Adaptive,
}

#[derive(Debug, Serialize)]
struct QueryResponse {
    answer: String,
    citations: Vec<CitationDto>,
    sources: Vec<SourceDto>,
    confidence: f32,
    strategy: Option<&'static str>,
    warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
struct CitationDto {
    index: usize,
    chunk_id: String,
}

/// Ordered identically to the citation indices in `answer` (§6 invariant).
#[derive(Debug, Serialize)]
struct SourceDto {
    chunk_id: String,
    excerpt: String,
    score: f32,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn build_query(request: QueryRequest, client_key: &str, rate_limiter: &crate::rate_limit::RateLimiter) -> Result<Query, StatusCode> {
    if rate_limiter.is_enabled() {
        rate_limiter.check(client_key).map_err(|_| StatusCode::TOO_MANY_REQUESTS)?;
    }

    let mut query = Query::new(request.query);
    query.session_id = request.session_id;
    if let Some(top_k) = request.top_k {
        query.params.final_k = top_k;
    }
    query.params.strategy_override = match request.mode {
        Some(QueryMode::Simple) => Some(RetrievalStrategy::SimpleDense),
        Some(QueryMode::Adaptive) | None => None,
    };
    let _ = request.include_conversation;
    Ok(query)
}

async fn query_handler(
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, (StatusCode, Json<ErrorResponse>)> {
    let query = build_query(request, &peer.ip().to_string(), &state.rate_limiter).map_err(|status| {
        record_request("/query", status.as_u16());
        (status, Json(ErrorResponse { error: "rate limit exceeded".to_string() }))
    })?;

    let start = std::time::Instant::now();
    let result = state.engine.query(query).await;
    record_query_latency_ms("query", start.elapsed().as_millis() as u64);

    match result {
        Ok(answer) => {
            record_request("/query", StatusCode::OK.as_u16());
            Ok(Json(QueryResponse {
                answer: answer.text,
                citations: answer
                    .citations
                    .into_iter()
                    .map(|c| CitationDto { index: c.index, chunk_id: c.chunk_id })
                    .collect(),
                sources: answer
                    .sources
                    .into_iter()
                    .map(|s| SourceDto { chunk_id: s.chunk_id, excerpt: s.excerpt, score: s.score })
                    .collect(),
                confidence: answer.confidence,
                strategy: answer.explanation.strategy.map(RetrievalStrategy::as_str),
                warnings: answer.explanation.warnings,
            }))
        }
        Err(err) => {
            let status = crate::status_for_error(&err);
            record_request("/query", status.as_u16());
            record_error(error_kind(&err));
            Err((status, Json(ErrorResponse { error: err.to_string() })))
        }
    }
}

fn error_kind(err: &Error) -> &'static str {
    match err {
        Error::InvalidInput(_) => "invalid_input",
        Error::Overloaded => "overloaded",
        Error::BackendUnavailable(_) => "backend_unavailable",
        Error::DeadlineExceeded => "deadline_exceeded",
        Error::InsufficientEvidence => "insufficient_evidence",
        Error::Retrieval(_) => "retrieval",
        Error::Cache(_) => "cache",
        Error::Memory(_) => "memory",
        Error::Llm(_) => "llm",
        Error::Config(_) => "config",
        Error::Internal(_) => "internal",
    }
}

/// §6 `/query/stream`: a `meta` event with the retrieval summary, `token`
/// events in generation order, a terminal `done` event with citations and
/// confidence.
async fn query_stream_handler(
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, Json<ErrorResponse>)> {
    let query = build_query(request, &peer.ip().to_string(), &state.rate_limiter).map_err(|status| {
        record_request("/query/stream", status.as_u16());
        (status, Json(ErrorResponse { error: "rate limit exceeded".to_string() }))
    })?;

    record_request("/query/stream", StatusCode::OK.as_u16());
    let engine = state.engine.clone();

    let events = async_stream::stream! {
        let stream = engine.query_stream(query);
        futures::pin_mut!(stream);
        while let Some(item) = stream.next().await {
            match item {
                Ok(ragq_engine::StreamEvent::Meta { strategy, sources }) => {
                    let payload = serde_json::json!({
                        "strategy": strategy.map(RetrievalStrategy::as_str),
                        "source_count": sources.len(),
                    });
                    yield Ok(Event::default().event("meta").json_data(payload).unwrap());
                }
                Ok(ragq_engine::StreamEvent::Token(delta)) => {
                    yield Ok(Event::default().event("token").data(delta));
                }
                Ok(ragq_engine::StreamEvent::Done(answer)) => {
                    let payload = serde_json::json!({
                        "citations": answer.citations,
                        "sources": answer.sources,
                        "confidence": answer.confidence,
                    });
                    yield Ok(Event::default().event("done").json_data(payload).unwrap());
                }
                Err(err) => {
                    record_error(error_kind(&err));
                    let payload = serde_json::json!({ "error": err.to_string() });
                    yield Ok(Event::default().event("error").json_data(payload).unwrap());
                }
            }
        }
    };

    Ok(Sse::new(events).keep_alive(axum::response::sse::KeepAlive::new().interval(Duration::from_secs(15))))
}

#[derive(Debug, Deserialize)]
struct ClearConversationRequest {
    session_id: String,
}

async fn clear_conversation_handler(State(state): State<AppState>, Json(request): Json<ClearConversationRequest>) -> StatusCode {
    state.engine.clear_conversation(&request.session_id);
    StatusCode::NO_CONTENT
}

async fn health_check() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

/// Readiness: the vector index, cache, and LLM backend are reachable (§6).
/// The cache and retriever are in-process, so "reachable" there means the
/// engine was constructed successfully; only the LLM backend needs a live
/// network probe.
async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let llm_endpoint = state.get_config().llm.endpoint.clone();
    let llm_url = format!("{llm_endpoint}/api/tags");

    let llm_status = match tokio::time::timeout(Duration::from_secs(2), reqwest::get(&llm_url)).await {
        Ok(Ok(resp)) if resp.status().is_success() => "ok",
        Ok(Ok(_)) => "error",
        Ok(Err(_)) => "unreachable",
        Err(_) => "timeout",
    };
    let ready = llm_status == "ok";

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status_code,
        Json(serde_json::json!({
            "status": if ready { "ready" } else { "not_ready" },
            "checks": {
                "cache": "ok",
                "retriever": "ok",
                "llm_backend": { "status": llm_status, "url": llm_url },
            }
        })),
    )
}

async fn metrics_handler(handle: metrics_exporter_prometheus::PrometheusHandle) -> impl IntoResponse {
    handle.render()
}

async fn reload_config_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.reload_config() {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "success", "message": "configuration reloaded" })),
        ),
        Err(e) => {
            tracing::error!(error = %e, "config reload failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "status": "error", "message": e })))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragq_cache::{DashMapCacheStore, MultiStageCache};
    use ragq_config::Settings;
    use ragq_engine::{QueryEngine, QueryEngineDeps};
    use ragq_llm::DeterministicLanguageModel;
    use ragq_memory::{MemoryConfig, SessionStore};
    use ragq_retrieval::{AdaptiveRetriever, CascadedReranker, EmbeddingConfig, RerankerConfig, RetrieverDeps, SimpleEmbedder, SynonymExpander};
    use std::collections::HashSet;
    use std::sync::Arc;

    struct NullVectorIndex;
    #[async_trait::async_trait]
    impl ragq_core::VectorIndex for NullVectorIndex {
        async fn search(&self, _query_embedding: &[f32], _top_k: usize) -> ragq_core::Result<Vec<ragq_core::VectorSearchHit>> {
            Ok(Vec::new())
        }
    }

    fn test_engine() -> QueryEngine {
        let embedder = Arc::new(SimpleEmbedder::new(EmbeddingConfig::default()));
        let deps = RetrieverDeps {
            embedder: embedder.clone(),
            vector_index: Arc::new(NullVectorIndex),
            sparse_index: None,
            reranker: Arc::new(CascadedReranker::simple(RerankerConfig::default())),
            expander: SynonymExpander::empty(),
        };
        QueryEngine::new(QueryEngineDeps {
            retriever: AdaptiveRetriever::new(deps),
            cache: MultiStageCache::new(Arc::new(DashMapCacheStore::new())),
            sessions: SessionStore::new(MemoryConfig::default()),
            model: Arc::new(DeterministicLanguageModel::default()),
            embedder,
            domain_vocabulary: HashSet::new(),
            max_chars_per_doc: 3200,
            max_concurrent_requests: 16,
            global_deadline: std::time::Duration::from_secs(10),
        })
    }

    #[test]
    fn router_builds_with_default_state() {
        let state = AppState::new(Settings::default(), test_engine());
        let _ = create_router(state);
    }
}
