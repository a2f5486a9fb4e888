//! HTTP facade for the query engine: REST + SSE endpoints, CORS, rate
//! limiting, and health checks (§6).

pub mod http;
pub mod metrics;
pub mod rate_limit;
pub mod state;

pub use http::create_router;
pub use metrics::{init_metrics, record_error, record_query_latency_ms, record_request};
pub use rate_limit::{RateLimitError, RateLimiter};
pub use state::AppState;

use axum::http::StatusCode;
use ragq_core::Error;

/// Maps an engine `Error` to the HTTP status codes named in §6
/// (200/400/429/503/504). `InsufficientEvidence` is no longer constructed by
/// `ragq-engine` (empty retrieval now returns a successful low-confidence
/// answer) but is mapped defensively should a caller construct one directly.
pub fn status_for_error(err: &Error) -> StatusCode {
    match err {
        Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
        Error::Overloaded => StatusCode::TOO_MANY_REQUESTS,
        Error::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        Error::InsufficientEvidence => StatusCode::OK,
        Error::Retrieval(_) | Error::Cache(_) | Error::Memory(_) | Error::Llm(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        Error::Config(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
