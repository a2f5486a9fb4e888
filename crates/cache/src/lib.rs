//! Multi-stage answer cache: exact, normalized and validated-semantic
//! layers over a pluggable `CacheStore`.

pub mod multi_stage;
pub mod store;

pub use multi_stage::{param_fingerprint as fingerprint, CacheLookup, CacheStatsSnapshot, MultiStageCache};
pub use ragq_core::CacheStage;
pub use store::{CacheStore, DashMapCacheStore, SemanticRecord};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache store error: {0}")]
    Store(String),
}

impl From<CacheError> for ragq_core::Error {
    fn from(err: CacheError) -> Self {
        ragq_core::Error::Cache(err.to_string())
    }
}
