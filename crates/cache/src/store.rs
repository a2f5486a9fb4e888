//! `CacheStore`: the pluggable backing store for the three cache layers.
//!
//! `DashMapCacheStore` is the in-process default. A production deployment
//! swaps in a Redis-backed implementation of the same trait; the multi-stage
//! logic in `multi_stage.rs` never sees the difference.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use ragq_core::CacheEntry;

/// One row of the semantic layer: the query embedding it was stored under,
/// alongside the entry itself.
#[derive(Clone)]
pub struct SemanticRecord {
    pub embedding: Vec<f32>,
    pub entry: CacheEntry,
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get_exact(&self, key: &str) -> Option<CacheEntry>;
    async fn put_exact(&self, key: String, entry: CacheEntry, ttl: Duration);

    async fn get_normalized(&self, key: &str) -> Option<CacheEntry>;
    async fn put_normalized(&self, key: String, entry: CacheEntry, ttl: Duration);

    /// All live semantic entries. Similarity scoring and the
    /// `max_semantic_candidates` cap are applied by the caller, not the
    /// store, since they depend on the query embedding.
    async fn semantic_entries(&self) -> Vec<SemanticRecord>;
    async fn put_semantic(&self, key: String, embedding: Vec<f32>, entry: CacheEntry, ttl: Duration);
}

struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// In-process, single-node cache store. Lazily evicts expired entries on
/// access rather than running a background sweep.
#[derive(Default)]
pub struct DashMapCacheStore {
    exact: DashMap<String, Expiring<CacheEntry>>,
    normalized: DashMap<String, Expiring<CacheEntry>>,
    semantic: DashMap<String, Expiring<SemanticRecord>>,
}

impl DashMapCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for DashMapCacheStore {
    async fn get_exact(&self, key: &str) -> Option<CacheEntry> {
        get_live(&self.exact, key)
    }

    async fn put_exact(&self, key: String, entry: CacheEntry, ttl: Duration) {
        self.exact.insert(key, Expiring::new(entry, ttl));
    }

    async fn get_normalized(&self, key: &str) -> Option<CacheEntry> {
        get_live(&self.normalized, key)
    }

    async fn put_normalized(&self, key: String, entry: CacheEntry, ttl: Duration) {
        self.normalized.insert(key, Expiring::new(entry, ttl));
    }

    async fn semantic_entries(&self) -> Vec<SemanticRecord> {
        let mut live = Vec::new();
        let mut dead_keys = Vec::new();

        for item in self.semantic.iter() {
            if item.value().is_live() {
                live.push(item.value().value.clone());
            } else {
                dead_keys.push(item.key().clone());
            }
        }
        for key in dead_keys {
            self.semantic.remove(&key);
        }

        live
    }

    async fn put_semantic(&self, key: String, embedding: Vec<f32>, entry: CacheEntry, ttl: Duration) {
        self.semantic
            .insert(key, Expiring::new(SemanticRecord { embedding, entry }, ttl));
    }
}

fn get_live(map: &DashMap<String, Expiring<CacheEntry>>, key: &str) -> Option<CacheEntry> {
    if let Some(item) = map.get(key) {
        if item.is_live() {
            return Some(item.value.clone());
        }
    }
    map.remove(key);
    None
}
