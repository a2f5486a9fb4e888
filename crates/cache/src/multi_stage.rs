//! The exact/normalized/semantic multi-stage cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ragq_core::{Answer, CacheEntry, CacheStage, QueryParams};

use crate::store::CacheStore;

/// Fields of `QueryParams` that change what a cached answer means. Two
/// requests with the same query text but different `final_k`/thresholds are
/// not interchangeable, so they must not collide on the same cache key.
/// Exposed as [`crate::fingerprint`] so callers outside this crate (the
/// single-flight dedup key in `ragq-engine`) can collide on exactly the
/// same key the cache itself uses.
pub fn param_fingerprint(params: &QueryParams) -> String {
    format!(
        "fk={}:rk={}:ik={}:st={}:vt={}",
        params.final_k, params.rerank_k, params.initial_k, params.semantic_threshold, params.validation_threshold
    )
}

fn exact_key(raw_query: &str, params: &QueryParams) -> String {
    format!("{raw_query}|{}", param_fingerprint(params))
}

fn normalized_key(normalized_query: &str, params: &QueryParams) -> String {
    format!("{normalized_query}|{}", param_fingerprint(params))
}

pub enum CacheLookup {
    Hit { answer: Answer, stage: CacheStage },
    Miss,
}

#[derive(Debug, Default)]
pub struct CacheStatsSnapshot {
    pub hits_exact: u64,
    pub hits_normalized: u64,
    pub hits_semantic: u64,
    pub misses: u64,
    pub semantic_rejected: u64,
}

#[derive(Default)]
struct Counters {
    hits_exact: AtomicU64,
    hits_normalized: AtomicU64,
    hits_semantic: AtomicU64,
    misses: AtomicU64,
    semantic_rejected: AtomicU64,
}

/// Jaccard overlap `|A ∩ B| / |A ∪ B|` between two chunk-id sets.
fn jaccard_overlap(a: &[String], b: &[String]) -> f32 {
    use std::collections::HashSet;
    let set_a: HashSet<&String> = a.iter().collect();
    let set_b: HashSet<&String> = b.iter().collect();

    if set_a.is_empty() && set_b.is_empty() {
        return 0.0;
    }

    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f32 / union.max(1) as f32
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

pub struct MultiStageCache {
    store: Arc<dyn CacheStore>,
    counters: Counters,
}

impl MultiStageCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            counters: Counters::default(),
        }
    }

    /// §4.6 Get: exact, then normalized, then (if retrieval already ran)
    /// semantic with Jaccard-overlap validation.
    pub async fn get(
        &self,
        raw_query: &str,
        normalized_query: &str,
        params: &QueryParams,
        retrieved_chunk_ids: Option<&[String]>,
        embedding: Option<&[f32]>,
    ) -> CacheLookup {
        if let Some(entry) = self.store.get_exact(&exact_key(raw_query, params)).await {
            self.counters.hits_exact.fetch_add(1, Ordering::Relaxed);
            return CacheLookup::Hit {
                answer: entry.answer,
                stage: CacheStage::Exact,
            };
        }

        if let Some(entry) = self
            .store
            .get_normalized(&normalized_key(normalized_query, params))
            .await
        {
            self.counters.hits_normalized.fetch_add(1, Ordering::Relaxed);
            return CacheLookup::Hit {
                answer: entry.answer,
                stage: CacheStage::Normalized,
            };
        }

        if let (Some(chunk_ids), Some(embedding)) = (retrieved_chunk_ids, embedding) {
            let mut candidates: Vec<(f32, CacheEntry)> = self
                .store
                .semantic_entries()
                .await
                .into_iter()
                .map(|record| (cosine_similarity(&record.embedding, embedding), record.entry))
                .filter(|(similarity, _)| *similarity >= params.semantic_threshold)
                .collect();

            candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
            candidates.truncate(params.max_semantic_candidates);

            for (_, entry) in candidates {
                let overlap = jaccard_overlap(&entry.retrieved_chunk_ids, chunk_ids);
                if overlap >= params.validation_threshold {
                    self.counters.hits_semantic.fetch_add(1, Ordering::Relaxed);
                    return CacheLookup::Hit {
                        answer: entry.answer,
                        stage: CacheStage::Semantic,
                    };
                }
                self.counters.semantic_rejected.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        CacheLookup::Miss
    }

    /// §4.6 Put: exact + normalized unconditionally; semantic only when both
    /// an embedding and retrieved chunk ids are available.
    pub async fn put(
        &self,
        raw_query: &str,
        normalized_query: &str,
        params: &QueryParams,
        answer: Answer,
        retrieved_chunk_ids: Vec<String>,
        embedding: Option<Vec<f32>>,
    ) {
        let entry = CacheEntry {
            answer,
            retrieved_chunk_ids,
            embedding: embedding.clone(),
            stored_at: chrono::Utc::now(),
        };

        let exact_ttl = Duration::from_secs(params.ttl_exact_secs);

        self.store
            .put_exact(exact_key(raw_query, params), entry.clone(), exact_ttl)
            .await;
        self.store
            .put_normalized(normalized_key(normalized_query, params), entry.clone(), exact_ttl)
            .await;

        if let Some(embedding) = embedding {
            if !entry.retrieved_chunk_ids.is_empty() {
                let semantic_ttl = Duration::from_secs(params.ttl_semantic_secs);
                self.store
                    .put_semantic(
                        normalized_key(normalized_query, params),
                        embedding,
                        entry,
                        semantic_ttl,
                    )
                    .await;
            }
        }
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits_exact: self.counters.hits_exact.load(Ordering::Relaxed),
            hits_normalized: self.counters.hits_normalized.load(Ordering::Relaxed),
            hits_semantic: self.counters.hits_semantic.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            semantic_rejected: self.counters.semantic_rejected.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DashMapCacheStore;
    use ragq_core::{Explanation, Timing};

    fn make_answer(text: &str) -> Answer {
        Answer {
            text: text.to_string(),
            citations: vec![],
            sources: vec![],
            confidence: 0.9,
            explanation: Explanation::default(),
            timing: Timing::default(),
            from_cache: false,
            cache_stage: None,
        }
    }

    fn cache() -> MultiStageCache {
        MultiStageCache::new(Arc::new(DashMapCacheStore::new()))
    }

    #[tokio::test]
    async fn exact_hit_after_put() {
        let cache = cache();
        let params = QueryParams::default();
        cache
            .put(
                "What is RAG?",
                "what is rag",
                &params,
                make_answer("RAG is..."),
                vec!["c1".to_string()],
                None,
            )
            .await;

        let lookup = cache.get("What is RAG?", "what is rag", &params, None, None).await;
        match lookup {
            CacheLookup::Hit { stage, answer } => {
                assert_eq!(stage, CacheStage::Exact);
                assert_eq!(answer.text, "RAG is...");
            }
            CacheLookup::Miss => panic!("expected exact hit"),
        }
    }

    #[tokio::test]
    async fn normalized_hit_on_whitespace_variant() {
        let cache = cache();
        let params = QueryParams::default();
        cache
            .put(
                "What is RAG?",
                "what is rag",
                &params,
                make_answer("RAG is..."),
                vec!["c1".to_string()],
                None,
            )
            .await;

        let lookup = cache
            .get("  what is rag  ", "what is rag", &params, None, None)
            .await;
        assert!(matches!(
            lookup,
            CacheLookup::Hit {
                stage: CacheStage::Normalized,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn semantic_reject_below_validation_threshold() {
        let cache = cache();
        let mut params = QueryParams::default();
        params.validation_threshold = 0.80;

        cache
            .put(
                "What are Air Force social functions?",
                "what are air force social functions",
                &params,
                make_answer("..."),
                vec!["s1".to_string(), "s2".to_string(), "s3".to_string()],
                Some(vec![1.0, 0.0, 0.0]),
            )
            .await;

        let lookup = cache
            .get(
                "Define social functions in the Air Force",
                "define social functions in the air force",
                &params,
                Some(&["s1".to_string(), "s2".to_string(), "s4".to_string()]),
                Some(&[1.0, 0.0, 0.0]),
            )
            .await;

        assert!(matches!(lookup, CacheLookup::Miss));
        assert_eq!(cache.stats().semantic_rejected, 1);
    }

    #[tokio::test]
    async fn semantic_accept_with_lowered_threshold() {
        let cache = cache();
        let mut params = QueryParams::default();
        params.validation_threshold = 0.4;

        cache
            .put(
                "What are Air Force social functions?",
                "what are air force social functions",
                &params,
                make_answer("..."),
                vec!["s1".to_string(), "s2".to_string(), "s3".to_string()],
                Some(vec![1.0, 0.0, 0.0]),
            )
            .await;

        let lookup = cache
            .get(
                "Define social functions in the Air Force",
                "define social functions in the air force",
                &params,
                Some(&["s1".to_string(), "s2".to_string(), "s4".to_string()]),
                Some(&[1.0, 0.0, 0.0]),
            )
            .await;

        assert!(matches!(
            lookup,
            CacheLookup::Hit {
                stage: CacheStage::Semantic,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn empty_cache_returns_miss_and_zero_semantic_rejected() {
        let cache = cache();
        let params = QueryParams::default();
        let lookup = cache.get("anything", "anything", &params, None, None).await;
        assert!(matches!(lookup, CacheLookup::Miss));
        assert_eq!(cache.stats().semantic_rejected, 0);
    }

    #[test]
    fn jaccard_overlap_matches_spec_example() {
        let a = vec!["s1".to_string(), "s2".to_string(), "s3".to_string()];
        let b = vec!["s1".to_string(), "s2".to_string(), "s4".to_string()];
        assert_eq!(jaccard_overlap(&a, &b), 2.0 / 4.0);
    }
}
