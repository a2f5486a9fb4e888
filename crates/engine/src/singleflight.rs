//! Per-fingerprint single-flight execution (§5): concurrent identical
//! requests share one in-flight generation instead of each re-running the
//! full pipeline.

use std::sync::Arc;

use dashmap::DashMap;
use ragq_core::{Answer, Error};
use tokio::sync::watch;

type ResultSlot = Result<Answer, String>;

/// Keyed by the same fingerprint the cache uses (query + param fingerprint),
/// so two callers that would also collide on a cache key collide here too.
#[derive(Default)]
pub struct SingleFlight {
    inflight: DashMap<String, watch::Receiver<Option<ResultSlot>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `produce` for the first caller with a given `key`; any caller
    /// that arrives while it's still running awaits the same result instead
    /// of starting a second one. The entry is removed once the leader's
    /// future resolves, so the next *new* query with this key runs fresh.
    pub async fn run<F, Fut>(&self, key: String, produce: F) -> Result<Answer, Error>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Answer, Error>>,
    {
        let mut receiver = match self.inflight.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => entry.get().clone(),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(None);
                entry.insert(rx);
                let result = produce().await;
                let stored = match &result {
                    Ok(answer) => Ok(answer.clone()),
                    Err(e) => Err(e.to_string()),
                };
                let _ = tx.send(Some(stored));
                self.inflight.remove(&key);
                return result;
            }
        };

        loop {
            if let Some(result) = receiver.borrow().clone() {
                return result.map_err(|msg| Error::Internal(format!("single-flight leader failed: {msg}")));
            }
            if receiver.changed().await.is_err() {
                return Err(Error::Internal("single-flight leader dropped".to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragq_core::Explanation;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn answer(text: &str) -> Answer {
        Answer {
            text: text.to_string(),
            citations: vec![],
            sources: vec![],
            confidence: 1.0,
            explanation: Explanation::default(),
            timing: Default::default(),
            from_cache: false,
            cache_stage: None,
        }
    }

    #[tokio::test]
    async fn concurrent_duplicate_keys_produce_once() {
        let sf = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let sf = sf.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                sf.run("k".to_string(), || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(answer("shared"))
                })
                .await
            }));
        }

        for h in handles {
            let a = h.await.unwrap().unwrap();
            assert_eq!(a.text, "shared");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_keys_both_run() {
        let sf = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let c1 = calls.clone();
        let r1 = sf.run("a".to_string(), || async move {
            c1.fetch_add(1, Ordering::SeqCst);
            Ok(answer("a"))
        });
        let c2 = calls.clone();
        let r2 = sf.run("b".to_string(), || async move {
            c2.fetch_add(1, Ordering::SeqCst);
            Ok(answer("b"))
        });

        let (a1, a2) = tokio::join!(r1, r2);
        assert_eq!(a1.unwrap().text, "a");
        assert_eq!(a2.unwrap().text, "b");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
