//! Per-session memory registry. §5: "one instance per session; mutation is
//! serialized within that session. Inter-session interactions are absent."

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::conversation::{ConversationMemory, MemoryConfig};

/// The outer session-id -> handle map is a short-lived, sync-only critical
/// section (a `parking_lot::Mutex`); each session's `ConversationMemory` is
/// behind a `tokio::sync::Mutex` instead, since `append` is async (its
/// `Summarizer` may be LLM-backed) and callers need to hold the guard across
/// that await.
pub struct SessionStore {
    config: MemoryConfig,
    sessions: SyncMutex<HashMap<String, Arc<AsyncMutex<ConversationMemory>>>>,
}

impl SessionStore {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            sessions: SyncMutex::new(HashMap::new()),
        }
    }

    /// Fetch (creating if absent) the memory handle for a session. The
    /// returned `Arc<Mutex<_>>` serializes access within that session only.
    pub fn get_or_create(&self, session_id: &str) -> Arc<AsyncMutex<ConversationMemory>> {
        let mut sessions = self.sessions.lock();
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(ConversationMemory::new(self.config))))
            .clone()
    }

    pub fn clear(&self, session_id: &str) {
        self.sessions.lock().remove(session_id);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_returns_same_instance_for_same_session() {
        let store = SessionStore::new(MemoryConfig::default());
        let a = store.get_or_create("s1");
        let b = store.get_or_create("s1");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn clear_removes_session_state() {
        let store = SessionStore::new(MemoryConfig::default());
        store.get_or_create("s1");
        assert_eq!(store.session_count(), 1);
        store.clear("s1");
        assert_eq!(store.session_count(), 0);
    }

    #[test]
    fn different_sessions_get_independent_memory() {
        let store = SessionStore::new(MemoryConfig::default());
        let a = store.get_or_create("s1");
        let b = store.get_or_create("s2");
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
