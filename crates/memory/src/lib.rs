//! Bounded conversation memory: sliding-window turns, periodic
//! summarization, and follow-up detection.

pub mod conversation;
pub mod session;
pub mod summarizer;

pub use conversation::{ConversationMemory, MemoryConfig};
pub use session::SessionStore;
pub use summarizer::{RuleBasedSummarizer, Summarizer};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("summarization error: {0}")]
    Summarization(String),
}

impl From<MemoryError> for ragq_core::Error {
    fn from(err: MemoryError) -> Self {
        ragq_core::Error::Memory(err.to_string())
    }
}
