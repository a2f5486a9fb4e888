//! Bounded per-session conversation memory with periodic summarization and
//! follow-up detection (spec §4.5).

use std::collections::{HashSet, VecDeque};

use ragq_core::ConversationTurn;

use crate::summarizer::Summarizer;
use crate::MemoryError;

const FOLLOW_UP_PREFIXES: &[&str] = &[
    "it", "they", "that", "those", "this", "what about", "and", "also",
];
const FOLLOW_UP_TOKEN_CEILING: usize = 8;
const SUMMARY_MAX_WORDS: usize = 200;

#[derive(Debug, Clone, Copy)]
pub struct MemoryConfig {
    pub window: usize,
    pub summarize_every: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            window: 10,
            summarize_every: 5,
        }
    }
}

/// One session's conversation state. Not `Send`-shared directly; callers
/// hold it behind their own synchronization (see `SessionStore`).
pub struct ConversationMemory {
    config: MemoryConfig,
    turns: VecDeque<ConversationTurn>,
    summary: Option<String>,
    turns_since_summary: usize,
}

impl ConversationMemory {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            turns: VecDeque::new(),
            summary: None,
            turns_since_summary: 0,
        }
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn turns(&self) -> &VecDeque<ConversationTurn> {
        &self.turns
    }

    /// Append a completed turn, running summarization if the window has
    /// accumulated `summarize_every` turns since the last one.
    pub async fn append(
        &mut self,
        turn: ConversationTurn,
        summarizer: &dyn Summarizer,
    ) -> Result<(), MemoryError> {
        self.turns.push_back(turn);
        self.turns_since_summary += 1;

        while self.turns.len() > self.config.window {
            self.turns.pop_front();
        }

        if self.turns_since_summary >= self.config.summarize_every && self.turns.len() >= 2 {
            self.summarize_oldest_half(summarizer).await?;
        }

        Ok(())
    }

    async fn summarize_oldest_half(&mut self, summarizer: &dyn Summarizer) -> Result<(), MemoryError> {
        let evict_count = self.turns.len() / 2;
        if evict_count == 0 {
            return Ok(());
        }

        let to_summarize: Vec<ConversationTurn> =
            self.turns.drain(..evict_count).collect();

        let new_summary = summarizer.summarize(&to_summarize, SUMMARY_MAX_WORDS).await?;

        self.summary = Some(match self.summary.take() {
            Some(existing) => {
                let combined = format!("{existing} {new_summary}");
                truncate_words(&combined, SUMMARY_MAX_WORDS)
            }
            None => new_summary,
        });

        self.turns_since_summary = 0;
        Ok(())
    }

    /// §4.5 follow-up detection: short query, pronoun/reference prefix, or
    /// no recognized domain noun phrase.
    pub fn is_follow_up(&self, normalized_query: &str, domain_vocabulary: &HashSet<String>) -> bool {
        let tokens: Vec<&str> = normalized_query.split_whitespace().collect();

        if tokens.len() < FOLLOW_UP_TOKEN_CEILING {
            return true;
        }

        if starts_with_follow_up_prefix(&tokens) {
            return true;
        }

        if !domain_vocabulary.is_empty() && !tokens.iter().any(|t| domain_vocabulary.contains(*t)) {
            return true;
        }

        false
    }

    /// Enrichment prefix appended to retrieval search text only (never to
    /// the answer prompt verbatim): the running summary plus the last two
    /// turns.
    pub fn enrichment_prefix(&self) -> String {
        let mut parts = Vec::new();

        if let Some(summary) = &self.summary {
            parts.push(summary.clone());
        }

        for turn in self.turns.iter().rev().take(2).collect::<Vec<_>>().into_iter().rev() {
            parts.push(format!("{} {}", turn.query, turn.answer));
        }

        parts.join(" ")
    }
}

/// Whole-word match against `FOLLOW_UP_PREFIXES`, including the multi-word
/// entry `"what about"`; a plain `starts_with` on the raw string would also
/// match unrelated tokens like "itemize" or "anderson" that merely share a
/// leading substring with a single-word prefix.
fn starts_with_follow_up_prefix(tokens: &[&str]) -> bool {
    FOLLOW_UP_PREFIXES.iter().any(|prefix| {
        let prefix_tokens: Vec<&str> = prefix.split_whitespace().collect();
        tokens.len() >= prefix_tokens.len() && tokens[..prefix_tokens.len()] == prefix_tokens[..]
    })
}

fn truncate_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        text.to_string()
    } else {
        words[words.len() - max_words..].join(" ")
    }
}
