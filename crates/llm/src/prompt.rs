//! Prompt composition for the Answer Generator (§4.7): system instructions,
//! conversation summary, numbered sources, and the user question.

use ragq_core::ScoredChunk;

const SYSTEM_INSTRUCTIONS: &str = "You are a helpful assistant that answers questions using only the numbered sources provided below. Cite sources inline using [n] where n is the source number. If the sources do not contain enough information to answer, say so plainly.";

pub struct PromptBuilder {
    max_chars_per_doc: usize,
}

impl PromptBuilder {
    pub fn new(max_chars_per_doc: usize) -> Self {
        Self { max_chars_per_doc }
    }

    /// Build the final prompt. `sources` must already be in citation order;
    /// the numbering assigned here (1-indexed) is what citation indices in
    /// the generated text refer to.
    pub fn build(&self, query: &str, sources: &[ScoredChunk], conversation_summary: Option<&str>) -> String {
        let mut prompt = String::new();
        prompt.push_str(SYSTEM_INSTRUCTIONS);
        prompt.push_str("\n\n");

        if let Some(summary) = conversation_summary {
            if !summary.is_empty() {
                prompt.push_str("Conversation so far: ");
                prompt.push_str(summary);
                prompt.push_str("\n\n");
            }
        }

        if sources.is_empty() {
            prompt.push_str("No sources were found for this question.\n\n");
        } else {
            prompt.push_str("Sources:\n");
            for (i, source) in sources.iter().enumerate() {
                let (text, truncated) = truncate(&source.chunk.text, self.max_chars_per_doc);
                prompt.push_str(&format!("[{}] {}", i + 1, text));
                if truncated {
                    prompt.push_str(" (truncated)");
                }
                prompt.push('\n');
            }
            prompt.push('\n');
        }

        prompt.push_str("Question: ");
        prompt.push_str(query);
        prompt.push('\n');
        prompt
    }
}

fn truncate(text: &str, max_chars: usize) -> (String, bool) {
    let char_count = text.chars().count();
    if char_count <= max_chars {
        (text.to_string(), false)
    } else {
        (text.chars().take(max_chars).collect(), true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragq_core::DocumentChunk;

    #[test]
    fn builds_numbered_sources_matching_citation_order() {
        let builder = PromptBuilder::new(3200);
        let sources = vec![
            ScoredChunk::new(DocumentChunk::new("a", "first source text")),
            ScoredChunk::new(DocumentChunk::new("b", "second source text")),
        ];
        let prompt = builder.build("What is it?", &sources, None);
        assert!(prompt.contains("[1] first source text"));
        assert!(prompt.contains("[2] second source text"));
        assert!(prompt.contains("Question: What is it?"));
    }

    #[test]
    fn truncates_long_documents_and_annotates() {
        let builder = PromptBuilder::new(5);
        let sources = vec![ScoredChunk::new(DocumentChunk::new("a", "this is a long document"))];
        let prompt = builder.build("q", &sources, None);
        assert!(prompt.contains("(truncated)"));
    }

    #[test]
    fn empty_sources_get_a_well_formed_prompt() {
        let builder = PromptBuilder::new(3200);
        let prompt = builder.build("q", &[], None);
        assert!(prompt.contains("No sources were found"));
    }

    #[test]
    fn includes_conversation_summary_when_present() {
        let builder = PromptBuilder::new(3200);
        let prompt = builder.build("q", &[], Some("earlier we discussed gold loans"));
        assert!(prompt.contains("earlier we discussed gold loans"));
    }
}
