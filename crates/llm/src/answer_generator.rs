//! Answer Generator (§4.7): composes the prompt, invokes the language model,
//! and extracts citations in source-numbering order.

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use ragq_core::{
    Answer, Citation, Explanation, GenerateRequest, LanguageModel, Result, ScoredChunk, SourceRef,
    StreamChunk, Timing,
};

use crate::prompt::PromptBuilder;

const INSUFFICIENT_EVIDENCE_TEXT: &str =
    "I don't have enough information in the available sources to answer this question.";
const INSUFFICIENT_EVIDENCE_CONFIDENCE: f32 = 0.05;
const EXCERPT_CHARS: usize = 280;

pub struct AnswerGenerator {
    model: Arc<dyn LanguageModel>,
    prompt_builder: PromptBuilder,
}

impl AnswerGenerator {
    pub fn new(model: Arc<dyn LanguageModel>, max_chars_per_doc: usize) -> Self {
        Self {
            model,
            prompt_builder: PromptBuilder::new(max_chars_per_doc),
        }
    }

    /// Non-streaming generation. `confidence`/`explanation` are left at
    /// their zero values here; the caller (Query Engine) fills them in after
    /// scoring.
    pub async fn generate(
        &self,
        query: &str,
        sources: &[ScoredChunk],
        conversation_summary: Option<&str>,
        temperature: f32,
        max_tokens: usize,
    ) -> Result<Answer> {
        if sources.is_empty() {
            return Ok(insufficient_evidence_answer());
        }

        let prompt = self.prompt_builder.build(query, sources, conversation_summary);

        let response = self
            .model
            .generate(GenerateRequest {
                prompt,
                temperature,
                max_tokens,
            })
            .await?;

        Ok(self.assemble(response.text, sources))
    }

    /// Builds the final `Answer` from already-generated text: citation
    /// extraction plus the source list. Shared by [`Self::generate`] and by
    /// callers that drive [`Self::generate_stream`] themselves and only have
    /// the assembled text once the stream completes.
    pub fn assemble(&self, text: String, sources: &[ScoredChunk]) -> Answer {
        let citations = extract_citations(&text, sources);

        Answer {
            text,
            citations,
            sources: source_refs(sources),
            confidence: 0.0,
            explanation: Explanation::default(),
            timing: Timing::default(),
            from_cache: false,
            cache_stage: None,
        }
    }

    /// Streaming generation. Yields `StreamChunk`s as the model produces
    /// them; the caller is responsible for assembling the final `Answer`
    /// (citations/sources/confidence) once the stream completes.
    pub fn generate_stream<'a>(
        &'a self,
        query: &str,
        sources: &'a [ScoredChunk],
        conversation_summary: Option<&str>,
        temperature: f32,
        max_tokens: usize,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send + 'a>> {
        let prompt = self.prompt_builder.build(query, sources, conversation_summary);
        self.model.generate_stream(GenerateRequest {
            prompt,
            temperature,
            max_tokens,
        })
    }
}

fn insufficient_evidence_answer() -> Answer {
    Answer {
        text: INSUFFICIENT_EVIDENCE_TEXT.to_string(),
        citations: Vec::new(),
        sources: Vec::new(),
        confidence: INSUFFICIENT_EVIDENCE_CONFIDENCE,
        explanation: Explanation::default(),
        timing: Timing::default(),
        from_cache: false,
        cache_stage: None,
    }
}

/// Builds the `(chunk_id, excerpt, score)` view of a retrieved chunk used in
/// `Answer::sources` and in the streaming `Meta` event.
pub fn source_ref(source: &ScoredChunk) -> SourceRef {
    let excerpt: String = source.chunk.text.chars().take(EXCERPT_CHARS).collect();
    SourceRef {
        chunk_id: source.chunk.id.clone(),
        excerpt,
        score: source.ordering_score(),
    }
}

pub fn source_refs(sources: &[ScoredChunk]) -> Vec<SourceRef> {
    sources.iter().map(source_ref).collect()
}

/// Finds `[n]` markers in the generated text and maps them to the 1-indexed
/// source positions passed to the prompt. Out-of-range markers are dropped
/// rather than treated as hallucinated citations.
fn extract_citations(text: &str, sources: &[ScoredChunk]) -> Vec<Citation> {
    let mut seen = std::collections::BTreeSet::new();
    let bytes = text.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'[' {
            if let Some(close) = text[i..].find(']') {
                let inner = &text[i + 1..i + close];
                if let Ok(n) = inner.parse::<usize>() {
                    if n >= 1 && n <= sources.len() {
                        seen.insert(n);
                    }
                }
                i += close + 1;
                continue;
            }
        }
        i += 1;
    }

    seen.into_iter()
        .map(|n| Citation {
            index: n,
            chunk_id: sources[n - 1].chunk.id.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ragq_core::{DocumentChunk, GenerateResponse};

    struct FixedModel {
        text: String,
    }

    #[async_trait]
    impl LanguageModel for FixedModel {
        async fn generate(&self, _request: GenerateRequest) -> Result<GenerateResponse> {
            Ok(GenerateResponse {
                text: self.text.clone(),
                tokens: 10,
            })
        }

        fn generate_stream<'a>(
            &'a self,
            _request: GenerateRequest,
        ) -> Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send + 'a>> {
            Box::pin(futures::stream::empty())
        }

        async fn is_available(&self) -> bool {
            true
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    fn sources() -> Vec<ScoredChunk> {
        vec![
            ScoredChunk::new(DocumentChunk::new("a", "first")),
            ScoredChunk::new(DocumentChunk::new("b", "second")),
        ]
    }

    #[tokio::test]
    async fn empty_sources_return_insufficient_evidence_without_calling_model() {
        let generator = AnswerGenerator::new(
            Arc::new(FixedModel {
                text: "should not be called".to_string(),
            }),
            3200,
        );
        let answer = generator.generate("q", &[], None, 0.2, 100).await.unwrap();
        assert_eq!(answer.text, INSUFFICIENT_EVIDENCE_TEXT);
        assert!(answer.citations.is_empty());
    }

    #[tokio::test]
    async fn citations_are_extracted_in_numeric_order() {
        let generator = AnswerGenerator::new(
            Arc::new(FixedModel {
                text: "The answer draws on [2] and [1].".to_string(),
            }),
            3200,
        );
        let sources = sources();
        let answer = generator.generate("q", &sources, None, 0.2, 100).await.unwrap();
        let indices: Vec<usize> = answer.citations.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![1, 2]);
        assert_eq!(answer.citations[0].chunk_id, "a");
        assert_eq!(answer.citations[1].chunk_id, "b");
    }

    #[tokio::test]
    async fn out_of_range_citations_are_dropped() {
        let generator = AnswerGenerator::new(
            Arc::new(FixedModel {
                text: "See [1] and [99].".to_string(),
            }),
            3200,
        );
        let sources = sources();
        let answer = generator.generate("q", &sources, None, 0.2, 100).await.unwrap();
        assert_eq!(answer.citations.len(), 1);
        assert_eq!(answer.citations[0].index, 1);
    }
}
