//! Query Engine orchestration (§4.9): the six-step pipeline binding
//! sanitation, the multi-stage cache, adaptive retrieval, conversation
//! memory, answer generation and confidence scoring into one call.

mod sanitize;
mod singleflight;

pub use singleflight::SingleFlight;

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{Stream, StreamExt};
use ragq_cache::{CacheLookup, CacheStatsSnapshot, MultiStageCache};
use ragq_core::{
    Answer, ConversationTurn, Embedder, Error, Explanation, LanguageModel, Query, Result,
    RetrievalStrategy, SourceRef, Timing,
};
use ragq_llm::{source_refs, AnswerGenerator, ConfidenceScorer};
use ragq_memory::{RuleBasedSummarizer, SessionStore, Summarizer};
use ragq_retrieval::{AdaptiveRetriever, ClassifierOutput};
use thiserror::Error;

/// One event of a streamed query (§6: `/query/stream`). `Meta` carries the
/// retrieval summary (strategy + sources) before the first token; `Done`
/// carries the same citations/confidence a non-streaming call would return.
pub enum StreamEvent {
    Meta {
        strategy: Option<RetrievalStrategy>,
        sources: Vec<SourceRef>,
    },
    Token(String),
    Done(Box<Answer>),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("bounded work queue is full")]
    Overloaded,

    #[error("global deadline exceeded")]
    Deadline,
}

impl From<EngineError> for Error {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Overloaded => Error::Overloaded,
            EngineError::Deadline => Error::DeadlineExceeded,
        }
    }
}

/// Collaborators the engine orchestrates. One instance is built at startup
/// and shared (via `Arc<QueryEngine>`) across all requests.
pub struct QueryEngine {
    retriever: AdaptiveRetriever,
    cache: MultiStageCache,
    sessions: SessionStore,
    summarizer: Arc<dyn Summarizer>,
    answer_generator: AnswerGenerator,
    confidence_scorer: ConfidenceScorer,
    embedder: Arc<dyn Embedder>,
    domain_vocabulary: HashSet<String>,
    single_flight: SingleFlight,
    max_concurrent: Arc<tokio::sync::Semaphore>,
    global_deadline: Duration,
}

pub struct QueryEngineDeps {
    pub retriever: AdaptiveRetriever,
    pub cache: MultiStageCache,
    pub sessions: SessionStore,
    pub model: Arc<dyn LanguageModel>,
    pub embedder: Arc<dyn Embedder>,
    pub domain_vocabulary: HashSet<String>,
    pub max_chars_per_doc: usize,
    pub max_concurrent_requests: usize,
    pub global_deadline: Duration,
}

impl QueryEngine {
    pub fn new(deps: QueryEngineDeps) -> Self {
        Self {
            retriever: deps.retriever,
            cache: deps.cache,
            sessions: deps.sessions,
            summarizer: Arc::new(RuleBasedSummarizer),
            answer_generator: AnswerGenerator::new(deps.model, deps.max_chars_per_doc),
            confidence_scorer: ConfidenceScorer::new(),
            embedder: deps.embedder,
            domain_vocabulary: deps.domain_vocabulary,
            single_flight: SingleFlight::new(),
            max_concurrent: Arc::new(tokio::sync::Semaphore::new(deps.max_concurrent_requests)),
            global_deadline: deps.global_deadline,
        }
    }

    /// Runs the six-step pipeline from §4.9 against a single query.
    pub async fn query(&self, query: Query) -> Result<Answer> {
        let _permit = self
            .max_concurrent
            .clone()
            .try_acquire_owned()
            .map_err(|_| Error::from(EngineError::Overloaded))?;

        tokio::time::timeout(self.global_deadline, self.query_inner(query))
            .await
            .map_err(|_| Error::from(EngineError::Deadline))?
    }

    async fn query_inner(&self, query: Query) -> Result<Answer> {
        // Step 1: sanitize/validate.
        sanitize::validate_length(&query.text, query.params.max_query_chars).map_err(Error::InvalidInput)?;
        let injection_flags = sanitize::detect_injection_patterns(&query.text);
        for flag in &injection_flags {
            tracing::warn!(pattern = %flag, "prompt injection pattern detected (not blocking)");
        }

        let normalized = ragq_retrieval::normalize(&query.text);

        // Step 2: exact/normalized cache lookup (no retrieval context yet).
        if let CacheLookup::Hit { mut answer, stage } = self
            .cache
            .get(&query.text, &normalized, &query.params, None, None)
            .await
        {
            answer.from_cache = true;
            answer.cache_stage = Some(stage);
            return Ok(answer);
        }

        let fingerprint = format!("{normalized}|{}", ragq_cache::fingerprint(&query.params));
        self.single_flight
            .run(fingerprint, || self.generate_fresh(query, normalized, injection_flags))
            .await
    }

    /// Runs steps 3-6 for a request that missed both cache layers so far.
    /// Entered at most once per in-flight fingerprint (see [`SingleFlight`]).
    async fn generate_fresh(&self, query: Query, normalized: String, injection_flags: Vec<String>) -> Result<Answer> {
        let start = Instant::now();
        let params = &query.params;
        let mut explanation = Explanation::default();
        for flag in &injection_flags {
            explanation.warn(format!("prompt_injection_pattern:{flag}"));
        }

        let memory = query.session_id.as_ref().map(|id| self.sessions.get_or_create(id));

        let (search_text, conversation_summary) = if let Some(memory) = &memory {
            let guard = memory.lock().await;
            let search_text = if guard.is_follow_up(&normalized, &self.domain_vocabulary) {
                format!("{} {}", guard.enrichment_prefix(), normalized)
            } else {
                normalized.clone()
            };
            (search_text, guard.summary().map(str::to_string))
        } else {
            (normalized.clone(), None)
        };

        // Step 3: classify -> expand -> retrieve (memory-enriched search text).
        let classifier_output = ragq_retrieval::classify(&query.text);
        let strategy = params.strategy_override.unwrap_or(classifier_output.strategy);

        let retrieval = self.retriever.retrieve(&search_text, strategy, params).await?;
        apply_classifier_output(&mut explanation, &classifier_output, strategy, params.strategy_override.is_some());
        explanation.warnings.extend(retrieval.explanation.warnings.clone());
        explanation.reformulations = retrieval.explanation.reformulations.clone();
        explanation.synonyms_applied = retrieval.explanation.synonyms_applied.clone();
        explanation.strategy = retrieval.explanation.strategy;
        let retrieval_ms = start.elapsed().as_millis() as u64;
        explanation.stage_timings_ms.insert("retrieve".to_string(), retrieval_ms);

        if retrieval.chunks.is_empty() {
            // §4.7: empty retrieval returns a fixed low-confidence answer,
            // never a hallucinated one; §4.6 Put skips the semantic layer
            // since there is no embedding/chunk-id pair to key it on.
            let mut answer = self
                .answer_generator
                .generate(&query.text, &[], conversation_summary.as_deref(), params.temperature, params.max_tokens)
                .await?;
            let total_ms = start.elapsed().as_millis() as u64;
            explanation.stage_timings_ms.insert("total".to_string(), total_ms);
            answer.explanation = explanation;
            answer.timing = Timing {
                retrieval_ms,
                generation_ms: total_ms.saturating_sub(retrieval_ms),
                total_ms,
            };

            self.cache
                .put(&query.text, &normalized, params, answer.clone(), Vec::new(), None)
                .await;

            if let Some(memory) = memory {
                let turn = ConversationTurn::new(query.text.clone(), answer.text.clone());
                let mut guard = memory.lock().await;
                if let Err(e) = guard.append(turn, self.summarizer.as_ref()).await {
                    tracing::warn!(error = %e, "conversation summarization failed, turn kept unsummarized");
                }
            }

            return Ok(answer);
        }

        let chunk_ids = retrieval.chunk_ids();
        let query_embedding = self.embedder.embed(&normalized).await.ok();

        // Step 4: semantic cache lookup, now that we have chunk ids + embedding.
        if let CacheLookup::Hit { mut answer, stage } = self
            .cache
            .get(&query.text, &normalized, params, Some(&chunk_ids), query_embedding.as_deref())
            .await
        {
            answer.from_cache = true;
            answer.cache_stage = Some(stage);
            return Ok(answer);
        }

        // Step 5: generate. Pre-confidence (the mean-rerank-score term,
        // available immediately after retrieval) is computed up front so
        // the Query Engine never waits on it after generation finishes; the
        // full §4.8 score in step 6 still recombines it with the
        // generated answer's coverage and source-agreement terms.
        let pre_confidence = mean_rerank_score(&retrieval.chunks);
        let mut answer = self
            .answer_generator
            .generate(
                &query.text,
                &retrieval.chunks,
                conversation_summary.as_deref(),
                params.temperature,
                params.max_tokens,
            )
            .await?;
        tracing::debug!(pre_confidence = pre_confidence as f64, "pre-confidence computed ahead of generation");

        // Step 6: score confidence, attach explanation, cache-put, memory-append.
        answer.confidence = self.confidence_scorer.score(&answer, &retrieval.chunks, params.final_k);
        let total_ms = start.elapsed().as_millis() as u64;
        explanation.stage_timings_ms.insert("total".to_string(), total_ms);
        answer.explanation = explanation;
        answer.timing = Timing {
            retrieval_ms,
            generation_ms: total_ms.saturating_sub(retrieval_ms),
            total_ms,
        };

        self.cache
            .put(&query.text, &normalized, params, answer.clone(), chunk_ids, query_embedding)
            .await;

        if let Some(memory) = memory {
            let turn = ConversationTurn::new(query.text.clone(), answer.text.clone());
            let mut guard = memory.lock().await;
            if let Err(e) = guard.append(turn, self.summarizer.as_ref()).await {
                tracing::warn!(error = %e, "conversation summarization failed, turn kept unsummarized");
            }
        }

        Ok(answer)
    }

    /// Streaming counterpart of [`Self::query`] (§6: `/query/stream`). Runs
    /// steps 1-4 eagerly, emits a `Meta` event with the retrieval summary,
    /// then forwards the model's token stream, and finally assembles and
    /// caches the same `Answer` a non-streaming call would produce. Not
    /// wrapped by [`SingleFlight`]: concurrent identical streamed queries
    /// each run the pipeline independently rather than sharing a leader.
    pub fn query_stream<'a>(&'a self, query: Query) -> Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send + 'a>> {
        Box::pin(async_stream::try_stream! {
            let start = Instant::now();
            sanitize::validate_length(&query.text, query.params.max_query_chars).map_err(Error::InvalidInput)?;
            let injection_flags = sanitize::detect_injection_patterns(&query.text);
            for flag in &injection_flags {
                tracing::warn!(pattern = %flag, "prompt injection pattern detected (not blocking)");
            }

            let normalized = ragq_retrieval::normalize(&query.text);
            let params = query.params.clone();

            if let CacheLookup::Hit { mut answer, stage } = self.cache.get(&query.text, &normalized, &params, None, None).await {
                answer.from_cache = true;
                answer.cache_stage = Some(stage);
                yield StreamEvent::Meta { strategy: answer.explanation.strategy, sources: answer.sources.clone() };
                yield StreamEvent::Token(answer.text.clone());
                yield StreamEvent::Done(Box::new(answer));
                return;
            }

            let memory = query.session_id.as_ref().map(|id| self.sessions.get_or_create(id));
            let (search_text, conversation_summary) = if let Some(memory) = &memory {
                let guard = memory.lock().await;
                let search_text = if guard.is_follow_up(&normalized, &self.domain_vocabulary) {
                    format!("{} {}", guard.enrichment_prefix(), normalized)
                } else {
                    normalized.clone()
                };
                (search_text, guard.summary().map(str::to_string))
            } else {
                (normalized.clone(), None)
            };

            let classifier_output = ragq_retrieval::classify(&query.text);
            let strategy = params.strategy_override.unwrap_or(classifier_output.strategy);
            let retrieval = self.retriever.retrieve(&search_text, strategy, &params).await?;
            let retrieval_ms = start.elapsed().as_millis() as u64;

            if retrieval.chunks.is_empty() {
                let mut answer = self
                    .answer_generator
                    .generate(&query.text, &[], conversation_summary.as_deref(), params.temperature, params.max_tokens)
                    .await?;
                let total_ms = start.elapsed().as_millis() as u64;
                answer.timing = Timing {
                    retrieval_ms,
                    generation_ms: total_ms.saturating_sub(retrieval_ms),
                    total_ms,
                };

                self.cache
                    .put(&query.text, &normalized, &params, answer.clone(), Vec::new(), None)
                    .await;

                if let Some(memory) = memory {
                    let turn = ConversationTurn::new(query.text.clone(), answer.text.clone());
                    let mut guard = memory.lock().await;
                    if let Err(e) = guard.append(turn, self.summarizer.as_ref()).await {
                        tracing::warn!(error = %e, "conversation summarization failed, turn kept unsummarized");
                    }
                }

                yield StreamEvent::Meta { strategy: None, sources: Vec::new() };
                yield StreamEvent::Token(answer.text.clone());
                yield StreamEvent::Done(Box::new(answer));
                return;
            }

            let chunk_ids = retrieval.chunk_ids();
            let query_embedding = self.embedder.embed(&normalized).await.ok();

            if let CacheLookup::Hit { mut answer, stage } = self
                .cache
                .get(&query.text, &normalized, &params, Some(&chunk_ids), query_embedding.as_deref())
                .await
            {
                answer.from_cache = true;
                answer.cache_stage = Some(stage);
                yield StreamEvent::Meta { strategy: answer.explanation.strategy, sources: answer.sources.clone() };
                yield StreamEvent::Token(answer.text.clone());
                yield StreamEvent::Done(Box::new(answer));
                return;
            }

            yield StreamEvent::Meta {
                strategy: Some(strategy),
                sources: source_refs(&retrieval.chunks),
            };

            let mut full_text = String::new();
            let token_stream = self.answer_generator.generate_stream(
                &query.text,
                &retrieval.chunks,
                conversation_summary.as_deref(),
                params.temperature,
                params.max_tokens,
            );
            futures::pin_mut!(token_stream);
            while let Some(chunk) = token_stream.next().await {
                let chunk = chunk?;
                full_text.push_str(&chunk.delta);
                yield StreamEvent::Token(chunk.delta);
            }

            let mut answer = self.answer_generator.assemble(full_text, &retrieval.chunks);
            answer.confidence = self.confidence_scorer.score(&answer, &retrieval.chunks, params.final_k);

            let mut explanation = Explanation::default();
            for flag in &injection_flags {
                explanation.warn(format!("prompt_injection_pattern:{flag}"));
            }
            apply_classifier_output(&mut explanation, &classifier_output, strategy, params.strategy_override.is_some());
            explanation.warnings.extend(retrieval.explanation.warnings.clone());
            explanation.reformulations = retrieval.explanation.reformulations.clone();
            explanation.synonyms_applied = retrieval.explanation.synonyms_applied.clone();
            explanation.strategy = retrieval.explanation.strategy;
            answer.explanation = explanation;

            let total_ms = start.elapsed().as_millis() as u64;
            answer.timing = Timing {
                retrieval_ms,
                generation_ms: total_ms.saturating_sub(retrieval_ms),
                total_ms,
            };

            self.cache
                .put(&query.text, &normalized, &params, answer.clone(), chunk_ids, query_embedding)
                .await;

            if let Some(memory) = memory {
                let turn = ConversationTurn::new(query.text.clone(), answer.text.clone());
                let mut guard = memory.lock().await;
                if let Err(e) = guard.append(turn, self.summarizer.as_ref()).await {
                    tracing::warn!(error = %e, "conversation summarization failed, turn kept unsummarized");
                }
            }

            yield StreamEvent::Done(Box::new(answer));
        })
    }

    pub fn clear_conversation(&self, session_id: &str) {
        self.sessions.clear(session_id);
    }

    pub fn cache_stats(&self) -> CacheStatsSnapshot {
        self.cache.stats()
    }
}

/// Copies the classifier's score/factors into the final explanation and
/// writes a short human-readable account of the strategy choice (spec §3's
/// `reasoning` field).
fn apply_classifier_output(
    explanation: &mut Explanation,
    classifier_output: &ClassifierOutput,
    strategy_used: RetrievalStrategy,
    overridden: bool,
) {
    explanation.complexity_score = classifier_output.complexity_score;
    explanation.factors = classifier_output.factors.clone();

    explanation.reasoning = if overridden {
        format!(
            "strategy overridden to {} (classifier would have picked {} at complexity {})",
            strategy_used.as_str(),
            classifier_output.strategy.as_str(),
            classifier_output.complexity_score,
        )
    } else {
        format!(
            "complexity score {} selected {}",
            classifier_output.complexity_score,
            strategy_used.as_str(),
        )
    };
}

fn mean_rerank_score(chunks: &[ragq_core::ScoredChunk]) -> f32 {
    if chunks.is_empty() {
        return 0.0;
    }
    let sum: f32 = chunks.iter().map(|c| c.ordering_score()).sum();
    sum / chunks.len() as f32
}
