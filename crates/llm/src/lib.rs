//! Language-model backends, the answer generator (§4.7) and the confidence
//! scorer (§4.8).

pub mod answer_generator;
pub mod backend;
pub mod confidence;
pub mod prompt;

pub use answer_generator::{source_refs, AnswerGenerator};
pub use backend::{DeterministicLanguageModel, OllamaConfig, OllamaLanguageModel};
pub use confidence::ConfidenceScorer;
pub use prompt::PromptBuilder;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("generation error: {0}")]
    Generation(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("timeout")]
    Timeout,

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for ragq_core::Error {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Timeout => ragq_core::Error::DeadlineExceeded,
            other => ragq_core::Error::Llm(other.to_string()),
        }
    }
}
