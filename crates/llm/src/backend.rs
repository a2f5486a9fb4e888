//! `LanguageModel` implementations: an Ollama-compatible HTTP backend, and a
//! deterministic in-process backend for tests.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use ragq_core::{GenerateRequest, GenerateResponse, LanguageModel, Result, StreamChunk};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::LlmError;

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub endpoint: String,
    pub model: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    /// How long Ollama should keep the model loaded between calls.
    pub keep_alive: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "qwen2.5:7b-instruct".to_string(),
            timeout: Duration::from_secs(60),
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
            keep_alive: "5m".to_string(),
        }
    }
}

#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
    keep_alive: &'a str,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: i32,
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
    #[serde(default)]
    eval_count: Option<u64>,
    done: bool,
}

/// Talks to an Ollama-compatible `/api/generate` endpoint, with exponential
/// backoff over transient network/server errors.
pub struct OllamaLanguageModel {
    client: Client,
    config: OllamaConfig,
}

impl OllamaLanguageModel {
    pub fn new(config: OllamaConfig) -> std::result::Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Configuration(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.config.endpoint, path)
    }

    fn build_request<'a>(&'a self, request: &'a GenerateRequest, stream: bool) -> OllamaGenerateRequest<'a> {
        OllamaGenerateRequest {
            model: &self.config.model,
            prompt: &request.prompt,
            stream,
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens as i32,
            },
            keep_alive: &self.config.keep_alive,
        }
    }

    async fn execute(&self, body: &OllamaGenerateRequest<'_>) -> std::result::Result<OllamaGenerateResponse, LlmError> {
        let response = self
            .client
            .post(self.api_url("/generate"))
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(LlmError::Network(format!("server error {status}: {text}")));
            }
            return Err(LlmError::Api(text));
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }

    fn is_retryable(error: &LlmError) -> bool {
        matches!(error, LlmError::Network(_) | LlmError::Timeout)
    }
}

#[async_trait]
impl LanguageModel for OllamaLanguageModel {
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse> {
        let body = self.build_request(&request, false);

        let mut backoff = self.config.initial_backoff;
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tracing::warn!(attempt, ?backoff, "LLM request failed, retrying");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            match self.execute(&body).await {
                Ok(result) => {
                    return Ok(GenerateResponse {
                        text: result.response,
                        tokens: result.eval_count.unwrap_or(0) as usize,
                    });
                }
                Err(e) if Self::is_retryable(&e) => last_error = Some(e),
                Err(e) => return Err(e.into()),
            }
        }

        Err(last_error.unwrap_or(LlmError::Network("max retries exceeded".to_string())).into())
    }

    fn generate_stream<'a>(
        &'a self,
        request: GenerateRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send + 'a>> {
        let body_owned = OllamaGenerateRequestOwned {
            model: self.config.model.clone(),
            prompt: request.prompt,
            options_temperature: request.temperature,
            options_num_predict: request.max_tokens as i32,
            keep_alive: self.config.keep_alive.clone(),
        };

        Box::pin(async_stream::try_stream! {
            let response = self
                .client
                .post(self.api_url("/generate"))
                .json(&serde_json::json!({
                    "model": body_owned.model,
                    "prompt": body_owned.prompt,
                    "stream": true,
                    "options": {
                        "temperature": body_owned.options_temperature,
                        "num_predict": body_owned.options_num_predict,
                    },
                    "keep_alive": body_owned.keep_alive,
                }))
                .send()
                .await
                .map_err(LlmError::from)?;

            if !response.status().is_success() {
                let text = response.text().await.unwrap_or_default();
                Err(LlmError::Api(text))?;
            }

            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(LlmError::from)?;
                let text = String::from_utf8_lossy(&chunk);
                for line in text.lines() {
                    if line.is_empty() {
                        continue;
                    }
                    if let Ok(parsed) = serde_json::from_str::<OllamaGenerateResponse>(line) {
                        yield StreamChunk {
                            delta: parsed.response,
                            is_final: parsed.done,
                        };
                    }
                }
            }
        })
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(self.api_url("/tags"))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

struct OllamaGenerateRequestOwned {
    model: String,
    prompt: String,
    options_temperature: f32,
    options_num_predict: i32,
    keep_alive: String,
}

/// Deterministic backend with no network I/O: echoes a fixed transformation
/// of the prompt. Used in engine/server tests.
pub struct DeterministicLanguageModel {
    model_name: String,
}

impl DeterministicLanguageModel {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
        }
    }
}

impl Default for DeterministicLanguageModel {
    fn default() -> Self {
        Self::new("deterministic-test-model")
    }
}

#[async_trait]
impl LanguageModel for DeterministicLanguageModel {
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse> {
        let text = format!("[deterministic answer based on prompt of {} chars]", request.prompt.len());
        Ok(GenerateResponse {
            tokens: text.split_whitespace().count(),
            text,
        })
    }

    fn generate_stream<'a>(
        &'a self,
        request: GenerateRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send + 'a>> {
        Box::pin(async_stream::stream! {
            let text = format!("[deterministic answer based on prompt of {} chars]", request.prompt.len());
            let words: Vec<&str> = text.split(' ').collect();
            let last = words.len().saturating_sub(1);
            for (i, word) in words.iter().enumerate() {
                yield Ok(StreamChunk {
                    delta: format!("{word} "),
                    is_final: i == last,
                });
            }
        })
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deterministic_model_is_always_available() {
        let model = DeterministicLanguageModel::default();
        assert!(model.is_available().await);
    }

    #[tokio::test]
    async fn deterministic_model_generates_non_empty_text() {
        let model = DeterministicLanguageModel::default();
        let response = model
            .generate(GenerateRequest {
                prompt: "hello".to_string(),
                temperature: 0.2,
                max_tokens: 50,
            })
            .await
            .unwrap();
        assert!(!response.text.is_empty());
    }

    #[tokio::test]
    async fn deterministic_model_streams_to_a_final_chunk() {
        let model = DeterministicLanguageModel::default();
        let mut stream = model.generate_stream(GenerateRequest {
            prompt: "hello world".to_string(),
            temperature: 0.2,
            max_tokens: 50,
        });

        let mut saw_final = false;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            if chunk.is_final {
                saw_final = true;
            }
        }
        assert!(saw_final);
    }
}
