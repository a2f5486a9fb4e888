//! `Settings`: the startup-time configuration for the query engine.
//!
//! Mirrors the teacher's `voice_agent_config::settings` module: a
//! `RuntimeEnvironment` enum gating strict validation, one sub-config struct
//! per concern, a `validate_*` method per section, and a `load_settings`
//! entry point that layers files and environment variables.

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Which environment the process is running in. `Production` (and
/// `Staging`, treated as strict) rejects configurations that are acceptable
/// in `Development`, such as a `*` CORS origin (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, RuntimeEnvironment::Production)
    }

    /// Staging and production both get strict validation; only local
    /// development gets the permissive defaults.
    pub fn is_strict(&self) -> bool {
        !matches!(self, RuntimeEnvironment::Development)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub cors_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: Vec::new(),
            cors_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_minute: u32,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 120,
            burst: 20,
        }
    }
}

/// Retrieval defaults. These seed `ragq_core::QueryParams` for requests that
/// don't override them; see spec §6's options table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub final_k: usize,
    pub rerank_k: usize,
    pub initial_k: usize,
    pub rrf_k: f32,
    pub max_chars_per_doc: usize,
    pub max_query_chars: usize,
    pub vector_index_endpoint: String,
    pub vector_collection: String,
    pub sparse_index_path: String,
    pub reranker_model_path: Option<String>,
    pub embedder_model_path: Option<String>,
    pub embedder_tokenizer_path: Option<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            final_k: 8,
            rerank_k: 30,
            initial_k: 100,
            rrf_k: 60.0,
            max_chars_per_doc: 3200,
            max_query_chars: 10_000,
            vector_index_endpoint: crate::constants::endpoints::QDRANT_DEFAULT.clone(),
            vector_collection: "chunks".to_string(),
            sparse_index_path: "data/sparse_index".to_string(),
            reranker_model_path: None,
            embedder_model_path: None,
            embedder_tokenizer_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub semantic_threshold: f32,
    pub validation_threshold: f32,
    pub max_semantic_candidates: usize,
    pub ttl_exact_secs: u64,
    pub ttl_semantic_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            semantic_threshold: 0.98,
            validation_threshold: 0.80,
            max_semantic_candidates: 3,
            ttl_exact_secs: 3600,
            ttl_semantic_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
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

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub endpoint: String,
    pub model: String,
    pub timeout_ms: u64,
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: crate::constants::endpoints::OLLAMA_DEFAULT.clone(),
            model: "qwen2.5:7b-instruct".to_string(),
            timeout_ms: crate::constants::timeouts::LLM_REQUEST_MS,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_json: bool,
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub environment: RuntimeEnvironment,
    pub server: ServerConfig,
    pub rate_limit: RateLimitConfig,
    pub retrieval: RetrievalConfig,
    pub cache: CacheConfig,
    pub memory: MemoryConfig,
    pub llm: LlmConfig,
    pub observability: ObservabilityConfig,
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_retrieval()?;
        self.validate_cache()?;
        self.validate_memory()?;
        self.validate_llm()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "must be nonzero".to_string(),
            });
        }
        if self.environment.is_strict()
            && self.server.cors_enabled
            && self.server.cors_origins.iter().any(|o| o == "*")
        {
            return Err(ConfigError::InvalidValue {
                field: "server.cors_origins".to_string(),
                message: "wildcard origin is not allowed outside development".to_string(),
            });
        }
        Ok(())
    }

    fn validate_retrieval(&self) -> Result<(), ConfigError> {
        let r = &self.retrieval;
        if r.final_k == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.final_k".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if r.rerank_k < r.final_k {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.rerank_k".to_string(),
                message: "must be >= final_k".to_string(),
            });
        }
        if r.initial_k < r.rerank_k {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.initial_k".to_string(),
                message: "must be >= rerank_k".to_string(),
            });
        }
        if r.rrf_k <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.rrf_k".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if r.max_chars_per_doc == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.max_chars_per_doc".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    fn validate_cache(&self) -> Result<(), ConfigError> {
        let c = &self.cache;
        for (field, value) in [
            ("cache.semantic_threshold", c.semantic_threshold),
            ("cache.validation_threshold", c.validation_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: "must be in [0.0, 1.0]".to_string(),
                });
            }
        }
        if c.max_semantic_candidates == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.max_semantic_candidates".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    fn validate_memory(&self) -> Result<(), ConfigError> {
        if self.memory.window == 0 {
            return Err(ConfigError::InvalidValue {
                field: "memory.window".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.memory.summarize_every == 0 {
            return Err(ConfigError::InvalidValue {
                field: "memory.summarize_every".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    fn validate_llm(&self) -> Result<(), ConfigError> {
        if self.llm.endpoint.is_empty() {
            return Err(ConfigError::MissingField("llm.endpoint".to_string()));
        }
        if self.llm.model.is_empty() {
            return Err(ConfigError::MissingField("llm.model".to_string()));
        }
        Ok(())
    }
}

/// Load settings from `config/default.{yaml,toml}`, an optional
/// `config/{environment}.{yaml,toml}` override, then `RAGQ_`-prefixed
/// environment variables (double underscore as the nesting separator, e.g.
/// `RAGQ_RETRIEVAL__FINAL_K=12`), validating the result before returning it.
pub fn load_settings(environment: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = config::Config::builder()
        .add_source(config::File::with_name("config/default").required(false));

    if let Some(env) = environment {
        builder = builder
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false));
    }

    let builder = builder.add_source(
        config::Environment::with_prefix("RAGQ")
            .separator("__")
            .try_parsing(true),
    );

    let settings: Settings = builder.build()?.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn production_rejects_wildcard_cors() {
        let mut s = Settings::default();
        s.environment = RuntimeEnvironment::Production;
        s.server.cors_origins = vec!["*".to_string()];
        assert!(s.validate_server().is_err());
    }

    #[test]
    fn development_allows_wildcard_cors() {
        let mut s = Settings::default();
        s.environment = RuntimeEnvironment::Development;
        s.server.cors_origins = vec!["*".to_string()];
        assert!(s.validate_server().is_ok());
    }

    #[test]
    fn rejects_k_ordering_violation() {
        let mut s = Settings::default();
        s.retrieval.rerank_k = 2;
        s.retrieval.final_k = 8;
        assert!(s.validate_retrieval().is_err());
    }

    #[test]
    fn rejects_threshold_out_of_range() {
        let mut s = Settings::default();
        s.cache.validation_threshold = 1.5;
        assert!(s.validate_cache().is_err());
    }

    #[test]
    fn rejects_zero_memory_window() {
        let mut s = Settings::default();
        s.memory.window = 0;
        assert!(s.validate_memory().is_err());
    }

    #[test]
    fn load_settings_falls_back_to_defaults_when_no_files_present() {
        let dir = tempfile::tempdir().unwrap();
        let original = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();
        let result = load_settings(None);
        std::env::set_current_dir(original).unwrap();
        assert!(result.is_ok());
    }
}
