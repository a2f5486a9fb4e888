//! Layered configuration for the query engine.
//!
//! Loads from (in increasing priority): `config/default.{yaml,toml}`, an
//! optional `config/{environment}.{yaml,toml}` file, then `RAGQ_`-prefixed
//! environment variables — the same three-layer approach the teacher's
//! `voice_agent_config::load_settings` uses.

pub mod constants;
pub mod settings;

pub use settings::{
    CacheConfig, LlmConfig, MemoryConfig, ObservabilityConfig, RateLimitConfig,
    RetrievalConfig, RuntimeEnvironment, ServerConfig, Settings, load_settings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("environment error: {0}")]
    Environment(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<ConfigError> for ragq_core::Error {
    fn from(err: ConfigError) -> Self {
        ragq_core::Error::Config(err.to_string())
    }
}
