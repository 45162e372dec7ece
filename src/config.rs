//! Resolved configuration.
//!
//! One immutable structure, built once at startup from an optional JSON
//! file merged with environment overrides, then injected into the router
//! and provider clients. Nothing re-reads configuration mid-request.

use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_MODEL: &str = "openai:gpt-4o-mini";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    Json,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ollama_url: String,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub claude_api_key: Option<String>,

    /// Chain head when the command names no provider, `provider:model`.
    pub default_model: String,
    /// Remaining chain entries, in the order the operator wants them tried.
    pub fallback_chain: Vec<String>,

    pub cache_enabled: bool,
    pub cache_backend: CacheBackend,
    pub cache_path: String,

    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            openai_api_key: None,
            gemini_api_key: None,
            claude_api_key: None,
            default_model: DEFAULT_MODEL.to_string(),
            fallback_chain: Vec::new(),
            cache_enabled: true,
            cache_backend: CacheBackend::Json,
            cache_path: "context_cache.json".to_string(),
            timeout_seconds: 30,
            max_retries: 3,
            retry_delay_seconds: 1.0,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

impl Config {
    /// Loads from a JSON file (when given and present) and then applies
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path)?;
                serde_json::from_str(&raw)?
            }
            _ => Config::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(value) = env::var("OLLAMA_URL") {
            self.ollama_url = value;
        }
        if let Ok(value) = env::var("OPENAI_API_KEY") {
            self.openai_api_key = Some(value);
        }
        if let Ok(value) = env::var("GEMINI_API_KEY") {
            self.gemini_api_key = Some(value);
        }
        if let Ok(value) = env::var("CLAUDE_API_KEY") {
            self.claude_api_key = Some(value);
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay_seconds.max(0.0))
    }
}
