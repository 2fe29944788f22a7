
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{GenaiError, Result};

pub const API_KEY_ENV_VAR: &str = "GEMINI_API_KEY";

/// Immutable per-invocation configuration. Built once in `main` and passed
/// down; nothing mutates it afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub endpoint: String,
    pub version: String,
    pub model: String,
    pub embedding_model: String,
    pub batch_size: u32,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com".to_string(),
            version: "v1beta".to_string(),
            model: "gemini-1.5-flash".to_string(),
            embedding_model: "text-embedding-004".to_string(),
            batch_size: 32,
            timeout_seconds: 30,
            retry_attempts: 3,
        }
    }
}

impl Config {
    /// Load the configuration from the platform config directory, falling
    /// back to defaults when no config file exists.
    #[inline]
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_dir()?)
    }

    #[inline]
    pub fn load_from(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join("config.toml");

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path).map_err(|e| {
            GenaiError::Config(format!(
                "failed to read config file {}: {e}",
                config_path.display()
            ))
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| {
            GenaiError::Config(format!(
                "failed to parse config file {}: {e}",
                config_path.display()
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    #[inline]
    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("genai-cli"))
            .ok_or_else(|| {
                GenaiError::Config("could not determine a configuration directory".to_string())
            })
    }

    #[inline]
    pub fn validate(&self) -> Result<()> {
        self.api.validate()
    }
}

impl ApiConfig {
    #[inline]
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(GenaiError::Config("model name cannot be empty".to_string()));
        }
        if self.embedding_model.trim().is_empty() {
            return Err(GenaiError::Config(
                "embedding model name cannot be empty".to_string(),
            ));
        }
        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(GenaiError::Config(format!(
                "invalid batch size: {} (must be between 1 and 1000)",
                self.batch_size
            )));
        }
        if self.retry_attempts == 0 {
            return Err(GenaiError::Config(
                "retry attempts must be at least 1".to_string(),
            ));
        }
        self.base_url()?;
        Ok(())
    }

    /// The versioned API root, with a trailing slash so relative joins
    /// append rather than replace.
    #[inline]
    pub fn base_url(&self) -> Result<Url> {
        let url_str = format!("{}/{}/", self.endpoint.trim_end_matches('/'), self.version);
        Url::parse(&url_str)
            .map_err(|_| GenaiError::Config(format!("invalid API endpoint: {url_str}")))
    }
}

/// Obtain the API key from the `--key` flag or the `GEMINI_API_KEY`
/// environment variable, in that order.
#[inline]
pub fn resolve_api_key(flag: Option<&str>) -> Result<String> {
    if let Some(key) = flag {
        if !key.is_empty() {
            return Ok(key.to_string());
        }
    }

    match std::env::var(API_KEY_ENV_VAR) {
        Ok(key) if !key.is_empty() => Ok(key),
        _ => Err(GenaiError::Config(format!(
            "unable to obtain an API key; use --key or the {API_KEY_ENV_VAR} env var"
        ))),
    }
}
