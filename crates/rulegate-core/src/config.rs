//! Tunables shared by the ingestion and validation pipelines.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chunk::{DEFAULT_MAX_LEN, DEFAULT_OVERLAP};
use crate::validation::DEFAULT_IDENTITY_FIELDS;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("parsing config {path}: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Pipeline configuration. Every field has a default, so a config file only
/// needs the keys it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum chunk length in characters.
    pub chunk_max_len: usize,
    /// Characters shared between adjacent chunks.
    pub chunk_overlap: usize,
    /// Extraction retries after the first attempt.
    pub max_retries: u32,
    /// Per-chunk language-service timeout.
    pub llm_timeout_secs: u64,
    /// Sampling temperature sent with every extraction request.
    pub llm_temperature: f32,
    /// Concurrent chunk extractions.
    pub workers: usize,
    /// Candidates below this confidence are dropped.
    pub min_confidence: f32,
    /// Rules retrieved per validation run.
    pub top_n: usize,
    /// Similarity-search timeout before falling back to tag listing.
    pub search_timeout_ms: u64,
    /// Fields consulted, in order, to identify a resource.
    pub identity_fields: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_max_len: DEFAULT_MAX_LEN,
            chunk_overlap: DEFAULT_OVERLAP,
            max_retries: 2,
            llm_timeout_secs: 60,
            llm_temperature: 0.1,
            workers: 4,
            min_confidence: 0.0,
            top_n: 25,
            search_timeout_ms: 2_000,
            identity_fields: DEFAULT_IDENTITY_FIELDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file, filling unspecified keys with defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
            path: display,
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_max_len == 0 || self.chunk_overlap >= self.chunk_max_len {
            return Err(ConfigError::Invalid(format!(
                "chunk_overlap ({}) must be smaller than chunk_max_len ({})",
                self.chunk_overlap, self.chunk_max_len
            )));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if !(self.llm_temperature.is_finite() && self.llm_temperature >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "llm_temperature must be a non-negative number, got {}",
                self.llm_temperature
            )));
        }
        if self.top_n == 0 {
            return Err(ConfigError::Invalid("top_n must be at least 1".into()));
        }
        Ok(())
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }
}
