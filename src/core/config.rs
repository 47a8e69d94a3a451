//! Pipeline configuration, read from RON.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::core::embedder::EmbedderConfig;
use crate::core::index::Metric;

const DEFAULT_CONFIG_RON: &str = include_str!("../../story_data/pipeline.ron");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunables for building a [`Pipeline`](crate::core::pipeline::Pipeline).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Passages retrieved per request.
    pub top_k: usize,
    pub metric: Metric,
    pub embedder: EmbedderConfig,
    /// Upper bound on assembled prompt length in characters.
    pub max_prompt_chars: Option<usize>,
    /// Seed for the canned generator's choice among alternatives.
    pub seed: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            top_k: 2,
            metric: Metric::Cosine,
            embedder: EmbedderConfig::default(),
            max_prompt_chars: None,
            seed: 42,
        }
    }
}

impl PipelineConfig {
    /// The configuration shipped in `story_data/pipeline.ron`.
    pub fn bundled() -> Result<Self, ConfigError> {
        Self::parse_ron(DEFAULT_CONFIG_RON)
    }

    pub fn load_from_ron(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    pub fn parse_ron(input: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = ron::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Check ranges. `top_k == 0` is allowed and means "no context".
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.embedder.dimensions == 0 {
            return Err(ConfigError::Invalid(
                "embedder.dimensions must be positive".to_string(),
            ));
        }
        if !(2..=5).contains(&self.embedder.ngram) {
            return Err(ConfigError::Invalid(format!(
                "embedder.ngram must be between 2 and 5, got {}",
                self.embedder.ngram
            )));
        }
        if self.max_prompt_chars == Some(0) {
            return Err(ConfigError::Invalid(
                "max_prompt_chars must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}
