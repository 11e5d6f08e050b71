//! Configuration management
//!
//! Layered configuration loaded from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file (`config/talentbox.toml`, overridable via
//!    `TALENTBOX_CONFIG`)
//! 3. `.env` file (via dotenvy)
//! 4. Environment variables (highest priority)
//!
//! Nested overrides use the `TALENTBOX__<section>__<key>` pattern:
//!
//! - `TALENTBOX__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `TALENTBOX__QUEUE__WORKERS=8`
//! - `TALENTBOX__PIPELINE__MAX_FILE_SIZE=50MiB`
//!
//! A set of flat, deployment-facing names is also recognized
//! (`MAX_FILE_SIZE`, `JOB_MAX_ATTEMPTS`, `LLM_TIMEOUT`, `CB_COOLDOWN`,
//! `USE_GAP_FILLER`, ...), and secrets load exclusively from the
//! environment: `PRIMARY_LLM_KEY`, `SECONDARY_LLM_KEY`, `TERTIARY_LLM_KEY`,
//! `EMBEDDING_KEY`, `ENCRYPTION_KEY`, `HASH_SALT`, `WEBHOOK_SECRET`,
//! `WEBHOOK_URL`.

mod models;
mod sources;
mod validation;

pub use crate::humanize::{ByteSize, DurationSecs};
pub use models::{
    Config, EmbeddingConfig, LlmConfig, PipelineConfig, PrivacyConfig, ProviderConfig,
    QueueConfig, RateLimitConfig, ServerConfig, StorageConfig, StorageProvider, WebhookConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path.
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Providers available for cross-checked analysis, primary first
    pub fn configured_providers(&self) -> Vec<&ProviderConfig> {
        [&self.llm.primary, &self.llm.secondary, &self.llm.tertiary]
            .into_iter()
            .flatten()
            .collect()
    }
}
