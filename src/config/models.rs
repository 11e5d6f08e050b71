use crate::humanize::{ByteSize, DurationSecs};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub privacy: PrivacyConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Root for the embedded fjall keyspaces (metadata + queue)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl ServerConfig {
    pub fn metadata_path(&self) -> PathBuf {
        self.data_dir.join("metadata")
    }

    pub fn queue_path(&self) -> PathBuf {
        self.data_dir.join("queue")
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

/// Object storage provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    #[default]
    Memory,
    Local,
}

/// Object storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub provider: StorageProvider,
    /// Filesystem root for the `local` provider
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: StorageProvider::Memory,
            root: default_storage_root(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data/objects")
}

/// One LLM provider endpoint (OpenAI-compatible chat completions)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    pub base_url: String,
    pub model: String,
    /// Loaded from environment (`PRIMARY_LLM_KEY` etc.), never from TOML
    #[serde(skip)]
    pub api_key: Option<String>,
}

/// Embedding provider endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_embedding_url(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            api_key: None,
        }
    }
}

fn default_embedding_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimension() -> usize {
    1536
}

/// LLM manager configuration: providers, timeouts, retry, circuit breaker
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    pub primary: Option<ProviderConfig>,
    pub secondary: Option<ProviderConfig>,
    pub tertiary: Option<ProviderConfig>,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default = "default_generate_timeout")]
    pub generate_timeout: DurationSecs,
    #[serde(default = "default_embed_timeout")]
    pub embed_timeout: DurationSecs,
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_cb_failure_threshold")]
    pub cb_failure_threshold: u32,
    #[serde(default = "default_cb_cooldown")]
    pub cb_cooldown: DurationSecs,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            primary: None,
            secondary: None,
            tertiary: None,
            embedding: EmbeddingConfig::default(),
            generate_timeout: default_generate_timeout(),
            embed_timeout: default_embed_timeout(),
            max_retries: default_llm_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            cb_failure_threshold: default_cb_failure_threshold(),
            cb_cooldown: default_cb_cooldown(),
        }
    }
}

fn default_generate_timeout() -> DurationSecs {
    DurationSecs(120)
}

fn default_embed_timeout() -> DurationSecs {
    DurationSecs(8)
}

fn default_llm_max_retries() -> u32 {
    2
}

fn default_retry_base_ms() -> u64 {
    200
}

fn default_cb_failure_threshold() -> u32 {
    5
}

fn default_cb_cooldown() -> DurationSecs {
    DurationSecs(30)
}

/// Durable queue configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout: DurationSecs,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_channel_size")]
    pub channel_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: default_visibility_timeout(),
            max_attempts: default_max_attempts(),
            workers: default_workers(),
            channel_size: default_channel_size(),
        }
    }
}

fn default_visibility_timeout() -> DurationSecs {
    DurationSecs(150)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_workers() -> usize {
    4
}

fn default_channel_size() -> usize {
    64
}

/// Pipeline stage gates and limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_max_file_size")]
    pub max_file_size: ByteSize,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_min_text_len")]
    pub min_text_len: usize,
    #[serde(default = "default_job_wall_clock")]
    pub job_wall_clock: DurationSecs,
    #[serde(default = "default_parse_timeout")]
    pub parse_timeout: DurationSecs,
    #[serde(default)]
    pub use_document_classifier: bool,
    #[serde(default)]
    pub use_coverage_calculator: bool,
    #[serde(default)]
    pub use_gap_filler: bool,
    #[serde(default = "default_gap_filler_max_retries")]
    pub gap_filler_max_retries: u32,
    #[serde(default = "default_coverage_threshold")]
    pub coverage_threshold: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            max_pages: default_max_pages(),
            min_text_len: default_min_text_len(),
            job_wall_clock: default_job_wall_clock(),
            parse_timeout: default_parse_timeout(),
            use_document_classifier: false,
            use_coverage_calculator: false,
            use_gap_filler: false,
            gap_filler_max_retries: default_gap_filler_max_retries(),
            coverage_threshold: default_coverage_threshold(),
        }
    }
}

fn default_max_file_size() -> ByteSize {
    ByteSize(50 * 1024 * 1024)
}

fn default_max_pages() -> u32 {
    50
}

fn default_min_text_len() -> usize {
    80
}

fn default_job_wall_clock() -> DurationSecs {
    DurationSecs(300)
}

fn default_parse_timeout() -> DurationSecs {
    DurationSecs(60)
}

fn default_gap_filler_max_retries() -> u32 {
    2
}

fn default_coverage_threshold() -> f64 {
    0.85
}

/// Field-level encryption configuration. Both values come only from the
/// environment (`ENCRYPTION_KEY` base64 of 32 bytes, `HASH_SALT`).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PrivacyConfig {
    #[serde(skip)]
    pub encryption_key: Option<String>,
    #[serde(skip)]
    pub hash_salt: Option<String>,
}

/// Webhook emitter configuration. The secret comes only from the environment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookConfig {
    pub url: Option<String>,
    #[serde(skip)]
    pub secret: Option<String>,
    #[serde(default = "default_webhook_timeout")]
    pub timeout: DurationSecs,
    #[serde(default = "default_webhook_attempts")]
    pub max_attempts: u32,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            secret: None,
            timeout: default_webhook_timeout(),
            max_attempts: default_webhook_attempts(),
        }
    }
}

fn default_webhook_timeout() -> DurationSecs {
    DurationSecs(30)
}

fn default_webhook_attempts() -> u32 {
    3
}

/// Per-route-class sliding window quotas
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_upload_per_minute")]
    pub upload_per_minute: u32,
    #[serde(default = "default_search_per_minute")]
    pub search_per_minute: u32,
    #[serde(default = "default_auth_per_minute")]
    pub auth_per_minute: u32,
    #[serde(default = "default_export_per_hour")]
    pub export_per_hour: u32,
    #[serde(default = "default_default_per_minute")]
    pub default_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            upload_per_minute: default_upload_per_minute(),
            search_per_minute: default_search_per_minute(),
            auth_per_minute: default_auth_per_minute(),
            export_per_hour: default_export_per_hour(),
            default_per_minute: default_default_per_minute(),
        }
    }
}

fn default_upload_per_minute() -> u32 {
    10
}

fn default_search_per_minute() -> u32 {
    30
}

fn default_auth_per_minute() -> u32 {
    5
}

fn default_export_per_hour() -> u32 {
    20
}

fn default_default_per_minute() -> u32 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.pipeline.max_file_size.as_u64(), 50 * 1024 * 1024);
        assert_eq!(config.llm.generate_timeout.as_secs(), 120);
        assert_eq!(config.llm.embed_timeout.as_secs(), 8);
        assert_eq!(config.llm.cb_failure_threshold, 5);
        assert_eq!(config.llm.cb_cooldown.as_secs(), 30);
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.pipeline.job_wall_clock.as_secs(), 300);
        assert_eq!(config.pipeline.coverage_threshold, 0.85);
        assert!(!config.pipeline.use_document_classifier);
    }

    #[test]
    fn test_data_dir_paths() {
        let server = ServerConfig::default();
        assert!(server.metadata_path().ends_with("metadata"));
        assert!(server.queue_path().ends_with("queue"));
    }
}
