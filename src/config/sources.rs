use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "TALENTBOX_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/talentbox.toml";
const ENV_PREFIX: &str = "TALENTBOX";
const ENV_SEPARATOR: &str = "__";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    // Load .env file if it exists (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut config = load_from_sources(config_path)?;

    load_secrets(&mut config);
    load_flat_overrides(&mut config);

    Ok(config)
}

/// Load secrets from environment variables into config.
/// Secrets are never stored in TOML files, only in environment.
fn load_secrets(config: &mut Config) {
    if let Some(ref mut primary) = config.llm.primary {
        primary.api_key = env::var("PRIMARY_LLM_KEY").ok();
    }
    if let Some(ref mut secondary) = config.llm.secondary {
        secondary.api_key = env::var("SECONDARY_LLM_KEY").ok();
    }
    if let Some(ref mut tertiary) = config.llm.tertiary {
        tertiary.api_key = env::var("TERTIARY_LLM_KEY").ok();
    }
    config.llm.embedding.api_key = env::var("EMBEDDING_KEY").ok();

    config.privacy.encryption_key = env::var("ENCRYPTION_KEY").ok();
    config.privacy.hash_salt = env::var("HASH_SALT").ok();

    config.webhook.secret = env::var("WEBHOOK_SECRET").ok();
    if let Ok(url) = env::var("WEBHOOK_URL") {
        config.webhook.url = Some(url);
    }
}

/// The deployment surface also recognizes a set of flat, well-known
/// environment names (MAX_FILE_SIZE, JOB_MAX_ATTEMPTS, ...) in addition to
/// the nested `TALENTBOX__section__key` form.
fn load_flat_overrides(config: &mut Config) {
    if let Some(size) = parse_env("MAX_FILE_SIZE") {
        config.pipeline.max_file_size = size;
    }
    if let Some(attempts) = parse_env("JOB_MAX_ATTEMPTS") {
        config.queue.max_attempts = attempts;
    }
    if let Some(wall) = parse_env("JOB_WALL_CLOCK") {
        config.pipeline.job_wall_clock = wall;
    }
    if let Some(timeout) = parse_env("LLM_TIMEOUT") {
        config.llm.generate_timeout = timeout;
    }
    if let Some(timeout) = parse_env("EMBED_TIMEOUT") {
        config.llm.embed_timeout = timeout;
    }
    if let Some(threshold) = parse_env("CB_FAILURE_THRESHOLD") {
        config.llm.cb_failure_threshold = threshold;
    }
    if let Some(cooldown) = parse_env("CB_COOLDOWN") {
        config.llm.cb_cooldown = cooldown;
    }
    if let Some(flag) = parse_env("USE_DOCUMENT_CLASSIFIER") {
        config.pipeline.use_document_classifier = flag;
    }
    if let Some(flag) = parse_env("USE_COVERAGE_CALCULATOR") {
        config.pipeline.use_coverage_calculator = flag;
    }
    if let Some(flag) = parse_env("USE_GAP_FILLER") {
        config.pipeline.use_gap_filler = flag;
    }
    if let Some(retries) = parse_env("GAP_FILLER_MAX_RETRIES") {
        config.pipeline.gap_filler_max_retries = retries;
    }
    if let Some(threshold) = parse_env("COVERAGE_THRESHOLD") {
        config.pipeline.coverage_threshold = threshold;
    }
    if let Ok(url) = env::var("OBJECT_STORE_URL") {
        if let Some(path) = url.strip_prefix("file://") {
            config.storage.provider = super::models::StorageProvider::Local;
            config.storage.root = PathBuf::from(path);
        }
    }
    if let Ok(path) = env::var("METADATA_STORE_URL") {
        if let Some(dir) = path.strip_prefix("file://") {
            config.server.data_dir = PathBuf::from(dir);
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(name, raw, "Ignoring unparseable environment override");
            None
        }
    }
}

/// Load configuration from a specific path and environment.
/// Useful for testing with custom config files.
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // TALENTBOX__SERVER__BIND_ADDR -> server.bind_addr
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.pipeline.max_file_size.as_u64(), 50 * 1024 * 1024);
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "127.0.0.1:9000"
data_dir = "var/talentbox"

[pipeline]
max_file_size = "10MB"
use_document_classifier = true

[llm.primary]
base_url = "https://primary.llm.example"
model = "extractor-large"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.pipeline.max_file_size.as_u64(), 10 * 1024 * 1024);
        assert!(config.pipeline.use_document_classifier);
        assert_eq!(
            config.llm.primary.as_ref().unwrap().model,
            "extractor-large"
        );
    }

    #[test]
    fn test_full_config_example() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "0.0.0.0:8080"
data_dir = "data"

[storage]
provider = "local"
root = "data/objects"

[llm.primary]
base_url = "https://primary.llm.example"
model = "extractor-large"

[llm.secondary]
base_url = "https://secondary.llm.example"
model = "extractor-alt"

[llm]
generate_timeout = "120s"
embed_timeout = "8s"
cb_failure_threshold = 5
cb_cooldown = "30s"

[queue]
visibility_timeout = "150s"
max_attempts = 3
workers = 8

[pipeline]
max_file_size = "50MiB"
job_wall_clock = "300s"
coverage_threshold = 0.85

[webhook]
url = "https://receiver.example/hooks"

[rate_limit]
upload_per_minute = 10
export_per_hour = 20
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.storage.provider, super::super::models::StorageProvider::Local);
        assert!(config.llm.secondary.is_some());
        assert_eq!(config.queue.workers, 8);
        assert_eq!(config.webhook.url.as_deref(), Some("https://receiver.example/hooks"));
        assert_eq!(config.rate_limit.upload_per_minute, 10);
        assert_eq!(config.rate_limit.export_per_hour, 20);
    }
}
