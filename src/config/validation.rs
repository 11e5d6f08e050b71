use base64::Engine;
use thiserror::Error;

use super::models::Config;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("ENCRYPTION_KEY must be base64 of exactly 32 bytes")]
    InvalidEncryptionKey,

    #[error("HASH_SALT must be set when ENCRYPTION_KEY is set")]
    MissingHashSalt,

    #[error("webhook url is not a valid http(s) url: {0}")]
    InvalidWebhookUrl(String),

    #[error("coverage_threshold must be within (0, 1], got {0}")]
    InvalidCoverageThreshold(f64),

    #[error("gap_filler_max_retries must be at most 5, got {0}")]
    ExcessiveGapRetries(u32),

    #[error("queue workers must be at least 1")]
    NoWorkers,

    #[error("provider {0} base_url must be http(s)")]
    InvalidProviderUrl(&'static str),
}

/// Structural validation, run after all sources are merged. Deployment
/// completeness (e.g. a primary provider being configured at all) is
/// checked at serve time, not here, so offline tooling can still load
/// partial configs.
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    if let Some(ref key) = config.privacy.encryption_key {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(key)
            .map_err(|_| ValidationError::InvalidEncryptionKey)?;
        if decoded.len() != 32 {
            return Err(ValidationError::InvalidEncryptionKey);
        }
        if config
            .privacy
            .hash_salt
            .as_deref()
            .unwrap_or_default()
            .is_empty()
        {
            return Err(ValidationError::MissingHashSalt);
        }
    }

    if let Some(ref url) = config.webhook.url {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ValidationError::InvalidWebhookUrl(url.clone()));
        }
    }

    let threshold = config.pipeline.coverage_threshold;
    if !(threshold > 0.0 && threshold <= 1.0) {
        return Err(ValidationError::InvalidCoverageThreshold(threshold));
    }

    if config.pipeline.gap_filler_max_retries > 5 {
        return Err(ValidationError::ExcessiveGapRetries(
            config.pipeline.gap_filler_max_retries,
        ));
    }

    if config.queue.workers == 0 {
        return Err(ValidationError::NoWorkers);
    }

    for (name, provider) in [
        ("primary", &config.llm.primary),
        ("secondary", &config.llm.secondary),
        ("tertiary", &config.llm.tertiary),
    ] {
        if let Some(p) = provider {
            if !p.base_url.starts_with("http://") && !p.base_url.starts_with("https://") {
                return Err(ValidationError::InvalidProviderUrl(name));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_rejects_short_encryption_key() {
        let mut config = Config::default();
        config.privacy.encryption_key =
            Some(base64::engine::general_purpose::STANDARD.encode([0u8; 16]));
        config.privacy.hash_salt = Some("salt".into());
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidEncryptionKey)
        ));
    }

    #[test]
    fn test_requires_salt_with_key() {
        let mut config = Config::default();
        config.privacy.encryption_key =
            Some(base64::engine::general_purpose::STANDARD.encode([7u8; 32]));
        assert!(matches!(
            validate(&config),
            Err(ValidationError::MissingHashSalt)
        ));
        config.privacy.hash_salt = Some("pepper".into());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_rejects_bad_webhook_url() {
        let mut config = Config::default();
        config.webhook.url = Some("ftp://nope".into());
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidWebhookUrl(_))
        ));
    }

    #[test]
    fn test_rejects_zero_coverage_threshold() {
        let mut config = Config::default();
        config.pipeline.coverage_threshold = 0.0;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidCoverageThreshold(_))
        ));
    }

    #[test]
    fn test_rejects_zero_workers() {
        let mut config = Config::default();
        config.queue.workers = 0;
        assert!(matches!(validate(&config), Err(ValidationError::NoWorkers)));
    }
}
