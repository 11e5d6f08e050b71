//! LLM manager: a unified capability over the configured providers
//! (primary / secondary / tertiary) and the embedding endpoint.
//!
//! Owns per-provider timeout, bounded retry with jittered backoff, and a
//! process-local circuit breaker per provider. Callers address providers
//! by index in configuration order; the cross-check stage treats index 0
//! as the primary.

pub mod breaker;
pub mod mock; // Expose for tests (scripted providers)
pub mod provider;
pub mod retry;
pub mod schema;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use provider::{EmbeddingProvider, HttpEmbeddingProvider, HttpLlmProvider, LlmError, LlmProvider};
pub use retry::RetryPolicy;
pub use schema::{ClassifierVerdict, ExtractionDraft, parse_classifier_verdict, parse_draft};

use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::observability::Metrics;

struct ProviderHandle {
    name: String,
    provider: Arc<dyn LlmProvider>,
    breaker: CircuitBreaker,
}

struct EmbedderHandle {
    provider: Arc<dyn EmbeddingProvider>,
    breaker: CircuitBreaker,
}

pub struct LlmManager {
    providers: Vec<ProviderHandle>,
    embedder: Option<EmbedderHandle>,
    retry: RetryPolicy,
    generate_timeout: Duration,
    embed_timeout: Duration,
    metrics: Arc<Metrics>,
}

impl LlmManager {
    /// Assemble a manager from explicit capabilities (test seam)
    pub fn new(
        named_providers: Vec<(String, Arc<dyn LlmProvider>)>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        retry: RetryPolicy,
        breaker_config: CircuitBreakerConfig,
        generate_timeout: Duration,
        embed_timeout: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        let providers = named_providers
            .into_iter()
            .map(|(name, provider)| ProviderHandle {
                name,
                provider,
                breaker: CircuitBreaker::new(breaker_config.clone()),
            })
            .collect();

        Self {
            providers,
            embedder: embedder.map(|provider| EmbedderHandle {
                provider,
                breaker: CircuitBreaker::new(breaker_config.clone()),
            }),
            retry,
            generate_timeout,
            embed_timeout,
            metrics,
        }
    }

    /// Build HTTP providers from configuration
    pub fn from_config(config: &LlmConfig, metrics: Arc<Metrics>) -> Result<Self, LlmError> {
        let generate_timeout = config.generate_timeout.as_duration();
        let embed_timeout = config.embed_timeout.as_duration();

        let mut named: Vec<(String, Arc<dyn LlmProvider>)> = Vec::new();
        for (name, provider_config) in [
            ("primary", &config.primary),
            ("secondary", &config.secondary),
            ("tertiary", &config.tertiary),
        ] {
            if let Some(pc) = provider_config {
                let provider = HttpLlmProvider::new(name, pc, generate_timeout)?;
                named.push((name.to_string(), Arc::new(provider)));
            }
        }

        let embedder: Option<Arc<dyn EmbeddingProvider>> =
            if config.embedding.api_key.is_some() || !named.is_empty() {
                Some(Arc::new(HttpEmbeddingProvider::new(
                    &config.embedding,
                    embed_timeout,
                )?))
            } else {
                None
            };

        Ok(Self::new(
            named,
            embedder,
            RetryPolicy::new(
                config.max_retries,
                Duration::from_millis(config.retry_base_ms),
            ),
            CircuitBreakerConfig {
                failure_threshold: config.cb_failure_threshold,
                cooldown: config.cb_cooldown.as_duration(),
            },
            generate_timeout,
            embed_timeout,
            metrics,
        ))
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|h| h.name.clone()).collect()
    }

    pub fn breaker_state(&self, index: usize) -> Option<CircuitState> {
        self.providers.get(index).map(|h| h.breaker.state())
    }

    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    /// Structured generation against one provider, with bounded retry and
    /// circuit protection. Rejects immediately with `CircuitOpen` while
    /// the provider's circuit is open.
    pub async fn generate(&self, provider_index: usize, prompt: &str) -> Result<Value, LlmError> {
        let handle = self
            .providers
            .get(provider_index)
            .ok_or(LlmError::NotConfigured("llm provider"))?;

        let mut attempt: u32 = 0;
        loop {
            if !handle.breaker.try_acquire() {
                self.metrics.circuit_rejection();
                return Err(LlmError::CircuitOpen(handle.name.clone()));
            }

            self.metrics.llm_call();
            let started = Instant::now();

            let outcome = match timeout(self.generate_timeout, handle.provider.generate(prompt)).await
            {
                Ok(result) => result,
                Err(_) => Err(LlmError::Timeout),
            };

            match outcome {
                Ok(value) => {
                    handle.breaker.on_success();
                    debug!(
                        provider = %handle.name,
                        attempts = attempt + 1,
                        duration_ms = started.elapsed().as_millis() as u64,
                        outcome = "ok",
                        "Generation finished"
                    );
                    return Ok(value);
                }
                Err(e) => {
                    if e.trips_breaker() {
                        handle.breaker.on_failure();
                    }
                    self.metrics.llm_failure();
                    warn!(
                        provider = %handle.name,
                        attempt = attempt + 1,
                        duration_ms = started.elapsed().as_millis() as u64,
                        error = %e,
                        "Generation attempt failed"
                    );

                    if e.is_transient() && attempt < self.retry.max_retries {
                        sleep(self.retry.backoff(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Embed text into the configured vector space
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let handle = self
            .embedder
            .as_ref()
            .ok_or(LlmError::NotConfigured("embedding provider"))?;

        let mut attempt: u32 = 0;
        loop {
            if !handle.breaker.try_acquire() {
                self.metrics.circuit_rejection();
                return Err(LlmError::CircuitOpen("embedding".into()));
            }

            self.metrics.llm_call();
            let outcome = match timeout(self.embed_timeout, handle.provider.embed(text)).await {
                Ok(result) => result,
                Err(_) => Err(LlmError::Timeout),
            };

            match outcome {
                Ok(vector) => {
                    handle.breaker.on_success();
                    return Ok(vector);
                }
                Err(e) => {
                    if e.trips_breaker() {
                        handle.breaker.on_failure();
                    }
                    self.metrics.llm_failure();
                    if e.is_transient() && attempt < self.retry.max_retries {
                        sleep(self.retry.backoff(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    pub fn embedding_dimension(&self) -> Option<usize> {
        self.embedder.as_ref().map(|h| h.provider.dimension())
    }
}
