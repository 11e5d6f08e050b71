//! LLM and embedding provider capability traits plus the HTTP
//! implementations speaking the OpenAI-compatible wire shape.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::{EmbeddingConfig, ProviderConfig};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider timeout")]
    Timeout,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("provider returned HTTP {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("response violates the expected schema: {0}")]
    SchemaViolation(String),

    #[error("circuit open for provider {0}")]
    CircuitOpen(String),

    #[error("no provider configured for {0}")]
    NotConfigured(&'static str),
}

impl LlmError {
    /// Retried: timeouts, connection errors, provider 5xx.
    /// Never retried: 4xx and schema violations.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Timeout | LlmError::Connection(_) => true,
            LlmError::Provider { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Only infrastructure failures count against the circuit breaker;
    /// a well-formed 4xx or an unparseable body is a provider answering.
    pub fn trips_breaker(&self) -> bool {
        self.is_transient()
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;

/// Structured-generation capability over one provider
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Ask the model for a JSON document answering `prompt`
    async fn generate(&self, prompt: &str) -> Result<Value>;
}

/// Text embedding capability
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Chat-completions client for one provider endpoint
pub struct HttpLlmProvider {
    name: String,
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpLlmProvider {
    pub fn new(name: impl Into<String>, config: &ProviderConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Connection(e.to_string()))?;

        Ok(Self {
            name: name.into(),
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str) -> Result<Value> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "user", "content": prompt }
            ],
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Provider {
                status: status.as_u16(),
                message: truncate(&message, 300),
            });
        }

        let envelope: Value = response
            .json()
            .await
            .map_err(|e| LlmError::SchemaViolation(format!("invalid response body: {e}")))?;

        let content = envelope["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::SchemaViolation("missing choices[0].message.content".into()))?;

        debug!(provider = %self.name, bytes = content.len(), "Received structured generation");

        serde_json::from_str(content)
            .map_err(|e| LlmError::SchemaViolation(format!("content is not JSON: {e}")))
    }
}

/// Embeddings client
pub struct HttpEmbeddingProvider {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
    api_key: Option<String>,
}

impl HttpEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimension: config.dimension,
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = json!({
            "model": self.model,
            "input": text,
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Provider {
                status: status.as_u16(),
                message: truncate(&message, 300),
            });
        }

        let envelope: Value = response
            .json()
            .await
            .map_err(|e| LlmError::SchemaViolation(format!("invalid response body: {e}")))?;

        let vector: Vec<f32> = envelope["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| LlmError::SchemaViolation("missing data[0].embedding".into()))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        if vector.len() != self.dimension {
            return Err(LlmError::SchemaViolation(format!(
                "embedding dimension {} != {}",
                vector.len(),
                self.dimension
            )));
        }

        Ok(vector)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout
    } else if e.is_connect() {
        LlmError::Connection(e.to_string())
    } else {
        LlmError::Connection(e.to_string())
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(LlmError::Timeout.is_transient());
        assert!(LlmError::Connection("refused".into()).is_transient());
        assert!(
            LlmError::Provider {
                status: 503,
                message: String::new()
            }
            .is_transient()
        );
        assert!(
            !LlmError::Provider {
                status: 400,
                message: String::new()
            }
            .is_transient()
        );
        assert!(!LlmError::SchemaViolation("bad".into()).is_transient());
        assert!(!LlmError::SchemaViolation("bad".into()).trips_breaker());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 300), "short");
        let long = "é".repeat(200);
        let cut = truncate(&long, 301);
        assert!(cut.len() <= 305);
    }
}
