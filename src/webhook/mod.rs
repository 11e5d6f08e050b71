//! Webhook emitter: signed progressive-phase notifications with bounded
//! jittered retry and a dead-letter table for out-of-band replay.
//!
//! The emitter is the only component that produces phase events, and the
//! pipeline runner invokes it inline, so phases can never overtake stages.
//! Receivers are expected to be idempotent on `(job_id, status)`.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::{WebhookFailure, WebhookPayload};
use crate::observability::Metrics;
use crate::store::MetadataStore;

/// HTTP statuses worth another attempt
const RETRYABLE_STATUSES: &[u16] = &[408, 429, 500, 502, 503, 504];

const BACKOFF_CAP: Duration = Duration::from_secs(10);
const JITTER: f64 = 0.2;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("delivery timeout")]
    Timeout,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("receiver returned HTTP {0}")]
    Http(u16),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Timeout | TransportError::Connection(_) => true,
            TransportError::Http(status) => RETRYABLE_STATUSES.contains(status),
        }
    }
}

/// Delivery capability, swappable for tests
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn deliver(
        &self,
        url: &str,
        secret: Option<&str>,
        payload: &WebhookPayload,
    ) -> Result<(), TransportError>;
}

/// reqwest-backed transport signing with the shared-secret header
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookTransport for HttpTransport {
    async fn deliver(
        &self,
        url: &str,
        secret: Option<&str>,
        payload: &WebhookPayload,
    ) -> Result<(), TransportError> {
        let mut request = self.client.post(url).json(payload);
        if let Some(secret) = secret {
            request = request.header("X-Webhook-Secret", secret);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Connection(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(TransportError::Http(status.as_u16()))
        }
    }
}

/// Progressive-phase webhook emitter
#[derive(Clone)]
pub struct WebhookEmitter {
    transport: Arc<dyn WebhookTransport>,
    url: Option<String>,
    secret: Option<String>,
    max_attempts: u32,
    backoff_base: Duration,
    store: MetadataStore,
    metrics: Arc<Metrics>,
}

impl WebhookEmitter {
    pub fn new(
        transport: Arc<dyn WebhookTransport>,
        url: Option<String>,
        secret: Option<String>,
        max_attempts: u32,
        store: MetadataStore,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            transport,
            url,
            secret,
            max_attempts,
            backoff_base: Duration::from_secs(1),
            store,
            metrics,
        }
    }

    /// Shrink the retry backoff (tests)
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    /// Deliver one phase event. Exhausted retries record a
    /// `webhook_failures` row and return `false`; an unconfigured emitter
    /// silently skips.
    pub async fn emit(&self, payload: WebhookPayload) -> bool {
        let Some(url) = self.url.clone() else {
            return true;
        };

        match self.try_deliver(&url, &payload).await {
            Ok(attempts) => {
                self.metrics.webhook_delivered();
                debug!(job_id = %payload.job_id, status = ?payload.status, attempts, "Webhook delivered");
                true
            }
            Err((attempts, error)) => {
                self.metrics.webhook_failed();
                warn!(
                    job_id = %payload.job_id,
                    status = ?payload.status,
                    attempts,
                    %error,
                    "Webhook delivery exhausted, recording failure"
                );
                let failure = WebhookFailure {
                    job_id: payload.job_id.clone(),
                    status: payload.status,
                    payload,
                    error: error.to_string(),
                    retry_count: attempts,
                    next_retry_at: Utc::now() + chrono::Duration::minutes(5),
                };
                if let Err(e) = self.store.record_webhook_failure(&failure) {
                    warn!(error = %e, "Failed to record webhook failure");
                }
                false
            }
        }
    }

    async fn try_deliver(
        &self,
        url: &str,
        payload: &WebhookPayload,
    ) -> Result<u32, (u32, TransportError)> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self
                .transport
                .deliver(url, self.secret.as_deref(), payload)
                .await
            {
                Ok(()) => return Ok(attempt),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let backoff = self.backoff(attempt);
                    debug!(attempt, backoff_ms = backoff.as_millis() as u64, error = %e, "Webhook attempt failed, retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err((attempt, e)),
            }
        }
    }

    /// 1s · 2^n capped at 10s, ±20% jitter
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.backoff_base.as_millis() as f64 * 2f64.powi(attempt.saturating_sub(1) as i32);
        let capped = exp.min(BACKOFF_CAP.as_millis() as f64);
        let spread = 1.0 + JITTER * (2.0 * rand::random::<f64>() - 1.0);
        Duration::from_millis((capped * spread).max(0.0) as u64)
    }

    /// Re-deliver everything in the failure table, deleting rows that go
    /// through. Returns the number of successful replays.
    pub async fn replay_failures(&self) -> usize {
        let Some(url) = self.url.clone() else {
            return 0;
        };

        let failures = match self.store.list_webhook_failures(1000) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "Failed to list webhook failures");
                return 0;
            }
        };

        let mut replayed = 0;
        for failure in failures {
            match self
                .transport
                .deliver(&url, self.secret.as_deref(), &failure.payload)
                .await
            {
                Ok(()) => {
                    let _ = self
                        .store
                        .delete_webhook_failure(&failure.job_id, failure.status.as_str());
                    replayed += 1;
                    info!(job_id = %failure.job_id, status = ?failure.status, "Replayed webhook");
                }
                Err(e) => {
                    debug!(job_id = %failure.job_id, error = %e, "Replay still failing");
                }
            }
        }
        replayed
    }
}

/// In-memory transport for tests: records deliveries, optionally scripted
/// to fail with given statuses first.
pub struct RecordingTransport {
    deliveries: std::sync::Mutex<Vec<WebhookPayload>>,
    script: std::sync::Mutex<std::collections::VecDeque<u16>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            deliveries: std::sync::Mutex::new(Vec::new()),
            script: std::sync::Mutex::new(std::collections::VecDeque::new()),
        }
    }

    /// Fail the next delivery attempt with this HTTP status
    pub fn push_failure(&self, status: u16) {
        self.script.lock().expect("script lock").push_back(status);
    }

    pub fn deliveries(&self) -> Vec<WebhookPayload> {
        self.deliveries.lock().expect("deliveries lock").clone()
    }

    pub fn statuses(&self) -> Vec<crate::model::Phase> {
        self.deliveries().iter().map(|p| p.status).collect()
    }
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookTransport for RecordingTransport {
    async fn deliver(
        &self,
        _url: &str,
        _secret: Option<&str>,
        payload: &WebhookPayload,
    ) -> Result<(), TransportError> {
        if let Some(status) = self.script.lock().expect("script lock").pop_front() {
            return Err(TransportError::Http(status));
        }
        self.deliveries
            .lock()
            .expect("deliveries lock")
            .push(payload.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Phase;
    use tempfile::TempDir;

    fn payload(status: Phase) -> WebhookPayload {
        WebhookPayload {
            job_id: "j1".into(),
            status,
            phase: Some(status.as_str().into()),
            result: None,
            error: None,
        }
    }

    fn emitter(transport: Arc<RecordingTransport>) -> (WebhookEmitter, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = MetadataStore::open(temp.path().join("metadata")).unwrap();
        let emitter = WebhookEmitter::new(
            transport,
            Some("https://receiver.example/hooks".into()),
            Some("shared-secret".into()),
            3,
            store,
            Arc::new(Metrics::new()),
        )
        .with_backoff_base(Duration::from_millis(1));
        (emitter, temp)
    }

    #[tokio::test]
    async fn test_delivers_first_try() {
        let transport = Arc::new(RecordingTransport::new());
        let (emitter, _temp) = emitter(transport.clone());

        assert!(emitter.emit(payload(Phase::Parsed)).await);
        assert_eq!(transport.statuses(), vec![Phase::Parsed]);
    }

    #[tokio::test]
    async fn test_retries_retryable_statuses() {
        let transport = Arc::new(RecordingTransport::new());
        transport.push_failure(502);
        transport.push_failure(503);
        let (emitter, _temp) = emitter(transport.clone());

        assert!(emitter.emit(payload(Phase::Completed)).await);
        assert_eq!(transport.statuses(), vec![Phase::Completed]);
    }

    #[tokio::test]
    async fn test_non_retryable_status_fails_fast() {
        let transport = Arc::new(RecordingTransport::new());
        transport.push_failure(401);
        let (emitter, _temp) = emitter(transport.clone());

        assert!(!emitter.emit(payload(Phase::Completed)).await);
        // one attempt, recorded as a failure row
        let failures = emitter.store.list_webhook_failures(10).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].retry_count, 1);
    }

    #[tokio::test]
    async fn test_exhaustion_records_failure_with_count() {
        // receiver outage: 502 on every attempt
        let transport = Arc::new(RecordingTransport::new());
        for _ in 0..3 {
            transport.push_failure(502);
        }
        let (emitter, _temp) = emitter(transport.clone());

        assert!(!emitter.emit(payload(Phase::Completed)).await);

        let failures = emitter.store.list_webhook_failures(10).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].retry_count, 3);
        assert_eq!(failures[0].payload.job_id, "j1");
        assert!(failures[0].error.contains("502"));
    }

    #[tokio::test]
    async fn test_replay_clears_failures() {
        let transport = Arc::new(RecordingTransport::new());
        for _ in 0..3 {
            transport.push_failure(502);
        }
        let (emitter, _temp) = emitter(transport.clone());
        emitter.emit(payload(Phase::Completed)).await;

        assert_eq!(emitter.replay_failures().await, 1);
        assert!(emitter.store.list_webhook_failures(10).unwrap().is_empty());
        assert_eq!(transport.statuses(), vec![Phase::Completed]);
    }

    #[tokio::test]
    async fn test_unconfigured_emitter_skips() {
        let temp = TempDir::new().unwrap();
        let store = MetadataStore::open(temp.path().join("metadata")).unwrap();
        let emitter = WebhookEmitter::new(
            Arc::new(RecordingTransport::new()),
            None,
            None,
            3,
            store,
            Arc::new(Metrics::new()),
        );
        assert!(emitter.emit(payload(Phase::Parsed)).await);
    }
}
