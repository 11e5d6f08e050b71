use serde::{Deserialize, Serialize};

/// Durable checkpoint announced to webhook receivers.
///
/// For any job the emitted sequence is a prefix of
/// `parsed → analyzed → completed`, or ends with `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Parsed,
    Analyzed,
    Completed,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Parsed => "parsed",
            Phase::Analyzed => "analyzed",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        }
    }
}

/// Minimal fields extracted right after parsing, before full analysis,
/// so the dashboard can render a card immediately. Contact fields are
/// already masked here; plaintext PII never leaves the worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QuickData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_masked: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_masked: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_position: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookResult {
    pub candidate_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pii_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quick_data: Option<QuickData>,
}

/// Body of every signed webhook POST. Receivers must be idempotent on
/// `(job_id, status)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub job_id: String,
    pub status: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<WebhookResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Dead-lettered webhook delivery, retained until replay succeeds or an
/// operator purges it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookFailure {
    pub job_id: String,
    pub status: Phase,
    pub payload: WebhookPayload,
    pub error: String,
    pub retry_count: u32,
    pub next_retry_at: chrono::DateTime<chrono::Utc>,
}
