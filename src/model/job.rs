use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::files::FileKind;
use crate::model::webhook::Phase;

/// Analysis depth requested at submit time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    /// Single-model extraction (primary provider only)
    Phase1,
    /// Cross-checked extraction (primary + secondary, tertiary when configured)
    Phase2,
}

impl Default for AnalysisMode {
    fn default() -> Self {
        AnalysisMode::Phase1
    }
}

/// Job lifecycle status. Terminal states are `Completed` and `Failed`;
/// once terminal the status never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Parsing,
    Parsed,
    Analyzing,
    Analyzed,
    Persisting,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Machine-readable failure taxonomy surfaced on jobs and API responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unauthorized,
    RateLimited,
    FileValidation,
    InsufficientCredits,
    DuplicateIdempotencyKey,
    Encrypted,
    UnsupportedFormat,
    TooManyPages,
    ParseFailed,
    TextTooShort,
    NotAResume,
    MultiplePersons,
    AnalysisFailed,
    CircuitOpen,
    EmbeddingFailed,
    CryptoFailure,
    PersistFailed,
    Canceled,
    Dlq,
    InternalError,
}

impl ErrorCode {
    /// Whether a worker may redeliver and retry the job after this failure
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorCode::AnalysisFailed | ErrorCode::CircuitOpen | ErrorCode::PersistFailed
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // serde already owns the canonical SCREAMING_SNAKE_CASE spelling
        let s = serde_json::to_string(self).unwrap_or_default();
        write!(f, "{}", s.trim_matches('"'))
    }
}

/// One ingestion request: a single resume file moving through the pipeline.
///
/// Owned exclusively by at most one worker at a time (queue visibility).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub id: String,
    pub tenant_id: String,
    pub candidate_id: String,
    pub file_name: String,
    pub file_type: FileKind,
    pub file_size: u64,
    /// Object store key of the raw upload (immutable)
    pub file_path: String,
    pub analysis_mode: AnalysisMode,
    pub status: JobStatus,
    pub attempt_count: u32,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Job id this run is a retry of, when created via the retry endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<String>,
    /// Durable parse checkpoint; redeliveries resume past the parser
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
    /// Webhook phases already emitted, in order (redelivery must not repeat them)
    #[serde(default)]
    pub emitted_phases: Vec<Phase>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingJob {
    /// Record a status transition. Terminal states are immutable: a
    /// transition away from `Completed`/`Failed` is ignored.
    pub fn transition(&mut self, status: JobStatus) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, code: ErrorCode, message: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = JobStatus::Failed;
        self.error_code = Some(code);
        self.error_message = Some(message.into());
        self.updated_at = Utc::now();
    }

    pub fn has_emitted(&self, phase: Phase) -> bool {
        self.emitted_phases.contains(&phase)
    }
}
