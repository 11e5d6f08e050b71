//! Job orchestrator: accepts ingestion requests, writes the job and
//! placeholder candidate rows, and enqueues the work. Also owns status
//! reads, explicit retry, and queued-job cancellation.
//!
//! Credits are only *checked* here — the pipeline commits usage when (and
//! only when) an analysis completes, so a failed run never charges.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::credits::{CreditError, CreditLedger};
use crate::files::{self, FileValidationError};
use crate::model::{AnalysisMode, Candidate, ErrorCode, JobStatus, ProcessingJob};
use crate::observability::Metrics;
use crate::queue::{JobBroker, JobMessage, QueueError};
use crate::storage::{ObjectStoreGateway, StorageError};
use crate::store::{MetadataStore, StoreError};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("insufficient credits")]
    InsufficientCredits,

    #[error("file validation failed: {0}")]
    FileValidation(String),

    #[error("idempotency key was already used by a finished job")]
    DuplicateIdempotencyKey,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<CreditError> for OrchestratorError {
    fn from(e: CreditError) -> Self {
        match e {
            CreditError::Insufficient => OrchestratorError::InsufficientCredits,
            CreditError::TenantNotFound(id) => OrchestratorError::NotFound(format!("tenant {id}")),
            CreditError::Store(e) => OrchestratorError::Store(e),
        }
    }
}

impl From<FileValidationError> for OrchestratorError {
    fn from(e: FileValidationError) -> Self {
        OrchestratorError::FileValidation(e.to_string())
    }
}

/// How the file reaches the core
pub enum SubmitSource {
    /// Direct multipart upload
    Upload { file_name: String, bytes: Vec<u8> },
    /// Already staged through a presigned PUT; path must live under the
    /// tenant's upload prefix
    Staged {
        storage_path: String,
        file_name: String,
    },
}

#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    pub job_id: String,
    pub candidate_id: String,
}

#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<Config>,
    store: MetadataStore,
    credits: CreditLedger,
    storage: ObjectStoreGateway,
    broker: Arc<JobBroker>,
    metrics: Arc<Metrics>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        store: MetadataStore,
        credits: CreditLedger,
        storage: ObjectStoreGateway,
        broker: Arc<JobBroker>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            store,
            credits,
            storage,
            broker,
            metrics,
        }
    }

    /// Accept an upload: credit gate → idempotency → file validation →
    /// canonical object write → job + placeholder rows → enqueue.
    pub async fn submit(
        &self,
        tenant_id: &str,
        source: SubmitSource,
        analysis_mode: AnalysisMode,
        idempotency_key: Option<String>,
    ) -> Result<SubmitReceipt, OrchestratorError> {
        // fail fast with an empty wallet; the actual debit happens on success
        if self.credits.remaining(tenant_id).await? == 0 {
            return Err(OrchestratorError::InsufficientCredits);
        }

        // replaying a key against a live job returns the same identifiers;
        // against a finished job it is a client bug
        if let Some(key) = &idempotency_key {
            if let Some(existing_id) = self.store.get_idempotent(tenant_id, key)? {
                if let Some(existing) = self.store.get_job_scoped(tenant_id, &existing_id)? {
                    if existing.status.is_terminal() {
                        return Err(OrchestratorError::DuplicateIdempotencyKey);
                    }
                    return Ok(SubmitReceipt {
                        job_id: existing.id,
                        candidate_id: existing.candidate_id,
                    });
                }
            }
        }

        let (file_name, bytes) = match source {
            SubmitSource::Upload { file_name, bytes } => (file_name, bytes),
            SubmitSource::Staged {
                storage_path,
                file_name,
            } => {
                let expected_prefix = format!("uploads/{}/", tenant_id);
                if !storage_path.starts_with(&expected_prefix) {
                    return Err(OrchestratorError::FileValidation(format!(
                        "storage_path must start with {expected_prefix}"
                    )));
                }
                let bytes = self.storage.get(&storage_path).await.map_err(|e| match e {
                    StorageError::NotFound(path) => OrchestratorError::FileValidation(format!(
                        "staged object not found: {path}"
                    )),
                    other => OrchestratorError::Storage(other),
                })?;
                (file_name, bytes)
            }
        };

        let kind = files::validate_upload(
            &file_name,
            bytes.len() as u64,
            &bytes,
            self.config.pipeline.max_file_size.as_u64(),
        )?;

        let job_id = Uuid::now_v7().to_string();
        let candidate_id = Uuid::new_v4().to_string();
        let file_path = ObjectStoreGateway::upload_key(tenant_id, &job_id, kind);
        let file_size = bytes.len() as u64;

        self.storage.put(&file_path, bytes).await?;

        // candidate before job: a job row must never point at nothing
        let candidate = Candidate::placeholder(&candidate_id, tenant_id, &file_name);
        self.store.upsert_candidate(&candidate)?;

        let now = Utc::now();
        let job = ProcessingJob {
            id: job_id.clone(),
            tenant_id: tenant_id.to_string(),
            candidate_id: candidate_id.clone(),
            file_name,
            file_type: kind,
            file_size,
            file_path: file_path.clone(),
            analysis_mode,
            status: JobStatus::Queued,
            attempt_count: 0,
            error_code: None,
            error_message: None,
            idempotency_key: idempotency_key.clone(),
            retry_of: None,
            raw_text: None,
            emitted_phases: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        if let Some(key) = &idempotency_key {
            self.store.remember_idempotency(tenant_id, key, &job_id)?;
        }
        self.store.upsert_job(&job)?;

        if let Err(e) = self.enqueue(&job).await {
            // compensate: the tenant must not see a job that nothing owns
            warn!(job_id = %job.id, error = %e, "Enqueue failed, compensating");
            let mut failed = job.clone();
            failed.fail(ErrorCode::InternalError, "enqueue failed");
            let _ = self.store.upsert_job(&failed);
            let _ = self.storage.delete(&file_path).await;
            return Err(e);
        }

        self.metrics.job_submitted();
        info!(job_id = %job_id, candidate_id = %candidate_id, tenant = tenant_id, "Job submitted");

        Ok(SubmitReceipt {
            job_id,
            candidate_id,
        })
    }

    async fn enqueue(&self, job: &ProcessingJob) -> Result<(), OrchestratorError> {
        let message = JobMessage {
            job_id: job.id.clone(),
            tenant_id: job.tenant_id.clone(),
            enqueued_at_ms: Utc::now().timestamp_millis() as u64,
        };
        self.broker.enqueue(message).await?;
        Ok(())
    }

    /// Tenant-scoped status read
    pub fn status(&self, tenant_id: &str, job_id: &str) -> Result<ProcessingJob, OrchestratorError> {
        self.store
            .get_job_scoped(tenant_id, job_id)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("job {job_id}")))
    }

    /// Re-run a failed job. Creates a fresh job row against the same
    /// candidate; the usage uniqueness constraint keeps the retry free if
    /// the candidate was ever charged.
    pub async fn retry(
        &self,
        tenant_id: &str,
        job_id: &str,
    ) -> Result<SubmitReceipt, OrchestratorError> {
        let previous = self.status(tenant_id, job_id)?;
        if previous.status != JobStatus::Failed {
            return Err(OrchestratorError::InvalidState(format!(
                "only failed jobs can be retried (status: {:?})",
                previous.status
            )));
        }

        if self.credits.remaining(tenant_id).await? == 0
            && !self.store.usage_exists(&previous.candidate_id)?
        {
            return Err(OrchestratorError::InsufficientCredits);
        }

        // reset the candidate to processing; content is overwritten on success
        if let Some(mut candidate) = self
            .store
            .get_candidate_scoped(tenant_id, &previous.candidate_id)?
        {
            candidate.status = crate::model::CandidateStatus::Processing;
            candidate.updated_at = Utc::now();
            self.store.upsert_candidate(&candidate)?;
        }

        let now = Utc::now();
        let job = ProcessingJob {
            id: Uuid::now_v7().to_string(),
            retry_of: Some(previous.id.clone()),
            status: JobStatus::Queued,
            attempt_count: 0,
            error_code: None,
            error_message: None,
            raw_text: None,
            emitted_phases: Vec::new(),
            idempotency_key: None,
            created_at: now,
            updated_at: now,
            ..previous
        };
        self.store.upsert_job(&job)?;
        self.enqueue(&job).await?;
        self.metrics.job_retried();
        info!(job_id = %job.id, retry_of = ?job.retry_of, "Job retried");

        Ok(SubmitReceipt {
            job_id: job.id,
            candidate_id: job.candidate_id,
        })
    }

    /// Cancel a queued job. The worker discards the message on receive;
    /// in-flight jobs cannot be canceled.
    pub async fn cancel(&self, tenant_id: &str, job_id: &str) -> Result<(), OrchestratorError> {
        let mut job = self.status(tenant_id, job_id)?;
        if job.status != JobStatus::Queued {
            return Err(OrchestratorError::InvalidState(format!(
                "only queued jobs can be canceled (status: {:?})",
                job.status
            )));
        }
        job.fail(ErrorCode::Canceled, "canceled by tenant");
        self.store.upsert_job(&job)?;
        info!(job_id, tenant = tenant_id, "Job canceled");
        Ok(())
    }
}
