//! Pipeline runner: consumes queue deliveries and drives one job at a time
//! through the stage chain, owning status transitions, webhook phases,
//! redelivery resume, the wall-clock budget, and the usage commit.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::credits::{CreditError, CreditLedger};
use crate::crosscheck::Consensus;
use crate::llm::LlmManager;
use crate::model::{
    Candidate, CandidateStatus, CareerEntry, EducationEntry, ErrorCode, JobStatus, Phase,
    ProcessingJob, ProjectEntry, QuickData, Warning, WebhookPayload, WebhookResult,
};
use crate::queue::{Delivery, JobBroker, JobQueue};
use crate::storage::ObjectStoreGateway;
use crate::store::MetadataStore;
use crate::webhook::WebhookEmitter;

use super::privacy::PrivacyAgent;
use super::{StageError, analyze, classify, coverage, parser, router, validate};

/// Everything a worker needs; cheap to clone per worker task
#[derive(Clone)]
pub struct WorkerDeps {
    pub config: Arc<Config>,
    pub store: MetadataStore,
    pub credits: CreditLedger,
    pub storage: ObjectStoreGateway,
    pub llm: Arc<LlmManager>,
    pub webhooks: WebhookEmitter,
    pub queue: Arc<RwLock<JobQueue>>,
    pub privacy: Option<Arc<PrivacyAgent>>,
    pub metrics: Arc<crate::observability::Metrics>,
}

/// One worker consuming one delivery channel
pub struct Worker {
    id: usize,
    deps: WorkerDeps,
}

/// Spawn one worker task per receiver
pub fn spawn_workers(
    deps: WorkerDeps,
    receivers: Vec<mpsc::Receiver<Delivery>>,
) -> Vec<JoinHandle<()>> {
    receivers
        .into_iter()
        .enumerate()
        .map(|(id, rx)| {
            let worker = Worker {
                id,
                deps: deps.clone(),
            };
            tokio::spawn(worker.run(rx))
        })
        .collect()
}

/// Sweeper: periodically return expired visibility leases and mark
/// delivery-exhausted jobs failed with the DLQ code.
pub fn spawn_sweeper(
    broker: Arc<JobBroker>,
    store: MetadataStore,
    webhooks: WebhookEmitter,
    interval: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            match broker.redeliver_expired().await {
                Ok((_expired, dead)) => {
                    for entry in dead {
                        mark_dead_lettered(&store, &webhooks, &entry.message.job_id).await;
                    }
                }
                Err(e) => warn!(error = %e, "Queue sweep failed"),
            }
        }
    })
}

pub(crate) async fn mark_dead_lettered(
    store: &MetadataStore,
    webhooks: &WebhookEmitter,
    job_id: &str,
) {
    let Ok(Some(mut job)) = store.get_job(job_id) else {
        return;
    };
    if job.status.is_terminal() {
        return;
    }
    job.fail(ErrorCode::Dlq, "delivery budget exhausted");
    if store.upsert_job(&job).is_ok() {
        if let Ok(Some(mut candidate)) = store.get_candidate(&job.candidate_id) {
            candidate.status = CandidateStatus::Failed;
            candidate.updated_at = chrono::Utc::now();
            let _ = store.upsert_candidate(&candidate);
        }
        let payload = WebhookPayload {
            job_id: job.id.clone(),
            status: Phase::Failed,
            phase: None,
            result: None,
            error: Some(ErrorCode::Dlq.to_string()),
        };
        webhooks.emit(payload).await;
    }
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<Delivery>) {
        info!(worker_id = self.id, "Worker started");
        while let Some(delivery) = rx.recv().await {
            let job_id = delivery.message.job_id.clone();
            if let Err(e) = self.handle_delivery(delivery).await {
                error!(worker_id = self.id, job_id, error = %e, "Delivery handling failed");
            }
        }
        info!(worker_id = self.id, "Worker channel closed, stopping");
    }

    async fn handle_delivery(&self, delivery: Delivery) -> Result<(), crate::queue::QueueError> {
        let Delivery {
            seq,
            receipt,
            message,
            delivery_count,
        } = delivery;

        let mut job = match self.deps.store.get_job(&message.job_id) {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_id = %message.job_id, "Message references unknown job, dropping");
                return self.deps.queue.read().await.ack(seq, &receipt);
            }
            Err(e) => {
                warn!(job_id = %message.job_id, error = %e, "Job load failed, returning message");
                self.deps.queue.read().await.nack(seq, &receipt, "store unavailable")?;
                return Ok(());
            }
        };

        // terminal rows (canceled jobs included) are discarded on receive
        if job.status.is_terminal() {
            debug!(job_id = %job.id, status = ?job.status, "Job already terminal, dropping message");
            return self.deps.queue.read().await.ack(seq, &receipt);
        }

        job.attempt_count = delivery_count;
        let max_attempts = self.deps.config.queue.max_attempts;
        if delivery_count > max_attempts {
            self.fail_job(&mut job, StageError::fatal(ErrorCode::Dlq, "delivery budget exhausted"))
                .await;
            return self.deps.queue.read().await.ack(seq, &receipt);
        }
        let _ = self.deps.store.upsert_job(&job);

        // keep the visibility lease alive while the pipeline runs
        let heartbeat = self.spawn_heartbeat(seq, receipt.clone());

        let wall_clock = self.deps.config.pipeline.job_wall_clock.as_duration();
        let outcome = tokio::time::timeout(wall_clock, self.process(&mut job)).await;

        heartbeat.abort();

        match outcome {
            Ok(Ok(())) => self.deps.queue.read().await.ack(seq, &receipt),
            Ok(Err(e)) if e.is_transient() && delivery_count < max_attempts => {
                warn!(job_id = %job.id, error = %e, "Transient stage failure, returning for redelivery");
                job.error_code = Some(e.code);
                job.error_message = Some(e.message.clone());
                let _ = self.deps.store.upsert_job(&job);

                let reason = e.code.to_string();
                if let Some(_dead) = self.deps.queue.read().await.nack(seq, &receipt, &reason)? {
                    self.fail_job(&mut job, StageError::fatal(ErrorCode::Dlq, e.message))
                        .await;
                }
                Ok(())
            }
            Ok(Err(e)) => {
                self.fail_job(&mut job, e).await;
                self.deps.queue.read().await.ack(seq, &receipt)
            }
            Err(_elapsed) => {
                warn!(job_id = %job.id, "Job exceeded wall clock, returning message");
                if let Some(_dead) =
                    self.deps.queue.read().await.nack(seq, &receipt, "WALL_CLOCK")?
                {
                    self.fail_job(
                        &mut job,
                        StageError::fatal(ErrorCode::Dlq, "wall clock exhausted"),
                    )
                    .await;
                }
                Ok(())
            }
        }
    }

    fn spawn_heartbeat(&self, seq: u64, receipt: String) -> JoinHandle<()> {
        let queue = self.deps.queue.clone();
        let interval = self.deps.config.queue.visibility_timeout.as_duration() / 3;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if queue.read().await.heartbeat(seq, &receipt).is_err() {
                    break;
                }
            }
        })
    }

    /// The stage chain. Any error unwinds to `handle_delivery`, which
    /// decides between redelivery and terminal failure.
    async fn process(&self, job: &mut ProcessingJob) -> Result<(), StageError> {
        let started = Instant::now();
        let pipeline = &self.deps.config.pipeline;

        // stage 1: router
        self.transition(job, JobStatus::Parsing)?;
        let bytes = self.deps.storage.get(&job.file_path).await?;
        let _probe = router::route(job.file_type, &bytes, pipeline.max_pages)?;

        // stage 2: parser (raw_text checkpoint makes redelivery resume here)
        let raw_text = match &job.raw_text {
            Some(text) => text.clone(),
            None => {
                // extraction is CPU-bound; run it off the reactor under the
                // parse budget
                let kind = job.file_type;
                let min_len = pipeline.min_text_len;
                let parse_bytes = bytes.clone();
                let parsed = tokio::time::timeout(
                    pipeline.parse_timeout.as_duration(),
                    tokio::task::spawn_blocking(move || {
                        parser::extract_text(kind, &parse_bytes, min_len)
                    }),
                )
                .await;
                let text = match parsed {
                    Err(_) => {
                        return Err(StageError::fatal(
                            ErrorCode::ParseFailed,
                            "parser exceeded its time budget",
                        ));
                    }
                    Ok(Err(join_error)) => {
                        return Err(StageError::fatal(
                            ErrorCode::ParseFailed,
                            join_error.to_string(),
                        ));
                    }
                    Ok(Ok(result)) => result?,
                };
                job.raw_text = Some(text.clone());
                text
            }
        };

        let quick_data = self.apply_quick_extraction(job, &raw_text).await?;
        self.transition(job, JobStatus::Parsed)?;
        self.emit_phase(
            job,
            Phase::Parsed,
            Some(WebhookResult {
                candidate_id: job.candidate_id.clone(),
                quick_data: Some(quick_data),
                ..Default::default()
            }),
            None,
        )
        .await;
        self.bail_if_canceled(job)?;

        // stage 2.5: document classifier (gated)
        if pipeline.use_document_classifier {
            classify::classify_document(&self.deps.llm, &raw_text).await?;
        }

        // stage 3: identity check
        let _person_count = classify::check_identity(&raw_text)?;

        // stage 4: cross-check analysis
        self.transition(job, JobStatus::Analyzing)?;
        let synonyms = self.deps.store.synonym_map()?;
        let mut consensus =
            analyze::analyze(&self.deps.llm, job.analysis_mode, &raw_text, &synonyms).await?;
        self.transition(job, JobStatus::Analyzed)?;
        self.emit_phase(
            job,
            Phase::Analyzed,
            Some(WebhookResult {
                candidate_id: job.candidate_id.clone(),
                confidence_score: Some(consensus.confidence_score),
                ..Default::default()
            }),
            None,
        )
        .await;
        self.bail_if_canceled(job)?;

        // stage 5: validation
        validate::validate_record(&mut consensus, &synonyms);

        // stages 6 / 6.5: coverage and gap fill (gated)
        if pipeline.use_coverage_calculator {
            let report = coverage::coverage(&consensus);
            debug!(job_id = %job.id, score = report.score, "Coverage calculated");
            if report.score < pipeline.coverage_threshold && pipeline.use_gap_filler {
                coverage::fill_gaps(
                    &self.deps.llm,
                    &raw_text,
                    &mut consensus,
                    pipeline.gap_filler_max_retries,
                )
                .await;
            }
        }

        // stage 7: privacy
        let mut candidate = self
            .deps
            .store
            .get_candidate(&job.candidate_id)?
            .ok_or_else(|| {
                StageError::transient(ErrorCode::PersistFailed, "candidate row missing")
            })?;
        let pii_count = self.apply_consensus(&mut candidate, &consensus, job)?;

        // stage 8: embedding (non-fatal)
        let embed_input = embedding_input(&candidate);
        match self.deps.llm.embed(&embed_input).await {
            Ok(vector) => candidate.embedding = Some(vector),
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Embedding failed, continuing without vector");
                candidate.warnings.push(Warning {
                    kind: "embedding_failed".into(),
                    field: None,
                    candidates: Vec::new(),
                    message: Some(e.to_string()),
                });
            }
        }

        // stage 9: usage commit, then persist. The charge must land before
        // the candidate is visible as completed: if two in-flight jobs race
        // the tenant's last credit, the loser fails here with nothing but a
        // processing-state row to roll back.
        self.transition(job, JobStatus::Persisting)?;
        match self
            .deps
            .credits
            .commit_usage(&job.tenant_id, &job.id, &candidate.id)
            .await
        {
            Ok(charged) => {
                if charged {
                    self.deps.metrics.credit_committed();
                }
            }
            Err(CreditError::Insufficient) => {
                return Err(StageError::fatal(
                    ErrorCode::InsufficientCredits,
                    "credits exhausted before completion",
                ));
            }
            Err(e) => {
                return Err(StageError::transient(ErrorCode::PersistFailed, e.to_string()));
            }
        }

        candidate.status = CandidateStatus::Completed;
        candidate.is_latest = true;
        candidate.updated_at = chrono::Utc::now();
        self.deps.store.upsert_candidate(&candidate)?;

        self.transition(job, JobStatus::Completed)?;
        self.deps.metrics.job_completed();
        info!(
            job_id = %job.id,
            candidate_id = %candidate.id,
            confidence = consensus.confidence_score,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Job completed"
        );

        self.emit_phase(
            job,
            Phase::Completed,
            Some(WebhookResult {
                candidate_id: candidate.id.clone(),
                confidence_score: Some(consensus.confidence_score),
                pii_count: Some(pii_count),
                processing_time_ms: Some(started.elapsed().as_millis() as u64),
                ..Default::default()
            }),
            None,
        )
        .await;

        Ok(())
    }

    /// Update the placeholder candidate with quick-extracted basics so the
    /// dashboard renders immediately. Contact fields are sealed before the
    /// row is written; the returned QuickData carries masks only.
    async fn apply_quick_extraction(
        &self,
        job: &ProcessingJob,
        raw_text: &str,
    ) -> Result<QuickData, StageError> {
        let quick = parser::quick_extract(raw_text);

        let mut candidate = self
            .deps
            .store
            .get_candidate(&job.candidate_id)?
            .ok_or_else(|| {
                StageError::transient(ErrorCode::PersistFailed, "candidate row missing")
            })?;

        if let Some(name) = &quick.name {
            candidate.name = name.clone();
        }
        candidate.last_company = quick.company.clone().or(candidate.last_company);
        candidate.last_position = quick.position.clone().or(candidate.last_position);

        if let Some(phone) = &quick.phone {
            if let Some(agent) = &self.deps.privacy {
                let sealed = agent.seal_phone(phone)?;
                candidate.phone_encrypted = Some(sealed.encrypted);
                candidate.phone_hash = sealed.hash;
                candidate.phone_masked = Some(sealed.masked);
            } else {
                candidate.phone_masked = Some(super::privacy::mask_phone(phone));
            }
        }
        if let Some(email) = &quick.email {
            if let Some(agent) = &self.deps.privacy {
                let sealed = agent.seal_email(email)?;
                candidate.email_encrypted = Some(sealed.encrypted);
                candidate.email_hash = sealed.hash;
                candidate.email_masked = Some(sealed.masked);
            } else {
                candidate.email_masked = Some(super::privacy::mask_email(email));
            }
        }

        candidate.updated_at = chrono::Utc::now();
        self.deps.store.upsert_candidate(&candidate)?;

        Ok(QuickData {
            name: quick.name,
            phone_masked: candidate.phone_masked.clone(),
            email_masked: candidate.email_masked.clone(),
            last_company: quick.company,
            last_position: quick.position,
        })
    }

    /// Fold the consensus into the candidate row, sealing PII. Returns the
    /// number of protected PII fields.
    fn apply_consensus(
        &self,
        candidate: &mut Candidate,
        consensus: &Consensus,
        job: &ProcessingJob,
    ) -> Result<usize, StageError> {
        let draft = &consensus.draft;

        if let Some(name) = &draft.name {
            candidate.name = name.clone();
        } else if candidate.name.is_empty() {
            candidate.name = job.file_name.clone();
        }
        candidate.last_position = draft.last_position.clone();
        candidate.last_company = draft.last_company.clone();
        candidate.exp_years = draft.exp_years;
        candidate.skills = draft.skills.clone();
        candidate.careers = draft
            .careers
            .iter()
            .map(|c| CareerEntry {
                company: c.company.clone(),
                position: c.position.clone().unwrap_or_default(),
                start_date: c.start_date.clone(),
                end_date: c.end_date.clone(),
                description: c.description.clone(),
            })
            .collect();
        candidate.education = draft
            .education
            .iter()
            .map(|e| EducationEntry {
                school: e.school.clone(),
                degree: e.degree.clone(),
                major: e.major.clone(),
                start_date: e.start_date.clone(),
                end_date: e.end_date.clone(),
            })
            .collect();
        candidate.projects = draft
            .projects
            .iter()
            .map(|p| ProjectEntry {
                name: p.name.clone(),
                description: p.description.clone(),
                tech: p.tech.clone(),
            })
            .collect();
        candidate.summary = draft.summary.clone();
        candidate.confidence_score = consensus.confidence_score;
        candidate.field_confidence = consensus.field_confidence.clone();
        candidate.risk_level = consensus.risk_level;
        candidate.requires_review = consensus.requires_review;
        candidate.warnings = consensus.warnings.clone();

        let mut pii_count = 0;
        if let Some(agent) = &self.deps.privacy {
            if let Some(phone) = &draft.phone {
                let sealed = agent.seal_phone(phone)?;
                candidate.phone_encrypted = Some(sealed.encrypted);
                candidate.phone_hash = sealed.hash;
                candidate.phone_masked = Some(sealed.masked);
                pii_count += 1;
            }
            if let Some(email) = &draft.email {
                let sealed = agent.seal_email(email)?;
                candidate.email_encrypted = Some(sealed.encrypted);
                candidate.email_hash = sealed.hash;
                candidate.email_masked = Some(sealed.masked);
                pii_count += 1;
            }
            if let Some(address) = &draft.address {
                let sealed = agent.seal_address(address)?;
                candidate.address_encrypted = Some(sealed.encrypted);
                candidate.address_masked = Some(sealed.masked);
                pii_count += 1;
            }
        } else {
            // no key configured: plaintext is still never persisted
            if let Some(phone) = &draft.phone {
                candidate.phone_masked = Some(super::privacy::mask_phone(phone));
                pii_count += 1;
            }
            if let Some(email) = &draft.email {
                candidate.email_masked = Some(super::privacy::mask_email(email));
                pii_count += 1;
            }
            if let Some(address) = &draft.address {
                candidate.address_masked = Some(super::privacy::mask_address(address));
                pii_count += 1;
            }
        }

        Ok(pii_count)
    }

    fn transition(&self, job: &mut ProcessingJob, status: JobStatus) -> Result<(), StageError> {
        job.transition(status);
        self.deps.store.upsert_job(job)?;
        Ok(())
    }

    /// Re-read the job row between stages; a tenant cancel lands as
    /// `failed/CANCELED` and must stop the pipeline without webhooks or a
    /// usage commit.
    fn bail_if_canceled(&self, job: &ProcessingJob) -> Result<(), StageError> {
        match self.deps.store.get_job(&job.id) {
            Ok(Some(stored))
                if stored.status == JobStatus::Failed
                    && stored.error_code == Some(ErrorCode::Canceled) =>
            {
                Err(StageError::fatal(ErrorCode::Canceled, "canceled by tenant"))
            }
            _ => Ok(()),
        }
    }

    /// Emit one webhook phase at most once per job, in stage order
    async fn emit_phase(
        &self,
        job: &mut ProcessingJob,
        phase: Phase,
        result: Option<WebhookResult>,
        error: Option<String>,
    ) {
        if job.has_emitted(phase) {
            return;
        }
        let payload = WebhookPayload {
            job_id: job.id.clone(),
            status: phase,
            phase: Some(phase.as_str().to_string()),
            result,
            error,
        };
        self.deps.webhooks.emit(payload).await;
        job.emitted_phases.push(phase);
        let _ = self.deps.store.upsert_job(job);
    }

    async fn fail_job(&self, job: &mut ProcessingJob, e: StageError) {
        if job.status.is_terminal() {
            return;
        }
        let canceled = e.code == ErrorCode::Canceled;
        job.fail(e.code, e.message);
        let _ = self.deps.store.upsert_job(job);
        self.deps.metrics.job_failed();

        // canceled jobs skip webhook emission entirely
        if !canceled {
            self.emit_phase(job, Phase::Failed, None, Some(e.code.to_string()))
                .await;
        }

        // the candidate only turns Completed after this job's successful
        // persist (retry resets it to Processing first), so a failed job
        // always fails its candidate
        if let Ok(Some(mut candidate)) = self.deps.store.get_candidate(&job.candidate_id) {
            candidate.status = CandidateStatus::Failed;
            candidate.updated_at = chrono::Utc::now();
            let _ = self.deps.store.upsert_candidate(&candidate);
        }
    }
}

/// Text fed to the embedding provider: the searchable essence of the record
fn embedding_input(candidate: &Candidate) -> String {
    let mut parts = vec![candidate.name.clone()];
    if let Some(position) = &candidate.last_position {
        parts.push(position.clone());
    }
    if let Some(company) = &candidate.last_company {
        parts.push(company.clone());
    }
    if !candidate.skills.is_empty() {
        parts.push(candidate.skills.join(", "));
    }
    if let Some(summary) = &candidate.summary {
        parts.push(summary.clone());
    }
    parts.join("\n")
}
