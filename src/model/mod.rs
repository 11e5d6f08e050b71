//! Shared domain entities: tenants, processing jobs, candidates, credit
//! transactions, and the webhook payload contract.
//!
//! These are the serde shapes persisted in the metadata store and exchanged
//! with downstream consumers. Mutation goes through the orchestrator, the
//! pipeline runner, and the credit ledger; everything else reads.

pub mod candidate;
pub mod credit;
pub mod job;
pub mod tenant;
pub mod webhook;

pub use candidate::{
    Candidate, CandidateStatus, CareerEntry, EducationEntry, ProjectEntry, RiskLevel, Warning,
};
pub use credit::{CreditTransaction, TransactionType};
pub use job::{AnalysisMode, ErrorCode, JobStatus, ProcessingJob};
pub use tenant::{Plan, Tenant};
pub use webhook::{Phase, QuickData, WebhookFailure, WebhookPayload, WebhookResult};
