//! API request/response shapes for the ingestion endpoints.
//!
//! `POST /upload/submit` accepts either `multipart/form-data` with a
//! `file` part (optional `analysis_mode` part), or `application/json`
//! referencing an object already staged through a presigned PUT:
//!
//! ```json
//! {
//!   "storage_path": "uploads/tenant-1/staging/resume.pdf",
//!   "file_name": "resume.pdf",
//!   "size": 482133,
//!   "analysis_mode": "phase_2"
//! }
//! ```
//!
//! Both forms answer `{ "job_id": ..., "candidate_id": ... }` and honor the
//! `Idempotency-Key` header.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::model::{AnalysisMode, ErrorCode, JobStatus};

/// JSON body for submits referencing a staged object
#[derive(Debug, Deserialize, Clone)]
pub struct StagedSubmitRequest {
    pub storage_path: String,
    pub file_name: String,
    #[allow(dead_code)] // echoed by clients; the staged object is authoritative
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub analysis_mode: Option<AnalysisMode>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SubmitResponse {
    pub job_id: String,
    pub candidate_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, String>,
    pub version: String,
}
