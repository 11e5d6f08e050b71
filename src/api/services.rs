use axum::extract::{FromRequest, Multipart, Path, Request, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use http_body_util::BodyExt;

use super::auth::authenticate;
use super::error::ApiError;
use super::models::{HealthResponse, StagedSubmitRequest, StatusResponse, SubmitResponse};
use super::state::AppState;
use super::utils::{
    SubmitContentType, enforce_rate_limit, idempotency_key, parse_submit_content_type,
};
use crate::model::{AnalysisMode, JobStatus};
use crate::orchestrator::{SubmitReceipt, SubmitSource};
use crate::ratelimit::RouteClass;

/// Primary ingestion endpoint (POST /upload/submit)
///
/// Flow:
/// 1. Resolve the tenant from the bearer session
/// 2. Enforce the upload rate class for that tenant
/// 3. Validate the optional Idempotency-Key header (UUID)
/// 4. Read the file — direct multipart upload or staged-object JSON
/// 5. Hand off to the orchestrator (credit gate, file validation, rows,
///    enqueue) and answer `{job_id, candidate_id}`
pub async fn submit_upload(
    State(state): State<AppState>,
    request: Request,
) -> Result<impl IntoResponse, ApiError> {
    let headers = request.headers().clone();
    let tenant_id = authenticate(&state, &headers)?;
    enforce_rate_limit(&state.limiter, RouteClass::Upload, &tenant_id)?;
    let idempotency = idempotency_key(&headers)?;

    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::InvalidPayload("missing Content-Type header".into()))?;

    let (source, mode) = match parse_submit_content_type(content_type)? {
        SubmitContentType::Multipart => read_multipart(&state, request).await?,
        SubmitContentType::Json => read_staged_json(request).await?,
    };

    let receipt = state
        .orchestrator
        .submit(&tenant_id, source, mode, idempotency)
        .await?;

    Ok((axum::http::StatusCode::OK, Json(to_response(receipt))))
}

async fn read_multipart(
    state: &AppState,
    request: Request,
) -> Result<(SubmitSource, AnalysisMode), ApiError> {
    let mut multipart = Multipart::from_request(request, state)
        .await
        .map_err(|e| ApiError::InvalidPayload(e.to_string()))?;

    let mut file: Option<(String, Vec<u8>)> = None;
    let mut mode = AnalysisMode::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidPayload(e.to_string()))?
    {
        match field.name() {
            Some("file") => {
                let file_name = field
                    .file_name()
                    .map(str::to_owned)
                    .ok_or_else(|| ApiError::InvalidPayload("file part needs a filename".into()))?;
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::InvalidPayload(e.to_string()))?;
                file = Some((file_name, bytes.to_vec()));
            }
            Some("analysis_mode") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| ApiError::InvalidPayload(e.to_string()))?;
                mode = parse_mode(&raw)?;
            }
            _ => {}
        }
    }

    let (file_name, bytes) =
        file.ok_or_else(|| ApiError::InvalidPayload("missing 'file' part".into()))?;
    Ok((SubmitSource::Upload { file_name, bytes }, mode))
}

async fn read_staged_json(request: Request) -> Result<(SubmitSource, AnalysisMode), ApiError> {
    let body = request
        .into_body()
        .collect()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .to_bytes();

    let staged: StagedSubmitRequest = serde_json::from_slice(&body)?;
    let mode = staged.analysis_mode.unwrap_or_default();

    Ok((
        SubmitSource::Staged {
            storage_path: staged.storage_path,
            file_name: staged.file_name,
        },
        mode,
    ))
}

fn parse_mode(raw: &str) -> Result<AnalysisMode, ApiError> {
    match raw.trim() {
        "phase_1" => Ok(AnalysisMode::Phase1),
        "phase_2" => Ok(AnalysisMode::Phase2),
        other => Err(ApiError::InvalidPayload(format!(
            "unknown analysis_mode: {other}"
        ))),
    }
}

fn to_response(receipt: SubmitReceipt) -> SubmitResponse {
    SubmitResponse {
        job_id: receipt.job_id,
        candidate_id: receipt.candidate_id,
    }
}

/// Job status endpoint (GET /jobs/{job_id})
pub async fn get_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant_id = authenticate(&state, &headers)?;
    enforce_rate_limit(&state.limiter, RouteClass::Default, &tenant_id)?;

    let job = state.orchestrator.status(&tenant_id, &job_id)?;

    // the confidence score becomes meaningful once analysis has finished
    let confidence_score = match job.status {
        JobStatus::Analyzed | JobStatus::Persisting | JobStatus::Completed => state
            .store
            .get_candidate_scoped(&tenant_id, &job.candidate_id)?
            .map(|c| c.confidence_score),
        _ => None,
    };

    let response = StatusResponse {
        job_id: job.id.clone(),
        status: job.status,
        phase: job.emitted_phases.last().map(|p| p.as_str().to_string()),
        confidence_score,
        error_code: job.error_code,
        error_message: job.error_message.clone(),
    };

    Ok((axum::http::StatusCode::OK, Json(response)))
}

/// Retry endpoint (POST /jobs/{job_id}/retry) — failed jobs only
pub async fn retry_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant_id = authenticate(&state, &headers)?;
    enforce_rate_limit(&state.limiter, RouteClass::Upload, &tenant_id)?;

    let receipt = state.orchestrator.retry(&tenant_id, &job_id).await?;
    Ok((axum::http::StatusCode::OK, Json(to_response(receipt))))
}

/// Cancel endpoint (POST /jobs/{job_id}/cancel) — queued jobs only
pub async fn cancel_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant_id = authenticate(&state, &headers)?;
    enforce_rate_limit(&state.limiter, RouteClass::Default, &tenant_id)?;

    state.orchestrator.cancel(&tenant_id, &job_id).await?;
    Ok((
        axum::http::StatusCode::OK,
        Json(serde_json::json!({ "job_id": job_id, "status": "canceled" })),
    ))
}

/// Health check endpoint (GET /health)
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    use std::collections::HashMap;

    let mut components = HashMap::new();

    let store_status = match state.store.resolve_session("health-probe") {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };
    components.insert("metadata_store".to_string(), store_status.to_string());

    let broker_status = if state.broker.health_check() {
        "healthy"
    } else {
        "unhealthy"
    };
    components.insert("job_broker".to_string(), broker_status.to_string());

    let all_healthy = components.values().all(|status| status == "healthy");
    let status_code = if all_healthy {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy { "healthy" } else { "unhealthy" }.to_string(),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (status_code, Json(response))
}
