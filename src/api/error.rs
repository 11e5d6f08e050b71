use axum::{Json, http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;

use super::models::ErrorResponse;
use crate::orchestrator::OrchestratorError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("rate limited, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("payload invalid: {0}")]
    InvalidPayload(String),
    #[error("file validation failed: {0}")]
    FileValidation(String),
    #[error("insufficient credits")]
    InsufficientCredits,
    #[error("idempotency key conflict")]
    DuplicateIdempotencyKey,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::FileValidation(_) => StatusCode::BAD_REQUEST,
            ApiError::InsufficientCredits => StatusCode::PAYMENT_REQUIRED,
            ApiError::DuplicateIdempotencyKey => StatusCode::CONFLICT,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::RateLimited { .. } => "RATE_LIMITED",
            ApiError::InvalidPayload(_) => "INVALID_PAYLOAD",
            ApiError::FileValidation(_) => "FILE_VALIDATION",
            ApiError::InsufficientCredits => "INSUFFICIENT_CREDITS",
            ApiError::DuplicateIdempotencyKey => "DUPLICATE_IDEMPOTENCY_KEY",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        };

        let mut response = (status, Json(json!(body))).into_response();
        if let ApiError::RateLimited { retry_after_secs } = self {
            if let Ok(value) = retry_after_secs.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        ApiError::InvalidPayload(value.to_string())
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(value: OrchestratorError) -> Self {
        match value {
            OrchestratorError::InsufficientCredits => ApiError::InsufficientCredits,
            OrchestratorError::FileValidation(msg) => ApiError::FileValidation(msg),
            OrchestratorError::DuplicateIdempotencyKey => ApiError::DuplicateIdempotencyKey,
            OrchestratorError::NotFound(what) => ApiError::NotFound(what),
            OrchestratorError::InvalidState(msg) => ApiError::Conflict(msg),
            // a cross-tenant row is indistinguishable from a missing one
            OrchestratorError::Store(StoreError::TenantMismatch) => {
                ApiError::NotFound("job".into())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::TenantMismatch => ApiError::NotFound("resource".into()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}
