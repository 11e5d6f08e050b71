//! Pure helpers for HTTP request processing

use super::error::ApiError;
use crate::ratelimit::{Decision, RateLimiter, RouteClass};

/// Submit payload container types we accept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitContentType {
    Json,
    Multipart,
}

/// Classify the submit Content-Type: `application/json` (with optional
/// parameters) or `multipart/form-data`; anything else is rejected.
pub fn parse_submit_content_type(content_type: &str) -> Result<SubmitContentType, ApiError> {
    let media_type: mime::Mime = content_type
        .parse()
        .map_err(|_| ApiError::InvalidPayload(format!("invalid Content-Type: {content_type}")))?;

    if media_type.type_() == mime::APPLICATION && media_type.subtype() == mime::JSON {
        return Ok(SubmitContentType::Json);
    }
    if media_type.type_() == mime::MULTIPART && media_type.subtype() == mime::FORM_DATA {
        return Ok(SubmitContentType::Multipart);
    }

    Err(ApiError::InvalidPayload(format!(
        "Content-Type must be application/json or multipart/form-data, got: {}/{}",
        media_type.type_(),
        media_type.subtype()
    )))
}

/// Consume one rate-limit unit or fail with 429
pub fn enforce_rate_limit(
    limiter: &RateLimiter,
    class: RouteClass,
    principal: &str,
) -> Result<(), ApiError> {
    match limiter.check(class, principal) {
        Decision::Allowed => Ok(()),
        Decision::Limited { retry_after } => Err(ApiError::RateLimited {
            retry_after_secs: retry_after.as_secs().max(1),
        }),
    }
}

/// Optional `Idempotency-Key` header; when present it must be a UUID
pub fn idempotency_key(headers: &axum::http::HeaderMap) -> Result<Option<String>, ApiError> {
    match headers.get("Idempotency-Key").map(|v| v.to_str()) {
        None => Ok(None),
        Some(Err(_)) => Err(ApiError::InvalidPayload(
            "Idempotency-Key is not valid ASCII".into(),
        )),
        Some(Ok(raw)) => {
            let raw = raw.trim();
            uuid::Uuid::parse_str(raw).map_err(|_| {
                ApiError::InvalidPayload("Idempotency-Key must be a UUID".into())
            })?;
            Ok(Some(raw.to_string()))
        }
    }
}
