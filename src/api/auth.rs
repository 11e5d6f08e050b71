//! Bearer-session authentication.
//!
//! The identity provider is external; the core only resolves opaque
//! session tokens against the `sessions` partition. Every request path
//! derives its tenant here — nothing downstream trusts a client-supplied
//! tenant id.

use axum::http::HeaderMap;

use super::error::ApiError;
use super::state::AppState;

pub fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<String, ApiError> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ApiError::Unauthorized)?;

    state
        .store
        .resolve_session(token)
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or(ApiError::Unauthorized)
}
