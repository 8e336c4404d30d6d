//! Admin token check for administrative endpoints.

use axum::http::HeaderMap;
use subtle::ConstantTimeEq;

use crate::api::status::AppError;
use crate::AppState;

/// Validate the `Authorization: Bearer <token>` header against the
/// configured admin token.
///
/// When no admin token is configured, authentication is disabled.
pub fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = state
        .config
        .web
        .admin_token
        .as_deref()
        .filter(|t| !t.is_empty())
    else {
        return Ok(());
    };

    let provided = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized("missing or invalid Authorization header".into()))?;

    if provided.as_bytes().ct_eq(expected.as_bytes()).into() {
        Ok(())
    } else {
        Err(AppError::Unauthorized("invalid admin token".into()))
    }
}
