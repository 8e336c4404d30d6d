//! Status and health check endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use wikisync_core::manager::{AdapterStatus, ManagerState};
use wikisync_core::profiles::status_summary;

use crate::api::auth::require_admin;
use crate::AppState;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: String,
}

#[derive(Serialize)]
struct ProfileStatusEntry {
    id: String,
    name: String,
    enabled: bool,
    active: bool,
    status: String,
}

#[derive(Serialize)]
struct ProfilesStatusResponse {
    manager: ManagerState,
    adapters: Vec<AdapterStatus>,
    profiles: Vec<ProfileStatusEntry>,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/status/health", get(health_check))
        .route("/api/status/profiles", get(profiles_status))
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn profiles_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ProfilesStatusResponse>, AppError> {
    require_admin(&state, &headers)?;

    let profiles = state
        .store
        .list_profiles()
        .await
        .map_err(|e| AppError::Internal(format!("failed to list profiles: {}", e)))?;

    let mut entries = Vec::with_capacity(profiles.len());
    for profile in &profiles {
        let last_run = state
            .store
            .latest_run(&profile.id)
            .await
            .map_err(|e| AppError::Internal(format!("failed to load runs: {}", e)))?;
        entries.push(ProfileStatusEntry {
            id: profile.id.clone(),
            name: profile.name.clone(),
            enabled: profile.enabled,
            active: state.manager.is_active(&profile.id).await,
            status: status_summary(profile, last_run.as_ref()),
        });
    }

    Ok(Json(ProfilesStatusResponse {
        manager: state.manager.state(),
        adapters: state.manager.statuses().await,
        profiles: entries,
    }))
}

// ---------------------------------------------------------------------------
// Shared error type for API handlers
// ---------------------------------------------------------------------------

/// Simple API error type that converts to an Axum response.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Unauthorized(String),
    Forbidden(String),
    Internal(String),
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (axum::http::StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (axum::http::StatusCode::NOT_FOUND, msg),
            AppError::Unauthorized(msg) => (axum::http::StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (axum::http::StatusCode::FORBIDDEN, msg),
            AppError::Internal(msg) => (axum::http::StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
