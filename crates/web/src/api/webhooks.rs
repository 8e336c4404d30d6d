//! Signed webhook receiver for git hosting push notifications.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;
use tracing::{info, warn};

use wikisync_core::errors::WebhookError;
use wikisync_core::runner::SyncRequest;
use wikisync_core::webhook::{verify_signature, SIGNATURE_HEADER, SIGNATURE_HEADER_256};

use crate::api::status::AppError;
use crate::AppState;

#[derive(Serialize)]
struct WebhookResponse {
    ok: bool,
    message: String,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/webhooks/git/:id", post(git_webhook))
}

async fn git_webhook(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookResponse>), AppError> {
    let profile = state
        .store
        .find_profile(&id)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .filter(|p| p.enabled)
        .ok_or_else(|| AppError::NotFound("profile not found".into()))?;

    let signature = headers
        .get(SIGNATURE_HEADER_256)
        .or_else(|| headers.get(SIGNATURE_HEADER))
        .and_then(|v| v.to_str().ok());

    match verify_signature(signature, &body, profile.webhook_secret.as_deref()) {
        Ok(()) => {}
        Err(WebhookError::SecretNotConfigured) => {
            warn!(profile = %id, "webhook received but no secret is configured");
            return Err(AppError::Forbidden("webhook secret not configured".into()));
        }
        Err(e) => {
            warn!(profile = %id, error = %e, "webhook signature rejected");
            return Err(AppError::Unauthorized(format!(
                "webhook verification failed: {}",
                e
            )));
        }
    }

    state
        .jobs
        .send(SyncRequest::new(profile.id.clone(), false, "webhook"))
        .await
        .map_err(|_| AppError::Internal("sync queue is closed".into()))?;

    info!(profile = %id, bytes = body.len(), "webhook accepted, sync queued");
    Ok((
        StatusCode::ACCEPTED,
        Json(WebhookResponse {
            ok: true,
            message: "sync queued".into(),
        }),
    ))
}
