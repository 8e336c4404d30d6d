//! Profile administration endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use wikisync_core::errors::StoreError;
use wikisync_core::models::Profile;
use wikisync_core::profiles::{ProfileForm, ProfileView};
use wikisync_core::runner::SyncRequest;

use crate::api::auth::require_admin;
use crate::api::status::AppError;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/profiles", get(list_profiles).post(create_profile))
        .route(
            "/api/profiles/:id",
            put(update_profile).delete(delete_profile),
        )
        .route("/api/profiles/:id/test", post(test_profile))
        .route("/api/profiles/:id/sync", post(sync_profile))
        .route("/api/profiles/:id/force", post(force_profile))
        .route("/api/profiles/:id/actions/:action", post(run_action))
}

fn store_error(e: StoreError) -> AppError {
    match e {
        StoreError::NotFound { .. } => AppError::NotFound(e.to_string()),
        StoreError::Invalid { .. } => AppError::BadRequest(e.to_string()),
        other => AppError::Internal(other.to_string()),
    }
}

async fn load_profile(state: &AppState, id: &str) -> Result<Profile, AppError> {
    state
        .store
        .find_profile(id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| AppError::NotFound("profile not found".into()))
}

/// Reload the manager and report whether `id` failed to load.
async fn reload_for(state: &AppState, id: &str) -> Result<(), String> {
    let report = state.manager.reload_profiles().await.map_err(|e| e.to_string())?;
    match report.failed.into_iter().find(|(failed, _)| failed == id) {
        Some((_, message)) => Err(message),
        None => Ok(()),
    }
}

async fn list_profiles(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    require_admin(&state, &headers)?;

    let profiles = state.store.list_profiles().await.map_err(store_error)?;
    let mut views = Vec::with_capacity(profiles.len());
    for profile in &profiles {
        let last_run = state.store.latest_run(&profile.id).await.map_err(store_error)?;
        views.push(ProfileView::new(profile, last_run.as_ref()));
    }
    Ok(Json(json!({ "profiles": views })))
}

async fn create_profile(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_admin(&state, &headers)?;

    let profile = ProfileForm::from_json(&body)
        .and_then(|form| form.build_new())
        .map_err(store_error)?;
    state.store.insert_profile(&profile).await.map_err(store_error)?;

    if let Err(message) = reload_for(&state, &profile.id).await {
        error!(profile = %profile.id, error = %message, "failed to create profile, rolling back");
        if let Err(e) = state.store.delete_profile(&profile.id).await {
            error!(profile = %profile.id, error = %e, "rollback of created profile failed");
        }
        return Err(AppError::BadRequest(message));
    }

    info!(profile = %profile.id, name = %profile.name, "profile created");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "profile": ProfileView::new(&profile, None) })),
    ))
}

async fn update_profile(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, AppError> {
    require_admin(&state, &headers)?;

    let existing = load_profile(&state, &id).await?;
    let updated = ProfileForm::from_json(&body)
        .and_then(|form| form.apply_update(&existing))
        .map_err(store_error)?;
    state.store.update_profile(&updated).await.map_err(store_error)?;

    if let Err(message) = reload_for(&state, &id).await {
        error!(profile = %id, error = %message, "failed to update profile, restoring");
        if let Err(e) = state.store.update_profile(&existing).await {
            error!(profile = %id, error = %e, "restore of previous profile failed");
        } else if let Err(e) = state.manager.reload_profiles().await {
            warn!(profile = %id, error = %e, "reload after restore failed");
        }
        return Err(AppError::BadRequest(message));
    }

    let last_run = state.store.latest_run(&id).await.map_err(store_error)?;
    info!(profile = %id, "profile updated");
    Ok(Json(
        json!({ "profile": ProfileView::new(&updated, last_run.as_ref()) }),
    ))
}

async fn delete_profile(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    require_admin(&state, &headers)?;

    if !state.store.delete_profile(&id).await.map_err(store_error)? {
        return Err(AppError::NotFound("profile not found".into()));
    }
    if let Err(e) = state.manager.reload_profiles().await {
        warn!(profile = %id, error = %e, "reload after delete failed");
    }
    info!(profile = %id, "profile deleted");
    Ok(Json(json!({ "ok": true })))
}

async fn test_profile(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    require_admin(&state, &headers)?;

    let profile = load_profile(&state, &id).await?;
    state.manager.test_profile(&profile).await.map_err(|e| {
        warn!(profile = %id, error = %e, "connection test failed");
        AppError::BadRequest(e.to_string())
    })?;
    Ok(Json(json!({ "ok": true })))
}

async fn enqueue(state: &AppState, id: &str, force: bool) -> Result<(StatusCode, Json<Value>), AppError> {
    let profile = load_profile(state, id).await?;
    if !profile.enabled {
        return Err(AppError::BadRequest("profile is disabled".into()));
    }
    state
        .jobs
        .send(SyncRequest::new(profile.id, force, "admin"))
        .await
        .map_err(|_| AppError::Internal("sync queue is closed".into()))?;
    info!(profile = %id, force, "sync job queued");
    Ok((StatusCode::ACCEPTED, Json(json!({ "ok": true }))))
}

async fn sync_profile(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_admin(&state, &headers)?;
    enqueue(&state, &id, false).await
}

async fn force_profile(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_admin(&state, &headers)?;
    enqueue(&state, &id, true).await
}

async fn run_action(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((id, action)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    require_admin(&state, &headers)?;
    load_profile(&state, &id).await?;

    match action.as_str() {
        "import-all" => {
            let report = state
                .manager
                .import_all(&id)
                .await
                .map_err(|e| AppError::BadRequest(e.to_string()))?;
            Ok(Json(json!({ "ok": true, "processed": report.processed, "failed": report.failed })))
        }
        "sync-untracked" => {
            let written = state
                .manager
                .sync_untracked(&id)
                .await
                .map_err(|e| AppError::BadRequest(e.to_string()))?;
            Ok(Json(json!({ "ok": true, "written": written })))
        }
        other => Err(AppError::NotFound(format!("unknown action '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;
    use wikisync_core::models::Profile;
    use wikisync_core::store::ConfigStore;

    use crate::api::test_support::{empty_request, harness, json_request, send};

    #[tokio::test]
    async fn test_create_failure_is_rolled_back() {
        let h = harness(None);
        let body = json!({
            "name": "docs",
            "repo_url": format!("file://{}/missing.git", h.dir.path().display()),
            "ssh_key_path": "/nonexistent/id_ed25519",
        });
        let (status, resp) = send(&h.state, json_request("POST", "/api/profiles", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(resp["error"].is_string());
        assert!(h.db.list_profiles().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_disabled_profile_and_list_hides_secrets() {
        let h = harness(None);
        let body = json!({
            "name": "docs",
            "repo_url": "https://example.com/docs.git",
            "auth_type": "https_pat",
            "username": "bot",
            "token": "hunter2",
            "enabled": "0",
        });
        let (status, resp) = send(&h.state, json_request("POST", "/api/profiles", body)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(resp["profile"]["enabled"], false);
        assert_eq!(resp["profile"]["has_token"], true);

        let (status, resp) = send(&h.state, empty_request("GET", "/api/profiles")).await;
        assert_eq!(status, StatusCode::OK);
        let listed = &resp["profiles"][0];
        assert_eq!(listed["name"], "docs");
        assert!(listed.get("token").is_none());
        assert_eq!(listed["status"], "Profile disabled.");
    }

    #[tokio::test]
    async fn test_create_rejects_missing_fields() {
        let h = harness(None);
        let (status, _) =
            send(&h.state, json_request("POST", "/api/profiles", json!({"name": "x"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_update_and_delete_missing_profile() {
        let h = harness(None);
        let (status, _) = send(
            &h.state,
            json_request("PUT", "/api/profiles/nope", json!({"branch": "dev"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&h.state, empty_request("DELETE", "/api/profiles/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_update_disabled_profile_keeps_token() {
        let h = harness(None);
        let mut profile = Profile::new("docs", "https://example.com/docs.git");
        profile.enabled = false;
        profile.token = Some("secret".into());
        h.db.insert_profile(&profile).await.unwrap();

        let uri = format!("/api/profiles/{}", profile.id);
        let (status, resp) =
            send(&h.state, json_request("PUT", &uri, json!({"branch": "develop"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp["profile"]["branch"], "develop");

        let stored = h.db.find_profile(&profile.id).await.unwrap().unwrap();
        assert_eq!(stored.branch, "develop");
        assert_eq!(stored.token.as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn test_sync_queues_job_for_enabled_profile() {
        let mut h = harness(None);
        let profile = Profile::new("docs", "https://example.com/docs.git");
        h.db.insert_profile(&profile).await.unwrap();

        let uri = format!("/api/profiles/{}/force", profile.id);
        let (status, _) = send(&h.state, empty_request("POST", &uri)).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let job = h.jobs.try_recv().unwrap();
        assert_eq!(job.profile_id, profile.id);
        assert!(job.force);
        assert_eq!(job.requested_by, "admin");
    }

    #[tokio::test]
    async fn test_sync_rejects_disabled_and_missing() {
        let mut h = harness(None);
        let mut profile = Profile::new("docs", "https://example.com/docs.git");
        profile.enabled = false;
        h.db.insert_profile(&profile).await.unwrap();

        let uri = format!("/api/profiles/{}/sync", profile.id);
        let (status, resp) = send(&h.state, empty_request("POST", &uri)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(resp["error"], "profile is disabled");

        let (status, _) = send(&h.state, empty_request("POST", "/api/profiles/nope/sync")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(h.jobs.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_action_is_not_found() {
        let h = harness(None);
        let profile = Profile::new("docs", "https://example.com/docs.git");
        h.db.insert_profile(&profile).await.unwrap();
        let uri = format!("/api/profiles/{}/actions/explode", profile.id);
        let (status, _) = send(&h.state, empty_request("POST", &uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
