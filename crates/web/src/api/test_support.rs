use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;

use wikisync_core::adapter::AdapterContext;
use wikisync_core::config::AppConfig;
use wikisync_core::content::Namespacing;
use wikisync_core::db::{Database, SqliteContentStore};
use wikisync_core::git::GitIdentity;
use wikisync_core::manager::ProfileManager;
use wikisync_core::runner::SyncRequest;

use crate::AppState;

pub struct Harness {
    pub state: Arc<AppState>,
    pub db: Arc<Database>,
    pub jobs: mpsc::Receiver<SyncRequest>,
    pub dir: tempfile::TempDir,
}

pub fn harness(admin_token: Option<&str>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(Database::in_memory().unwrap());
    db.initialize().unwrap();
    let ctx = AdapterContext {
        content: Arc::new(SqliteContentStore::new(db.clone(), Namespacing::default())),
        namespacing: Namespacing::default(),
        secure_dir: dir.path().join("secure"),
        repo_root: dir.path().join("repo"),
        default_identity: GitIdentity::new("wikisync", "wiki@example.com"),
        mark_safe_directory: false,
    };
    let manager = Arc::new(ProfileManager::new(db.clone(), ctx));
    let (tx, rx) = mpsc::channel(8);

    let mut config = AppConfig::default();
    config.web.admin_token = admin_token.map(String::from);

    Harness {
        state: Arc::new(AppState {
            config,
            store: db.clone(),
            manager,
            jobs: tx,
        }),
        db,
        jobs: rx,
        dir,
    }
}

pub async fn send(state: &Arc<AppState>, request: Request<Body>) -> (StatusCode, Value) {
    let response = crate::router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}
