//! wikisync web server and REST API.
//!
//! Provides an Axum-based HTTP server with:
//! - Profile administration (CRUD, test connection, sync now, force resync)
//! - Import-all and sync-untracked actions
//! - Profile status and health endpoints
//! - A signed webhook receiver that enqueues sync jobs

pub mod api;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::Router;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use wikisync_core::config::AppConfig;
use wikisync_core::manager::ProfileManager;
use wikisync_core::runner::SyncRequest;
use wikisync_core::store::ConfigStore;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn ConfigStore>,
    pub manager: Arc<ProfileManager>,
    /// Queue of sync jobs executed by the daemon's scheduler.
    pub jobs: mpsc::Sender<SyncRequest>,
}

/// Build the application router over `state`.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .merge(api::status::routes())
        .merge(api::profiles::routes())
        .merge(api::webhooks::routes())
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// The web server.
pub struct WebServer {
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn ConfigStore>,
        manager: Arc<ProfileManager>,
        jobs: mpsc::Sender<SyncRequest>,
    ) -> Self {
        Self {
            state: Arc::new(AppState {
                config,
                store,
                manager,
                jobs,
            }),
        }
    }

    /// Start the web server, listening on the given address.
    pub async fn start(self, listen_addr: &str) -> anyhow::Result<()> {
        let addr: SocketAddr = listen_addr.parse()?;
        let app = router(self.state);

        info!(addr = %addr, "starting web server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
