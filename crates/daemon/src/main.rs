//! wikisync daemon entry point.
//!
//! Loads configuration, opens the database, loads every enabled profile
//! into the profile manager, starts the web server and sync scheduler, and
//! handles graceful shutdown.

mod scheduler;
mod signals;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::{mpsc, Notify};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use wikisync_core::adapter::AdapterContext;
use wikisync_core::config::AppConfig;
use wikisync_core::db::{Database, SqliteContentStore};
use wikisync_core::git::GitIdentity;
use wikisync_core::manager::ProfileManager;
use wikisync_core::runner::SyncRequest;
use wikisync_web::WebServer;

/// Capacity of the sync job queue shared by the web layer and scheduler.
const JOB_QUEUE_CAPACITY: usize = 64;

/// wikisync synchronization daemon.
#[derive(Parser, Debug)]
#[command(
    name = "wikisync-daemon",
    version,
    about = "Keeps wiki pages and assets in sync with git repositories"
)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Pull every pull-capable profile once after startup.
    #[arg(long)]
    pull_on_start: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config =
        AppConfig::load_and_resolve(&args.config).context("failed to load configuration")?;

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.daemon.log_level);
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .init();

    info!("========================================");
    info!("  wikisync daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    info!("Config file   : {}", args.config.display());
    info!("Web listen    : {}", config.web.listen);
    info!("Data dir      : {}", config.daemon.data_dir.display());
    info!("Schedule tick : {}s", config.daemon.schedule_tick_secs);
    info!("Log level     : {}", log_level);
    info!("========================================");

    std::fs::create_dir_all(&config.daemon.data_dir).context("failed to create data directory")?;

    let db_path = config.daemon.database_path();
    let db = Arc::new(Database::new(&db_path).context("failed to open database")?);
    db.initialize()
        .context("failed to initialize database schema")?;
    info!("Database initialized at {}", db_path.display());

    let namespacing = config.content.namespacing();
    let content = SqliteContentStore::new(db.clone(), namespacing.clone())
        .with_cache_dir(config.daemon.asset_cache_dir());
    let ctx = AdapterContext {
        content: Arc::new(content),
        namespacing,
        secure_dir: config.daemon.secure_dir(),
        repo_root: config.daemon.repo_dir(),
        default_identity: GitIdentity::new(&config.git.default_name, &config.git.default_email),
        mark_safe_directory: config.git.mark_safe_directory,
    };
    let manager = Arc::new(ProfileManager::new(db.clone(), ctx));

    match manager.reload_profiles().await {
        Ok(report) => {
            info!(
                active = report.active.len(),
                failed = report.failed.len(),
                "profiles loaded"
            );
            for (id, outcome) in &report.initial_syncs {
                info!(
                    profile = %id,
                    files_changed = outcome.files_changed,
                    files_failed = outcome.files_failed,
                    "initial sync applied"
                );
            }
            for (id, message) in &report.failed {
                warn!(profile = %id, error = %message, "profile failed to load");
            }
        }
        Err(e) => error!(error = %e, "failed to load profiles"),
    }

    if args.pull_on_start {
        for (id, result) in manager.sync_all_pull_profiles().await {
            if let Err(e) = result {
                warn!(profile = %id, error = %e, "startup pull failed");
            }
        }
    }

    let (jobs_tx, jobs_rx) = mpsc::channel::<SyncRequest>(JOB_QUEUE_CAPACITY);

    let web_server = WebServer::new(config.clone(), db.clone(), manager.clone(), jobs_tx.clone());
    let listen_addr = config.web.listen.clone();
    let web_handle = tokio::spawn(async move {
        if let Err(e) = web_server.start(&listen_addr).await {
            error!("Web server error: {}", e);
        }
    });

    let shutdown = Arc::new(Notify::new());
    let scheduler_shutdown = shutdown.clone();
    let mut sched = scheduler::Scheduler::new(
        db.clone(),
        manager.clone(),
        Duration::from_secs(config.daemon.schedule_tick_secs),
        jobs_tx,
        jobs_rx,
    );
    let scheduler_handle = tokio::spawn(async move {
        sched.run(scheduler_shutdown).await;
    });

    let signal = signals::wait_for_shutdown().await;
    info!(%signal, "stopping...");

    // Stop accepting new jobs before draining the running ones.
    web_handle.abort();
    shutdown.notify_one();

    match tokio::time::timeout(Duration::from_secs(30), scheduler_handle).await {
        Ok(Ok(())) => info!("scheduler stopped gracefully"),
        Ok(Err(e)) => warn!("scheduler task error: {}", e),
        Err(_) => warn!("scheduler did not stop within 30s, forcing shutdown"),
    }

    info!("wikisync daemon stopped.");
    Ok(())
}
