//! wikisync core library.
//!
//! This crate provides the components that keep a wiki content store and
//! external git repositories in sync: configuration, database persistence,
//! credential resolution, the git command layer, per-profile adapters, the
//! profile manager and sync-run bookkeeping.

pub mod adapter;
pub mod config;
pub mod content;
pub mod credentials;
pub mod db;
pub mod errors;
pub mod git;
pub mod manager;
pub mod models;
pub mod profiles;
pub mod runner;
pub mod store;
pub mod webhook;

// Re-exports for convenience.
pub use adapter::{AdapterContext, GitAdapter, SyncOutcome};
pub use config::AppConfig;
pub use db::{Database, SqliteContentStore};
pub use manager::ProfileManager;
pub use models::{Direction, Profile};
pub use runner::{run_profile_sync, SyncRequest};
pub use store::{ConfigStore, ContentStore};
