//! SQLite persistence layer for wikisync.
//!
//! Provides a [`Database`] handle with WAL-mode journaling, automatic schema
//! migrations, the profile/run queries behind [`ConfigStore`](crate::store::ConfigStore)
//! and a reference [`SqliteContentStore`].

pub mod content;
pub mod queries;
pub mod schema;

pub use content::SqliteContentStore;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::errors::DatabaseError;

/// Shared SQLite handle backing both stores.
///
/// One connection behind a `Mutex`; every store call is short and
/// synchronous, so async callers hold the lock only briefly.
pub struct Database {
    conn: Mutex<Connection>,
}

/// Pragmas applied to every connection. `journal_mode` is ignored by
/// in-memory databases.
const CONNECTION_PRAGMAS: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA foreign_keys = ON;
    PRAGMA busy_timeout = 5000;
";

impl Database {
    /// Open or create the database file at `path`, creating parent
    /// directories as needed.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening database");

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::configure(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, DatabaseError> {
        Self::configure(Connection::open_in_memory()?)
    }

    fn configure(conn: Connection) -> Result<Self, DatabaseError> {
        conn.execute_batch(CONNECTION_PRAGMAS)?;
        debug!("database connection configured");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Apply pending schema migrations.
    pub fn initialize(&self) -> Result<(), DatabaseError> {
        let conn = self.conn();
        schema::run_migrations(&conn)?;
        info!("database schema is up to date");
        Ok(())
    }

    /// Lock the connection, recovering from a poisoned mutex.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("database mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}
