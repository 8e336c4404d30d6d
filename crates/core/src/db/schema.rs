//! Database schema definitions and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The `schema_version`
//! user-version pragma tracks which migrations have already been applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
/// Versions start at 1. The current schema version is stored in the SQLite
/// `user_version` pragma.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "profiles and run history",
        r#"
        CREATE TABLE IF NOT EXISTS profiles (
            id                   TEXT PRIMARY KEY,
            kind                 TEXT NOT NULL DEFAULT 'git',
            name                 TEXT NOT NULL UNIQUE,
            enabled              INTEGER NOT NULL DEFAULT 1,
            direction            TEXT NOT NULL DEFAULT 'BIDIRECTIONAL',
            repo_url             TEXT NOT NULL,
            branch               TEXT NOT NULL DEFAULT 'main',
            local_path           TEXT NOT NULL DEFAULT '',
            verify_ssl           INTEGER NOT NULL DEFAULT 1,
            auth_type            TEXT NOT NULL DEFAULT 'ssh',
            ssh_key_mode         TEXT NOT NULL DEFAULT 'path',
            ssh_key_path         TEXT,
            ssh_key_content      TEXT,
            username             TEXT,
            token                TEXT,
            default_author_name  TEXT,
            default_author_email TEXT,
            committer_name       TEXT,
            committer_email      TEXT,
            schedule_cron        TEXT,
            webhook_secret       TEXT,
            always_namespace     INTEGER NOT NULL DEFAULT 0,
            git_binary_path      TEXT,
            created_at           TEXT NOT NULL,
            updated_at           TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_profiles_kind_enabled ON profiles (kind, enabled);

        CREATE TABLE IF NOT EXISTS profile_runs (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            profile_id    TEXT NOT NULL REFERENCES profiles (id) ON DELETE CASCADE,
            started_at    TEXT NOT NULL,
            finished_at   TEXT,
            status        TEXT NOT NULL,
            action        TEXT NOT NULL,
            branch        TEXT,
            commit_from   TEXT,
            commit_to     TEXT,
            files_changed INTEGER,
            message       TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_profile_runs_profile ON profile_runs (profile_id, id);
        "#,
    ),
    (
        2,
        "reference content store",
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id    INTEGER PRIMARY KEY AUTOINCREMENT,
            name  TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE
        );
        INSERT OR IGNORE INTO users (id, name, email)
            VALUES (1, 'Administrator', 'admin@example.com');

        CREATE TABLE IF NOT EXISTS pages (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            path         TEXT NOT NULL,
            locale       TEXT NOT NULL,
            title        TEXT NOT NULL,
            description  TEXT NOT NULL DEFAULT '',
            content_type TEXT NOT NULL,
            content      TEXT NOT NULL,
            is_published INTEGER NOT NULL DEFAULT 1,
            is_private   INTEGER NOT NULL DEFAULT 0,
            tags         TEXT NOT NULL DEFAULT '[]',
            editor_key   TEXT NOT NULL,
            author_id    INTEGER NOT NULL REFERENCES users (id),
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL,
            UNIQUE (path, locale)
        );

        CREATE TABLE IF NOT EXISTS assets (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            filename   TEXT NOT NULL UNIQUE,
            hash       TEXT NOT NULL UNIQUE,
            data       BLOB NOT NULL,
            author_id  INTEGER NOT NULL REFERENCES users (id),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    ),
];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied successfully");
        }
    }

    Ok(())
}

/// Read the current schema version from the SQLite `user_version` pragma.
fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Set the schema version via the SQLite `user_version` pragma.
fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}
