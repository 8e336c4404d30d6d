//! Error types for the wikisync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Manager(#[from] ManagerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Webhook(#[from] WebhookError),
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from git operations (CLI subprocesses and `git2` inspection).
#[derive(Debug, Error)]
pub enum GitError {
    /// The configured git binary could not be spawned.
    #[error("git binary not found: {0}")]
    BinaryNotFound(String),

    /// A `git` command exited with a non-zero status.
    #[error("git {command} failed (exit {exit_code}): {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A ref (branch, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl GitError {
    /// Standard error output of a failed command, or the display string.
    pub fn detail(&self) -> String {
        match self {
            Self::CommandFailed { stderr, .. } => stderr.clone(),
            other => other.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Credential errors
// ---------------------------------------------------------------------------

/// Errors from resolving profile authentication material.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// A credential field required by the auth type is empty.
    #[error("missing credential field '{field}' for {auth_type} authentication")]
    MissingField {
        field: &'static str,
        auth_type: &'static str,
    },

    /// The remote URL could not be parsed for credential embedding.
    #[error("invalid remote URL '{url}': {detail}")]
    InvalidUrl { url: String, detail: String },

    /// Writing the materialized key file failed.
    #[error("failed to write ssh key file '{path}': {source}")]
    KeyFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Adapter errors
// ---------------------------------------------------------------------------

/// Errors from a single profile's git adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The configured branch exists neither locally nor on the remote.
    #[error("invalid branch '{0}': make sure it exists on the remote first")]
    InvalidBranch(String),

    /// A lifecycle operation was called in the wrong state.
    #[error("adapter is {state}, expected {expected}")]
    InvalidState {
        state: String,
        expected: &'static str,
    },

    /// Underlying git failure (fetch, rebase, push, commit, ...).
    #[error("adapter git error: {0}")]
    Git(#[from] GitError),

    /// Credential resolution failed.
    #[error("adapter credential error: {0}")]
    Credential(#[from] CredentialError),

    /// A content-store call failed outside per-file processing.
    #[error("adapter store error: {0}")]
    Store(#[from] StoreError),

    /// Working-copy filesystem error.
    #[error("adapter I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Manager errors
// ---------------------------------------------------------------------------

/// Errors from the profile manager.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The manager has not completed its first load.
    #[error("profile manager is not loaded")]
    NotLoaded,

    /// The requested profile has no live adapter.
    #[error("profile {0} is not active or does not exist")]
    NotActive(String),

    /// Adapter initialization or sync failed.
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// Loading profiles from the configuration store failed.
    #[error("profile manager store error: {0}")]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

/// Errors surfaced by the configuration and content stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database error.
    #[error("store database error: {0}")]
    Database(#[from] DatabaseError),

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A record violated a constraint (e.g. duplicate profile name).
    #[error("invalid {entity}: {detail}")]
    Invalid { entity: String, detail: String },

    /// File read while importing content.
    #[error("store I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A requested row was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A stored value could not be decoded.
    #[error("corrupt {column} value: {value}")]
    Corrupt { column: String, value: String },

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Webhook errors
// ---------------------------------------------------------------------------

/// Errors from webhook signature verification.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    /// No signature header was supplied.
    #[error("missing webhook signature")]
    MissingSignature,

    /// The profile has no webhook secret.
    #[error("webhook secret not configured")]
    SecretNotConfigured,

    /// The signature is not valid hex.
    #[error("malformed webhook signature")]
    Malformed,

    /// The signature does not match the body.
    #[error("webhook signature mismatch")]
    Mismatch,
}
