//! TOML-based configuration system for wikisync.
//!
//! Sensitive values (the admin token) are stored as `_env` fields that
//! reference environment variable names. The actual secrets are resolved at
//! runtime via [`AppConfig::resolve_env_vars`]. Per-profile settings live in
//! the database, not here.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::content::Namespacing;
use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Daemon settings.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Admin API and webhook listener.
    #[serde(default)]
    pub web: WebConfig,

    /// Content-store locale settings.
    #[serde(default)]
    pub content: ContentConfig,

    /// Git defaults shared by every profile.
    #[serde(default)]
    pub git: GitDefaults,
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

/// Daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Seconds between cron schedule evaluations (default 30).
    #[serde(default = "default_schedule_tick")]
    pub schedule_tick_secs: u64,

    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory for persistent data (database, working copies, keys).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_schedule_tick() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".into()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/wikisync")
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            schedule_tick_secs: default_schedule_tick(),
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

impl DaemonConfig {
    /// Directory holding materialized ssh keys.
    pub fn secure_dir(&self) -> PathBuf {
        self.data_dir.join("secure")
    }

    /// Parent directory of default working copies.
    pub fn repo_dir(&self) -> PathBuf {
        self.data_dir.join("repo")
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("wikisync.db")
    }

    pub fn asset_cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }
}

// ---------------------------------------------------------------------------
// Web
// ---------------------------------------------------------------------------

/// Web listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Listen address (default `127.0.0.1:3000`).
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Environment variable holding the admin bearer token.
    #[serde(default)]
    pub admin_token_env: Option<String>,

    /// Resolved admin token.
    #[serde(skip)]
    pub admin_token: Option<String>,
}

fn default_listen() -> String {
    "127.0.0.1:3000".into()
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            admin_token_env: None,
            admin_token: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Content
// ---------------------------------------------------------------------------

/// Locale settings of the content store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    /// Default locale code (default `en`).
    #[serde(default = "default_locale")]
    pub default_locale: String,

    /// Whether pages are namespaced by locale.
    #[serde(default)]
    pub namespacing: bool,
}

fn default_locale() -> String {
    "en".into()
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            default_locale: default_locale(),
            namespacing: false,
        }
    }
}

impl ContentConfig {
    pub fn namespacing(&self) -> Namespacing {
        Namespacing {
            default_locale: self.default_locale.clone(),
            enabled: self.namespacing,
        }
    }
}

// ---------------------------------------------------------------------------
// Git defaults
// ---------------------------------------------------------------------------

/// Identity and environment defaults for all working copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitDefaults {
    /// Committer name used when a profile sets none.
    #[serde(default = "default_git_name")]
    pub default_name: String,

    /// Committer email used when a profile sets none.
    #[serde(default = "default_git_email")]
    pub default_email: String,

    /// Add each working copy to the global `safe.directory` list.
    #[serde(default = "default_true")]
    pub mark_safe_directory: bool,
}

fn default_git_name() -> String {
    "wikisync".into()
}
fn default_git_email() -> String {
    "wiki@example.com".into()
}
fn default_true() -> bool {
    true
}

impl Default for GitDefaults {
    fn default() -> Self {
        Self {
            default_name: default_git_name(),
            default_email: default_git_email(),
            mark_safe_directory: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve all `*_env` fields from environment variables.
    ///
    /// Missing variables are logged, not fatal.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        if let Some(ref env_name) = self.web.admin_token_env {
            self.web.admin_token = resolve_optional_env(env_name, "web.admin_token_env");
        }
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.schedule_tick_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "daemon.schedule_tick_secs".into(),
                detail: "schedule tick must be > 0".into(),
            });
        }
        if self.content.default_locale.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "content.default_locale".into(),
                detail: "default locale must not be empty".into(),
            });
        }
        if self.git.default_email.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "git.default_email".into(),
                detail: "default committer email must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
