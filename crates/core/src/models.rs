//! Domain model types used throughout wikisync.
//!
//! These types bridge the adapter, profile manager, stores and web API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::content::ContentType;

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// Which sync phases a profile performs.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    PushOnly,
    PullOnly,
    #[default]
    Bidirectional,
}

impl Direction {
    pub fn can_push(self) -> bool {
        matches!(self, Self::PushOnly | Self::Bidirectional)
    }

    pub fn can_pull(self) -> bool {
        matches!(self, Self::PullOnly | Self::Bidirectional)
    }

    /// Parse the stored string form.
    pub fn from_str_val(s: &str) -> Option<Self> {
        match s {
            "PUSH_ONLY" => Some(Self::PushOnly),
            "PULL_ONLY" => Some(Self::PullOnly),
            "BIDIRECTIONAL" => Some(Self::Bidirectional),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PushOnly => write!(f, "PUSH_ONLY"),
            Self::PullOnly => write!(f, "PULL_ONLY"),
            Self::Bidirectional => write!(f, "BIDIRECTIONAL"),
        }
    }
}

/// How the adapter authenticates against the remote.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    #[default]
    Ssh,
    HttpsPat,
}

impl AuthType {
    pub fn from_str_val(s: &str) -> Option<Self> {
        match s {
            "ssh" => Some(Self::Ssh),
            "https_pat" | "basic" => Some(Self::HttpsPat),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuthType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ssh => write!(f, "ssh"),
            Self::HttpsPat => write!(f, "https_pat"),
        }
    }
}

/// Whether the ssh key field holds a filesystem path or the key itself.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SshKeyMode {
    #[default]
    Path,
    Contents,
}

impl SshKeyMode {
    pub fn from_str_val(s: &str) -> Option<Self> {
        match s {
            "path" => Some(Self::Path),
            "contents" => Some(Self::Contents),
            _ => None,
        }
    }
}

impl std::fmt::Display for SshKeyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path => write!(f, "path"),
            Self::Contents => write!(f, "contents"),
        }
    }
}

/// Profile kind managed by the git profile manager.
pub const PROFILE_KIND_GIT: &str = "git";

/// A configured binding between the content store and one git remote.
///
/// Equality is structural over every field; the profile manager relies on
/// it to decide whether a live adapter is still current.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub id: String,
    pub kind: String,
    pub name: String,
    pub enabled: bool,
    pub direction: Direction,
    pub repo_url: String,
    pub branch: String,
    pub local_path: String,
    pub verify_ssl: bool,
    pub auth_type: AuthType,
    pub ssh_key_mode: SshKeyMode,
    pub ssh_key_path: Option<String>,
    pub ssh_key_content: Option<String>,
    pub username: Option<String>,
    pub token: Option<String>,
    pub default_author_name: Option<String>,
    pub default_author_email: Option<String>,
    pub committer_name: Option<String>,
    pub committer_email: Option<String>,
    pub schedule_cron: Option<String>,
    pub webhook_secret: Option<String>,
    pub always_namespace: bool,
    pub git_binary_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// A new profile with the insert-time defaults applied.
    pub fn new(name: impl Into<String>, repo_url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: PROFILE_KIND_GIT.to_string(),
            name: name.into(),
            enabled: true,
            direction: Direction::default(),
            repo_url: repo_url.into(),
            branch: "main".to_string(),
            local_path: String::new(),
            verify_ssl: true,
            auth_type: AuthType::default(),
            ssh_key_mode: SshKeyMode::default(),
            ssh_key_path: None,
            ssh_key_content: None,
            username: None,
            token: None,
            default_author_name: None,
            default_author_email: None,
            committer_name: None,
            committer_email: None,
            schedule_cron: None,
            webhook_secret: None,
            always_namespace: false,
            git_binary_path: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl std::fmt::Debug for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profile")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("direction", &self.direction)
            .field("repo_url", &self.repo_url)
            .field("branch", &self.branch)
            .field("local_path", &self.local_path)
            .field("auth_type", &self.auth_type)
            .field("has_token", &self.token.is_some())
            .field("has_ssh_key", &self.ssh_key_content.is_some())
            .field("updated_at", &self.updated_at)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// What a run was asked to do.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunAction {
    Sync,
    Force,
}

impl RunAction {
    pub fn from_force(force: bool) -> Self {
        if force {
            Self::Force
        } else {
            Self::Sync
        }
    }

    pub fn from_str_val(s: &str) -> Self {
        match s {
            "force" => Self::Force,
            _ => Self::Sync,
        }
    }
}

impl std::fmt::Display for RunAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync => write!(f, "sync"),
            Self::Force => write!(f, "force"),
        }
    }
}

/// Run status. Only `Pending` may transition, and only to a terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Success,
    Warning,
    Error,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn from_str_val(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "success" => Some(Self::Success),
            "warning" => Some(Self::Warning),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Success => write!(f, "success"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// One recorded attempt at synchronizing a profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Run {
    pub id: i64,
    pub profile_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub action: RunAction,
    pub branch: Option<String>,
    pub commit_from: Option<String>,
    pub commit_to: Option<String>,
    pub files_changed: Option<i64>,
    pub message: Option<String>,
}

/// Fields written when a run finishes.
#[derive(Debug, Clone)]
pub struct RunCompletion {
    pub status: RunStatus,
    pub finished_at: DateTime<Utc>,
    pub message: String,
    pub branch: Option<String>,
    pub commit_from: Option<String>,
    pub commit_to: Option<String>,
    pub files_changed: Option<i64>,
}

impl RunCompletion {
    pub fn new(status: RunStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            finished_at: Utc::now(),
            message: message.into(),
            branch: None,
            commit_from: None,
            commit_to: None,
            files_changed: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Content records
// ---------------------------------------------------------------------------

/// A content-store user, used to attribute imported changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
}

/// A page as the content store hands it to the adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Page {
    pub id: i64,
    pub path: String,
    pub locale: String,
    pub title: String,
    pub description: String,
    pub content_type: ContentType,
    pub content: String,
    pub is_published: bool,
    pub is_private: bool,
    pub tags: Vec<String>,
    pub editor_key: String,
    pub author_name: String,
    pub author_email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A page move, as emitted by the content store after a rename.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageMove {
    pub page: Page,
    pub destination_path: String,
    pub destination_locale: String,
    pub move_author_name: String,
    pub move_author_email: String,
}

/// An uploaded asset with its binary data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Asset {
    pub path: String,
    pub data: Vec<u8>,
    pub author_name: String,
    pub author_email: String,
}

/// A reference to an asset without its data (deletion events).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssetRef {
    pub path: String,
    pub author_name: String,
    pub author_email: String,
}

/// An asset move between two paths.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssetMove {
    pub path: String,
    pub destination_path: String,
    pub move_author_name: String,
    pub move_author_email: String,
}

/// An asset row as stored by the content store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssetRecord {
    pub id: i64,
    pub filename: String,
    pub hash: String,
}

// ---------------------------------------------------------------------------
// Content events
// ---------------------------------------------------------------------------

/// Page mutations fanned out to push-capable adapters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum PageEvent {
    Created(Page),
    Updated(Page),
    Deleted(Page),
    Renamed(PageMove),
}

impl PageEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::Updated(_) => "updated",
            Self::Deleted(_) => "deleted",
            Self::Renamed(_) => "renamed",
        }
    }
}

/// Asset mutations fanned out to push-capable adapters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum AssetEvent {
    Uploaded(Asset),
    Deleted(AssetRef),
    Renamed(AssetMove),
}

impl AssetEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Uploaded(_) => "uploaded",
            Self::Deleted(_) => "deleted",
            Self::Renamed(_) => "renamed",
        }
    }
}
