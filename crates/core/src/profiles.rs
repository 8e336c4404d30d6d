//! Administrative profile payloads and the sanitized profile view.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::StoreError;
use crate::models::{AuthType, Direction, Profile, Run, RunAction, RunStatus, SshKeyMode};

/// Fields an administrative payload may set.
pub const EDITABLE_FIELDS: &[&str] = &[
    "name",
    "enabled",
    "direction",
    "repo_url",
    "branch",
    "local_path",
    "verify_ssl",
    "auth_type",
    "ssh_key_mode",
    "ssh_key_path",
    "ssh_key_content",
    "username",
    "token",
    "default_author_name",
    "default_author_email",
    "committer_name",
    "committer_email",
    "schedule_cron",
    "webhook_secret",
    "always_namespace",
    "git_binary_path",
];

/// An allow-listed administrative payload.
#[derive(Debug, Clone, Default)]
pub struct ProfileForm {
    fields: Map<String, Value>,
}

fn invalid(detail: impl Into<String>) -> StoreError {
    StoreError::Invalid {
        entity: "profile".into(),
        detail: detail.into(),
    }
}

/// `true`, `"true"`, `1` and `"1"` are true; anything else is false.
pub fn coerce_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s == "true" || s == "1",
        Value::Number(n) => n.as_i64() == Some(1),
        _ => false,
    }
}

impl ProfileForm {
    /// Keep only editable fields of a JSON object body.
    pub fn from_json(body: &Value) -> Result<Self, StoreError> {
        let object = body
            .as_object()
            .ok_or_else(|| invalid("request body must be a JSON object"))?;
        let fields = object
            .iter()
            .filter(|(k, _)| EDITABLE_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Self { fields })
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    fn text(&self, field: &str) -> Result<Option<Option<String>>, StoreError> {
        match self.fields.get(field) {
            None => Ok(None),
            Some(Value::Null) => Ok(Some(None)),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(Some(None)),
            Some(Value::String(s)) => Ok(Some(Some(s.trim().to_string()))),
            Some(other) => Err(invalid(format!("{} must be a string, got {}", field, other))),
        }
    }

    fn required_text(&self, field: &str) -> Result<Option<String>, StoreError> {
        match self.text(field)? {
            None => Ok(None),
            Some(Some(v)) => Ok(Some(v)),
            Some(None) => Err(invalid(format!("{} must not be empty", field))),
        }
    }

    fn flag(&self, field: &str) -> Option<bool> {
        self.fields.get(field).map(coerce_bool)
    }

    /// A new profile: defaults first, then the payload on top.
    pub fn build_new(&self) -> Result<Profile, StoreError> {
        let name = self
            .required_text("name")?
            .ok_or_else(|| invalid("name is required"))?;
        let repo_url = self
            .required_text("repo_url")?
            .ok_or_else(|| invalid("repo_url is required"))?;
        let mut profile = Profile::new(name, repo_url);
        self.apply(&mut profile)?;
        Ok(profile)
    }

    /// `existing` with the payload applied. Secrets absent from the payload
    /// keep their stored values.
    pub fn apply_update(&self, existing: &Profile) -> Result<Profile, StoreError> {
        let mut profile = existing.clone();
        self.apply(&mut profile)?;
        profile.updated_at = Utc::now();
        Ok(profile)
    }

    fn apply(&self, p: &mut Profile) -> Result<(), StoreError> {
        if let Some(v) = self.required_text("name")? {
            p.name = v;
        }
        if let Some(v) = self.required_text("repo_url")? {
            p.repo_url = v;
        }
        if let Some(v) = self.text("branch")? {
            p.branch = v.unwrap_or_else(|| "main".to_string());
        }
        if let Some(v) = self.text("local_path")? {
            p.local_path = v.unwrap_or_default();
        }
        if let Some(v) = self.text("direction")? {
            p.direction = match v {
                None => Direction::default(),
                Some(s) => Direction::from_str_val(&s)
                    .ok_or_else(|| invalid(format!("unknown direction '{}'", s)))?,
            };
        }
        if let Some(v) = self.text("auth_type")? {
            p.auth_type = match v {
                None => AuthType::default(),
                Some(s) => AuthType::from_str_val(&s)
                    .ok_or_else(|| invalid(format!("unknown auth type '{}'", s)))?,
            };
        }
        if let Some(v) = self.text("ssh_key_mode")? {
            p.ssh_key_mode = match v {
                None => SshKeyMode::default(),
                Some(s) => SshKeyMode::from_str_val(&s)
                    .ok_or_else(|| invalid(format!("unknown ssh key mode '{}'", s)))?,
            };
        }
        if let Some(v) = self.flag("enabled") {
            p.enabled = v;
        }
        if let Some(v) = self.flag("verify_ssl") {
            p.verify_ssl = v;
        }
        if let Some(v) = self.flag("always_namespace") {
            p.always_namespace = v;
        }

        let optional: [(&str, &mut Option<String>); 11] = [
            ("ssh_key_path", &mut p.ssh_key_path),
            ("ssh_key_content", &mut p.ssh_key_content),
            ("username", &mut p.username),
            ("token", &mut p.token),
            ("default_author_name", &mut p.default_author_name),
            ("default_author_email", &mut p.default_author_email),
            ("committer_name", &mut p.committer_name),
            ("committer_email", &mut p.committer_email),
            ("schedule_cron", &mut p.schedule_cron),
            ("webhook_secret", &mut p.webhook_secret),
            ("git_binary_path", &mut p.git_binary_path),
        ];
        for (field, slot) in optional {
            if let Some(v) = self.text(field)? {
                *slot = v;
            }
        }
        Ok(())
    }
}

/// Summary of the latest run shown next to a profile.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunSummary {
    pub id: i64,
    pub status: RunStatus,
    pub action: RunAction,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

impl From<&Run> for RunSummary {
    fn from(run: &Run) -> Self {
        Self {
            id: run.id,
            status: run.status,
            action: run.action,
            started_at: run.started_at,
            finished_at: run.finished_at,
            message: run.message.clone(),
        }
    }
}

/// A profile with its secrets replaced by presence flags.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileView {
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
    pub username: Option<String>,
    pub default_author_name: Option<String>,
    pub default_author_email: Option<String>,
    pub committer_name: Option<String>,
    pub committer_email: Option<String>,
    pub schedule_cron: Option<String>,
    pub has_webhook_secret: bool,
    pub always_namespace: bool,
    pub git_binary_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub has_token: bool,
    pub has_ssh_key: bool,
    pub last_run: Option<RunSummary>,
    pub status: String,
}

impl ProfileView {
    pub fn new(profile: &Profile, last_run: Option<&Run>) -> Self {
        Self {
            id: profile.id.clone(),
            kind: profile.kind.clone(),
            name: profile.name.clone(),
            enabled: profile.enabled,
            direction: profile.direction,
            repo_url: profile.repo_url.clone(),
            branch: profile.branch.clone(),
            local_path: profile.local_path.clone(),
            verify_ssl: profile.verify_ssl,
            auth_type: profile.auth_type,
            ssh_key_mode: profile.ssh_key_mode,
            ssh_key_path: profile.ssh_key_path.clone(),
            username: profile.username.clone(),
            default_author_name: profile.default_author_name.clone(),
            default_author_email: profile.default_author_email.clone(),
            committer_name: profile.committer_name.clone(),
            committer_email: profile.committer_email.clone(),
            schedule_cron: profile.schedule_cron.clone(),
            has_webhook_secret: profile.webhook_secret.is_some(),
            always_namespace: profile.always_namespace,
            git_binary_path: profile.git_binary_path.clone(),
            created_at: profile.created_at,
            updated_at: profile.updated_at,
            has_token: profile.token.is_some(),
            has_ssh_key: profile.ssh_key_content.is_some() || profile.ssh_key_path.is_some(),
            last_run: last_run.map(RunSummary::from),
            status: status_summary(profile, last_run),
        }
    }
}

/// One-line human status of a profile.
pub fn status_summary(profile: &Profile, last_run: Option<&Run>) -> String {
    if !profile.enabled {
        return "Profile disabled.".to_string();
    }
    match last_run {
        None => "Awaiting first sync.".to_string(),
        Some(run) => match run.message.as_deref().filter(|m| !m.is_empty()) {
            Some(message) => message.to_string(),
            None => format!("Last action: {}", run.action),
        },
    }
}
