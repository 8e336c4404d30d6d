//! Typed query helpers for the profile and run tables.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

use super::Database;
use crate::errors::{DatabaseError, StoreError};
use crate::models::{
    AuthType, Direction, Profile, Run, RunAction, RunCompletion, RunStatus, SshKeyMode,
};
use crate::store::ConfigStore;

const PROFILE_COLUMNS: &str = "id, kind, name, enabled, direction, repo_url, branch, local_path, \
     verify_ssl, auth_type, ssh_key_mode, ssh_key_path, ssh_key_content, username, token, \
     default_author_name, default_author_email, committer_name, committer_email, \
     schedule_cron, webhook_secret, always_namespace, git_binary_path, created_at, updated_at";

const RUN_COLUMNS: &str = "id, profile_id, started_at, finished_at, status, action, branch, \
     commit_from, commit_to, files_changed, message";

// ---------------------------------------------------------------------------
// Raw rows
// ---------------------------------------------------------------------------

/// A `profiles` row before enum and timestamp decoding.
struct ProfileRow {
    id: String,
    kind: String,
    name: String,
    enabled: bool,
    direction: String,
    repo_url: String,
    branch: String,
    local_path: String,
    verify_ssl: bool,
    auth_type: String,
    ssh_key_mode: String,
    ssh_key_path: Option<String>,
    ssh_key_content: Option<String>,
    username: Option<String>,
    token: Option<String>,
    default_author_name: Option<String>,
    default_author_email: Option<String>,
    committer_name: Option<String>,
    committer_email: Option<String>,
    schedule_cron: Option<String>,
    webhook_secret: Option<String>,
    always_namespace: bool,
    git_binary_path: Option<String>,
    created_at: String,
    updated_at: String,
}

impl ProfileRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            name: row.get(2)?,
            enabled: row.get(3)?,
            direction: row.get(4)?,
            repo_url: row.get(5)?,
            branch: row.get(6)?,
            local_path: row.get(7)?,
            verify_ssl: row.get(8)?,
            auth_type: row.get(9)?,
            ssh_key_mode: row.get(10)?,
            ssh_key_path: row.get(11)?,
            ssh_key_content: row.get(12)?,
            username: row.get(13)?,
            token: row.get(14)?,
            default_author_name: row.get(15)?,
            default_author_email: row.get(16)?,
            committer_name: row.get(17)?,
            committer_email: row.get(18)?,
            schedule_cron: row.get(19)?,
            webhook_secret: row.get(20)?,
            always_namespace: row.get(21)?,
            git_binary_path: row.get(22)?,
            created_at: row.get(23)?,
            updated_at: row.get(24)?,
        })
    }

    fn decode(self) -> Result<Profile, DatabaseError> {
        Ok(Profile {
            direction: Direction::from_str_val(&self.direction)
                .ok_or_else(|| corrupt("direction", &self.direction))?,
            auth_type: AuthType::from_str_val(&self.auth_type)
                .ok_or_else(|| corrupt("auth_type", &self.auth_type))?,
            ssh_key_mode: SshKeyMode::from_str_val(&self.ssh_key_mode)
                .ok_or_else(|| corrupt("ssh_key_mode", &self.ssh_key_mode))?,
            created_at: parse_ts("created_at", &self.created_at)?,
            updated_at: parse_ts("updated_at", &self.updated_at)?,
            id: self.id,
            kind: self.kind,
            name: self.name,
            enabled: self.enabled,
            repo_url: self.repo_url,
            branch: self.branch,
            local_path: self.local_path,
            verify_ssl: self.verify_ssl,
            ssh_key_path: self.ssh_key_path,
            ssh_key_content: self.ssh_key_content,
            username: self.username,
            token: self.token,
            default_author_name: self.default_author_name,
            default_author_email: self.default_author_email,
            committer_name: self.committer_name,
            committer_email: self.committer_email,
            schedule_cron: self.schedule_cron,
            webhook_secret: self.webhook_secret,
            always_namespace: self.always_namespace,
            git_binary_path: self.git_binary_path,
        })
    }
}

/// A `profile_runs` row before decoding.
struct RunRow {
    id: i64,
    profile_id: String,
    started_at: String,
    finished_at: Option<String>,
    status: String,
    action: String,
    branch: Option<String>,
    commit_from: Option<String>,
    commit_to: Option<String>,
    files_changed: Option<i64>,
    message: Option<String>,
}

impl RunRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            profile_id: row.get(1)?,
            started_at: row.get(2)?,
            finished_at: row.get(3)?,
            status: row.get(4)?,
            action: row.get(5)?,
            branch: row.get(6)?,
            commit_from: row.get(7)?,
            commit_to: row.get(8)?,
            files_changed: row.get(9)?,
            message: row.get(10)?,
        })
    }

    fn decode(self) -> Result<Run, DatabaseError> {
        Ok(Run {
            id: self.id,
            status: RunStatus::from_str_val(&self.status)
                .ok_or_else(|| corrupt("status", &self.status))?,
            action: RunAction::from_str_val(&self.action),
            started_at: parse_ts("started_at", &self.started_at)?,
            finished_at: self
                .finished_at
                .as_deref()
                .map(|v| parse_ts("finished_at", v))
                .transpose()?,
            profile_id: self.profile_id,
            branch: self.branch,
            commit_from: self.commit_from,
            commit_to: self.commit_to,
            files_changed: self.files_changed,
            message: self.message,
        })
    }
}

fn corrupt(column: &str, value: &str) -> DatabaseError {
    DatabaseError::Corrupt {
        column: column.to_string(),
        value: value.to_string(),
    }
}

pub(crate) fn parse_ts(column: &str, value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| corrupt(column, value))
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

// ---------------------------------------------------------------------------
// Query implementations
// ---------------------------------------------------------------------------

impl Database {
    // -- profiles -----------------------------------------------------------

    /// Get a profile by id.
    pub fn get_profile(&self, id: &str) -> Result<Option<Profile>, DatabaseError> {
        let conn = self.conn();
        let sql = format!("SELECT {} FROM profiles WHERE id = ?1", PROFILE_COLUMNS);
        let row = conn
            .query_row(&sql, params![id], ProfileRow::from_row)
            .optional()?;
        row.map(ProfileRow::decode).transpose()
    }

    /// List profiles ordered by name, optionally only enabled ones of `kind`.
    pub fn query_profiles(&self, enabled_kind: Option<&str>) -> Result<Vec<Profile>, DatabaseError> {
        let conn = self.conn();
        let rows: Vec<ProfileRow> = match enabled_kind {
            Some(kind) => {
                let sql = format!(
                    "SELECT {} FROM profiles WHERE kind = ?1 AND enabled = 1 ORDER BY name",
                    PROFILE_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![kind], ProfileRow::from_row)?;
                rows.collect::<Result<_, _>>()?
            }
            None => {
                let sql = format!("SELECT {} FROM profiles ORDER BY name", PROFILE_COLUMNS);
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], ProfileRow::from_row)?;
                rows.collect::<Result<_, _>>()?
            }
        };
        rows.into_iter().map(ProfileRow::decode).collect()
    }

    /// Insert a profile, or overwrite it when `replace` is set.
    pub fn write_profile(&self, p: &Profile, replace: bool) -> Result<usize, rusqlite::Error> {
        let direction = p.direction.to_string();
        let auth_type = p.auth_type.to_string();
        let ssh_key_mode = p.ssh_key_mode.to_string();
        let created_at = p.created_at.to_rfc3339();
        let updated_at = p.updated_at.to_rfc3339();
        let conn = self.conn();
        let values = params![
            p.id,
            p.kind,
            p.name,
            p.enabled,
            direction,
            p.repo_url,
            p.branch,
            p.local_path,
            p.verify_ssl,
            auth_type,
            ssh_key_mode,
            p.ssh_key_path,
            p.ssh_key_content,
            p.username,
            p.token,
            p.default_author_name,
            p.default_author_email,
            p.committer_name,
            p.committer_email,
            p.schedule_cron,
            p.webhook_secret,
            p.always_namespace,
            p.git_binary_path,
            created_at,
            updated_at,
        ];
        if replace {
            conn.execute(
                "UPDATE profiles SET kind = ?2, name = ?3, enabled = ?4, direction = ?5,
                    repo_url = ?6, branch = ?7, local_path = ?8, verify_ssl = ?9,
                    auth_type = ?10, ssh_key_mode = ?11, ssh_key_path = ?12,
                    ssh_key_content = ?13, username = ?14, token = ?15,
                    default_author_name = ?16, default_author_email = ?17,
                    committer_name = ?18, committer_email = ?19, schedule_cron = ?20,
                    webhook_secret = ?21, always_namespace = ?22, git_binary_path = ?23,
                    created_at = ?24, updated_at = ?25
                 WHERE id = ?1",
                values,
            )
        } else {
            let sql = format!(
                "INSERT INTO profiles ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                    ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)",
                PROFILE_COLUMNS
            );
            conn.execute(&sql, values)
        }
    }

    /// Delete a profile and (via cascade) its runs.
    pub fn remove_profile(&self, id: &str) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let changed = conn.execute("DELETE FROM profiles WHERE id = ?1", params![id])?;
        debug!(id, changed, "deleted profile");
        Ok(changed > 0)
    }

    // -- profile_runs -------------------------------------------------------

    /// Record the start of a run.
    pub fn start_run(
        &self,
        profile_id: &str,
        action: RunAction,
        status: RunStatus,
        message: &str,
    ) -> Result<i64, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let (status, action_str) = (status.to_string(), action.to_string());
        let conn = self.conn();
        conn.execute(
            "INSERT INTO profile_runs (profile_id, started_at, status, action, message)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![profile_id, now, status, action_str, message],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, profile_id, %action, "started run");
        Ok(id)
    }

    /// Complete a pending run. Finished runs are never rewritten.
    pub fn complete_run(&self, id: i64, c: &RunCompletion) -> Result<(), DatabaseError> {
        let (status, finished_at) = (c.status.to_string(), c.finished_at.to_rfc3339());
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE profile_runs SET status = ?1, finished_at = ?2, message = ?3,
                branch = COALESCE(?4, branch), commit_from = COALESCE(?5, commit_from),
                commit_to = COALESCE(?6, commit_to),
                files_changed = COALESCE(?7, files_changed)
             WHERE id = ?8 AND status = 'pending'",
            params![
                status,
                finished_at,
                c.message,
                c.branch,
                c.commit_from,
                c.commit_to,
                c.files_changed,
                id
            ],
        )?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "pending run".into(),
                id: id.to_string(),
            });
        }
        debug!(id, status = %c.status, "completed run");
        Ok(())
    }

    /// Most recent runs for a profile, newest first.
    pub fn recent_runs(&self, profile_id: &str, limit: u32) -> Result<Vec<Run>, DatabaseError> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM profile_runs WHERE profile_id = ?1 ORDER BY id DESC LIMIT ?2",
            RUN_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![profile_id, limit], RunRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RunRow::decode).collect()
    }
}

// ---------------------------------------------------------------------------
// ConfigStore
// ---------------------------------------------------------------------------

#[async_trait]
impl ConfigStore for Database {
    async fn find_profile(&self, id: &str) -> Result<Option<Profile>, StoreError> {
        Ok(self.get_profile(id)?)
    }

    async fn list_enabled_profiles(&self, kind: &str) -> Result<Vec<Profile>, StoreError> {
        Ok(self.query_profiles(Some(kind))?)
    }

    async fn list_profiles(&self) -> Result<Vec<Profile>, StoreError> {
        Ok(self.query_profiles(None)?)
    }

    async fn insert_profile(&self, profile: &Profile) -> Result<(), StoreError> {
        match self.write_profile(profile, false) {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(StoreError::Invalid {
                entity: "profile".into(),
                detail: format!("a profile named '{}' already exists", profile.name),
            }),
            Err(e) => Err(DatabaseError::from(e).into()),
        }
    }

    async fn update_profile(&self, profile: &Profile) -> Result<(), StoreError> {
        match self.write_profile(profile, true) {
            Ok(0) => Err(StoreError::NotFound {
                entity: "profile".into(),
                id: profile.id.clone(),
            }),
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(StoreError::Invalid {
                entity: "profile".into(),
                detail: format!("a profile named '{}' already exists", profile.name),
            }),
            Err(e) => Err(DatabaseError::from(e).into()),
        }
    }

    async fn delete_profile(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.remove_profile(id)?)
    }

    async fn insert_run(
        &self,
        profile_id: &str,
        action: RunAction,
        status: RunStatus,
        message: &str,
    ) -> Result<i64, StoreError> {
        Ok(self.start_run(profile_id, action, status, message)?)
    }

    async fn patch_run(&self, run_id: i64, completion: &RunCompletion) -> Result<(), StoreError> {
        Ok(self.complete_run(run_id, completion)?)
    }

    async fn latest_run(&self, profile_id: &str) -> Result<Option<Run>, StoreError> {
        Ok(self.recent_runs(profile_id, 1)?.into_iter().next())
    }

    async fn list_runs(&self, profile_id: &str, limit: u32) -> Result<Vec<Run>, StoreError> {
        Ok(self.recent_runs(profile_id, limit)?)
    }
}
