//! Sync-run bookkeeping around [`ProfileManager::sync_profile`].
//!
//! Every accepted request records one run row (best-effort), drives the
//! manager and patches the row with a terminal status. Bookkeeping failures
//! are logged and never abort the sync itself.

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::adapter::SyncOutcome;
use crate::errors::ManagerError;
use crate::manager::ProfileManager;
use crate::models::{RunAction, RunCompletion, RunStatus};
use crate::store::ConfigStore;

/// A request to sync one profile, from a webhook, schedule or operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub profile_id: String,
    #[serde(default)]
    pub force: bool,
    pub requested_by: String,
}

impl SyncRequest {
    pub fn new(profile_id: impl Into<String>, force: bool, requested_by: impl Into<String>) -> Self {
        Self {
            profile_id: profile_id.into(),
            force,
            requested_by: requested_by.into(),
        }
    }
}

/// What happened to a request that was not skipped.
#[derive(Debug, Clone)]
pub struct RunRecord {
    /// `None` when the run row could not be written.
    pub run_id: Option<i64>,
    pub completion: RunCompletion,
}

/// Record, execute and finalize one sync request.
///
/// Returns `None` when the profile is missing or disabled.
pub async fn run_profile_sync(
    config: &dyn ConfigStore,
    manager: &ProfileManager,
    request: &SyncRequest,
) -> Option<RunRecord> {
    let profile_id = request.profile_id.as_str();
    let profile = match config.find_profile(profile_id).await {
        Ok(Some(profile)) => profile,
        Ok(None) => {
            info!(profile = profile_id, "profile not found, skipping sync");
            return None;
        }
        Err(e) => {
            error!(profile = profile_id, error = %e, "failed to load profile, skipping sync");
            return None;
        }
    };
    if !profile.enabled {
        info!(profile = profile_id, "profile disabled, skipping sync");
        return None;
    }

    let action = RunAction::from_force(request.force);
    let run_id = match config
        .insert_run(
            profile_id,
            action,
            RunStatus::Pending,
            &format!("requested by {}", request.requested_by),
        )
        .await
    {
        Ok(id) => Some(id),
        Err(e) => {
            error!(profile = profile_id, error = %e, "failed to record run");
            None
        }
    };

    info!(
        profile = profile_id,
        action = %action,
        requested_by = %request.requested_by,
        "starting sync"
    );

    let result = execute(manager, profile, request.force).await;
    let completion = match result {
        Ok(outcome) => completion_for(&outcome, action),
        Err(e) => {
            warn!(profile = profile_id, error = %e, "sync failed");
            RunCompletion::new(RunStatus::Error, e.to_string())
        }
    };

    if let Some(id) = run_id {
        if let Err(e) = config.patch_run(id, &completion).await {
            error!(profile = profile_id, run_id = id, error = %e, "failed to finalize run");
        }
    }

    info!(profile = profile_id, status = %completion.status, "sync finished");
    Some(RunRecord { run_id, completion })
}

async fn execute(
    manager: &ProfileManager,
    profile: crate::models::Profile,
    force: bool,
) -> Result<SyncOutcome, ManagerError> {
    let id = profile.id.clone();
    let mut initial = None;
    if !manager.is_loaded() {
        let mut report = manager.reload_profiles().await?;
        initial = report.initial_syncs.remove(&id);
    }
    if let Some(built) = manager.ensure_adapter(profile).await? {
        initial = Some(match initial {
            Some(earlier) => earlier.followed_by(built),
            None => built,
        });
    }
    let outcome = manager.sync_profile(&id, force).await?;
    Ok(match initial {
        Some(initial) => initial.followed_by(outcome),
        None => outcome,
    })
}

fn completion_for(outcome: &SyncOutcome, action: RunAction) -> RunCompletion {
    let mut completion = if outcome.files_failed > 0 {
        RunCompletion::new(
            RunStatus::Warning,
            format!(
                "completed ({}) with {} of {} files failing",
                action, outcome.files_failed, outcome.files_changed
            ),
        )
    } else {
        RunCompletion::new(RunStatus::Success, format!("completed ({})", action))
    };
    completion.branch = Some(outcome.branch.clone());
    completion.commit_from = outcome.commit_before.clone();
    completion.commit_to = outcome.commit_after.clone();
    completion.files_changed = Some(outcome.files_changed as i64);
    completion
}
