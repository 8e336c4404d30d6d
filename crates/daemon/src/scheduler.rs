//! Sync scheduler: executes queued sync jobs and fires cron schedules.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use tokio::time;
use tracing::{debug, error, info, warn};

use wikisync_core::manager::ProfileManager;
use wikisync_core::models::{Profile, PROFILE_KIND_GIT};
use wikisync_core::runner::{run_profile_sync, SyncRequest};
use wikisync_core::store::ConfigStore;

/// Parse a cron expression. Five-field expressions get a leading seconds
/// field of `0`.
pub fn parse_schedule(expr: &str) -> Result<Schedule, cron::error::Error> {
    let expr = expr.trim();
    if expr.split_whitespace().count() == 5 {
        Schedule::from_str(&format!("0 {}", expr))
    } else {
        Schedule::from_str(expr)
    }
}

/// Profiles whose schedule has an occurrence in `(since, now]`.
pub fn due_profiles(profiles: &[Profile], since: DateTime<Utc>, now: DateTime<Utc>) -> Vec<String> {
    let mut due = Vec::new();
    for profile in profiles {
        let Some(expr) = profile.schedule_cron.as_deref().filter(|e| !e.trim().is_empty()) else {
            continue;
        };
        match parse_schedule(expr) {
            Ok(schedule) => {
                if schedule.after(&since).next().is_some_and(|next| next <= now) {
                    due.push(profile.id.clone());
                }
            }
            Err(e) => {
                warn!(profile = %profile.id, cron = expr, error = %e, "invalid cron schedule, ignoring");
            }
        }
    }
    due
}

/// The sync scheduler.
///
/// Jobs arriving on the queue run on their own tasks; the manager
/// serializes work per profile. Every tick the cron schedules of enabled
/// profiles are evaluated and due profiles are queued.
pub struct Scheduler {
    store: Arc<dyn ConfigStore>,
    manager: Arc<ProfileManager>,
    tick: Duration,
    jobs_tx: mpsc::Sender<SyncRequest>,
    jobs_rx: mpsc::Receiver<SyncRequest>,
    last_tick: DateTime<Utc>,
    /// Last invalid expression reported per profile, to log it once.
    reported_invalid: HashMap<String, String>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        manager: Arc<ProfileManager>,
        tick: Duration,
        jobs_tx: mpsc::Sender<SyncRequest>,
        jobs_rx: mpsc::Receiver<SyncRequest>,
    ) -> Self {
        Self {
            store,
            manager,
            tick,
            jobs_tx,
            jobs_rx,
            last_tick: Utc::now(),
            reported_invalid: HashMap::new(),
        }
    }

    /// Main scheduler loop. Returns after `shutdown` is notified and the
    /// in-flight jobs have finished.
    pub async fn run(&mut self, shutdown: Arc<Notify>) {
        info!(tick_secs = self.tick.as_secs(), "scheduler started");

        let mut interval = time::interval(self.tick);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        // The first tick fires immediately.
        interval.tick().await;

        let mut running = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    info!(in_flight = running.len(), "scheduler stopping");
                    break;
                }
                _ = interval.tick() => {
                    self.fire_schedules(Utc::now()).await;
                }
                Some(job) = self.jobs_rx.recv() => {
                    info!(
                        profile = %job.profile_id,
                        force = job.force,
                        requested_by = %job.requested_by,
                        "sync job received"
                    );
                    let store = self.store.clone();
                    let manager = self.manager.clone();
                    running.spawn(async move {
                        run_profile_sync(store.as_ref(), &manager, &job).await;
                    });
                }
                Some(finished) = running.join_next(), if !running.is_empty() => {
                    if let Err(e) = finished {
                        error!(error = %e, "sync job task failed");
                    }
                }
            }
        }

        while let Some(finished) = running.join_next().await {
            if let Err(e) = finished {
                error!(error = %e, "sync job task failed");
            }
        }
    }

    /// Queue a `schedule` job for every profile due since the last tick.
    async fn fire_schedules(&mut self, now: DateTime<Utc>) {
        let since = std::mem::replace(&mut self.last_tick, now);

        let profiles = match self.store.list_enabled_profiles(PROFILE_KIND_GIT).await {
            Ok(profiles) => profiles,
            Err(e) => {
                error!(error = %e, "failed to list profiles for schedule evaluation");
                return;
            }
        };

        // Only log an invalid expression the first time it is seen.
        let mut checked = Vec::with_capacity(profiles.len());
        for profile in profiles {
            let Some(expr) = profile.schedule_cron.clone().filter(|e| !e.trim().is_empty()) else {
                continue;
            };
            if parse_schedule(&expr).is_err() {
                if self.reported_invalid.get(&profile.id) != Some(&expr) {
                    self.reported_invalid.insert(profile.id.clone(), expr);
                    checked.push(profile);
                }
                continue;
            }
            self.reported_invalid.remove(&profile.id);
            checked.push(profile);
        }

        for id in due_profiles(&checked, since, now) {
            debug!(profile = %id, "schedule due");
            if let Err(e) = self.jobs_tx.try_send(SyncRequest::new(id.clone(), false, "schedule")) {
                warn!(profile = %id, error = %e, "could not queue scheduled sync");
            }
        }
    }
}
