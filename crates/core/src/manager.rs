//! Profile manager: supervises the live set of adapters.
//!
//! The registry maps profile id to a slot guarded by an async mutex. The slot
//! mutex is the per-profile lock: syncs, content events, imports and
//! connection tests for the same profile run one after the other, while
//! different profiles proceed independently.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::adapter::{AdapterContext, AdapterState, GitAdapter, ProcessReport, SyncOutcome};
use crate::credentials;
use crate::errors::{AdapterError, ManagerError};
use crate::models::{AssetEvent, Direction, PageEvent, Profile, PROFILE_KIND_GIT};
use crate::store::ConfigStore;

type Slot = Arc<Mutex<Option<GitAdapter>>>;

/// Load state of the manager itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerState {
    Unloaded,
    Loading,
    Ready,
}

/// Result of reconciling the live set against the configuration store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReloadReport {
    pub active: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub removed: Vec<String>,
    /// Sync outcomes of adapters (re)built during the reload.
    pub initial_syncs: BTreeMap<String, SyncOutcome>,
}

/// Live view of one registered adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterStatus {
    pub profile_id: String,
    pub name: String,
    pub direction: Direction,
    pub state: AdapterState,
}

pub struct ProfileManager {
    config: Arc<dyn ConfigStore>,
    ctx: AdapterContext,
    kind: String,
    state: StdMutex<ManagerState>,
    adapters: RwLock<BTreeMap<String, Slot>>,
    reload_lock: Mutex<()>,
}

impl ProfileManager {
    pub fn new(config: Arc<dyn ConfigStore>, ctx: AdapterContext) -> Self {
        Self {
            config,
            ctx,
            kind: PROFILE_KIND_GIT.to_string(),
            state: StdMutex::new(ManagerState::Unloaded),
            adapters: RwLock::new(BTreeMap::new()),
            reload_lock: Mutex::new(()),
        }
    }

    pub fn context(&self) -> &AdapterContext {
        &self.ctx
    }

    pub fn state(&self) -> ManagerState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_state(&self, state: ManagerState) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = state;
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == ManagerState::Ready
    }

    async fn slot(&self, id: &str) -> Option<Slot> {
        self.adapters.read().await.get(id).cloned()
    }

    async fn slot_or_insert(&self, id: &str) -> Slot {
        let mut map = self.adapters.write().await;
        map.entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Drop `slot` from the registry if it is still registered and empty.
    async fn discard_if_empty(&self, id: &str, slot: &Slot) {
        let mut map = self.adapters.write().await;
        let Some(current) = map.get(id) else { return };
        if !Arc::ptr_eq(current, slot) {
            return;
        }
        if let Ok(guard) = slot.try_lock() {
            if guard.is_none() {
                drop(guard);
                map.remove(id);
            }
        }
    }

    async fn snapshot(&self) -> Vec<(String, Slot)> {
        self.adapters
            .read()
            .await
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect()
    }

    /// Reuse the live adapter when `profile` is unchanged and its working
    /// copy is initialized, otherwise build and fully initialize a
    /// replacement.
    ///
    /// Returns the outcome of the initial sync when an adapter was built.
    /// On failure the profile is left inactive.
    pub async fn ensure_adapter(&self, profile: Profile) -> Result<Option<SyncOutcome>, ManagerError> {
        let id = profile.id.clone();
        let slot = self.slot_or_insert(&id).await;
        let mut guard = slot.lock().await;

        if let Some(adapter) = guard.as_mut() {
            if adapter.profile() != &profile {
                info!(profile = %id, "profile changed, replacing adapter");
            } else if !adapter.is_initialized() {
                info!(profile = %id, state = %adapter.state(), "adapter not initialized, rebuilding");
            } else {
                debug!(profile = %id, "profile unchanged, reusing adapter");
                adapter.set_direction(profile.direction);
                return Ok(None);
            }
        }

        *guard = None;
        let mut adapter = GitAdapter::new(profile, self.ctx.clone());
        let result = adapter.init(false).await;
        match result {
            Ok(outcome) => {
                *guard = Some(adapter);
                info!(profile = %id, "adapter active");
                Ok(outcome)
            }
            Err(e) => {
                drop(guard);
                self.discard_if_empty(&id, &slot).await;
                Err(e.into())
            }
        }
    }

    /// Reconcile the live set with the enabled profiles in the store.
    ///
    /// Per-profile failures are logged and reported; the reload continues.
    pub async fn reload_profiles(&self) -> Result<ReloadReport, ManagerError> {
        let _reload = self.reload_lock.lock().await;
        if self.state() == ManagerState::Unloaded {
            self.set_state(ManagerState::Loading);
        }

        let profiles = match self.config.list_enabled_profiles(&self.kind).await {
            Ok(profiles) => profiles,
            Err(e) => {
                if self.state() == ManagerState::Loading {
                    self.set_state(ManagerState::Unloaded);
                }
                return Err(e.into());
            }
        };

        info!(count = profiles.len(), "loading git profiles");
        let mut report = ReloadReport::default();
        let wanted: HashSet<String> = profiles.iter().map(|p| p.id.clone()).collect();

        for profile in profiles {
            let id = profile.id.clone();
            let name = profile.name.clone();
            match self.ensure_adapter(profile).await {
                Ok(outcome) => {
                    if let Some(outcome) = outcome {
                        report.initial_syncs.insert(id.clone(), outcome);
                    }
                    report.active.push(id);
                }
                Err(e) => {
                    error!(profile = %id, name = %name, error = %e, "failed to load profile");
                    report.failed.push((id, e.to_string()));
                }
            }
        }

        let stale: Vec<(String, Slot)> = {
            let mut map = self.adapters.write().await;
            let ids: Vec<String> = map
                .keys()
                .filter(|id| !wanted.contains(*id))
                .cloned()
                .collect();
            ids.into_iter()
                .filter_map(|id| map.remove(&id).map(|slot| (id, slot)))
                .collect()
        };

        for (id, slot) in stale {
            let mut guard = slot.lock().await;
            if let Some(adapter) = guard.take() {
                if let Err(e) = adapter.gc().await {
                    debug!(profile = %id, error = %e, "cleanup of removed profile failed");
                }
                info!(profile = %id, "profile no longer active, adapter dropped");
                report.removed.push(id);
            }
        }

        self.set_state(ManagerState::Ready);
        info!(
            active = report.active.len(),
            failed = report.failed.len(),
            removed = report.removed.len(),
            "profiles reloaded"
        );
        Ok(report)
    }

    /// Sync one active profile; with `force`, purge the working copy first.
    ///
    /// A forced sync discards local commits that were never pushed. An
    /// adapter left uninitialized by a failed purge is prepared again first.
    /// The returned outcome covers the purge's initial sync as well.
    pub async fn sync_profile(&self, id: &str, force: bool) -> Result<SyncOutcome, ManagerError> {
        if !self.is_loaded() {
            return Err(ManagerError::NotLoaded);
        }
        let slot = self
            .slot(id)
            .await
            .ok_or_else(|| ManagerError::NotActive(id.to_string()))?;
        let mut guard = slot.lock().await;
        let adapter = guard
            .as_mut()
            .ok_or_else(|| ManagerError::NotActive(id.to_string()))?;

        let direction = adapter.profile().direction;
        adapter.set_direction(direction);

        if force {
            if direction.can_push() {
                match adapter.unpushed_commits().await {
                    Ok(0) => {}
                    Ok(count) => warn!(
                        profile = %id,
                        unpushed = count,
                        "force resync discards local commits not yet pushed"
                    ),
                    Err(e) => debug!(profile = %id, error = %e, "unable to count unpushed commits"),
                }
            }
            info!(profile = %id, "purging working copy for force resync");
            let purged = adapter.purge().await?;
            let outcome = adapter.sync().await?;
            return Ok(match purged {
                Some(purged) => purged.followed_by(outcome),
                None => outcome,
            });
        }

        if !adapter.is_initialized() {
            info!(profile = %id, "working copy not initialized, preparing it again");
            adapter.init(true).await?;
        }
        Ok(adapter.sync().await?)
    }

    /// Sync every active profile that pulls, one after the other.
    pub async fn sync_all_pull_profiles(&self) -> Vec<(String, Result<SyncOutcome, AdapterError>)> {
        let mut results = Vec::new();
        for (id, slot) in self.snapshot().await {
            let mut guard = slot.lock().await;
            let Some(adapter) = guard.as_mut() else { continue };
            if !adapter.direction().can_pull() {
                continue;
            }
            let result = if adapter.is_initialized() {
                adapter.sync().await
            } else {
                match adapter.init(true).await {
                    Ok(_) => adapter.sync().await,
                    Err(e) => Err(e),
                }
            };
            if let Err(e) = &result {
                warn!(profile = %id, error = %e, "scheduled pull failed");
            }
            results.push((id, result));
        }
        results
    }

    /// Fan a page event out to every push-capable adapter.
    ///
    /// Returns the number of adapters that committed the event.
    pub async fn handle_page_event(&self, event: &PageEvent) -> usize {
        if !self.is_loaded() {
            debug!(kind = event.kind(), "manager not loaded, ignoring page event");
            return 0;
        }
        let mut handled = 0;
        for (id, slot) in self.snapshot().await {
            let guard = slot.lock().await;
            let Some(adapter) = guard.as_ref() else { continue };
            if !adapter.direction().can_push() {
                continue;
            }
            match adapter.handle_page_event(event).await {
                Ok(()) => handled += 1,
                Err(e) => {
                    warn!(profile = %id, kind = event.kind(), error = %e, "page event failed")
                }
            }
        }
        handled
    }

    /// Fan an asset event out to every push-capable adapter.
    pub async fn handle_asset_event(&self, event: &AssetEvent) -> usize {
        if !self.is_loaded() {
            debug!(kind = event.kind(), "manager not loaded, ignoring asset event");
            return 0;
        }
        let mut handled = 0;
        for (id, slot) in self.snapshot().await {
            let guard = slot.lock().await;
            let Some(adapter) = guard.as_ref() else { continue };
            if !adapter.direction().can_push() {
                continue;
            }
            match adapter.handle_asset_event(event).await {
                Ok(()) => handled += 1,
                Err(e) => {
                    warn!(profile = %id, kind = event.kind(), error = %e, "asset event failed")
                }
            }
        }
        handled
    }

    /// Initialize `profile` without syncing and check the remote.
    ///
    /// An unchanged profile is tested on its live adapter. An edited one is
    /// tested in a scratch working copy with its own key file, so the live
    /// adapter keeps its remote until the next reload.
    pub async fn test_profile(&self, profile: &Profile) -> Result<(), ManagerError> {
        let slot = self.slot_or_insert(&profile.id).await;
        let result = {
            let mut guard = slot.lock().await;
            match guard.as_mut() {
                Some(live) if live.profile() == profile => live.test_connection().await,
                Some(_) => self.test_in_scratch(profile).await,
                None => {
                    GitAdapter::new(profile.clone(), self.ctx.clone())
                        .test_connection()
                        .await
                }
            }
        };
        self.discard_if_empty(&profile.id, &slot).await;
        Ok(result?)
    }

    async fn test_in_scratch(&self, profile: &Profile) -> Result<(), AdapterError> {
        let mut scratch = profile.clone();
        scratch.id = format!("{}.test", profile.id);
        let work_dir = self.ctx.repo_root.join(&scratch.id);
        scratch.local_path = work_dir.display().to_string();
        debug!(profile = %profile.id, path = %work_dir.display(), "testing edited profile in scratch copy");

        let result = GitAdapter::new(scratch.clone(), self.ctx.clone())
            .test_connection()
            .await;

        if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
            debug!(path = %work_dir.display(), error = %e, "scratch working copy not removed");
        }
        let key = credentials::key_file_path(&self.ctx.secure_dir, &scratch.id);
        match tokio::fs::remove_file(&key).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => debug!(path = %key.display(), error = %e, "scratch key file not removed"),
        }
        result
    }

    pub async fn import_all(&self, id: &str) -> Result<ProcessReport, ManagerError> {
        let slot = self
            .slot(id)
            .await
            .ok_or_else(|| ManagerError::NotActive(id.to_string()))?;
        let guard = slot.lock().await;
        let adapter = guard
            .as_ref()
            .ok_or_else(|| ManagerError::NotActive(id.to_string()))?;
        Ok(adapter.import_all().await?)
    }

    pub async fn sync_untracked(&self, id: &str) -> Result<usize, ManagerError> {
        let slot = self
            .slot(id)
            .await
            .ok_or_else(|| ManagerError::NotActive(id.to_string()))?;
        let guard = slot.lock().await;
        let adapter = guard
            .as_ref()
            .ok_or_else(|| ManagerError::NotActive(id.to_string()))?;
        Ok(adapter.sync_untracked().await?)
    }

    pub async fn is_active(&self, id: &str) -> bool {
        match self.slot(id).await {
            Some(slot) => match slot.try_lock() {
                Ok(guard) => guard.is_some(),
                Err(_) => true,
            },
            None => false,
        }
    }

    /// Registered adapters; a busy adapter is reported as syncing.
    pub async fn statuses(&self) -> Vec<AdapterStatus> {
        let mut out = Vec::new();
        for (id, slot) in self.snapshot().await {
            match slot.try_lock() {
                Ok(guard) => {
                    if let Some(adapter) = guard.as_ref() {
                        out.push(AdapterStatus {
                            profile_id: id,
                            name: adapter.profile().name.clone(),
                            direction: adapter.direction(),
                            state: adapter.state(),
                        });
                    }
                }
                Err(_) => out.push(AdapterStatus {
                    profile_id: id,
                    name: String::new(),
                    direction: Direction::default(),
                    state: AdapterState::Syncing,
                }),
            }
        }
        out
    }
}
