//! Git adapter: drives one profile's working copy.
//!
//! An adapter owns exactly one working-copy directory. It configures the
//! remote from the profile's credentials, pulls and pushes according to the
//! profile direction, turns pulled file changes into content-store mutations
//! and commits content-store events back into the working copy.
//!
//! Lifecycle: `Uninitialized -> Initializing -> Ready <-> Syncing`, with
//! `Failed` reachable from initialization or sync. A failed sync keeps the
//! working copy usable; the next sync retries from there.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::content::{
    asset_hash, page_location, render_page_file, ContentType, Namespacing,
};
use crate::credentials::{self, ResolvedAuth};
use crate::errors::{AdapterError, StoreError};
use crate::git::{DiffEntry, DiffStats, GitClient, GitIdentity};
use crate::models::{
    Asset, AssetEvent, AssetMove, AssetRef, Direction, Page, PageEvent, PageMove, Profile, User,
};
use crate::store::ContentStore;

/// Name of the single remote every working copy is configured with.
pub const REMOTE: &str = "origin";

/// Injected dependencies shared by every adapter.
#[derive(Clone)]
pub struct AdapterContext {
    pub content: Arc<dyn ContentStore>,
    pub namespacing: Namespacing,
    /// Directory for materialized ssh keys.
    pub secure_dir: PathBuf,
    /// Parent of working copies for profiles without an explicit local path.
    pub repo_root: PathBuf,
    /// Identity used when a profile configures none.
    pub default_identity: GitIdentity,
    /// Add working copies to git's global `safe.directory` list.
    pub mark_safe_directory: bool,
}

/// Adapter lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterState {
    Uninitialized,
    Initializing,
    Ready,
    Syncing,
    Failed,
}

impl std::fmt::Display for AdapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Syncing => "syncing",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Result of one `sync()` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub branch: String,
    pub commit_before: Option<String>,
    pub commit_after: Option<String>,
    pub files_changed: usize,
    pub files_failed: usize,
    pub pulled: bool,
    pub pushed: bool,
}

impl SyncOutcome {
    /// Combine with the pass that ran after this one. The commit range spans
    /// both passes and the file counts add up.
    pub fn followed_by(self, later: SyncOutcome) -> SyncOutcome {
        SyncOutcome {
            branch: if later.branch.is_empty() { self.branch } else { later.branch },
            commit_before: self.commit_before.or(later.commit_before),
            commit_after: later.commit_after.or(self.commit_after),
            files_changed: self.files_changed + later.files_changed,
            files_failed: self.files_failed + later.files_failed,
            pulled: self.pulled || later.pulled,
            pushed: self.pushed || later.pushed,
        }
    }
}

/// Counts from processing a batch of changed files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    pub processed: usize,
    pub failed: usize,
}

/// One changed file, resolved against the working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub old_path: String,
    pub new_path: String,
    pub stats: DiffStats,
    pub file_path: PathBuf,
    /// File size, `None` when the file no longer exists.
    pub size: Option<u64>,
    /// Set for full imports, which have no previous commit to compare to.
    pub import_all: bool,
}

impl ChangeRecord {
    pub fn exists(&self) -> bool {
        self.size.is_some()
    }

    pub fn is_rename(&self) -> bool {
        self.old_path != self.new_path
    }
}

/// Working copy location for `profile`.
pub fn working_copy_path(profile: &Profile, repo_root: &Path) -> PathBuf {
    let configured = profile.local_path.trim();
    if configured.is_empty() {
        repo_root.join(&profile.id)
    } else {
        PathBuf::from(configured)
    }
}

/// The live object driving one profile's working copy.
pub struct GitAdapter {
    profile: Profile,
    ctx: AdapterContext,
    git: GitClient,
    work_dir: PathBuf,
    direction: Direction,
    state: AdapterState,
    initialized: bool,
}

impl GitAdapter {
    pub fn new(profile: Profile, ctx: AdapterContext) -> Self {
        let work_dir = working_copy_path(&profile, &ctx.repo_root);
        let git = GitClient::new(profile.git_binary_path.as_deref(), &work_dir);
        Self {
            direction: profile.direction,
            profile,
            ctx,
            git,
            work_dir,
            state: AdapterState::Uninitialized,
            initialized: false,
        }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn state(&self) -> AdapterState {
        self.state
    }

    /// Whether the working copy has been prepared since the last purge.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Refresh the direction-derived sync mode.
    pub fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    /// Working-copy path of an asset.
    pub fn local_location(&self, asset_path: &str) -> PathBuf {
        self.work_dir.join(asset_path)
    }

    /// Identity written to the working copy's local git config.
    pub fn local_identity(&self) -> GitIdentity {
        let pick = |a: &Option<String>, b: &Option<String>, fallback: &str| {
            [a, b]
                .into_iter()
                .flatten()
                .map(|v| v.trim())
                .find(|v| !v.is_empty())
                .unwrap_or(fallback)
                .to_string()
        };
        GitIdentity::new(
            pick(
                &self.profile.committer_name,
                &self.profile.default_author_name,
                &self.ctx.default_identity.name,
            ),
            pick(
                &self.profile.committer_email,
                &self.profile.default_author_email,
                &self.ctx.default_identity.email,
            ),
        )
    }

    fn author_or_default(&self, name: &str, email: &str) -> GitIdentity {
        if name.trim().is_empty() || email.trim().is_empty() {
            self.local_identity()
        } else {
            GitIdentity::new(name, email)
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Prepare the working copy and, unless `skip_sync`, run one sync.
    #[instrument(skip(self), fields(profile = %self.profile.id))]
    pub async fn init(&mut self, skip_sync: bool) -> Result<Option<SyncOutcome>, AdapterError> {
        info!(path = %self.work_dir.display(), "initializing working copy");
        self.state = AdapterState::Initializing;

        if let Err(e) = self.prepare().await {
            warn!(error = %e, "initialization failed");
            self.state = AdapterState::Failed;
            return Err(e);
        }
        self.initialized = true;
        self.state = AdapterState::Ready;
        info!("initialization completed");

        if skip_sync {
            return Ok(None);
        }
        self.sync().await.map(Some)
    }

    async fn prepare(&mut self) -> Result<(), AdapterError> {
        tokio::fs::create_dir_all(&self.work_dir).await?;

        if !self.git.is_repository() {
            info!("creating local repository");
            self.git.init().await?;
        }

        let identity = self.local_identity();
        self.git.set_config("core.quotepath", "false").await?;
        self.git.set_config("color.ui", "false").await?;
        self.git.set_config("user.email", &identity.email).await?;
        self.git.set_config("user.name", &identity.name).await?;

        self.configure_remote().await?;

        info!("fetching updates from remote");
        self.git.remote_update(REMOTE).await?;

        let branch = self.profile.branch.clone();
        if !self.git.branch_exists(REMOTE, &branch)? {
            return Err(AdapterError::InvalidBranch(branch));
        }
        self.git.checkout(&branch).await?;

        if self.ctx.mark_safe_directory {
            if let Err(e) = self.git.mark_safe_directory().await {
                warn!(error = %e, "unable to mark working copy as safe directory");
            }
        }
        Ok(())
    }

    async fn configure_remote(&self) -> Result<(), AdapterError> {
        let verify = if self.profile.verify_ssl { "true" } else { "false" };
        self.git.set_config("http.sslVerify", verify).await?;

        for remote in self.git.remotes().await? {
            self.git.remove_remote(&remote).await?;
        }

        let auth = credentials::resolve(&self.profile, &self.ctx.secure_dir).await?;
        if let ResolvedAuth::Ssh { key_path, .. } = &auth {
            let strict = if self.profile.verify_ssl { "yes" } else { "no" };
            let ssh_command = format!(
                "ssh -o IdentitiesOnly=yes -o StrictHostKeyChecking={} -i {}",
                strict,
                key_path.display()
            );
            self.git.set_config("core.sshCommand", &ssh_command).await?;
        }
        self.git.add_remote(REMOTE, auth.remote_url()).await?;
        debug!(auth = ?auth, "configured remote");
        Ok(())
    }

    /// Pull and/or push per direction, then apply pulled changes to the store.
    #[instrument(skip(self), fields(profile = %self.profile.id))]
    pub async fn sync(&mut self) -> Result<SyncOutcome, AdapterError> {
        if !self.initialized || self.state == AdapterState::Initializing {
            return Err(AdapterError::InvalidState {
                state: self.state.to_string(),
                expected: "ready",
            });
        }

        self.state = AdapterState::Syncing;
        match self.sync_inner().await {
            Ok(outcome) => {
                self.state = AdapterState::Ready;
                Ok(outcome)
            }
            Err(e) => {
                warn!(error = %e, "sync failed");
                self.state = AdapterState::Failed;
                Err(e)
            }
        }
    }

    async fn sync_inner(&mut self) -> Result<SyncOutcome, AdapterError> {
        let branch = self.profile.branch.clone();
        let before = self.git.branch_tip(&branch)?;
        let user = self.ctx.content.get_root_user().await?;

        let mut outcome = SyncOutcome {
            branch: branch.clone(),
            commit_before: before.clone(),
            ..SyncOutcome::default()
        };

        if self.direction.can_pull() {
            info!(branch = %branch, "performing pull rebase from origin");
            self.git.pull_rebase(REMOTE, &branch).await?;
            outcome.pulled = true;
        }

        if self.direction.can_push() {
            let force = self.direction == Direction::PushOnly;
            info!(branch = %branch, force, "performing push to origin");
            self.git.push(REMOTE, &branch, force).await?;
            outcome.pushed = true;
        }

        let after = self.git.branch_tip(&branch)?;
        outcome.commit_after = after.clone();

        if outcome.pulled {
            if let (Some(from), Some(to)) = (before.as_deref(), after.as_deref()) {
                if from != to {
                    let entries = self.git.diff_numstat(from, to).await?;
                    let changes = self.resolve_changes(entries).await;
                    outcome.files_changed = changes.len();
                    let report = self.process_files(&changes, &user).await;
                    outcome.files_failed = report.failed;
                }
            }
        }

        info!(
            branch = %outcome.branch,
            files_changed = outcome.files_changed,
            files_failed = outcome.files_failed,
            "sync completed"
        );
        Ok(outcome)
    }

    async fn resolve_changes(&self, entries: Vec<DiffEntry>) -> Vec<ChangeRecord> {
        let mut changes = Vec::with_capacity(entries.len());
        for entry in entries {
            let file_path = self.work_dir.join(&entry.new_path);
            let size = match tokio::fs::metadata(&file_path).await {
                Ok(meta) => Some(meta.len()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => {
                    warn!(path = %entry.new_path, error = %e, "failed to access file, skipping");
                    continue;
                }
            };
            changes.push(ChangeRecord {
                old_path: entry.old_path,
                new_path: entry.new_path,
                stats: entry.stats,
                file_path,
                size,
                import_all: false,
            });
        }
        changes
    }

    // -----------------------------------------------------------------------
    // Change processing
    // -----------------------------------------------------------------------

    /// Apply file changes to the content store.
    ///
    /// Per-file failures are logged and counted; the batch always completes.
    pub async fn process_files(&self, changes: &[ChangeRecord], user: &User) -> ProcessReport {
        let mut report = ProcessReport::default();
        for change in changes {
            let content_type = match change.stats {
                DiffStats::Binary => None,
                DiffStats::Text { .. } => ContentType::from_path(&change.new_path),
            };
            let result = match content_type {
                Some(ct) => self.process_page(change, ct, user).await,
                None => self.process_asset(change, user).await,
            };
            match result {
                Ok(()) => report.processed += 1,
                Err(e) => {
                    warn!(path = %change.new_path, error = %e, "failed to process file");
                    report.failed += 1;
                }
            }
        }
        report
    }

    async fn process_page(
        &self,
        change: &ChangeRecord,
        content_type: ContentType,
        user: &User,
    ) -> Result<(), StoreError> {
        let store = &self.ctx.content;
        let default_locale = &self.ctx.namespacing.default_locale;

        if change.exists() && !change.import_all && change.is_rename() {
            let from = page_location(&change.old_path, default_locale);
            let to = page_location(&change.new_path, default_locale);
            info!(from = %change.old_path, to = %change.new_path, "page marked as renamed");
            match store
                .move_page(user, &from.path, &to.path, &from.locale, &to.locale)
                .await
            {
                Ok(()) if change.stats.is_unchanged_content() => return Ok(()),
                Ok(()) => {}
                Err(StoreError::NotFound { .. }) => {
                    info!(path = %change.old_path, "renamed page not in store, importing");
                }
                Err(e) => return Err(e),
            }
        } else if !change.exists() && !change.import_all && change.stats.is_pure_deletion() {
            let location = page_location(&change.new_path, default_locale);
            info!(path = %change.new_path, "page marked as deleted");
            return store.delete_page(user, &location.path, &location.locale).await;
        }

        store
            .upsert_page_from_file(user, &change.new_path, &change.file_path, content_type)
            .await
    }

    async fn process_asset(&self, change: &ChangeRecord, user: &User) -> Result<(), StoreError> {
        let store = &self.ctx.content;
        let is_binary = matches!(change.stats, DiffStats::Binary);

        if change.exists()
            && !change.import_all
            && change.is_rename()
            && (is_binary || change.stats.is_unchanged_content())
        {
            info!(from = %change.old_path, to = %change.new_path, "asset marked as renamed");
            match store.find_asset_by_hash(&asset_hash(&change.old_path)).await? {
                Some(asset) => {
                    store.rename_asset(asset.id, &change.new_path).await?;
                    store.invalidate_asset_cache(&asset.hash).await?;
                    if change.stats.is_unchanged_content() {
                        return Ok(());
                    }
                }
                None => info!(path = %change.old_path, "renamed asset not in store, importing"),
            }
        } else if !change.exists()
            && !change.import_all
            && (is_binary || change.stats.is_pure_deletion())
        {
            info!(path = %change.new_path, "asset marked as deleted");
            match store.find_asset_by_hash(&asset_hash(&change.new_path)).await? {
                Some(asset) => {
                    store.delete_asset(asset.id).await?;
                    store.invalidate_asset_cache(&asset.hash).await?;
                }
                None => info!(path = %change.new_path, "asset not in store, nothing to delete"),
            }
            return Ok(());
        }

        store
            .upsert_asset_from_file(user, &change.new_path, &change.file_path)
            .await
    }

    // -----------------------------------------------------------------------
    // Content events
    // -----------------------------------------------------------------------

    fn ensure_working_copy(&self) -> Result<(), AdapterError> {
        if self.initialized {
            Ok(())
        } else {
            Err(AdapterError::InvalidState {
                state: self.state.to_string(),
                expected: "initialized working copy",
            })
        }
    }

    fn page_file_name(&self, path: &str, locale: &str, content_type: ContentType) -> String {
        self.ctx
            .namespacing
            .page_file_name(path, locale, content_type, self.profile.always_namespace)
    }

    async fn write_file(&self, rel_path: &str, data: &[u8]) -> Result<(), AdapterError> {
        let full = self.local_location(rel_path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, data).await?;
        Ok(())
    }

    /// Commit a content-store page event.
    pub async fn handle_page_event(&self, event: &PageEvent) -> Result<(), AdapterError> {
        match event {
            PageEvent::Created(page) => self.page_written(page, "create").await,
            PageEvent::Updated(page) => self.page_written(page, "update").await,
            PageEvent::Deleted(page) => self.page_deleted(page).await,
            PageEvent::Renamed(mv) => self.page_renamed(mv).await,
        }
    }

    /// Commit a content-store asset event.
    pub async fn handle_asset_event(&self, event: &AssetEvent) -> Result<(), AdapterError> {
        match event {
            AssetEvent::Uploaded(asset) => self.asset_uploaded(asset).await,
            AssetEvent::Deleted(asset) => self.asset_deleted(asset).await,
            AssetEvent::Renamed(mv) => self.asset_renamed(mv).await,
        }
    }

    #[instrument(skip(self, page), fields(profile = %self.profile.id, path = %page.path))]
    async fn page_written(&self, page: &Page, verb: &str) -> Result<(), AdapterError> {
        self.ensure_working_copy()?;
        let file_name = self.page_file_name(&page.path, &page.locale, page.content_type);
        info!(locale = %page.locale, file = %file_name, "committing {} of page", verb);
        self.write_file(&file_name, render_page_file(page).as_bytes())
            .await?;

        if self.git.is_ignored(&file_name).await? {
            debug!(file = %file_name, "path is ignored, not committing");
            return Ok(());
        }
        let author = self.author_or_default(&page.author_name, &page.author_email);
        self.git.add(&[&file_name]).await?;
        self.git
            .commit(&format!("docs: {} {}", verb, page.path), &author, &[&file_name])
            .await?;
        Ok(())
    }

    #[instrument(skip(self, page), fields(profile = %self.profile.id, path = %page.path))]
    async fn page_deleted(&self, page: &Page) -> Result<(), AdapterError> {
        self.ensure_working_copy()?;
        let file_name = self.page_file_name(&page.path, &page.locale, page.content_type);
        info!(locale = %page.locale, file = %file_name, "committing removed page");

        if self.git.is_ignored(&file_name).await? {
            debug!(file = %file_name, "path is ignored, not committing");
            return Ok(());
        }
        let author = self.author_or_default(&page.author_name, &page.author_email);
        self.git.rm(&file_name).await?;
        self.git
            .commit(&format!("docs: delete {}", page.path), &author, &[&file_name])
            .await?;
        Ok(())
    }

    #[instrument(skip(self, mv), fields(profile = %self.profile.id, path = %mv.page.path))]
    async fn page_renamed(&self, mv: &PageMove) -> Result<(), AdapterError> {
        self.ensure_working_copy()?;
        let page = &mv.page;
        let source = self.page_file_name(&page.path, &page.locale, page.content_type);
        let destination =
            self.page_file_name(&mv.destination_path, &mv.destination_locale, page.content_type);
        info!(from = %source, to = %destination, "committing page move");

        let destination_full = self.work_dir.join(&destination);
        if let Some(parent) = destination_full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(self.work_dir.join(&source), &destination_full).await?;

        let author = self.author_or_default(&mv.move_author_name, &mv.move_author_email);
        self.git.rm(&source).await?;
        self.git.add(&[&destination]).await?;
        self.git
            .commit(
                &format!("docs: rename {} to {}", page.path, mv.destination_path),
                &author,
                &[&source, &destination],
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self, asset), fields(profile = %self.profile.id, path = %asset.path))]
    async fn asset_uploaded(&self, asset: &Asset) -> Result<(), AdapterError> {
        self.ensure_working_copy()?;
        info!("committing new asset");
        self.write_file(&asset.path, &asset.data).await?;

        if self.git.is_ignored(&asset.path).await? {
            debug!("path is ignored, not committing");
            return Ok(());
        }
        let author = self.author_or_default(&asset.author_name, &asset.author_email);
        self.git.add(&[&asset.path]).await?;
        self.git
            .commit(&format!("docs: upload {}", asset.path), &author, &[&asset.path])
            .await?;
        Ok(())
    }

    #[instrument(skip(self, asset), fields(profile = %self.profile.id, path = %asset.path))]
    async fn asset_deleted(&self, asset: &AssetRef) -> Result<(), AdapterError> {
        self.ensure_working_copy()?;
        info!("committing removed asset");
        let author = self.author_or_default(&asset.author_name, &asset.author_email);
        self.git.rm(&asset.path).await?;
        self.git
            .commit(&format!("docs: delete {}", asset.path), &author, &[&asset.path])
            .await?;
        Ok(())
    }

    #[instrument(skip(self, mv), fields(profile = %self.profile.id, path = %mv.path))]
    async fn asset_renamed(&self, mv: &AssetMove) -> Result<(), AdapterError> {
        self.ensure_working_copy()?;
        info!(to = %mv.destination_path, "committing asset move");
        if let Some(parent) = self.local_location(&mv.destination_path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let author = self.author_or_default(&mv.move_author_name, &mv.move_author_email);
        self.git.mv(&mv.path, &mv.destination_path).await?;
        self.git
            .commit(
                &format!("docs: rename {} to {}", mv.path, mv.destination_path),
                &author,
                &[&mv.path, &mv.destination_path],
            )
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Bulk operations
    // -----------------------------------------------------------------------

    /// Import every file of the working copy into the content store.
    #[instrument(skip(self), fields(profile = %self.profile.id))]
    pub async fn import_all(&self) -> Result<ProcessReport, AdapterError> {
        self.ensure_working_copy()?;
        info!("importing all content from working copy");
        let user = self.ctx.content.get_root_user().await?;

        let root = self.work_dir.clone();
        let files = tokio::task::spawn_blocking(move || collect_import_files(&root))
            .await
            .map_err(|e| AdapterError::IoError(std::io::Error::other(e)))?;

        let changes: Vec<ChangeRecord> = files
            .into_iter()
            .map(|(rel_path, file_path, size)| ChangeRecord {
                old_path: rel_path.clone(),
                new_path: rel_path,
                stats: DiffStats::Text {
                    insertions: 0,
                    deletions: 0,
                },
                file_path,
                size: Some(size),
                import_all: true,
            })
            .collect();

        let report = self.process_files(&changes, &user).await;
        self.ctx.content.clear_folder_cache().await?;
        info!(
            processed = report.processed,
            failed = report.failed,
            "import completed"
        );
        Ok(report)
    }

    /// Write every non-private page and every asset into the working copy
    /// and commit them together. Returns the number of files written.
    #[instrument(skip(self), fields(profile = %self.profile.id))]
    pub async fn sync_untracked(&self) -> Result<usize, AdapterError> {
        self.ensure_working_copy()?;
        info!("adding all untracked content");
        let mut written = 0;

        for page in self.ctx.content.list_all_pages().await? {
            let file_name = self.page_file_name(&page.path, &page.locale, page.content_type);
            debug!(file = %file_name, "adding page");
            self.write_file(&file_name, render_page_file(&page).as_bytes())
                .await?;
            self.git.add(&[&file_name]).await?;
            written += 1;
        }

        for asset in self.ctx.content.list_all_assets().await? {
            debug!(file = %asset.path, "adding asset");
            self.write_file(&asset.path, &asset.data).await?;
            self.git.add(&[&asset.path]).await?;
            written += 1;
        }

        let identity = self.local_identity();
        self.git
            .commit("docs: add all untracked content", &identity, &[])
            .await?;
        info!(files = written, "all content is now tracked");
        Ok(written)
    }

    /// Empty the working copy and reinitialize it with a full sync.
    ///
    /// Local commits that were never pushed are lost.
    #[instrument(skip(self), fields(profile = %self.profile.id))]
    pub async fn purge(&mut self) -> Result<Option<SyncOutcome>, AdapterError> {
        info!(path = %self.work_dir.display(), "purging working copy");
        self.initialized = false;
        self.state = AdapterState::Uninitialized;
        empty_dir(&self.work_dir).await?;
        info!("working copy is now empty, reinitializing");
        self.init(false).await
    }

    /// Initialize without syncing, then check the remote is reachable.
    #[instrument(skip(self), fields(profile = %self.profile.id))]
    pub async fn test_connection(&mut self) -> Result<(), AdapterError> {
        self.init(true).await?;
        self.git.remote_update(REMOTE).await?;
        info!("connection test succeeded");
        Ok(())
    }

    /// Garbage-collect the working copy.
    pub async fn gc(&self) -> Result<(), AdapterError> {
        if !self.git.is_repository() {
            return Ok(());
        }
        self.git.gc().await?;
        Ok(())
    }

    /// Local commits on the tracked branch not yet on the remote.
    pub async fn unpushed_commits(&self) -> Result<u64, AdapterError> {
        Ok(self
            .git
            .unpushed_count(REMOTE, &self.profile.branch)
            .await?)
    }
}

/// Files eligible for a full import: non-empty, outside git metadata, with a
/// relative path longer than three characters.
fn collect_import_files(root: &Path) -> Vec<(String, PathBuf, u64)> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !e.file_name().to_string_lossy().starts_with(".git"))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "failed to read working copy entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let size = entry.metadata().ok()?.len();
            let rel = entry.path().strip_prefix(root).ok()?;
            let rel_path = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            (size >= 1 && rel_path.len() > 3).then(|| (rel_path, entry.path().to_path_buf(), size))
        })
        .collect()
}

async fn empty_dir(dir: &Path) -> std::io::Result<()> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(entry.path()).await?;
        } else {
            tokio::fs::remove_file(entry.path()).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, SqliteContentStore};

    fn context(root: &Path) -> (AdapterContext, Arc<SqliteContentStore>) {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        let store = Arc::new(SqliteContentStore::new(Arc::new(db), Namespacing::default()));
        let ctx = AdapterContext {
            content: store.clone(),
            namespacing: Namespacing::default(),
            secure_dir: root.join("secure"),
            repo_root: root.join("repo"),
            default_identity: GitIdentity::new("wikisync", "wiki@example.com"),
            mark_safe_directory: false,
        };
        (ctx, store)
    }

    fn record(old: &str, new: &str, stats: DiffStats, size: Option<u64>, dir: &Path) -> ChangeRecord {
        ChangeRecord {
            old_path: old.into(),
            new_path: new.into(),
            stats,
            file_path: dir.join(new),
            size,
            import_all: false,
        }
    }

    #[test]
    fn test_working_copy_path() {
        let mut p = Profile::new("docs", "file:///tmp/x.git");
        assert_eq!(
            working_copy_path(&p, Path::new("/data/repo")),
            Path::new("/data/repo").join(&p.id)
        );
        p.local_path = "/srv/wiki".into();
        assert_eq!(working_copy_path(&p, Path::new("/data/repo")), PathBuf::from("/srv/wiki"));
    }

    #[test]
    fn test_outcomes_combine_into_one_range() {
        let init = SyncOutcome {
            branch: "main".into(),
            commit_before: Some("aaa".into()),
            commit_after: Some("bbb".into()),
            files_changed: 2,
            files_failed: 1,
            pulled: true,
            pushed: false,
        };
        let noop = SyncOutcome {
            branch: "main".into(),
            commit_before: Some("bbb".into()),
            commit_after: Some("bbb".into()),
            files_changed: 0,
            files_failed: 0,
            pulled: true,
            pushed: true,
        };

        let combined = init.followed_by(noop);
        assert_eq!(combined.commit_before.as_deref(), Some("aaa"));
        assert_eq!(combined.commit_after.as_deref(), Some("bbb"));
        assert_eq!(combined.files_changed, 2);
        assert_eq!(combined.files_failed, 1);
        assert!(combined.pulled && combined.pushed);

        let empty_start = SyncOutcome {
            commit_after: Some("ccc".into()),
            ..SyncOutcome::default()
        };
        let combined = empty_start.followed_by(SyncOutcome {
            branch: "main".into(),
            ..SyncOutcome::default()
        });
        assert_eq!(combined.branch, "main");
        assert_eq!(combined.commit_after.as_deref(), Some("ccc"));
    }

    #[test]
    fn test_local_identity_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = context(dir.path());
        let mut p = Profile::new("docs", "file:///tmp/x.git");
        let adapter = GitAdapter::new(p.clone(), ctx.clone());
        assert_eq!(adapter.local_identity().name, "wikisync");

        p.default_author_name = Some("Author".into());
        p.committer_email = Some("committer@example.com".into());
        let adapter = GitAdapter::new(p, ctx);
        let id = adapter.local_identity();
        assert_eq!(id.name, "Author");
        assert_eq!(id.email, "committer@example.com");
    }

    #[tokio::test]
    async fn test_sync_before_init_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = context(dir.path());
        let mut adapter = GitAdapter::new(Profile::new("docs", "file:///tmp/x.git"), ctx);
        let err = adapter.sync().await.unwrap_err();
        assert!(matches!(err, AdapterError::InvalidState { .. }));
        assert_eq!(adapter.state(), AdapterState::Uninitialized);
        assert!(!adapter.is_initialized());
    }

    #[tokio::test]
    async fn test_pure_deletion_classified_as_delete() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, store) = context(dir.path());
        let user = store.get_root_user().await.unwrap();
        let wc = dir.path().join("wc");
        std::fs::create_dir_all(&wc).unwrap();
        std::fs::write(wc.join("gone.md"), "hello").unwrap();
        store
            .upsert_page_from_file(&user, "gone.md", &wc.join("gone.md"), ContentType::Markdown)
            .await
            .unwrap();
        std::fs::remove_file(wc.join("gone.md")).unwrap();

        let adapter = GitAdapter::new(Profile::new("docs", "file:///tmp/x.git"), ctx);
        let change = record(
            "gone.md",
            "gone.md",
            DiffStats::Text {
                insertions: 0,
                deletions: 5,
            },
            None,
            &wc,
        );
        let report = adapter.process_files(&[change], &user).await;
        assert_eq!(report, ProcessReport { processed: 1, failed: 0 });
        assert!(store.get_page("gone", "en").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_page_rename_moves_existing_page() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, store) = context(dir.path());
        let user = store.get_root_user().await.unwrap();
        let wc = dir.path().join("wc");
        std::fs::create_dir_all(wc.join("docs")).unwrap();
        std::fs::write(wc.join("docs/new-name.md"), "same").unwrap();
        store
            .upsert_page_from_file(
                &user,
                "docs/old-name.md",
                &wc.join("docs/new-name.md"),
                ContentType::Markdown,
            )
            .await
            .unwrap();

        let adapter = GitAdapter::new(Profile::new("docs", "file:///tmp/x.git"), ctx);
        let change = record(
            "docs/old-name.md",
            "docs/new-name.md",
            DiffStats::Text {
                insertions: 0,
                deletions: 0,
            },
            Some(4),
            &wc,
        );
        let report = adapter.process_files(&[change], &user).await;
        assert_eq!(report.failed, 0);
        assert!(store.get_page("docs/old-name", "en").unwrap().is_none());
        assert!(store.get_page("docs/new-name", "en").unwrap().is_some());
        assert_eq!(store.list_all_pages().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_asset_rename_looks_up_old_hash() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, store) = context(dir.path());
        let user = store.get_root_user().await.unwrap();
        let wc = dir.path().join("wc");
        std::fs::create_dir_all(wc.join("img")).unwrap();
        std::fs::write(wc.join("img/b.png"), [9u8, 9]).unwrap();
        store
            .upsert_asset_from_file(&user, "img/a.png", &wc.join("img/b.png"))
            .await
            .unwrap();

        let adapter = GitAdapter::new(Profile::new("docs", "file:///tmp/x.git"), ctx);
        let change = record(
            "img/a.png",
            "img/b.png",
            DiffStats::Text {
                insertions: 0,
                deletions: 0,
            },
            Some(2),
            &wc,
        );
        adapter.process_files(&[change], &user).await;
        assert!(store.get_asset("img/a.png").unwrap().is_none());
        assert_eq!(store.get_asset("img/b.png").unwrap().unwrap().data, vec![9, 9]);
    }

    #[tokio::test]
    async fn test_binary_asset_deletion() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, store) = context(dir.path());
        let user = store.get_root_user().await.unwrap();
        let wc = dir.path().join("wc");
        std::fs::create_dir_all(&wc).unwrap();
        std::fs::write(wc.join("logo.png"), [1u8]).unwrap();
        store
            .upsert_asset_from_file(&user, "logo.png", &wc.join("logo.png"))
            .await
            .unwrap();
        std::fs::remove_file(wc.join("logo.png")).unwrap();

        let adapter = GitAdapter::new(Profile::new("docs", "file:///tmp/x.git"), ctx);
        let change = record("logo.png", "logo.png", DiffStats::Binary, None, &wc);
        let report = adapter.process_files(&[change], &user).await;
        assert_eq!(report.failed, 0);
        assert!(store.list_all_assets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_per_file_failure_does_not_abort_batch() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, store) = context(dir.path());
        let user = store.get_root_user().await.unwrap();
        let wc = dir.path().join("wc");
        std::fs::create_dir_all(&wc).unwrap();
        std::fs::write(wc.join("ok.md"), "fine").unwrap();

        let adapter = GitAdapter::new(Profile::new("docs", "file:///tmp/x.git"), ctx);
        let text = DiffStats::Text {
            insertions: 1,
            deletions: 0,
        };
        let changes = vec![
            record("missing.md", "missing.md", text, Some(3), &wc),
            record("ok.md", "ok.md", text, Some(4), &wc),
        ];
        let report = adapter.process_files(&changes, &user).await;
        assert_eq!(report, ProcessReport { processed: 1, failed: 1 });
        assert!(store.get_page("ok", "en").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_hooks_require_initialized_working_copy() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = context(dir.path());
        let adapter = GitAdapter::new(Profile::new("docs", "file:///tmp/x.git"), ctx);
        let event = AssetEvent::Deleted(AssetRef {
            path: "a.png".into(),
            author_name: "A".into(),
            author_email: "a@example.com".into(),
        });
        assert!(matches!(
            adapter.handle_asset_event(&event).await,
            Err(AdapterError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_collect_import_files_filters() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join(".git/objects")).unwrap();
        std::fs::create_dir_all(root.join("docs")).unwrap();
        std::fs::write(root.join(".git/HEAD"), "ref").unwrap();
        std::fs::write(root.join(".gitignore"), "x").unwrap();
        std::fs::write(root.join("docs/a.md"), "a").unwrap();
        std::fs::write(root.join("docs/empty.md"), "").unwrap();
        std::fs::write(root.join("a.b"), "x").unwrap();

        let mut files: Vec<String> = collect_import_files(root)
            .into_iter()
            .map(|(rel, _, _)| rel)
            .collect();
        files.sort();
        assert_eq!(files, vec!["docs/a.md"]);
    }
}
