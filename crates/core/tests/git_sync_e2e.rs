//! End-to-end tests for git profile synchronization.
//!
//! These tests exercise the real adapter and profile manager with:
//! - A local bare "origin" repository (file:// URLs, no network)
//! - An "upstream" clone standing in for other contributors
//! - Real SQLite configuration and content stores
//!
//! Tests skip gracefully if `git` is not installed.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Notify;

use wikisync_core::adapter::{AdapterContext, AdapterState, GitAdapter};
use wikisync_core::content::{ContentType, Namespacing};
use wikisync_core::db::{Database, SqliteContentStore};
use wikisync_core::errors::{AdapterError, StoreError};
use wikisync_core::git::GitIdentity;
use wikisync_core::manager::ProfileManager;
use wikisync_core::models::{
    Asset, AssetRecord, Direction, Page, PageEvent, Profile, RunStatus, User,
};
use wikisync_core::runner::{run_profile_sync, SyncRequest};
use wikisync_core::store::{ConfigStore, ContentStore};

// ===========================================================================
// Helpers
// ===========================================================================

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

struct Fixture {
    tmp: TempDir,
    origin_url: String,
    upstream: PathBuf,
    db: Arc<Database>,
    store: Arc<SqliteContentStore>,
    ctx: AdapterContext,
}

/// Bare origin seeded with `home.md` on `main`, plus an upstream clone.
fn setup() -> Fixture {
    let tmp = TempDir::new().unwrap();
    let bare = tmp.path().join("origin.git");
    git(tmp.path(), &["init", "--bare", bare.to_str().unwrap()]);

    let upstream = tmp.path().join("upstream");
    git(
        tmp.path(),
        &["clone", bare.to_str().unwrap(), upstream.to_str().unwrap()],
    );
    git(&upstream, &["checkout", "-b", "main"]);
    git(&upstream, &["config", "user.name", "Upstream Dev"]);
    git(&upstream, &["config", "user.email", "dev@example.com"]);
    std::fs::write(upstream.join("home.md"), "# Welcome\n\nFirst page.\n").unwrap();
    git(&upstream, &["add", "-A"]);
    git(&upstream, &["commit", "-m", "initial commit"]);
    git(&upstream, &["push", "origin", "main"]);

    let db = Arc::new(Database::new(tmp.path().join("data/wikisync.db")).unwrap());
    db.initialize().unwrap();
    let store = Arc::new(SqliteContentStore::new(db.clone(), Namespacing::default()));
    let ctx = AdapterContext {
        content: store.clone(),
        namespacing: Namespacing::default(),
        secure_dir: tmp.path().join("data/secure"),
        repo_root: tmp.path().join("data/repo"),
        default_identity: GitIdentity::new("wikisync", "wiki@example.com"),
        mark_safe_directory: false,
    };

    Fixture {
        origin_url: format!("file://{}", bare.display()),
        tmp,
        upstream,
        db,
        store,
        ctx,
    }
}

/// Content store that holds the root-user lookup every sync starts with open
/// for `delay`, and records the highest number of lookups seen at once.
struct SlowStore {
    inner: Arc<SqliteContentStore>,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    entered: Notify,
}

impl SlowStore {
    fn new(inner: Arc<SqliteContentStore>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            entered: Notify::new(),
        }
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn reset_peak(&self) {
        self.peak.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContentStore for SlowStore {
    async fn get_root_user(&self) -> Result<User, StoreError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.entered.notify_waiters();
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        ContentStore::get_root_user(self.inner.as_ref()).await
    }

    async fn move_page(
        &self,
        user: &User,
        from_path: &str,
        to_path: &str,
        locale: &str,
        dest_locale: &str,
    ) -> Result<(), StoreError> {
        ContentStore::move_page(self.inner.as_ref(), user, from_path, to_path, locale, dest_locale)
            .await
    }

    async fn delete_page(&self, user: &User, path: &str, locale: &str) -> Result<(), StoreError> {
        ContentStore::delete_page(self.inner.as_ref(), user, path, locale).await
    }

    async fn upsert_page_from_file(
        &self,
        user: &User,
        rel_path: &str,
        full_path: &Path,
        content_type: ContentType,
    ) -> Result<(), StoreError> {
        ContentStore::upsert_page_from_file(self.inner.as_ref(), user, rel_path, full_path, content_type)
            .await
    }

    async fn find_asset_by_hash(&self, hash: &str) -> Result<Option<AssetRecord>, StoreError> {
        ContentStore::find_asset_by_hash(self.inner.as_ref(), hash).await
    }

    async fn rename_asset(&self, asset_id: i64, new_path: &str) -> Result<(), StoreError> {
        ContentStore::rename_asset(self.inner.as_ref(), asset_id, new_path).await
    }

    async fn delete_asset(&self, asset_id: i64) -> Result<(), StoreError> {
        ContentStore::delete_asset(self.inner.as_ref(), asset_id).await
    }

    async fn invalidate_asset_cache(&self, hash: &str) -> Result<(), StoreError> {
        ContentStore::invalidate_asset_cache(self.inner.as_ref(), hash).await
    }

    async fn upsert_asset_from_file(
        &self,
        user: &User,
        rel_path: &str,
        full_path: &Path,
    ) -> Result<(), StoreError> {
        ContentStore::upsert_asset_from_file(self.inner.as_ref(), user, rel_path, full_path).await
    }

    async fn list_all_pages(&self) -> Result<Vec<Page>, StoreError> {
        ContentStore::list_all_pages(self.inner.as_ref()).await
    }

    async fn list_all_assets(&self) -> Result<Vec<Asset>, StoreError> {
        ContentStore::list_all_assets(self.inner.as_ref()).await
    }

    async fn clear_folder_cache(&self) -> Result<(), StoreError> {
        ContentStore::clear_folder_cache(self.inner.as_ref()).await
    }
}

fn slow_context(fx: &Fixture) -> (AdapterContext, Arc<SlowStore>) {
    let slow = Arc::new(SlowStore::new(fx.store.clone(), Duration::from_millis(200)));
    let ctx = AdapterContext {
        content: slow.clone(),
        ..fx.ctx.clone()
    };
    (ctx, slow)
}

fn profile(fx: &Fixture, name: &str, direction: Direction) -> Profile {
    let mut p = Profile::new(name, fx.origin_url.clone());
    p.direction = direction;
    p.ssh_key_path = Some(fx.tmp.path().join("id_unused").display().to_string());
    p
}

fn upstream_commit(fx: &Fixture, files: &[(&str, &[u8])], message: &str) {
    for (path, data) in files {
        let full = fx.upstream.join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, data).unwrap();
    }
    git(&fx.upstream, &["add", "-A"]);
    git(&fx.upstream, &["commit", "-m", message]);
    git(&fx.upstream, &["push", "origin", "main"]);
}

fn upstream_run(fx: &Fixture, args: &[&str], message: &str) {
    git(&fx.upstream, args);
    git(&fx.upstream, &["commit", "-m", message]);
    git(&fx.upstream, &["push", "origin", "main"]);
}

fn count_commits(repo_path: &Path) -> usize {
    let repo = git2::Repository::open(repo_path).unwrap();
    let head = match repo.head() {
        Ok(h) => h,
        Err(_) => return 0,
    };
    let mut revwalk = repo.revwalk().unwrap();
    revwalk.push(head.target().unwrap()).unwrap();
    revwalk.count()
}

fn sample_page(path: &str) -> Page {
    let now = chrono::Utc::now();
    Page {
        id: 0,
        path: path.into(),
        locale: "en".into(),
        title: "Team Notes".into(),
        description: "Notes from the team".into(),
        content_type: ContentType::Markdown,
        content: "# Notes\n\nAgenda items.\n".into(),
        is_published: true,
        is_private: false,
        tags: vec!["team".into()],
        editor_key: "markdown".into(),
        author_name: "Ada Lovelace".into(),
        author_email: "ada@example.com".into(),
        created_at: now,
        updated_at: now,
    }
}

// ===========================================================================
// Adapter
// ===========================================================================

#[tokio::test]
async fn test_pull_imports_new_renamed_and_deleted_pages() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = setup();
    let mut adapter = GitAdapter::new(profile(&fx, "docs", Direction::Bidirectional), fx.ctx.clone());
    adapter.init(false).await.expect("init failed");
    assert_eq!(adapter.state(), AdapterState::Ready);
    assert!(adapter.work_dir().join("home.md").exists());

    upstream_commit(&fx, &[("docs/guide.md", b"# Guide\n\nline one\nline two\n")], "add guide");
    let outcome = adapter.sync().await.expect("sync failed");
    assert!(outcome.pulled);
    assert_eq!(outcome.files_changed, 1);
    assert_eq!(outcome.files_failed, 0);
    assert_ne!(outcome.commit_before, outcome.commit_after);
    assert!(fx.store.get_page("docs/guide", "en").unwrap().is_some());

    // Re-syncing with nothing new leaves the store as is.
    let outcome = adapter.sync().await.expect("sync failed");
    assert_eq!(outcome.files_changed, 0);
    assert_eq!(fx.store.list_all_pages().await.unwrap().len(), 1);

    upstream_run(&fx, &["mv", "docs/guide.md", "docs/manual.md"], "rename guide");
    adapter.sync().await.expect("sync failed");
    assert!(fx.store.get_page("docs/guide", "en").unwrap().is_none());
    assert!(fx.store.get_page("docs/manual", "en").unwrap().is_some());
    assert_eq!(fx.store.list_all_pages().await.unwrap().len(), 1);

    upstream_run(&fx, &["rm", "--quiet", "docs/manual.md"], "remove manual");
    adapter.sync().await.expect("sync failed");
    assert!(fx.store.get_page("docs/manual", "en").unwrap().is_none());
}

#[tokio::test]
async fn test_pull_imports_binary_asset() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = setup();
    let mut adapter = GitAdapter::new(profile(&fx, "assets", Direction::PullOnly), fx.ctx.clone());
    adapter.init(false).await.expect("init failed");

    let logo: &[u8] = &[0x89, b'P', b'N', b'G', 0, 1, 2, 3];
    upstream_commit(&fx, &[("img/logo.png", logo)], "add logo");
    adapter.sync().await.expect("sync failed");

    let asset = fx.store.get_asset("img/logo.png").unwrap().expect("asset missing");
    assert_eq!(asset.data, logo);
}

#[tokio::test]
async fn test_push_only_never_pulls() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = setup();
    let mut adapter = GitAdapter::new(profile(&fx, "mirror", Direction::PushOnly), fx.ctx.clone());
    adapter.init(true).await.expect("init failed");

    upstream_commit(&fx, &[("upstream-only.md", b"# Upstream\n")], "upstream change");
    let outcome = adapter.sync().await.expect("sync failed");
    assert!(!outcome.pulled);
    assert!(outcome.pushed);
    assert_eq!(outcome.files_changed, 0);
    assert!(!adapter.work_dir().join("upstream-only.md").exists());
    assert!(fx.store.get_page("upstream-only", "en").unwrap().is_none());
}

#[tokio::test]
async fn test_invalid_branch_fails_init() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = setup();
    let mut p = profile(&fx, "docs", Direction::Bidirectional);
    p.branch = "does-not-exist".into();
    let mut adapter = GitAdapter::new(p, fx.ctx.clone());
    let err = adapter.init(true).await.unwrap_err();
    assert!(matches!(err, AdapterError::InvalidBranch(b) if b == "does-not-exist"));
    assert_eq!(adapter.state(), AdapterState::Failed);
}

#[tokio::test]
async fn test_import_all_then_sync_untracked() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = setup();
    let mut adapter = GitAdapter::new(profile(&fx, "docs", Direction::Bidirectional), fx.ctx.clone());
    adapter.init(true).await.expect("init failed");

    let report = adapter.import_all().await.expect("import failed");
    assert_eq!(report.processed, 1);
    assert_eq!(report.failed, 0);
    assert!(fx.store.get_page("home", "en").unwrap().is_some());

    let user = fx.store.get_root_user().await.unwrap();
    fx.store.save_page(&sample_page("team/notes"), user.id).unwrap();
    let before = count_commits(adapter.work_dir());
    let written = adapter.sync_untracked().await.expect("sync untracked failed");
    assert_eq!(written, 2);
    assert_eq!(count_commits(adapter.work_dir()), before + 1);

    let text = std::fs::read_to_string(adapter.work_dir().join("team/notes.md")).unwrap();
    assert!(text.contains("title: Team Notes"));
    assert!(text.contains("Agenda items."));
}

// ===========================================================================
// Profile manager
// ===========================================================================

#[tokio::test]
async fn test_unchanged_profile_is_not_reinitialized() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = setup();
    let manager = ProfileManager::new(fx.db.clone(), fx.ctx.clone());
    let p = profile(&fx, "docs", Direction::Bidirectional);
    fx.db.insert_profile(&p).await.unwrap();
    manager.reload_profiles().await.unwrap();

    // Init removes every remote, so a marker remote survives only if the
    // working copy is left alone.
    let wc = fx.ctx.repo_root.join(&p.id);
    git(&wc, &["remote", "add", "marker", "file:///nowhere.git"]);

    let stored = fx.db.find_profile(&p.id).await.unwrap().unwrap();
    let reused = manager.ensure_adapter(stored.clone()).await.unwrap();
    assert!(reused.is_none());
    assert!(git(&wc, &["remote"]).lines().any(|r| r == "marker"));

    let mut changed = stored;
    changed.committer_name = Some("Release Bot".into());
    let rebuilt = manager.ensure_adapter(changed).await.unwrap();
    assert!(rebuilt.is_some());
    assert!(!git(&wc, &["remote"]).lines().any(|r| r == "marker"));
}

#[tokio::test]
async fn test_pull_only_profile_ignores_content_events() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = setup();
    let manager = ProfileManager::new(fx.db.clone(), fx.ctx.clone());
    let p = profile(&fx, "readonly", Direction::PullOnly);
    fx.db.insert_profile(&p).await.unwrap();
    manager.reload_profiles().await.unwrap();

    let wc = fx.ctx.repo_root.join(&p.id);
    let before = count_commits(&wc);
    let handled = manager
        .handle_page_event(&PageEvent::Created(sample_page("team/notes")))
        .await;
    assert_eq!(handled, 0);
    assert_eq!(count_commits(&wc), before);
    assert!(!wc.join("team/notes.md").exists());
}

#[tokio::test]
async fn test_page_event_is_committed_and_pushed() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = setup();
    let manager = ProfileManager::new(fx.db.clone(), fx.ctx.clone());
    let p = profile(&fx, "docs", Direction::Bidirectional);
    fx.db.insert_profile(&p).await.unwrap();
    manager.reload_profiles().await.unwrap();

    let user = fx.store.get_root_user().await.unwrap();
    let page = sample_page("team/notes");
    fx.store.save_page(&page, user.id).unwrap();
    let handled = manager.handle_page_event(&PageEvent::Created(page)).await;
    assert_eq!(handled, 1);

    manager.sync_profile(&p.id, false).await.expect("sync failed");

    git(&fx.upstream, &["pull", "--quiet", "origin", "main"]);
    assert!(fx.upstream.join("team/notes.md").exists());
    let log = git(&fx.upstream, &["log", "-1", "--format=%an|%s"]);
    assert_eq!(log.trim(), "Ada Lovelace|docs: create team/notes");

    // Syncing again must not duplicate the page.
    manager.sync_profile(&p.id, false).await.expect("sync failed");
    assert_eq!(fx.store.list_all_pages().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_syncs_for_one_profile_are_serialized() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = setup();
    let manager = Arc::new(ProfileManager::new(fx.db.clone(), fx.ctx.clone()));
    let p = profile(&fx, "docs", Direction::Bidirectional);
    fx.db.insert_profile(&p).await.unwrap();
    manager.reload_profiles().await.unwrap();
    upstream_commit(&fx, &[("a.md", b"# A\n"), ("b.md", b"# B\n")], "two pages");

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let manager = manager.clone();
            let id = p.id.clone();
            tokio::spawn(async move { manager.sync_profile(&id, false).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().expect("sync failed");
    }
    assert_eq!(fx.store.list_all_pages().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_force_resync_leaves_clean_checkout() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = setup();
    let manager = ProfileManager::new(fx.db.clone(), fx.ctx.clone());
    let p = profile(&fx, "docs", Direction::PullOnly);
    fx.db.insert_profile(&p).await.unwrap();
    manager.reload_profiles().await.unwrap();

    let wc = fx.ctx.repo_root.join(&p.id);
    std::fs::write(wc.join("scratch.txt"), "local junk").unwrap();

    manager.sync_profile(&p.id, true).await.expect("force sync failed");
    assert!(!wc.join("scratch.txt").exists());
    assert!(wc.join("home.md").exists());
    assert_eq!(git(&wc, &["rev-parse", "--abbrev-ref", "HEAD"]).trim(), "main");
    assert_eq!(git(&wc, &["status", "--porcelain"]).trim(), "");
}

#[tokio::test]
async fn test_removed_profile_is_dropped_on_reload() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = setup();
    let manager = ProfileManager::new(fx.db.clone(), fx.ctx.clone());
    let mut p = profile(&fx, "docs", Direction::Bidirectional);
    fx.db.insert_profile(&p).await.unwrap();
    let report = manager.reload_profiles().await.unwrap();
    assert!(report.initial_syncs.contains_key(&p.id));
    assert!(manager.is_active(&p.id).await);

    // Nothing is rebuilt, so nothing is synced.
    let report = manager.reload_profiles().await.unwrap();
    assert!(report.initial_syncs.is_empty());

    p.enabled = false;
    fx.db.update_profile(&p).await.unwrap();
    let report = manager.reload_profiles().await.unwrap();
    assert_eq!(report.removed, vec![p.id.clone()]);
    assert!(!manager.is_active(&p.id).await);
}

#[tokio::test]
async fn test_page_event_waits_for_running_sync() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = setup();
    let (ctx, slow) = slow_context(&fx);
    let manager = Arc::new(ProfileManager::new(fx.db.clone(), ctx));
    let p = profile(&fx, "docs", Direction::Bidirectional);
    fx.db.insert_profile(&p).await.unwrap();
    manager.reload_profiles().await.unwrap();

    let user = fx.store.get_root_user().await.unwrap();
    let page = sample_page("team/notes");
    fx.store.save_page(&page, user.id).unwrap();

    let entered = slow.entered.notified();
    let sync = {
        let manager = manager.clone();
        let id = p.id.clone();
        tokio::spawn(async move {
            let result = manager.sync_profile(&id, false).await;
            (result, Instant::now())
        })
    };
    entered.await;

    let handled = manager.handle_page_event(&PageEvent::Created(page)).await;
    let event_done = Instant::now();
    let (result, sync_done) = sync.await.unwrap();
    result.expect("sync failed");

    assert_eq!(handled, 1);
    assert!(
        event_done >= sync_done,
        "page event finished while the sync still held the working copy"
    );
    assert_eq!(slow.peak(), 1);
}

#[tokio::test]
async fn test_sync_overlap_is_per_profile() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = setup();
    let (ctx, slow) = slow_context(&fx);
    let manager = ProfileManager::new(fx.db.clone(), ctx);
    let first = profile(&fx, "first", Direction::PullOnly);
    let second = profile(&fx, "second", Direction::PullOnly);
    fx.db.insert_profile(&first).await.unwrap();
    fx.db.insert_profile(&second).await.unwrap();
    manager.reload_profiles().await.unwrap();

    slow.reset_peak();
    let (a, b) = tokio::join!(
        manager.sync_profile(&first.id, false),
        manager.sync_profile(&first.id, false)
    );
    a.expect("sync failed");
    b.expect("sync failed");
    assert_eq!(slow.peak(), 1, "one profile synced twice at once");

    slow.reset_peak();
    let (a, b) = tokio::join!(
        manager.sync_profile(&first.id, false),
        manager.sync_profile(&second.id, false)
    );
    a.expect("sync failed");
    b.expect("sync failed");
    assert_eq!(slow.peak(), 2, "different profiles did not run side by side");
}

#[tokio::test]
async fn test_committed_page_round_trips_through_second_profile() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = setup();
    let manager = ProfileManager::new(fx.db.clone(), fx.ctx.clone());
    let writer = profile(&fx, "writer", Direction::Bidirectional);
    let reader = profile(&fx, "reader", Direction::PullOnly);
    fx.db.insert_profile(&writer).await.unwrap();
    fx.db.insert_profile(&reader).await.unwrap();
    manager.reload_profiles().await.unwrap();

    let user = fx.store.get_root_user().await.unwrap();
    let page = sample_page("team/notes");
    fx.store.save_page(&page, user.id).unwrap();
    assert_eq!(manager.handle_page_event(&PageEvent::Created(page)).await, 1);
    manager.sync_profile(&writer.id, false).await.expect("writer sync failed");

    // The reader pulls the commit the writer produced and applies it to
    // the page that already exists.
    let outcome = manager
        .sync_profile(&reader.id, false)
        .await
        .expect("reader sync failed");
    assert!(outcome.pulled);
    assert_ne!(outcome.commit_before, outcome.commit_after);
    assert_eq!(outcome.files_changed, 1);
    assert_eq!(outcome.files_failed, 0);

    let pages = fx.store.list_all_pages().await.unwrap();
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].path, "team/notes");
    assert_eq!(pages[0].title, "Team Notes");

    let reader_wc = fx.ctx.repo_root.join(&reader.id);
    assert!(reader_wc.join("team/notes.md").exists());
}

#[tokio::test]
async fn test_normal_sync_recovers_after_failed_force_resync() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = setup();
    let manager = ProfileManager::new(fx.db.clone(), fx.ctx.clone());
    let p = profile(&fx, "docs", Direction::PullOnly);
    fx.db.insert_profile(&p).await.unwrap();
    manager.reload_profiles().await.unwrap();
    let wc = fx.ctx.repo_root.join(&p.id);

    let origin = fx.tmp.path().join("origin.git");
    let parked = fx.tmp.path().join("origin.parked");

    std::fs::rename(&origin, &parked).unwrap();
    assert!(manager.sync_profile(&p.id, true).await.is_err());
    assert!(manager.is_active(&p.id).await);
    std::fs::rename(&parked, &origin).unwrap();

    upstream_commit(&fx, &[("news.md", b"# News\n")], "add news");
    manager
        .sync_profile(&p.id, false)
        .await
        .expect("sync after remote came back failed");
    assert!(wc.join("news.md").exists());

    upstream_commit(&fx, &[("faq.md", b"# FAQ\n")], "add faq");
    let outcome = manager.sync_profile(&p.id, false).await.expect("sync failed");
    assert_eq!(outcome.files_changed, 1);
    assert!(fx.store.get_page("faq", "en").unwrap().is_some());

    // Same failure, recovered through the run bookkeeping path.
    std::fs::rename(&origin, &parked).unwrap();
    assert!(manager.sync_profile(&p.id, true).await.is_err());
    std::fs::rename(&parked, &origin).unwrap();

    let request = SyncRequest::new(p.id.clone(), false, "webhook");
    let record = run_profile_sync(fx.db.as_ref(), &manager, &request)
        .await
        .expect("run skipped");
    assert_eq!(record.completion.status, RunStatus::Success);
    assert_eq!(
        manager.statuses().await[0].state,
        AdapterState::Ready
    );
}

#[tokio::test]
async fn test_profile_test_leaves_live_remote_alone() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = setup();
    let manager = ProfileManager::new(fx.db.clone(), fx.ctx.clone());
    let p = profile(&fx, "docs", Direction::Bidirectional);
    fx.db.insert_profile(&p).await.unwrap();
    manager.reload_profiles().await.unwrap();
    let wc = fx.ctx.repo_root.join(&p.id);

    let mirror = fx.tmp.path().join("mirror.git");
    git(
        fx.tmp.path(),
        &[
            "clone",
            "--bare",
            "--quiet",
            fx.tmp.path().join("origin.git").to_str().unwrap(),
            mirror.to_str().unwrap(),
        ],
    );

    let stored = fx.db.find_profile(&p.id).await.unwrap().unwrap();
    let mut edited = stored.clone();
    edited.repo_url = format!("file://{}", mirror.display());
    manager.test_profile(&edited).await.expect("edited profile test failed");

    assert_eq!(git(&wc, &["remote", "get-url", "origin"]).trim(), fx.origin_url);
    assert!(!fx.ctx.repo_root.join(format!("{}.test", p.id)).exists());

    manager.test_profile(&stored).await.expect("live profile test failed");
    assert!(manager.is_active(&p.id).await);
    manager.sync_profile(&p.id, false).await.expect("sync failed");
}

// ===========================================================================
// Run bookkeeping
// ===========================================================================

#[tokio::test]
async fn test_run_profile_sync_records_success() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = setup();
    let manager = ProfileManager::new(fx.db.clone(), fx.ctx.clone());
    let p = profile(&fx, "docs", Direction::Bidirectional);
    fx.db.insert_profile(&p).await.unwrap();

    let request = SyncRequest::new(p.id.clone(), false, "webhook");
    let record = run_profile_sync(fx.db.as_ref(), &manager, &request)
        .await
        .expect("run skipped");
    assert_eq!(record.completion.status, RunStatus::Success);
    assert!(manager.is_loaded());

    let run = fx.db.latest_run(&p.id).await.unwrap().expect("run missing");
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.message.as_deref(), Some("completed (sync)"));
    assert_eq!(run.branch.as_deref(), Some("main"));
}

#[tokio::test]
async fn test_run_records_work_done_while_rebuilding_adapter() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = setup();
    let manager = ProfileManager::new(fx.db.clone(), fx.ctx.clone());
    let mut p = profile(&fx, "docs", Direction::Bidirectional);
    fx.db.insert_profile(&p).await.unwrap();
    manager.reload_profiles().await.unwrap();

    p.name = "Team docs".into();
    fx.db.update_profile(&p).await.unwrap();
    upstream_commit(&fx, &[("news.md", b"# News\n")], "add news");

    let request = SyncRequest::new(p.id.clone(), false, "operator");
    let record = run_profile_sync(fx.db.as_ref(), &manager, &request)
        .await
        .expect("run skipped");
    assert_eq!(record.completion.status, RunStatus::Success);
    assert!(fx.store.get_page("news", "en").unwrap().is_some());

    let run = fx.db.latest_run(&p.id).await.unwrap().expect("run missing");
    assert_eq!(run.files_changed, Some(1));
    assert!(run.commit_from.is_some());
    assert_ne!(run.commit_from, run.commit_to);
}
