//! Store interfaces consumed by the adapter and the profile manager.
//!
//! The configuration store holds profiles and run history; the content store
//! holds pages and assets. Both are injected at construction so the engine
//! never reaches for process-wide state. The SQLite implementations live in
//! [`crate::db`].

use std::path::Path;

use async_trait::async_trait;

use crate::content::ContentType;
use crate::errors::StoreError;
use crate::models::{Asset, AssetRecord, Page, Profile, Run, RunAction, RunCompletion, RunStatus, User};

/// Persistence of profiles and sync runs.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn find_profile(&self, id: &str) -> Result<Option<Profile>, StoreError>;

    /// Enabled profiles of `kind`, ordered by name.
    async fn list_enabled_profiles(&self, kind: &str) -> Result<Vec<Profile>, StoreError>;

    async fn list_profiles(&self) -> Result<Vec<Profile>, StoreError>;

    /// Insert a profile. Names are unique.
    async fn insert_profile(&self, profile: &Profile) -> Result<(), StoreError>;

    /// Overwrite every column of an existing profile.
    async fn update_profile(&self, profile: &Profile) -> Result<(), StoreError>;

    /// Returns `false` when no such profile existed.
    async fn delete_profile(&self, id: &str) -> Result<bool, StoreError>;

    /// Record the start of a run, returning its id.
    async fn insert_run(
        &self,
        profile_id: &str,
        action: RunAction,
        status: RunStatus,
        message: &str,
    ) -> Result<i64, StoreError>;

    /// Move a pending run to its terminal state.
    async fn patch_run(&self, run_id: i64, completion: &RunCompletion) -> Result<(), StoreError>;

    async fn latest_run(&self, profile_id: &str) -> Result<Option<Run>, StoreError>;

    /// Most recent runs of a profile, newest first.
    async fn list_runs(&self, profile_id: &str, limit: u32) -> Result<Vec<Run>, StoreError>;
}

/// Page and asset operations the adapter applies for remote changes.
///
/// Mutations made through this trait must not be reported back to the
/// profile manager as content events, otherwise every pulled change would be
/// committed again.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// User that pulled changes are attributed to.
    async fn get_root_user(&self) -> Result<User, StoreError>;

    async fn move_page(
        &self,
        user: &User,
        from_path: &str,
        to_path: &str,
        locale: &str,
        dest_locale: &str,
    ) -> Result<(), StoreError>;

    async fn delete_page(&self, user: &User, path: &str, locale: &str) -> Result<(), StoreError>;

    /// Create or update the page backed by `full_path`.
    async fn upsert_page_from_file(
        &self,
        user: &User,
        rel_path: &str,
        full_path: &Path,
        content_type: ContentType,
    ) -> Result<(), StoreError>;

    async fn find_asset_by_hash(&self, hash: &str) -> Result<Option<AssetRecord>, StoreError>;

    /// Point an asset at `new_path`, updating its filename and hash.
    async fn rename_asset(&self, asset_id: i64, new_path: &str) -> Result<(), StoreError>;

    /// Remove the asset record together with its binary data.
    async fn delete_asset(&self, asset_id: i64) -> Result<(), StoreError>;

    async fn invalidate_asset_cache(&self, hash: &str) -> Result<(), StoreError>;

    async fn upsert_asset_from_file(
        &self,
        user: &User,
        rel_path: &str,
        full_path: &Path,
    ) -> Result<(), StoreError>;

    /// Every page that is not private.
    async fn list_all_pages(&self) -> Result<Vec<Page>, StoreError>;

    async fn list_all_assets(&self) -> Result<Vec<Asset>, StoreError>;

    async fn clear_folder_cache(&self) -> Result<(), StoreError>;
}
