//! SQLite-backed reference implementation of [`ContentStore`].
//!
//! Pages are keyed by `(path, locale)` and assets by filename, so re-importing
//! a file that is already applied updates the existing row instead of adding
//! a duplicate. Adapter-driven mutations go straight to the tables and never
//! produce content events.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, info, warn};

use super::queries::parse_ts;
use super::Database;
use crate::content::{asset_hash, page_location, parse_page_file, ContentType, Namespacing};
use crate::errors::{DatabaseError, StoreError};
use crate::models::{Asset, AssetRecord, Page, User};
use crate::store::ContentStore;

const ROOT_USER_ID: i64 = 1;

const PAGE_SELECT: &str = "SELECT p.id, p.path, p.locale, p.title, p.description, p.content_type,
        p.content, p.is_published, p.is_private, p.tags, p.editor_key, u.name, u.email,
        p.created_at, p.updated_at
     FROM pages p JOIN users u ON u.id = p.author_id";

/// Content store over the `pages`, `assets` and `users` tables.
pub struct SqliteContentStore {
    db: Arc<Database>,
    namespacing: Namespacing,
    cache_dir: Option<PathBuf>,
    folders: Mutex<Option<Vec<String>>>,
}

impl SqliteContentStore {
    pub fn new(db: Arc<Database>, namespacing: Namespacing) -> Self {
        Self {
            db,
            namespacing,
            cache_dir: None,
            folders: Mutex::new(None),
        }
    }

    /// Cache decoded asset data under `dir` (one `<hash>.dat` per asset).
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    fn cache_path(&self, hash: &str) -> Option<PathBuf> {
        self.cache_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.dat", hash)))
    }

    /// Look up a page by store path and locale.
    pub fn get_page(&self, path: &str, locale: &str) -> Result<Option<Page>, DatabaseError> {
        let conn = self.db.conn();
        let sql = format!("{} WHERE p.path = ?1 AND p.locale = ?2", PAGE_SELECT);
        let row = conn
            .query_row(&sql, params![path, locale], PageRow::from_row)
            .optional()?;
        row.map(PageRow::decode).transpose()
    }

    /// Insert or replace a page authored by `author_id`.
    pub fn save_page(&self, page: &Page, author_id: i64) -> Result<i64, DatabaseError> {
        let tags = serde_json::to_string(&page.tags).map_err(|e| DatabaseError::Corrupt {
            column: "tags".into(),
            value: e.to_string(),
        })?;
        let (created_at, updated_at) = (page.created_at.to_rfc3339(), page.updated_at.to_rfc3339());
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO pages (path, locale, title, description, content_type, content,
                is_published, is_private, tags, editor_key, author_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT (path, locale) DO UPDATE SET
                title = excluded.title, description = excluded.description,
                content_type = excluded.content_type, content = excluded.content,
                is_published = excluded.is_published, is_private = excluded.is_private,
                tags = excluded.tags, editor_key = excluded.editor_key,
                author_id = excluded.author_id, updated_at = excluded.updated_at",
            params![
                page.path,
                page.locale,
                page.title,
                page.description,
                page.content_type.as_str(),
                page.content,
                page.is_published,
                page.is_private,
                tags,
                page.editor_key,
                author_id,
                created_at,
                updated_at
            ],
        )?;
        let id = conn.query_row(
            "SELECT id FROM pages WHERE path = ?1 AND locale = ?2",
            params![page.path, page.locale],
            |row| row.get(0),
        )?;
        drop(conn);
        self.reset_folders();
        Ok(id)
    }

    /// Asset data by filename.
    pub fn get_asset(&self, filename: &str) -> Result<Option<Asset>, DatabaseError> {
        let conn = self.db.conn();
        let row = conn
            .query_row(
                "SELECT a.filename, a.data, u.name, u.email
                 FROM assets a JOIN users u ON u.id = a.author_id WHERE a.filename = ?1",
                params![filename],
                asset_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Asset data by hash, served from the cache directory when present.
    pub async fn read_asset(&self, hash: &str) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(path) = self.cache_path(hash) {
            match tokio::fs::read(&path).await {
                Ok(data) => return Ok(Some(data)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        let data: Option<Vec<u8>> = {
            let conn = self.db.conn();
            conn.query_row(
                "SELECT data FROM assets WHERE hash = ?1",
                params![hash],
                |row| row.get(0),
            )
            .optional()
            .map_err(DatabaseError::from)?
        };

        if let (Some(path), Some(bytes)) = (self.cache_path(hash), data.as_ref()) {
            if let Some(dir) = path.parent() {
                tokio::fs::create_dir_all(dir).await?;
            }
            tokio::fs::write(&path, bytes).await?;
            debug!(hash, "cached asset data");
        }
        Ok(data)
    }

    /// Distinct page folders, memoized until the next mutation.
    pub fn list_folders(&self) -> Result<Vec<String>, DatabaseError> {
        let mut memo = self.folders.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(folders) = memo.as_ref() {
            return Ok(folders.clone());
        }

        let paths: Vec<String> = {
            let conn = self.db.conn();
            let mut stmt = conn.prepare("SELECT path FROM pages")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<Result<_, _>>()?
        };
        let folders: BTreeSet<String> = paths
            .iter()
            .filter_map(|p| p.rsplit_once('/').map(|(dir, _)| dir.to_string()))
            .collect();
        let folders: Vec<String> = folders.into_iter().collect();
        *memo = Some(folders.clone());
        Ok(folders)
    }

    fn reset_folders(&self) {
        *self.folders.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }
}

fn asset_from_row(row: &Row<'_>) -> rusqlite::Result<Asset> {
    Ok(Asset {
        path: row.get(0)?,
        data: row.get(1)?,
        author_name: row.get(2)?,
        author_email: row.get(3)?,
    })
}

struct PageRow {
    id: i64,
    path: String,
    locale: String,
    title: String,
    description: String,
    content_type: String,
    content: String,
    is_published: bool,
    is_private: bool,
    tags: String,
    editor_key: String,
    author_name: String,
    author_email: String,
    created_at: String,
    updated_at: String,
}

impl PageRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            path: row.get(1)?,
            locale: row.get(2)?,
            title: row.get(3)?,
            description: row.get(4)?,
            content_type: row.get(5)?,
            content: row.get(6)?,
            is_published: row.get(7)?,
            is_private: row.get(8)?,
            tags: row.get(9)?,
            editor_key: row.get(10)?,
            author_name: row.get(11)?,
            author_email: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    fn decode(self) -> Result<Page, DatabaseError> {
        Ok(Page {
            content_type: ContentType::from_str_val(&self.content_type).ok_or_else(|| {
                DatabaseError::Corrupt {
                    column: "content_type".into(),
                    value: self.content_type.clone(),
                }
            })?,
            tags: serde_json::from_str(&self.tags).map_err(|_| DatabaseError::Corrupt {
                column: "tags".into(),
                value: self.tags.clone(),
            })?,
            created_at: parse_ts("created_at", &self.created_at)?,
            updated_at: parse_ts("updated_at", &self.updated_at)?,
            id: self.id,
            path: self.path,
            locale: self.locale,
            title: self.title,
            description: self.description,
            content: self.content,
            is_published: self.is_published,
            is_private: self.is_private,
            editor_key: self.editor_key,
            author_name: self.author_name,
            author_email: self.author_email,
        })
    }
}

fn not_found(entity: &str, id: impl ToString) -> StoreError {
    StoreError::NotFound {
        entity: entity.to_string(),
        id: id.to_string(),
    }
}

#[async_trait]
impl ContentStore for SqliteContentStore {
    async fn get_root_user(&self) -> Result<User, StoreError> {
        let conn = self.db.conn();
        conn.query_row(
            "SELECT id, name, email FROM users WHERE id = ?1",
            params![ROOT_USER_ID],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    email: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(DatabaseError::from)?
        .ok_or_else(|| not_found("user", ROOT_USER_ID))
    }

    async fn move_page(
        &self,
        user: &User,
        from_path: &str,
        to_path: &str,
        locale: &str,
        dest_locale: &str,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let changed = {
            let conn = self.db.conn();
            conn.execute(
                "UPDATE pages SET path = ?1, locale = ?2, author_id = ?3, updated_at = ?4
                 WHERE path = ?5 AND locale = ?6",
                params![to_path, dest_locale, user.id, now, from_path, locale],
            )
            .map_err(DatabaseError::from)?
        };
        if changed == 0 {
            return Err(not_found("page", format!("{}/{}", locale, from_path)));
        }
        self.reset_folders();
        info!(from = from_path, to = to_path, "moved page");
        Ok(())
    }

    async fn delete_page(&self, _user: &User, path: &str, locale: &str) -> Result<(), StoreError> {
        let changed = {
            let conn = self.db.conn();
            conn.execute(
                "DELETE FROM pages WHERE path = ?1 AND locale = ?2",
                params![path, locale],
            )
            .map_err(DatabaseError::from)?
        };
        if changed == 0 {
            return Err(not_found("page", format!("{}/{}", locale, path)));
        }
        self.reset_folders();
        info!(path, locale, "deleted page");
        Ok(())
    }

    async fn upsert_page_from_file(
        &self,
        user: &User,
        rel_path: &str,
        full_path: &Path,
        content_type: ContentType,
    ) -> Result<(), StoreError> {
        let text = tokio::fs::read_to_string(full_path).await?;
        let (meta, body) = parse_page_file(content_type, &text);
        let location = page_location(rel_path, &self.namespacing.default_locale);
        let existing = self.get_page(&location.path, &location.locale)?;

        let now = Utc::now();
        let title = meta
            .get("title")
            .filter(|t| !t.is_empty())
            .cloned()
            .unwrap_or_else(|| {
                location
                    .path
                    .rsplit('/')
                    .next()
                    .unwrap_or(&location.path)
                    .to_string()
            });
        let created_at = meta
            .get("dateCreated")
            .and_then(|v| chrono::DateTime::parse_from_rfc3339(v).ok())
            .map(|d| d.with_timezone(&Utc))
            .or(existing.as_ref().map(|p| p.created_at))
            .unwrap_or(now);

        let page = Page {
            id: existing.as_ref().map(|p| p.id).unwrap_or_default(),
            path: location.path,
            locale: location.locale,
            title,
            description: meta.get("description").cloned().unwrap_or_default(),
            content_type,
            content: body,
            is_published: meta.get("published").map(|v| v != "false").unwrap_or(true),
            is_private: existing.as_ref().map(|p| p.is_private).unwrap_or(false),
            tags: meta
                .get("tags")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            editor_key: meta
                .get("editor")
                .filter(|e| !e.is_empty())
                .cloned()
                .unwrap_or_else(|| content_type.as_str().to_string()),
            author_name: user.name.clone(),
            author_email: user.email.clone(),
            created_at,
            updated_at: now,
        };

        self.save_page(&page, user.id)?;
        debug!(rel_path, path = %page.path, locale = %page.locale, "upserted page from file");
        Ok(())
    }

    async fn find_asset_by_hash(&self, hash: &str) -> Result<Option<AssetRecord>, StoreError> {
        let conn = self.db.conn();
        let record = conn
            .query_row(
                "SELECT id, filename, hash FROM assets WHERE hash = ?1",
                params![hash],
                |row| {
                    Ok(AssetRecord {
                        id: row.get(0)?,
                        filename: row.get(1)?,
                        hash: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(DatabaseError::from)?;
        Ok(record)
    }

    async fn rename_asset(&self, asset_id: i64, new_path: &str) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.db.conn();
        let changed = conn
            .execute(
                "UPDATE assets SET filename = ?1, hash = ?2, updated_at = ?3 WHERE id = ?4",
                params![new_path, asset_hash(new_path), now, asset_id],
            )
            .map_err(DatabaseError::from)?;
        if changed == 0 {
            return Err(not_found("asset", asset_id));
        }
        info!(asset_id, new_path, "renamed asset");
        Ok(())
    }

    async fn delete_asset(&self, asset_id: i64) -> Result<(), StoreError> {
        let conn = self.db.conn();
        let changed = conn
            .execute("DELETE FROM assets WHERE id = ?1", params![asset_id])
            .map_err(DatabaseError::from)?;
        if changed == 0 {
            return Err(not_found("asset", asset_id));
        }
        info!(asset_id, "deleted asset");
        Ok(())
    }

    async fn invalidate_asset_cache(&self, hash: &str) -> Result<(), StoreError> {
        let Some(path) = self.cache_path(hash) else {
            return Ok(());
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(hash, "invalidated cached asset");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn upsert_asset_from_file(
        &self,
        user: &User,
        rel_path: &str,
        full_path: &Path,
    ) -> Result<(), StoreError> {
        let data = tokio::fs::read(full_path).await?;
        let hash = asset_hash(rel_path);
        let now = Utc::now().to_rfc3339();
        {
            let conn = self.db.conn();
            conn.execute(
                "INSERT INTO assets (filename, hash, data, author_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT (filename) DO UPDATE SET
                    data = excluded.data, author_id = excluded.author_id,
                    updated_at = excluded.updated_at",
                params![rel_path, hash, data, user.id, now],
            )
            .map_err(DatabaseError::from)?;
        }
        if let Err(e) = self.invalidate_asset_cache(&hash).await {
            warn!(rel_path, error = %e, "failed to invalidate asset cache");
        }
        debug!(rel_path, bytes = data.len(), "upserted asset from file");
        Ok(())
    }

    async fn list_all_pages(&self) -> Result<Vec<Page>, StoreError> {
        let rows: Vec<PageRow> = {
            let conn = self.db.conn();
            let sql = format!("{} WHERE p.is_private = 0 ORDER BY p.id", PAGE_SELECT);
            let mut stmt = conn.prepare(&sql).map_err(DatabaseError::from)?;
            let rows = stmt
                .query_map([], PageRow::from_row)
                .map_err(DatabaseError::from)?;
            rows.collect::<Result<_, _>>().map_err(DatabaseError::from)?
        };
        Ok(rows
            .into_iter()
            .map(PageRow::decode)
            .collect::<Result<_, _>>()?)
    }

    async fn list_all_assets(&self) -> Result<Vec<Asset>, StoreError> {
        let conn = self.db.conn();
        let mut stmt = conn
            .prepare(
                "SELECT a.filename, a.data, u.name, u.email
                 FROM assets a JOIN users u ON u.id = a.author_id ORDER BY a.id",
            )
            .map_err(DatabaseError::from)?;
        let rows = stmt
            .query_map([], asset_from_row)
            .map_err(DatabaseError::from)?;
        let assets = rows
            .collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::from)?;
        Ok(assets)
    }

    async fn clear_folder_cache(&self) -> Result<(), StoreError> {
        self.reset_folders();
        Ok(())
    }
}
