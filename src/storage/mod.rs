use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use time::OffsetDateTime;

use crate::config::{ConfigPaths, StorageOptions};
use crate::error::StoreError;

mod schema;

pub const DRAFT_CONTENT_KEY: &str = "draftContent";
pub const DRAFT_CATEGORIES_KEY: &str = "draftCategories";
pub const ALL_POSTS_KEY: &str = "allPosts";

pub const DEFAULT_QUOTA_UNITS: u64 = 5 * 1024 * 1024;

/// A synchronous string-keyed store with string values.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for &T {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        (**self).remove(key)
    }
}

pub fn entry_size(key: &str, value: &str) -> u64 {
    (key.encode_utf16().count() + value.encode_utf16().count()) as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageUsage {
    pub used: u64,
    pub quota: u64,
    pub entries: usize,
}

impl StorageUsage {
    pub fn available(&self) -> u64 {
        self.quota.saturating_sub(self.used)
    }
}

fn check_quota(key: &str, size: u64, used_elsewhere: u64, quota: u64) -> Result<(), StoreError> {
    if used_elsewhere.saturating_add(size) > quota {
        return Err(StoreError::Full {
            key: key.to_string(),
            required: size,
            available: quota.saturating_sub(used_elsewhere),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    entries: IndexMap<String, String>,
    quota: Option<u64>,
    read_only: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: u64) -> Self {
        let store = Self::default();
        store.inner.lock().quota = Some(quota);
        store
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.inner.lock().read_only = read_only;
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().entries.keys().cloned().collect()
    }

    pub fn usage(&self) -> StorageUsage {
        let inner = self.inner.lock();
        StorageUsage {
            used: inner
                .entries
                .iter()
                .map(|(key, value)| entry_size(key, value))
                .sum(),
            quota: inner.quota.unwrap_or(u64::MAX),
            entries: inner.entries.len(),
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.inner.lock().entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.read_only {
            return Err(StoreError::Backend("store is read-only".into()));
        }
        if let Some(quota) = inner.quota {
            let used_elsewhere: u64 = inner
                .entries
                .iter()
                .filter(|(existing, _)| existing.as_str() != key)
                .map(|(existing, stored)| entry_size(existing, stored))
                .sum();
            check_quota(key, entry_size(key, value), used_elsewhere, quota)?;
        }
        inner.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.read_only {
            return Err(StoreError::Backend("store is read-only".into()));
        }
        inner.entries.shift_remove(key);
        Ok(())
    }
}

#[derive(Clone)]
pub struct StorageHandle {
    db_path: Arc<PathBuf>,
    options: Arc<StorageOptions>,
}

impl StorageHandle {
    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&*self.db_path)
            .with_context(|| format!("opening database {}", self.db_path.display()))?;
        prepare_connection(&conn, &self.options)?;
        Ok(conn)
    }

    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.connect()?;
        f(&conn)
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }

    pub fn usage(&self) -> Result<StorageUsage> {
        self.with_connection(|conn| {
            let (used, entries): (i64, i64) = conn
                .query_row("SELECT COALESCE(SUM(size), 0), COUNT(*) FROM kv", [], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })
                .context("measuring storage usage")?;
            Ok(StorageUsage {
                used: used.max(0) as u64,
                quota: self.options.quota_units,
                entries: entries.max(0) as usize,
            })
        })
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare("SELECT key FROM kv ORDER BY key")
                .context("preparing key listing")?;
            let keys = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("listing stored keys")?;
            Ok(keys)
        })
    }

    fn write_entry(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let size = entry_size(key, value);
        let quota = self.options.quota_units;
        let mut conn = self.connect().map_err(backend_error)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| sqlite_error(key, size, err))?;
        let used_elsewhere: i64 = tx
            .query_row(
                "SELECT COALESCE(SUM(size), 0) FROM kv WHERE key != ?1",
                [key],
                |row| row.get(0),
            )
            .map_err(|err| sqlite_error(key, size, err))?;
        check_quota(key, size, used_elsewhere.max(0) as u64, quota)?;
        tx.execute(
            "INSERT INTO kv (key, value, size, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                size = excluded.size,
                updated_at = excluded.updated_at",
            params![
                key,
                value,
                size as i64,
                OffsetDateTime::now_utc().unix_timestamp()
            ],
        )
        .map_err(|err| sqlite_error(key, size, err))?;
        tx.commit().map_err(|err| sqlite_error(key, size, err))?;
        Ok(())
    }
}

impl KeyValueStore for StorageHandle {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_connection(|conn| {
            conn.query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
                row.get::<_, String>(0)
            })
            .optional()
            .with_context(|| format!("reading key {key}"))
        })
        .map_err(backend_error)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        tracing::debug!(key, len = value.len(), "writing store entry");
        self.write_entry(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM kv WHERE key = ?1", [key])
                .with_context(|| format!("removing key {key}"))?;
            Ok(())
        })
        .map_err(backend_error)
    }
}

fn backend_error(err: anyhow::Error) -> StoreError {
    StoreError::Backend(format!("{err:#}"))
}

fn sqlite_error(key: &str, size: u64, err: rusqlite::Error) -> StoreError {
    if err.sqlite_error_code() == Some(ErrorCode::DiskFull) {
        return StoreError::Full {
            key: key.to_string(),
            required: size,
            available: 0,
        };
    }
    StoreError::Backend(format!("writing key {key}: {err}"))
}

pub fn init(paths: &ConfigPaths, storage: &StorageOptions) -> Result<StorageHandle> {
    let db_path = &paths.database_path;
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating data directory {}", parent.display()))?;
    }
    let conn = Connection::open(db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;
    prepare_connection(&conn, storage)?;
    schema::apply(&conn)?;
    Ok(StorageHandle {
        db_path: Arc::new(db_path.clone()),
        options: Arc::new(storage.clone()),
    })
}

fn prepare_connection(conn: &Connection, storage: &StorageOptions) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("setting journal_mode=WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("setting synchronous=NORMAL")?;
    conn.pragma_update(
        None,
        "wal_autocheckpoint",
        storage.wal_autocheckpoint.to_string(),
    )
    .context("setting wal_autocheckpoint")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn temp_paths(root: &TempDir) -> ConfigPaths {
        let base = root.path();
        let config_dir = base.join("config");
        let data_dir = base.join("data");
        ConfigPaths {
            config_dir: config_dir.clone(),
            config_file: config_dir.join("config.toml"),
            data_dir: data_dir.clone(),
            database_path: data_dir.join("blogpad.db"),
        }
    }

    fn init_storage(quota_units: u64) -> anyhow::Result<(TempDir, StorageHandle)> {
        let temp = TempDir::new()?;
        let paths = temp_paths(&temp);
        paths.ensure_directories()?;
        let mut options = StorageOptions::default();
        options.database_path = paths.database_path.clone();
        options.quota_units = quota_units;
        let handle = init(&paths, &options)?;
        Ok((temp, handle))
    }

    #[test]
    fn memory_store_round_trips_and_removes() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        assert_eq!(store.get("draftContent")?, None);
        store.set("draftContent", "<p>hello</p>")?;
        assert_eq!(store.get("draftContent")?.as_deref(), Some("<p>hello</p>"));
        store.remove("draftContent")?;
        assert_eq!(store.get("draftContent")?, None);
        store.remove("missing")?;
        Ok(())
    }

    #[test]
    fn memory_store_quota_counts_replacement_not_sum() -> anyhow::Result<()> {
        let store = MemoryStore::with_quota(20);
        store.set("k", "0123456789")?;
        // Replacing the same key only charges the new value.
        store.set("k", "9876543210abcdef")?;
        let err = store.set("other", "0123456789").unwrap_err();
        assert_matches!(err, StoreError::Full { ref key, required: 15, available: 3 } if key == "other");
        assert_eq!(store.get("other")?, None);
        assert_eq!(store.usage().used, 17);
        Ok(())
    }

    #[test]
    fn memory_store_read_only_rejects_writes() {
        let store = MemoryStore::new();
        store.set_read_only(true);
        assert_matches!(store.set("k", "v"), Err(StoreError::Backend(_)));
        assert_matches!(store.remove("k"), Err(StoreError::Backend(_)));
    }

    #[test]
    fn entry_size_uses_utf16_units() {
        assert_eq!(entry_size("ab", "cd"), 4);
        assert_eq!(entry_size("", "é"), 1);
        assert_eq!(entry_size("", "😀"), 2);
    }

    #[test]
    fn sqlite_store_persists_across_handles() -> anyhow::Result<()> {
        let (temp, storage) = init_storage(DEFAULT_QUOTA_UNITS)?;
        storage.set(ALL_POSTS_KEY, "[]")?;
        storage.set(DRAFT_CONTENT_KEY, "<p>draft</p>")?;
        storage.set(DRAFT_CONTENT_KEY, "<p>newer</p>")?;

        let paths = temp_paths(&temp);
        let mut options = StorageOptions::default();
        options.database_path = paths.database_path.clone();
        let reopened = init(&paths, &options)?;
        assert_eq!(
            reopened.get(DRAFT_CONTENT_KEY)?.as_deref(),
            Some("<p>newer</p>")
        );
        assert_eq!(
            reopened.keys()?,
            vec![ALL_POSTS_KEY.to_string(), DRAFT_CONTENT_KEY.to_string()]
        );

        reopened.remove(DRAFT_CONTENT_KEY)?;
        assert_eq!(storage.get(DRAFT_CONTENT_KEY)?, None);
        Ok(())
    }

    #[test]
    fn sqlite_store_rejects_writes_over_quota() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage(32)?;
        storage.set(ALL_POSTS_KEY, "[1,2,3]")?;
        let huge = "x".repeat(64);
        let err = storage.set(ALL_POSTS_KEY, &huge).unwrap_err();
        assert_matches!(err, StoreError::Full { .. });
        assert_eq!(storage.get(ALL_POSTS_KEY)?.as_deref(), Some("[1,2,3]"));

        let usage = storage.usage()?;
        assert_eq!(usage.entries, 1);
        assert_eq!(usage.used, entry_size(ALL_POSTS_KEY, "[1,2,3]"));
        assert_eq!(usage.quota, 32);
        Ok(())
    }
}
