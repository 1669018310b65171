// Copyright (c) 2025 Nostr Forge Developers
// Distributed under the MIT software license

//! Persistent metadata cache.
//!
//! One SQLite database with three logical stores (`repos`, `commits`,
//! `merge_analysis`), each a string-keyed JSON value plus a `last_updated`
//! column indexed for stale cleanup. The schema is versioned and upgrades
//! are additive; writers serialize on the connection, readers observe either
//! the pre- or post-state of a transaction, never a partial one.

use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ErrorCode, ForgeError};

/// Current schema version.
pub const SCHEMA_VERSION: i64 = 3;

const STORES: [&str; 3] = ["repos", "commits", "merge_analysis"];

/// String-keyed transactional cache with three logical stores.
#[derive(Debug)]
pub struct CacheStore {
    conn: Mutex<Connection>,
}

/// A logical store name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Store {
    /// Per-repository cache entries
    Repos,
    /// Commit-history windows
    Commits,
    /// Memoized merge analysis results
    MergeAnalysis,
}

impl Store {
    fn table(&self) -> &'static str {
        match self {
            Self::Repos => "repos",
            Self::Commits => "commits",
            Self::MergeAnalysis => "merge_analysis",
        }
    }
}

impl CacheStore {
    /// Open (or create) the cache database at `path`.
    pub fn open<P>(path: P) -> Result<Self, ForgeError>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ForgeError::wrap_as(ErrorCode::FsError, e, "create cache dir"))?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory cache, for tests and ephemeral runs.
    pub fn in_memory() -> Result<Self, ForgeError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Apply additive migrations up to [`SCHEMA_VERSION`].
    fn migrate(&self) -> Result<(), ForgeError> {
        let mut conn = self.conn.lock().expect("poisoned");
        let tx = conn.transaction().map_err(db_err)?;

        let version: i64 = tx
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(db_err)?;

        // v1: repos; v2: commits; v3: merge_analysis
        let new_tables: &[&str] = match version {
            0 => &STORES,
            1 => &STORES[1..],
            2 => &STORES[2..],
            _ => &[],
        };
        for table in new_tables {
            tx.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                     key TEXT PRIMARY KEY,
                     value TEXT NOT NULL,
                     last_updated INTEGER NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS {table}_last_updated ON {table}(last_updated);"
            ))
            .map_err(db_err)?;
        }

        if version < SCHEMA_VERSION {
            tx.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))
                .map_err(db_err)?;
        }

        tx.commit().map_err(db_err)
    }

    /// Fetch and deserialize the value under `key`.
    pub fn get<T>(&self, store: Store, key: &str) -> Result<Option<T>, ForgeError>
    where
        T: DeserializeOwned,
    {
        let conn = self.conn.lock().expect("poisoned");
        let row: Option<String> = conn
            .query_row(
                &format!("SELECT value FROM {} WHERE key = ?1", store.table()),
                [key],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        match row {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| ForgeError::wrap_as(ErrorCode::FsError, e, "decode cache value")),
            None => Ok(None),
        }
    }

    /// Timestamp of the last write to `key`, unix seconds.
    pub fn last_updated(&self, store: Store, key: &str) -> Result<Option<u64>, ForgeError> {
        let conn = self.conn.lock().expect("poisoned");
        conn.query_row(
            &format!("SELECT last_updated FROM {} WHERE key = ?1", store.table()),
            [key],
            |row| row.get::<_, i64>(0),
        )
        .optional()
        .map_err(db_err)
        .map(|v| v.map(|v| v as u64))
    }

    /// Serialize and store `value` under `key`.
    pub fn put<T>(&self, store: Store, key: &str, value: &T) -> Result<(), ForgeError>
    where
        T: Serialize,
    {
        let json = serde_json::to_string(value)
            .map_err(|e| ForgeError::wrap_as(ErrorCode::FsError, e, "encode cache value"))?;
        let conn = self.conn.lock().expect("poisoned");
        conn.execute(
            &format!(
                "INSERT INTO {} (key, value, last_updated) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = ?2, last_updated = ?3",
                store.table()
            ),
            rusqlite::params![key, json, now_secs() as i64],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Delete the value under `key`.
    pub fn delete(&self, store: Store, key: &str) -> Result<(), ForgeError> {
        let conn = self.conn.lock().expect("poisoned");
        conn.execute(
            &format!("DELETE FROM {} WHERE key = ?1", store.table()),
            [key],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Drop rows older than `days` across all stores, in one transaction.
    /// Returns the number of deleted rows.
    pub fn cleanup_stale(&self, days: u64) -> Result<usize, ForgeError> {
        let cutoff = now_secs().saturating_sub(days * 24 * 60 * 60) as i64;
        let mut conn = self.conn.lock().expect("poisoned");
        let tx = conn.transaction().map_err(db_err)?;
        let mut deleted = 0usize;
        for table in STORES {
            deleted += tx
                .execute(
                    &format!("DELETE FROM {table} WHERE last_updated < ?1"),
                    [cutoff],
                )
                .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;
        Ok(deleted)
    }
}

fn db_err(e: rusqlite::Error) -> ForgeError {
    ForgeError::wrap_as(ErrorCode::FsError, e, "cache store")
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete_roundtrip() {
        let store = CacheStore::in_memory().unwrap();
        store
            .put(Store::Repos, "npub1a/forge", &vec!["x".to_string()])
            .unwrap();
        let value: Option<Vec<String>> = store.get(Store::Repos, "npub1a/forge").unwrap();
        assert_eq!(value, Some(vec!["x".to_string()]));
        assert!(store.last_updated(Store::Repos, "npub1a/forge").unwrap().is_some());

        store.delete(Store::Repos, "npub1a/forge").unwrap();
        let value: Option<Vec<String>> = store.get(Store::Repos, "npub1a/forge").unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn stores_are_independent() {
        let store = CacheStore::in_memory().unwrap();
        store.put(Store::Repos, "k", &1u32).unwrap();
        let other: Option<u32> = store.get(Store::Commits, "k").unwrap();
        assert!(other.is_none());
    }

    #[test]
    fn cleanup_keeps_fresh_rows() {
        let store = CacheStore::in_memory().unwrap();
        store.put(Store::MergeAnalysis, "k", &1u32).unwrap();
        let deleted = store.cleanup_stale(30).unwrap();
        assert_eq!(deleted, 0);
        let value: Option<u32> = store.get(Store::MergeAnalysis, "k").unwrap();
        assert_eq!(value, Some(1));
    }

    #[test]
    fn schema_version_is_stamped() {
        let store = CacheStore::in_memory().unwrap();
        let conn = store.conn.lock().unwrap();
        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }
}
