//! SQLite persistence for the identifier store and the lease tables
//!
//! A single [`Database`] owns one connection behind a mutex. Every public
//! operation that reads and then writes does so inside one transaction, so a
//! caller never observes half of a lease-table step.
//!
//! # Layout
//!
//! ```text
//! workers          (worker_id, created_at)
//! channels         (id, discovered_by, source_id, discovered_at)
//! videos           (id, discovered_by, source_id, discovered_at)
//! playlists        (id, discovered_by, source_id, discovered_at)
//! channel_leases   (entity_id, worker_id, acquired_at, heartbeat_at, completed_at)
//! video_leases     (entity_id, worker_id, acquired_at, heartbeat_at, completed_at)
//! video_annotations(video_id, worker_id, payload, fetched_at)
//! ```

pub mod identifiers;
pub mod leases;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use serde::Serialize;
use thiserror::Error;

pub use leases::{AbortOutcome, Artifact, CommitOutcome};

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// I/O error while preparing the database file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection mutex was poisoned by a panicking holder
    #[error("Database connection lock poisoned")]
    LockPoisoned,
}

/// Result alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS workers (
        worker_id TEXT PRIMARY KEY,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS channels (
        id TEXT PRIMARY KEY,
        discovered_by TEXT,
        source_id TEXT,
        discovered_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS videos (
        id TEXT PRIMARY KEY,
        discovered_by TEXT,
        source_id TEXT,
        discovered_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS playlists (
        id TEXT PRIMARY KEY,
        discovered_by TEXT,
        source_id TEXT,
        discovered_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS channel_leases (
        entity_id TEXT NOT NULL,
        worker_id TEXT NOT NULL,
        acquired_at INTEGER NOT NULL,
        heartbeat_at INTEGER NOT NULL,
        completed_at INTEGER
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_channel_leases_open
        ON channel_leases(entity_id) WHERE completed_at IS NULL;

    CREATE INDEX IF NOT EXISTS idx_channel_leases_entity
        ON channel_leases(entity_id);

    CREATE INDEX IF NOT EXISTS idx_channel_leases_worker
        ON channel_leases(worker_id);

    CREATE TABLE IF NOT EXISTS video_leases (
        entity_id TEXT NOT NULL,
        worker_id TEXT NOT NULL,
        acquired_at INTEGER NOT NULL,
        heartbeat_at INTEGER NOT NULL,
        completed_at INTEGER
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_video_leases_open
        ON video_leases(entity_id) WHERE completed_at IS NULL;

    CREATE INDEX IF NOT EXISTS idx_video_leases_entity
        ON video_leases(entity_id);

    CREATE INDEX IF NOT EXISTS idx_video_leases_worker
        ON video_leases(worker_id);

    CREATE TABLE IF NOT EXISTS video_annotations (
        video_id TEXT PRIMARY KEY,
        worker_id TEXT NOT NULL,
        payload TEXT NOT NULL,
        fetched_at INTEGER NOT NULL
    );
"#;

/// Counters reported by `GET /stats`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStats {
    pub known_channels: u64,
    pub completed_channels: u64,
    pub open_channel_leases: u64,
    pub known_videos: u64,
    pub completed_videos: u64,
    pub open_video_leases: u64,
    pub completed_annotations: u64,
    pub known_playlists: u64,
    pub workers: u64,
}

/// SQLite-backed store shared by the coordinator
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite database initialized");
        Ok(db)
    }

    /// Create in-memory database (for testing)
    pub fn in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.create_schema()?;
        Ok(db)
    }

    fn create_schema(&self) -> StorageResult<()> {
        self.conn()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    /// Collect the counters for `GET /stats`
    pub fn stats(&self) -> StorageResult<DatabaseStats> {
        let conn = self.conn()?;
        let count = |sql: &str| -> StorageResult<u64> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as u64)
        };

        Ok(DatabaseStats {
            known_channels: count("SELECT count(*) FROM channels")?,
            completed_channels: count(
                "SELECT count(*) FROM channel_leases WHERE completed_at IS NOT NULL",
            )?,
            open_channel_leases: count(
                "SELECT count(*) FROM channel_leases WHERE completed_at IS NULL",
            )?,
            known_videos: count("SELECT count(*) FROM videos")?,
            completed_videos: count(
                "SELECT count(*) FROM video_leases WHERE completed_at IS NOT NULL",
            )?,
            open_video_leases: count("SELECT count(*) FROM video_leases WHERE completed_at IS NULL")?,
            completed_annotations: count("SELECT count(*) FROM video_annotations")?,
            known_playlists: count("SELECT count(*) FROM playlists")?,
            workers: count("SELECT count(*) FROM workers")?,
        })
    }
}

/// `?, ?, ?` with `n` placeholders
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
