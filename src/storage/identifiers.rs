//! Identifier store and worker table
//!
//! Inserts are idempotent: a duplicate ID is ignored rather than reported.

use chrono::Utc;
use rusqlite::{params, params_from_iter, OptionalExtension};

use super::{placeholders, Database, StorageResult};
use crate::models::{EntityKind, WorkerId};

impl Database {
    /// Insert IDs of one kind, returning only the ones that were new
    ///
    /// IDs are expected to be validated by the caller. Repeated IDs inside the
    /// batch are reported once.
    pub fn insert_ids(
        &self,
        kind: EntityKind,
        ids: &[String],
        discovered_by: Option<&str>,
        source_id: Option<&str>,
    ) -> StorageResult<Vec<String>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().timestamp_millis();
        let mut inserted = Vec::new();

        {
            let sql = format!(
                "INSERT OR IGNORE INTO {} (id, discovered_by, source_id, discovered_at) VALUES (?1, ?2, ?3, ?4)",
                kind.table()
            );
            let mut stmt = tx.prepare(&sql)?;
            for id in ids {
                if stmt.execute(params![id, discovered_by, source_id, now])? == 1 {
                    inserted.push(id.clone());
                }
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    /// Whether an ID is known
    pub fn contains_id(&self, kind: EntityKind, id: &str) -> StorageResult<bool> {
        let conn = self.conn()?;
        let sql = format!("SELECT 1 FROM {} WHERE id = ?1", kind.table());
        let found: Option<i64> = conn.query_row(&sql, [id], |row| row.get(0)).optional()?;
        Ok(found.is_some())
    }

    /// Number of known IDs of a kind
    pub fn count_ids(&self, kind: EntityKind) -> StorageResult<u64> {
        let conn = self.conn()?;
        let sql = format!("SELECT count(*) FROM {}", kind.table());
        let n: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Which of `ids` are known
    pub fn known_ids(&self, kind: EntityKind, ids: &[String]) -> StorageResult<Vec<String>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let sql = format!(
            "SELECT id FROM {} WHERE id IN ({})",
            kind.table(),
            placeholders(ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(ids.iter()), |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<String>, _>>()?)
    }

    /// Source entity a video was discovered from, if recorded
    pub fn video_source(&self, video_id: &str) -> StorageResult<Option<String>> {
        let conn = self.conn()?;
        let source: Option<Option<String>> = conn
            .query_row(
                "SELECT source_id FROM videos WHERE id = ?1",
                [video_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(source.flatten())
    }

    /// Stored annotation payload of a video
    pub fn annotation(&self, video_id: &str) -> StorageResult<Option<String>> {
        let conn = self.conn()?;
        let payload = conn
            .query_row(
                "SELECT payload FROM video_annotations WHERE video_id = ?1",
                [video_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(payload)
    }

    /// Number of stored annotations
    pub fn count_annotations(&self) -> StorageResult<u64> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row("SELECT count(*) FROM video_annotations", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Persist a newly issued worker token
    pub fn insert_worker(&self, worker: &WorkerId) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO workers (worker_id, created_at) VALUES (?1, ?2)",
            params![worker.as_str(), Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    /// Whether a worker token was issued by this coordinator
    pub fn worker_exists(&self, worker: &str) -> StorageResult<bool> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM workers WHERE worker_id = ?1", [worker], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(found.is_some())
    }
}
