//! Lease table operations
//!
//! One lease table exists per [`WorkType`]. A partial unique index on
//! `entity_id WHERE completed_at IS NULL` keeps at most one open lease per
//! entity even if a caller bypasses the admission gate.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Row, Transaction};

use super::{placeholders, Database, StorageResult};
use crate::models::{from_millis, EntityKind, Lease, WorkType, WorkerId};

/// Result of a completion attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Every lease in the batch is closed and its artifact persisted
    Committed {
        /// Leases that moved from open to completed
        closed: usize,
        /// Identifiers newly added to the store by the artifacts
        discovered: usize,
    },
    /// The worker holds no lease for these entities
    NotHeld(Vec<String>),
    /// These entities are absent from the identifier store
    UnknownEntity(Vec<String>),
}

/// Result of an abort attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortOutcome {
    /// Number of open leases deleted
    Aborted(usize),
    /// The worker holds no lease for these entities
    NotHeld(Vec<String>),
}

/// Work product submitted with a completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// Videos discovered while scanning a channel
    VideoList(Vec<String>),
    /// Raw annotation document of a video
    Annotation(String),
}

fn lease_from_row(work_type: WorkType, row: &Row<'_>) -> rusqlite::Result<Lease> {
    Ok(Lease {
        work_type,
        entity_id: row.get(0)?,
        worker_id: WorkerId::new(row.get::<_, String>(1)?),
        acquired_at: from_millis(row.get(2)?),
        heartbeat_at: from_millis(row.get(3)?),
        completed_at: row.get::<_, Option<i64>>(4)?.map(from_millis),
    })
}

fn dedup(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter().filter(|id| seen.insert(id.as_str())).cloned().collect()
}

/// Entities in `ids` for which `worker` has a lease row, open or completed
fn held_by(
    tx: &Transaction<'_>,
    work_type: WorkType,
    worker: &WorkerId,
    ids: &[String],
) -> StorageResult<HashSet<String>> {
    let sql = format!(
        "SELECT DISTINCT entity_id FROM {} WHERE worker_id = ? AND entity_id IN ({})",
        work_type.lease_table(),
        placeholders(ids.len())
    );
    let mut values = vec![Value::Text(worker.as_str().to_string())];
    values.extend(ids.iter().cloned().map(Value::Text));

    let mut stmt = tx.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values), |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<Result<HashSet<_>, _>>()?)
}

fn missing_from(ids: &[String], present: &HashSet<String>) -> Vec<String> {
    ids.iter().filter(|id| !present.contains(*id)).cloned().collect()
}

fn unleased(tx: &Transaction<'_>, work_type: WorkType, limit: u32) -> StorageResult<Vec<String>> {
    let sql = format!(
        "SELECT e.id FROM {entities} e \
         LEFT JOIN {leases} l ON e.id = l.entity_id \
         WHERE l.entity_id IS NULL \
         ORDER BY e.rowid \
         LIMIT ?1",
        entities = work_type.entity_kind().table(),
        leases = work_type.lease_table(),
    );
    let mut stmt = tx.prepare(&sql)?;
    let rows = stmt.query_map([limit], |row| row.get(0))?;
    Ok(rows.collect::<Result<Vec<String>, _>>()?)
}

fn open_leases_for(
    tx: &Transaction<'_>,
    work_type: WorkType,
    worker: &WorkerId,
    ids: &[String],
    now: DateTime<Utc>,
) -> StorageResult<()> {
    let sql = format!(
        "INSERT INTO {} (entity_id, worker_id, acquired_at, heartbeat_at, completed_at) \
         VALUES (?1, ?2, ?3, ?3, NULL)",
        work_type.lease_table()
    );
    let mut stmt = tx.prepare(&sql)?;
    let ts = now.timestamp_millis();
    for id in ids {
        stmt.execute(params![id, worker.as_str(), ts])?;
    }
    Ok(())
}

impl Database {
    /// Select up to `limit` never-leased entities and lease them to
    /// `worker` in one transaction
    ///
    /// Callers must hold the admission gate for `work_type` until this
    /// returns.
    pub fn lease_unleased(
        &self,
        work_type: WorkType,
        worker: &WorkerId,
        limit: u32,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<String>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let ids = unleased(&tx, work_type, limit)?;
        open_leases_for(&tx, work_type, worker, &ids, now)?;
        tx.commit()?;
        Ok(ids)
    }

    /// Entities of the work type's kind that have no lease row at all
    pub fn select_unleased(&self, work_type: WorkType, limit: u32) -> StorageResult<Vec<String>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        unleased(&tx, work_type, limit)
    }

    /// Insert one open lease per entity, stamped with `now`
    pub fn insert_leases(
        &self,
        work_type: WorkType,
        worker: &WorkerId,
        ids: &[String],
        now: DateTime<Utc>,
    ) -> StorageResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        open_leases_for(&tx, work_type, worker, ids, now)?;
        tx.commit()?;
        Ok(ids.len())
    }

    /// Close the worker's leases and persist their artifacts, all or nothing
    ///
    /// A lease counts as held when the worker has a row for the entity, open
    /// or already completed by that same worker. Re-completing a closed lease
    /// leaves its timestamp alone and duplicate artifacts are ignored.
    pub fn complete_leases(
        &self,
        work_type: WorkType,
        worker: &WorkerId,
        artifacts: &[(String, Artifact)],
        now: DateTime<Utc>,
    ) -> StorageResult<CommitOutcome> {
        let ids: Vec<String> = dedup(&artifacts.iter().map(|(id, _)| id.clone()).collect::<Vec<_>>());
        if ids.is_empty() {
            return Ok(CommitOutcome::Committed {
                closed: 0,
                discovered: 0,
            });
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let held = held_by(&tx, work_type, worker, &ids)?;
        let not_held = missing_from(&ids, &held);
        if !not_held.is_empty() {
            return Ok(CommitOutcome::NotHeld(not_held));
        }

        let known: HashSet<String> = {
            let sql = format!(
                "SELECT id FROM {} WHERE id IN ({})",
                work_type.entity_kind().table(),
                placeholders(ids.len())
            );
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(ids.iter()), |row| row.get::<_, String>(0))?;
            rows.collect::<Result<_, _>>()?
        };
        let unknown = missing_from(&ids, &known);
        if !unknown.is_empty() {
            return Ok(CommitOutcome::UnknownEntity(unknown));
        }

        let ts = now.timestamp_millis();
        let mut closed = 0;
        let mut discovered = 0;

        {
            let close_sql = format!(
                "UPDATE {} SET completed_at = ?1 \
                 WHERE worker_id = ?2 AND entity_id = ?3 AND completed_at IS NULL",
                work_type.lease_table()
            );
            let mut close = tx.prepare(&close_sql)?;
            let video_sql = format!(
                "INSERT OR IGNORE INTO {} (id, discovered_by, source_id, discovered_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                EntityKind::Video.table()
            );
            let mut insert_video = tx.prepare(&video_sql)?;
            let mut insert_annotation = tx.prepare(
                "INSERT OR IGNORE INTO video_annotations (video_id, worker_id, payload, fetched_at) \
                 VALUES (?1, ?2, ?3, ?4)",
            )?;

            let mut closed_ids = BTreeSet::new();
            for (entity_id, artifact) in artifacts {
                match artifact {
                    Artifact::VideoList(videos) => {
                        for video in videos {
                            discovered +=
                                insert_video.execute(params![video, worker.as_str(), entity_id, ts])?;
                        }
                    }
                    Artifact::Annotation(payload) => {
                        insert_annotation.execute(params![entity_id, worker.as_str(), payload, ts])?;
                    }
                }
                if closed_ids.insert(entity_id.as_str()) {
                    closed += close.execute(params![ts, worker.as_str(), entity_id])?;
                }
            }
        }

        tx.commit()?;
        Ok(CommitOutcome::Committed { closed, discovered })
    }

    /// Delete the worker's open leases on `ids`
    ///
    /// Rejected as a whole when any entity has no lease row of this worker.
    /// Completed leases are left untouched.
    pub fn abort_leases(
        &self,
        work_type: WorkType,
        worker: &WorkerId,
        ids: &[String],
    ) -> StorageResult<AbortOutcome> {
        let ids = dedup(ids);
        if ids.is_empty() {
            return Ok(AbortOutcome::Aborted(0));
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let held = held_by(&tx, work_type, worker, &ids)?;
        let not_held = missing_from(&ids, &held);
        if !not_held.is_empty() {
            return Ok(AbortOutcome::NotHeld(not_held));
        }

        let sql = format!(
            "DELETE FROM {} WHERE completed_at IS NULL AND worker_id = ? AND entity_id IN ({})",
            work_type.lease_table(),
            placeholders(ids.len())
        );
        let mut values = vec![Value::Text(worker.as_str().to_string())];
        values.extend(ids.into_iter().map(Value::Text));
        let deleted = tx.execute(&sql, params_from_iter(values))?;

        tx.commit()?;
        Ok(AbortOutcome::Aborted(deleted))
    }

    /// Refresh `heartbeat_at` on the worker's open leases among `ids`
    ///
    /// Returns how many leases were refreshed; stale IDs are skipped.
    pub fn heartbeat_leases(
        &self,
        work_type: WorkType,
        worker: &WorkerId,
        ids: &[String],
        now: DateTime<Utc>,
    ) -> StorageResult<usize> {
        let ids = dedup(ids);
        if ids.is_empty() {
            return Ok(0);
        }

        let conn = self.conn()?;
        let sql = format!(
            "UPDATE {} SET heartbeat_at = ? \
             WHERE completed_at IS NULL AND worker_id = ? AND entity_id IN ({})",
            work_type.lease_table(),
            placeholders(ids.len())
        );
        let mut values = vec![
            Value::Integer(now.timestamp_millis()),
            Value::Text(worker.as_str().to_string()),
        ];
        values.extend(ids.into_iter().map(Value::Text));
        Ok(conn.execute(&sql, params_from_iter(values))?)
    }

    /// Delete every open lease whose heartbeat is older than `cutoff`
    pub fn reclaim_expired(&self, cutoff: DateTime<Utc>) -> StorageResult<Vec<(WorkType, usize)>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let ts = cutoff.timestamp_millis();

        let mut reclaimed = Vec::with_capacity(WorkType::ALL.len());
        for work_type in WorkType::ALL {
            let sql = format!(
                "DELETE FROM {} WHERE completed_at IS NULL AND heartbeat_at < ?1",
                work_type.lease_table()
            );
            reclaimed.push((work_type, tx.execute(&sql, [ts])?));
        }

        tx.commit()?;
        Ok(reclaimed)
    }

    /// Most recent lease row of an entity
    pub fn lease(&self, work_type: WorkType, entity_id: &str) -> StorageResult<Option<Lease>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT entity_id, worker_id, acquired_at, heartbeat_at, completed_at FROM {} \
             WHERE entity_id = ?1 ORDER BY rowid DESC LIMIT 1",
            work_type.lease_table()
        );
        Ok(conn
            .query_row(&sql, [entity_id], |row| lease_from_row(work_type, row))
            .optional()?)
    }

    /// All open leases of a work type
    pub fn open_leases(&self, work_type: WorkType) -> StorageResult<Vec<Lease>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT entity_id, worker_id, acquired_at, heartbeat_at, completed_at FROM {} \
             WHERE completed_at IS NULL ORDER BY rowid",
            work_type.lease_table()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| lease_from_row(work_type, row))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Number of open leases of a work type
    pub fn count_open_leases(&self, work_type: WorkType) -> StorageResult<u64> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT count(*) FROM {} WHERE completed_at IS NULL",
            work_type.lease_table()
        );
        let n: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(n as u64)
    }
}
