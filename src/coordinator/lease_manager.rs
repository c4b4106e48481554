//! Lease manager
//!
//! Owns the lease tables on behalf of the HTTP layer. Request bodies arrive
//! as raw JSON values and are validated here before anything is written, so
//! a rejected request never leaves a partial mutation behind.
//!
//! Assignment is the only read-then-write step; it runs in one transaction
//! under the work type's [`AdmissionGate`]. Completion, abort and
//! heartbeat are single transactions and need no gate.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use super::config::CoordinatorConfig;
use super::gate::{AdmissionGate, GateClosed};
use super::registry::{Activity, WorkerRegistry};
use crate::metrics;
use crate::models::{EntityKind, LimitRange, ValidationError, WorkType, WorkerId};
use crate::storage::{
    AbortOutcome, Artifact, CommitOutcome, Database, DatabaseStats, StorageError, StorageResult,
};

// ============================================================================
// Errors
// ============================================================================

/// Lease manager errors
#[derive(Error, Debug)]
pub enum LeaseError {
    /// The `worker` query parameter is absent or empty
    #[error("Missing worker parameter")]
    MissingWorker,

    /// The worker token was never issued
    #[error("Unknown worker: {0}")]
    UnknownWorker(String),

    /// The worker holds no lease for some entities of the batch
    #[error("Lease not held for {} entities", .0.len())]
    NotHeld(Vec<String>),

    /// Some entities of the batch are not in the identifier store
    #[error("Unknown entities: {}", .0.len())]
    UnknownEntity(Vec<String>),

    /// Malformed IDs or payload
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Database failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The admission gate was closed during shutdown
    #[error(transparent)]
    GateClosed(#[from] GateClosed),

    /// A blocking database task panicked or was cancelled
    #[error("Database task failed: {0}")]
    Task(String),
}

impl LeaseError {
    /// Stable numeric code for client-facing errors
    ///
    /// `None` means the failure is internal and not the caller's fault.
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::MissingWorker => Some(1),
            Self::UnknownWorker(_) => Some(2),
            Self::NotHeld(_) => Some(3),
            Self::UnknownEntity(_) => Some(4),
            Self::Validation(e) => Some(e.code()),
            Self::Storage(_) | Self::GateClosed(_) | Self::Task(_) => None,
        }
    }

    /// Whether the worker should give up the unit and re-acquire work
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::NotHeld(_) | Self::UnknownEntity(_))
    }
}

// ============================================================================
// Body Parsing
// ============================================================================

fn expect_id_array(kind: EntityKind, body: &Value) -> Result<Vec<String>, ValidationError> {
    let items = body.as_array().ok_or(ValidationError::ExpectedArray)?;
    let ids = items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| kind.malformed(item.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    kind.validate_all(&ids)?;
    Ok(ids)
}

/// `{channelID: [videoID, ...]}`
fn parse_channel_results(body: &Value) -> Result<Vec<(String, Artifact)>, ValidationError> {
    let map = body.as_object().ok_or(ValidationError::ExpectedObject)?;

    for channel in map.keys() {
        EntityKind::Channel.validate(channel)?;
    }

    map.iter()
        .map(|(channel, videos)| {
            let videos = videos
                .as_array()
                .ok_or_else(|| ValidationError::MalformedVideoId(videos.to_string()))?
                .iter()
                .map(|v| match v.as_str() {
                    Some(id) if EntityKind::Video.is_valid(id) => Ok(id.to_string()),
                    _ => Err(ValidationError::MalformedVideoId(v.to_string())),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok((channel.clone(), Artifact::VideoList(videos)))
        })
        .collect()
}

/// `{videoID: "annotation document"}`
fn parse_annotations(body: &Value) -> Result<Vec<(String, Artifact)>, ValidationError> {
    let map = body.as_object().ok_or(ValidationError::ExpectedObject)?;

    for video in map.keys() {
        EntityKind::Video.validate(video)?;
    }

    map.iter()
        .map(|(video, payload)| match payload.as_str() {
            Some(doc) => Ok((video.clone(), Artifact::Annotation(doc.to_string()))),
            None => Err(ValidationError::MalformedPayload(video.clone())),
        })
        .collect()
}

/// `{"<plural kind>": [id, ...]}`
fn parse_submission(kind: EntityKind, body: &Value) -> Result<Vec<String>, ValidationError> {
    let map = body.as_object().ok_or(ValidationError::ExpectedObject)?;
    let ids = map
        .get(kind.plural())
        .ok_or_else(|| ValidationError::MalformedPayload(kind.plural().to_string()))?;
    expect_id_array(kind, ids)
}

// ============================================================================
// Lease Manager
// ============================================================================

/// Lease operations over every work type
pub struct LeaseManager {
    db: Arc<Database>,
    registry: Arc<WorkerRegistry>,
    channel_gate: AdmissionGate,
    video_gate: AdmissionGate,
    channel_limits: LimitRange,
    video_limits: LimitRange,
    lease_ttl: chrono::Duration,
}

impl LeaseManager {
    /// Create a manager over an opened database
    pub fn new(db: Arc<Database>, registry: Arc<WorkerRegistry>, config: &CoordinatorConfig) -> Self {
        Self {
            db,
            registry,
            channel_gate: AdmissionGate::exclusive(),
            video_gate: AdmissionGate::exclusive(),
            channel_limits: config.limits(WorkType::Channel),
            video_limits: config.limits(WorkType::Video),
            lease_ttl: chrono::Duration::seconds(config.lease_ttl_secs as i64),
        }
    }

    /// Underlying database
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Worker activity registry
    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// Admission gate serializing assignment of a work type
    pub fn gate(&self, work_type: WorkType) -> &AdmissionGate {
        match work_type {
            WorkType::Channel => &self.channel_gate,
            WorkType::Video => &self.video_gate,
        }
    }

    fn limits(&self, work_type: WorkType) -> LimitRange {
        match work_type {
            WorkType::Channel => self.channel_limits,
            WorkType::Video => self.video_limits,
        }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, LeaseError>
    where
        F: FnOnce(&Database) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| LeaseError::Task(e.to_string()))?
            .map_err(LeaseError::from)
    }

    // ------------------------------------------------------------------------
    // Workers
    // ------------------------------------------------------------------------

    /// Issue and persist a fresh worker token
    pub async fn register_worker(&self) -> Result<WorkerId, LeaseError> {
        let worker = WorkerId::generate();
        let stored = worker.clone();
        self.blocking(move |db| db.insert_worker(&stored)).await?;
        self.registry.register(&worker).await;

        tracing::info!(worker = %worker, "Issued worker token");
        Ok(worker)
    }

    /// Resolve the `worker` query parameter to a known worker
    pub async fn authenticate(&self, raw: Option<&str>) -> Result<WorkerId, LeaseError> {
        let token = match raw {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => return Err(LeaseError::MissingWorker),
        };

        let lookup = token.clone();
        if self.blocking(move |db| db.worker_exists(&lookup)).await? {
            Ok(WorkerId::new(token))
        } else {
            Err(LeaseError::UnknownWorker(token))
        }
    }

    // ------------------------------------------------------------------------
    // Lease Operations
    // ------------------------------------------------------------------------

    /// Lease up to `limit` never-leased entities to `worker`
    ///
    /// The permit moves into the blocking task, so the gate stays held until
    /// the insert has finished even when the caller is cancelled.
    pub async fn assign_batch(
        &self,
        work_type: WorkType,
        worker: &WorkerId,
        raw_limit: Option<&str>,
    ) -> Result<Vec<String>, LeaseError> {
        let limit = self.limits(work_type).clamp(raw_limit);

        let permit = self.gate(work_type).acquire().await?;
        metrics::record_gate_wait(work_type.as_str(), permit.waited().as_secs_f64());

        let lessee = worker.clone();
        let ids = self
            .blocking(move |db| {
                let _permit = permit;
                db.lease_unleased(work_type, &lessee, limit, Utc::now())
            })
            .await?;
        tracing::debug!(
            work_type = %work_type,
            worker = %worker,
            limit,
            assigned = ids.len(),
            "Assigned batch"
        );
        metrics::record_leases_assigned(work_type.as_str(), ids.len());
        self.registry.record(worker, Activity::Assigned(ids.len())).await;
        Ok(ids)
    }

    /// Validate and commit a completion batch
    ///
    /// Returns the number of leases closed by this call.
    pub async fn complete(
        &self,
        work_type: WorkType,
        worker: &WorkerId,
        body: &Value,
    ) -> Result<usize, LeaseError> {
        let artifacts = match work_type {
            WorkType::Channel => parse_channel_results(body)?,
            WorkType::Video => parse_annotations(body)?,
        };
        let batch_size = artifacts.len();

        let lessee = worker.clone();
        let outcome = self
            .blocking(move |db| db.complete_leases(work_type, &lessee, &artifacts, Utc::now()))
            .await?;

        match outcome {
            CommitOutcome::Committed { closed, discovered } => {
                tracing::debug!(
                    work_type = %work_type,
                    worker = %worker,
                    batch_size,
                    closed,
                    discovered,
                    "Completed batch"
                );
                metrics::record_leases_completed(work_type.as_str(), closed);
                self.registry.record(worker, Activity::Completed(closed)).await;
                Ok(closed)
            }
            CommitOutcome::NotHeld(missing) => {
                tracing::warn!(
                    work_type = %work_type,
                    worker = %worker,
                    missing = missing.len(),
                    "Rejected completion for leases not held"
                );
                Err(LeaseError::NotHeld(missing))
            }
            CommitOutcome::UnknownEntity(missing) => {
                tracing::warn!(
                    work_type = %work_type,
                    worker = %worker,
                    missing = missing.len(),
                    "Rejected completion for unknown entities"
                );
                Err(LeaseError::UnknownEntity(missing))
            }
        }
    }

    /// Give back the worker's open leases on the listed entities
    pub async fn abort(
        &self,
        work_type: WorkType,
        worker: &WorkerId,
        body: &Value,
    ) -> Result<usize, LeaseError> {
        let ids = expect_id_array(work_type.entity_kind(), body)?;

        let lessee = worker.clone();
        let outcome = self
            .blocking(move |db| db.abort_leases(work_type, &lessee, &ids))
            .await?;

        match outcome {
            AbortOutcome::Aborted(deleted) => {
                tracing::debug!(work_type = %work_type, worker = %worker, deleted, "Aborted leases");
                metrics::record_leases_aborted(work_type.as_str(), deleted);
                self.registry.record(worker, Activity::Aborted(deleted)).await;
                Ok(deleted)
            }
            AbortOutcome::NotHeld(missing) => Err(LeaseError::NotHeld(missing)),
        }
    }

    /// Refresh the worker's open leases; unknown or stale IDs are ignored
    pub async fn heartbeat(
        &self,
        work_type: WorkType,
        worker: &WorkerId,
        body: &Value,
    ) -> Result<usize, LeaseError> {
        let ids = expect_id_array(work_type.entity_kind(), body)?;

        let lessee = worker.clone();
        let refreshed = self
            .blocking(move |db| db.heartbeat_leases(work_type, &lessee, &ids, Utc::now()))
            .await?;

        self.registry.record(worker, Activity::Heartbeat).await;
        Ok(refreshed)
    }

    // ------------------------------------------------------------------------
    // Reclaiming
    // ------------------------------------------------------------------------

    /// Delete open leases whose heartbeat is older than `cutoff`
    pub async fn reclaim_stale(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<(WorkType, usize)>, LeaseError> {
        let reclaimed = self.blocking(move |db| db.reclaim_expired(cutoff)).await?;
        for (work_type, count) in &reclaimed {
            metrics::record_leases_reclaimed(work_type.as_str(), *count);
        }
        Ok(reclaimed)
    }

    /// Delete open leases that outlived the configured TTL
    pub async fn reclaim_expired(&self) -> Result<Vec<(WorkType, usize)>, LeaseError> {
        self.reclaim_stale(Utc::now() - self.lease_ttl).await
    }

    // ------------------------------------------------------------------------
    // Identifier Store
    // ------------------------------------------------------------------------

    /// Insert discovered IDs, returning the ones that were new
    pub async fn submit_ids(&self, kind: EntityKind, body: &Value) -> Result<Vec<String>, LeaseError> {
        let ids = parse_submission(kind, body)?;
        let inserted = self
            .blocking(move |db| db.insert_ids(kind, &ids, None, None))
            .await?;
        tracing::debug!(kind = %kind, inserted = inserted.len(), "Accepted submission");
        Ok(inserted)
    }

    /// Counters over the identifier store and lease tables
    pub async fn stats(&self) -> Result<DatabaseStats, LeaseError> {
        self.blocking(|db| db.stats()).await
    }
}
