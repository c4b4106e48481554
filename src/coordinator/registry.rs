//! Worker activity registry
//!
//! Worker tokens are persisted by the lease manager; this registry only keeps
//! in-memory activity counters and classifies each worker as active or
//! dormant. A coordinator restart forgets activity but not identities, so
//! workers seen for the first time since startup are added on demand.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::models::WorkerId;

// ============================================================================
// Worker Status
// ============================================================================

/// Activity status of a known worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Seen within the dormancy window
    #[default]
    Active,

    /// No lease operation within the dormancy window
    Dormant,
}

/// Lease operation a worker performed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Assigned(usize),
    Completed(usize),
    Aborted(usize),
    Heartbeat,
}

// ============================================================================
// Worker Info
// ============================================================================

/// In-memory activity record of one worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub worker_id: WorkerId,
    pub status: WorkerStatus,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub units_assigned: u64,
    pub units_completed: u64,
    pub units_aborted: u64,
    pub heartbeats: u64,
}

impl WorkerInfo {
    /// Create a fresh record
    pub fn new(worker_id: WorkerId) -> Self {
        let now = Utc::now();
        Self {
            worker_id,
            status: WorkerStatus::Active,
            first_seen: now,
            last_seen: now,
            units_assigned: 0,
            units_completed: 0,
            units_aborted: 0,
            heartbeats: 0,
        }
    }

    /// Apply one activity and mark the worker active
    pub fn record(&mut self, activity: Activity) {
        self.last_seen = Utc::now();
        self.status = WorkerStatus::Active;
        match activity {
            Activity::Assigned(n) => self.units_assigned += n as u64,
            Activity::Completed(n) => self.units_completed += n as u64,
            Activity::Aborted(n) => self.units_aborted += n as u64,
            Activity::Heartbeat => self.heartbeats += 1,
        }
    }

    /// Get seconds since last activity
    pub fn seconds_since_seen(&self) -> i64 {
        (Utc::now() - self.last_seen).num_seconds()
    }
}

// ============================================================================
// Worker Registry
// ============================================================================

/// Registry of worker activity
pub struct WorkerRegistry {
    workers: Arc<RwLock<HashMap<WorkerId, WorkerInfo>>>,

    /// Inactivity after which a worker counts as dormant
    dormant_after_secs: i64,
}

impl WorkerRegistry {
    /// Create a new registry
    pub fn new(dormant_after: Duration) -> Self {
        Self {
            workers: Arc::new(RwLock::new(HashMap::new())),
            dormant_after_secs: dormant_after.as_secs() as i64,
        }
    }

    /// Track a newly issued worker
    pub async fn register(&self, worker: &WorkerId) {
        self.workers
            .write()
            .await
            .entry(worker.clone())
            .or_insert_with(|| WorkerInfo::new(worker.clone()));
    }

    /// Record an operation, adding the worker if it was not tracked yet
    pub async fn record(&self, worker: &WorkerId, activity: Activity) {
        let mut workers = self.workers.write().await;
        workers
            .entry(worker.clone())
            .or_insert_with(|| WorkerInfo::new(worker.clone()))
            .record(activity);
    }

    /// Get worker info
    pub async fn get(&self, worker: &WorkerId) -> Option<WorkerInfo> {
        self.workers.read().await.get(worker).cloned()
    }

    /// Get all tracked workers
    pub async fn all(&self) -> Vec<WorkerInfo> {
        self.workers.read().await.values().cloned().collect()
    }

    /// Reclassify every worker by time since last activity
    pub async fn update_statuses(&self) {
        let mut workers = self.workers.write().await;

        for info in workers.values_mut() {
            info.status = if info.seconds_since_seen() > self.dormant_after_secs {
                WorkerStatus::Dormant
            } else {
                WorkerStatus::Active
            };
        }
    }

    /// Get registry statistics
    pub async fn stats(&self) -> RegistryStats {
        let workers = self.workers.read().await;

        let mut stats = RegistryStats {
            tracked: workers.len(),
            ..Default::default()
        };
        for info in workers.values() {
            match info.status {
                WorkerStatus::Active => stats.active += 1,
                WorkerStatus::Dormant => stats.dormant += 1,
            }
            stats.units_completed += info.units_completed;
            stats.units_aborted += info.units_aborted;
        }
        stats
    }
}

/// Registry statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub tracked: usize,
    pub active: usize,
    pub dormant: usize,
    pub units_completed: u64,
    pub units_aborted: u64,
}

// ============================================================================
// Tests
// ============================================================================
