//! Worker side of the lease protocol
//!
//! One [`LeaseClient`] per work type. It keeps a local backlog of leased
//! units, refills it from the coordinator when it runs dry (concurrent
//! callers share a single in-flight refill), buffers finished artifacts until
//! the submission threshold or until the oldest one has waited too long, and
//! tracks every unit in a [`UnitLedger`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::time::Instant;

use super::state::{LedgerCounts, UnitLedger, UnitState};
use crate::coordinator::{ClientError, CoordinatorClient};
use crate::metrics;
use crate::models::{WorkType, WorkerId};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Lease API
// ============================================================================

/// Coordinator operations a worker depends on
#[async_trait]
pub trait LeaseApi: Send + Sync {
    async fn new_worker(&self) -> Result<WorkerId, ClientError>;

    async fn assign(
        &self,
        work_type: WorkType,
        worker: &WorkerId,
        limit: u32,
    ) -> Result<Vec<String>, ClientError>;

    async fn complete(
        &self,
        work_type: WorkType,
        worker: &WorkerId,
        batch: &Value,
    ) -> Result<(), ClientError>;

    async fn abort(
        &self,
        work_type: WorkType,
        worker: &WorkerId,
        ids: &[String],
    ) -> Result<(), ClientError>;

    async fn ping(
        &self,
        work_type: WorkType,
        worker: &WorkerId,
        ids: &[String],
    ) -> Result<(), ClientError>;
}

#[async_trait]
impl LeaseApi for CoordinatorClient {
    async fn new_worker(&self) -> Result<WorkerId, ClientError> {
        CoordinatorClient::new_worker(self).await
    }

    async fn assign(
        &self,
        work_type: WorkType,
        worker: &WorkerId,
        limit: u32,
    ) -> Result<Vec<String>, ClientError> {
        CoordinatorClient::assign(self, work_type, worker, limit).await
    }

    async fn complete(
        &self,
        work_type: WorkType,
        worker: &WorkerId,
        batch: &Value,
    ) -> Result<(), ClientError> {
        CoordinatorClient::complete(self, work_type, worker, batch).await
    }

    async fn abort(
        &self,
        work_type: WorkType,
        worker: &WorkerId,
        ids: &[String],
    ) -> Result<(), ClientError> {
        CoordinatorClient::abort(self, work_type, worker, ids).await
    }

    async fn ping(
        &self,
        work_type: WorkType,
        worker: &WorkerId,
        ids: &[String],
    ) -> Result<(), ClientError> {
        CoordinatorClient::ping(self, work_type, worker, ids).await
    }
}

// ============================================================================
// Flush Outcome
// ============================================================================

/// Result of sending buffered artifacts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushOutcome {
    pub done: usize,
    pub lost: usize,
}

// ============================================================================
// Result Buffer
// ============================================================================

/// Finished artifacts waiting for the next completion request
#[derive(Default)]
struct ResultBuffer {
    items: Map<String, Value>,
    /// When the oldest buffered artifact arrived
    since: Option<Instant>,
}

impl ResultBuffer {
    fn take(&mut self) -> Map<String, Value> {
        self.since = None;
        std::mem::take(&mut self.items)
    }
}

// ============================================================================
// Lease Client
// ============================================================================

pub struct LeaseClient {
    api: Arc<dyn LeaseApi>,
    worker: WorkerId,
    work_type: WorkType,
    fetch_limit: u32,
    threshold: usize,
    backlog: Mutex<VecDeque<String>>,
    /// Held while a refill request is in flight
    refill: tokio::sync::Mutex<()>,
    /// Completed refills
    generation: AtomicU64,
    buffer: Mutex<ResultBuffer>,
    ledger: Mutex<UnitLedger>,
}

impl LeaseClient {
    pub fn new(
        api: Arc<dyn LeaseApi>,
        worker: WorkerId,
        work_type: WorkType,
        fetch_limit: u32,
        threshold: usize,
    ) -> Self {
        Self {
            api,
            worker,
            work_type,
            fetch_limit,
            threshold: threshold.max(1),
            backlog: Mutex::new(VecDeque::new()),
            refill: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            buffer: Mutex::new(ResultBuffer::default()),
            ledger: Mutex::new(UnitLedger::new()),
        }
    }

    pub fn worker(&self) -> &WorkerId {
        &self.worker
    }

    pub fn work_type(&self) -> WorkType {
        self.work_type
    }

    pub fn backlog_len(&self) -> usize {
        lock(&self.backlog).len()
    }

    pub fn buffered(&self) -> usize {
        lock(&self.buffer).items.len()
    }

    /// How long the oldest buffered artifact has waited
    pub fn buffer_age(&self) -> Option<Duration> {
        lock(&self.buffer).since.map(|since| since.elapsed())
    }

    pub fn counts(&self) -> LedgerCounts {
        lock(&self.ledger).counts()
    }

    pub fn state(&self, id: &str) -> Option<UnitState> {
        lock(&self.ledger).state(id)
    }

    fn mark(&self, id: &str, next: UnitState) {
        if let Err(e) = lock(&self.ledger).transition(id, next) {
            tracing::debug!(work_type = %self.work_type, error = %e, "Ignoring state change");
        }
    }

    // ------------------------------------------------------------------------
    // Acquisition
    // ------------------------------------------------------------------------

    /// Next leased unit, refilling from the coordinator when the backlog is
    /// empty. `Ok(None)` means the coordinator had nothing to hand out.
    pub async fn next_unit(&self) -> Result<Option<String>, ClientError> {
        if let Some(id) = lock(&self.backlog).pop_front() {
            return Ok(Some(id));
        }

        let seen = self.generation.load(Ordering::Acquire);
        let _refill = self.refill.lock().await;

        // Someone else refilled while we waited; share their result
        if let Some(id) = lock(&self.backlog).pop_front() {
            return Ok(Some(id));
        }
        if self.generation.load(Ordering::Acquire) != seen {
            return Ok(None);
        }

        tracing::info!(work_type = %self.work_type, limit = self.fetch_limit, "Fetching new units");
        let ids = self
            .api
            .assign(self.work_type, &self.worker, self.fetch_limit)
            .await?;
        self.generation.fetch_add(1, Ordering::Release);

        {
            let mut ledger = lock(&self.ledger);
            for id in &ids {
                if let Err(e) = ledger.lease(id.as_str()) {
                    tracing::warn!(work_type = %self.work_type, error = %e, "Unit leased twice");
                }
            }
        }

        let mut backlog = lock(&self.backlog);
        backlog.extend(ids);
        Ok(backlog.pop_front())
    }

    // ------------------------------------------------------------------------
    // Lease Maintenance
    // ------------------------------------------------------------------------

    /// Refresh the lease on a unit still being processed
    pub async fn heartbeat(&self, id: &str) -> Result<(), ClientError> {
        tracing::debug!(work_type = %self.work_type, id = %id, "Pinging unit");
        self.api
            .ping(self.work_type, &self.worker, &[id.to_string()])
            .await?;
        self.mark(id, UnitState::Heartbeating);
        Ok(())
    }

    /// Give a unit back after an unrecoverable failure
    ///
    /// The unit is aborted locally even when the request fails; the
    /// coordinator's TTL sweep returns it in that case.
    pub async fn abort(&self, id: &str) -> Result<(), ClientError> {
        tracing::info!(work_type = %self.work_type, id = %id, "Aborting unit");
        self.mark(id, UnitState::Aborted);
        metrics::record_units_aborted(self.work_type.as_str(), 1);
        self.api
            .abort(self.work_type, &self.worker, &[id.to_string()])
            .await
    }

    // ------------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------------

    /// Buffer a finished unit, flushing once the threshold is reached
    pub async fn commit(&self, id: &str, artifact: Value) -> Option<FlushOutcome> {
        self.mark(id, UnitState::Completing);

        let full = {
            let mut buffer = lock(&self.buffer);
            buffer.since.get_or_insert_with(Instant::now);
            buffer.items.insert(id.to_string(), artifact);
            buffer.items.len() >= self.threshold
        };

        if full {
            Some(self.flush().await)
        } else {
            None
        }
    }

    /// Send every buffered artifact in one completion request
    ///
    /// A rejected batch is never resubmitted: its units are marked lost. A
    /// batch whose retries ran out is dropped the same way and comes back
    /// through lease reclamation.
    pub async fn flush(&self) -> FlushOutcome {
        let batch = lock(&self.buffer).take();
        if batch.is_empty() {
            return FlushOutcome::default();
        }

        let ids: Vec<String> = batch.keys().cloned().collect();
        tracing::info!(work_type = %self.work_type, units = ids.len(), "Submitting results");

        let result = self
            .api
            .complete(self.work_type, &self.worker, &Value::Object(batch))
            .await;

        let (next, outcome) = match result {
            Ok(()) => {
                metrics::record_units_processed(self.work_type.as_str(), ids.len());
                (
                    UnitState::Done,
                    FlushOutcome {
                        done: ids.len(),
                        lost: 0,
                    },
                )
            }
            Err(e) => {
                if e.is_conflict() {
                    tracing::warn!(work_type = %self.work_type, units = ids.len(), error = %e, "Leases no longer held");
                } else {
                    tracing::error!(work_type = %self.work_type, units = ids.len(), error = %e, "Dropping results");
                }
                metrics::record_units_lost(self.work_type.as_str(), ids.len());
                (
                    UnitState::Lost,
                    FlushOutcome {
                        done: 0,
                        lost: ids.len(),
                    },
                )
            }
        };

        for id in &ids {
            self.mark(id, next);
        }
        outcome
    }

    /// Flush once the oldest buffered artifact has waited `max_age`
    ///
    /// Buffered units are no longer pinged, so their leases must be closed
    /// well before the coordinator's TTL.
    pub async fn flush_stale(&self, max_age: Duration) -> Option<FlushOutcome> {
        match self.buffer_age() {
            Some(age) if age >= max_age => Some(self.flush().await),
            _ => None,
        }
    }

    /// Flush buffered results and hand back units that were never started
    pub async fn release(&self) -> FlushOutcome {
        let outcome = self.flush().await;

        let unstarted: Vec<String> = lock(&self.backlog).drain(..).collect();
        if !unstarted.is_empty() {
            tracing::info!(work_type = %self.work_type, units = unstarted.len(), "Returning unstarted units");
            for id in &unstarted {
                self.mark(id, UnitState::Aborted);
            }
            metrics::record_units_aborted(self.work_type.as_str(), unstarted.len());
            if let Err(e) = self
                .api
                .abort(self.work_type, &self.worker, &unstarted)
                .await
            {
                tracing::warn!(work_type = %self.work_type, error = %e, "Failed to return units");
            }
        }

        outcome
    }
}

// ============================================================================
// Tests
// ============================================================================
