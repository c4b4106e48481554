//! Admission gate
//!
//! A counting gate with strict FIFO wake order built on the fair tokio
//! [`Semaphore`]. The queue is unbounded, and a waiter is never overtaken by
//! a later arrival. With one permit it is a mutex around a critical section;
//! with N permits it bounds in-flight work.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// The gate was closed while waiting
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Admission gate closed")]
pub struct GateClosed;

/// FIFO gate with a fixed permit count
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    waiting: Arc<AtomicUsize>,
    permits: usize,
}

/// Held while inside the gate; dropping it lets the next waiter in
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    waited: Duration,
}

impl GatePermit {
    /// Time spent queued before entering
    pub fn waited(&self) -> Duration {
        self.waited
    }
}

impl AdmissionGate {
    /// Create a gate admitting `permits` holders at once (at least one)
    pub fn new(permits: usize) -> Self {
        let permits = permits.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            waiting: Arc::new(AtomicUsize::new(0)),
            permits,
        }
    }

    /// A gate with a single permit
    pub fn exclusive() -> Self {
        Self::new(1)
    }

    /// Wait for a permit in arrival order
    pub async fn acquire(&self) -> Result<GatePermit, GateClosed> {
        let started = Instant::now();
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let permit = Arc::clone(&self.semaphore).acquire_owned().await;
        self.waiting.fetch_sub(1, Ordering::SeqCst);

        Ok(GatePermit {
            _permit: permit.map_err(|_| GateClosed)?,
            waited: started.elapsed(),
        })
    }

    /// Number of callers currently queued
    pub fn queued(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Number of permits currently free
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Total permit count
    pub fn capacity(&self) -> usize {
        self.permits
    }

    /// Close the gate; queued and future callers get [`GateClosed`]
    pub fn close(&self) {
        self.semaphore.close();
    }
}
