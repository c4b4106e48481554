//! Prometheus metrics for the hivecrawl coordinator and workers
//!
//! This module provides metrics tracking for:
//! - Coordinator: lease assignment, completion, abort, reclaim, rejections
//! - Worker: processed, aborted and lost units
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all coordinator metrics
struct CoordinatorMetrics {
    leases_assigned: CounterVec,
    leases_completed: CounterVec,
    leases_aborted: CounterVec,
    leases_reclaimed: CounterVec,
    rejections: CounterVec,
    gate_wait: HistogramVec,
    open_leases: GaugeVec,
}

/// Container for all worker metrics
struct WorkerMetrics {
    units_processed: CounterVec,
    units_aborted: CounterVec,
    units_lost: CounterVec,
    ids_submitted: CounterVec,
}

static COORDINATOR_METRICS: OnceLock<CoordinatorMetrics> = OnceLock::new();

static WORKER_METRICS: OnceLock<WorkerMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once; only the first call registers anything.
/// If registration fails the caller may continue and every recording
/// function silently does nothing.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let coordinator = CoordinatorMetrics {
        leases_assigned: register_counter_vec!(
            "hivecrawl_coordinator_leases_assigned_total",
            "Leases handed out by work type",
            &["work_type"]
        )?,
        leases_completed: register_counter_vec!(
            "hivecrawl_coordinator_leases_completed_total",
            "Leases closed by a successful completion",
            &["work_type"]
        )?,
        leases_aborted: register_counter_vec!(
            "hivecrawl_coordinator_leases_aborted_total",
            "Open leases deleted by worker abort",
            &["work_type"]
        )?,
        leases_reclaimed: register_counter_vec!(
            "hivecrawl_coordinator_leases_reclaimed_total",
            "Open leases deleted by the TTL sweep",
            &["work_type"]
        )?,
        rejections: register_counter_vec!(
            "hivecrawl_coordinator_rejections_total",
            "Rejected requests by route and error code",
            &["route", "code"]
        )?,
        gate_wait: register_histogram_vec!(
            "hivecrawl_coordinator_gate_wait_seconds",
            "Time spent waiting for the admission gate",
            &["work_type"],
            vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
        )?,
        open_leases: register_gauge_vec!(
            "hivecrawl_coordinator_open_leases",
            "Open leases at the last stats pass",
            &["work_type"]
        )?,
    };

    let worker = WorkerMetrics {
        units_processed: register_counter_vec!(
            "hivecrawl_worker_units_processed_total",
            "Units whose completion was accepted",
            &["work_type"]
        )?,
        units_aborted: register_counter_vec!(
            "hivecrawl_worker_units_aborted_total",
            "Units given back after an unrecoverable failure",
            &["work_type"]
        )?,
        units_lost: register_counter_vec!(
            "hivecrawl_worker_units_lost_total",
            "Units whose completion was rejected or never delivered",
            &["work_type"]
        )?,
        ids_submitted: register_counter_vec!(
            "hivecrawl_worker_ids_submitted_total",
            "Discovered identifiers submitted by kind",
            &["kind"]
        )?,
    };

    COORDINATOR_METRICS
        .set(coordinator)
        .map_err(|_| "Coordinator metrics already initialized")?;
    WORKER_METRICS
        .set(worker)
        .map_err(|_| "Worker metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    COORDINATOR_METRICS.get().is_some() && WORKER_METRICS.get().is_some()
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

// ============================================================================
// Coordinator
// ============================================================================

pub fn record_leases_assigned(work_type: &str, count: usize) {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.leases_assigned
            .with_label_values(&[work_type])
            .inc_by(count as f64);
    }
}

pub fn record_leases_completed(work_type: &str, count: usize) {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.leases_completed
            .with_label_values(&[work_type])
            .inc_by(count as f64);
    }
}

pub fn record_leases_aborted(work_type: &str, count: usize) {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.leases_aborted
            .with_label_values(&[work_type])
            .inc_by(count as f64);
    }
}

pub fn record_leases_reclaimed(work_type: &str, count: usize) {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.leases_reclaimed
            .with_label_values(&[work_type])
            .inc_by(count as f64);
    }
}

/// Record a request rejected with a numeric error code
pub fn record_rejection(route: &str, code: u16) {
    let Some(m) = COORDINATOR_METRICS.get() else {
        return;
    };
    let code = code.to_string();
    m.rejections.with_label_values(&[route, &code]).inc();
}

/// Record how long an assignment waited for its admission gate
pub fn record_gate_wait(work_type: &str, wait_secs: f64) {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.gate_wait.with_label_values(&[work_type]).observe(wait_secs);
    }
}

pub fn set_open_leases(work_type: &str, count: u64) {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.open_leases.with_label_values(&[work_type]).set(count as f64);
    }
}

// ============================================================================
// Worker
// ============================================================================

pub fn record_units_processed(work_type: &str, count: usize) {
    if let Some(m) = WORKER_METRICS.get() {
        m.units_processed
            .with_label_values(&[work_type])
            .inc_by(count as f64);
    }
}

pub fn record_units_aborted(work_type: &str, count: usize) {
    if let Some(m) = WORKER_METRICS.get() {
        m.units_aborted
            .with_label_values(&[work_type])
            .inc_by(count as f64);
    }
}

pub fn record_units_lost(work_type: &str, count: usize) {
    if let Some(m) = WORKER_METRICS.get() {
        m.units_lost
            .with_label_values(&[work_type])
            .inc_by(count as f64);
    }
}

pub fn record_ids_submitted(kind: &str, count: usize) {
    if let Some(m) = WORKER_METRICS.get() {
        m.ids_submitted
            .with_label_values(&[kind])
            .inc_by(count as f64);
    }
}
