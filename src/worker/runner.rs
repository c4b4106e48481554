//! Worker runner
//!
//! Obtains a worker identity, then runs `jobs(work_type)` unit loops per
//! registered processor. Each loop leases a unit, processes it while pinging
//! the lease every keep-alive interval, and commits or aborts the result.
//! Buffered results are sent when the coordinator runs out of units and
//! whenever the oldest one has waited a keep-alive interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant};

use super::config::WorkerConfig;
use super::lease_client::{LeaseApi, LeaseClient};
use super::processor::{AnnotationFetcher, ChannelScanner, UnitProcessor};
use crate::coordinator::{ClientError, CoordinatorClient};
use crate::fetcher::PageFetcher;
use crate::models::WorkerId;

// ============================================================================
// Worker Runner
// ============================================================================

/// Runs lease loops against a coordinator
///
/// Handles:
/// - Worker identity (configured or freshly issued)
/// - One shared backlog per work type
/// - Heartbeats for long-running units
/// - Graceful shutdown: buffered results are flushed, unstarted units returned
pub struct WorkerRunner {
    config: WorkerConfig,
    api: Arc<dyn LeaseApi>,
    processors: Vec<Arc<dyn UnitProcessor>>,
    shutdown: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl WorkerRunner {
    /// Create a runner with no processors
    pub fn new(config: WorkerConfig, api: Arc<dyn LeaseApi>) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        Self {
            config,
            api,
            processors: Vec::new(),
            shutdown,
            shutdown_rx,
        }
    }

    /// Create a runner talking HTTP to the configured coordinator, with the
    /// channel scanner and annotation fetcher registered
    pub fn from_config(config: WorkerConfig) -> Result<Self, RunnerError> {
        config
            .validate()
            .map_err(|e| RunnerError::ConfigError(e.to_string()))?;

        let client = CoordinatorClient::new(config.client_config())
            .map_err(|e| RunnerError::InitError(e.to_string()))?;
        let fetcher = Arc::new(
            PageFetcher::new(config.requests_per_second, config.request_timeout())
                .map_err(|e| RunnerError::InitError(e.to_string()))?,
        );

        let scanner = ChannelScanner::new(
            Arc::clone(&fetcher),
            &config.site_url,
            config.max_channel_pages,
        );
        let annotations = AnnotationFetcher::new(fetcher, &config.annotation_url);

        Ok(Self::new(config, Arc::new(client))
            .with_processor(Arc::new(scanner))
            .with_processor(Arc::new(annotations)))
    }

    /// Register a processor for its work type
    pub fn with_processor(mut self, processor: Arc<dyn UnitProcessor>) -> Self {
        self.processors
            .retain(|p| p.work_type() != processor.work_type());
        self.processors.push(processor);
        self
    }

    /// Configured worker token, or a fresh one from the coordinator
    pub async fn resolve_worker(&self) -> Result<WorkerId, RunnerError> {
        if let Some(token) = &self.config.worker_id {
            return Ok(WorkerId::new(token.as_str()));
        }

        let worker = self.api.new_worker().await?;
        tracing::info!(worker = %worker, "Registered with coordinator");
        Ok(worker)
    }

    /// Start all unit loops
    pub async fn start(&self) -> Result<RunnerHandle, RunnerError> {
        let worker = self.resolve_worker().await?;
        let mut handles = Vec::new();

        for processor in &self.processors {
            let work_type = processor.work_type();
            let jobs = self.config.jobs(work_type);
            if jobs == 0 {
                continue;
            }

            let client = Arc::new(LeaseClient::new(
                Arc::clone(&self.api),
                worker.clone(),
                work_type,
                self.config.fetch_limit(work_type),
                self.config.submission_threshold(work_type),
            ));

            tracing::info!(work_type = %work_type, jobs, "Starting unit loops");
            handles.push(tokio::spawn(Self::supervise(
                client,
                Arc::clone(processor),
                jobs,
                self.config.keep_alive(),
                self.config.idle_sleep(),
                self.shutdown_rx.clone(),
            )));
        }

        if handles.is_empty() {
            return Err(RunnerError::ConfigError(
                "no processor has any jobs configured".to_string(),
            ));
        }

        Ok(RunnerHandle {
            handles,
            shutdown: self.shutdown.clone(),
        })
    }

    /// Trigger shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Run `jobs` loops for one work type, then release what is left
    async fn supervise(
        client: Arc<LeaseClient>,
        processor: Arc<dyn UnitProcessor>,
        jobs: usize,
        keep_alive: Duration,
        idle_sleep: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut loops = JoinSet::new();
        loops.spawn(Self::flush_loop(
            Arc::clone(&client),
            keep_alive,
            shutdown_rx.clone(),
        ));
        for _ in 0..jobs {
            loops.spawn(Self::unit_loop(
                Arc::clone(&client),
                Arc::clone(&processor),
                keep_alive,
                idle_sleep,
                shutdown_rx.clone(),
            ));
        }
        while let Some(result) = loops.join_next().await {
            if let Err(e) = result {
                tracing::error!(work_type = %client.work_type(), error = %e, "Unit loop panicked");
            }
        }

        let outcome = client.release().await;
        let counts = client.counts();
        tracing::info!(
            work_type = %client.work_type(),
            flushed = outcome.done,
            done = counts.done,
            aborted = counts.aborted,
            lost = counts.lost,
            "Unit loops stopped"
        );
    }

    async fn unit_loop(
        client: Arc<LeaseClient>,
        processor: Arc<dyn UnitProcessor>,
        keep_alive: Duration,
        idle_sleep: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        while !*shutdown_rx.borrow() {
            let next = tokio::select! {
                _ = shutdown_rx.changed() => break,
                next = client.next_unit() => next,
            };

            match next {
                Ok(Some(id)) => {
                    Self::process_unit(&client, processor.as_ref(), &id, keep_alive).await;
                    continue;
                }
                Ok(None) => {
                    tracing::debug!(work_type = %client.work_type(), "No units available");
                    if client.buffered() > 0 {
                        let outcome = client.flush().await;
                        tracing::debug!(
                            work_type = %client.work_type(),
                            done = outcome.done,
                            lost = outcome.lost,
                            "Flushed results while idle"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(work_type = %client.work_type(), error = %e, "Failed to lease units");
                }
            }

            tokio::select! {
                _ = shutdown_rx.changed() => {}
                _ = tokio::time::sleep(idle_sleep) => {}
            }
        }
    }

    /// Send buffered results once the oldest has waited `keep_alive`
    async fn flush_loop(
        client: Arc<LeaseClient>,
        keep_alive: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let period = (keep_alive / 2).max(Duration::from_millis(100));
        let mut ticker = interval_at(Instant::now() + period, period);

        while !*shutdown_rx.borrow() {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = ticker.tick() => {
                    if let Some(outcome) = client.flush_stale(keep_alive).await {
                        tracing::debug!(
                            work_type = %client.work_type(),
                            done = outcome.done,
                            lost = outcome.lost,
                            "Flushed aged results"
                        );
                    }
                }
            }
        }
    }

    /// Process one leased unit, pinging it while the work is running
    pub async fn process_unit(
        client: &LeaseClient,
        processor: &dyn UnitProcessor,
        id: &str,
        keep_alive: Duration,
    ) {
        tracing::debug!(work_type = %client.work_type(), id = %id, "Processing unit");

        let mut ticker = interval_at(Instant::now() + keep_alive, keep_alive);
        let work = processor.process(id);
        tokio::pin!(work);

        let result = loop {
            tokio::select! {
                result = &mut work => break result,
                _ = ticker.tick() => {
                    if let Err(e) = client.heartbeat(id).await {
                        tracing::warn!(work_type = %client.work_type(), id = %id, error = %e, "Heartbeat failed");
                    }
                }
            }
        };

        match result {
            Ok(artifact) => {
                if let Some(outcome) = client.commit(id, artifact).await {
                    tracing::debug!(
                        work_type = %client.work_type(),
                        done = outcome.done,
                        lost = outcome.lost,
                        "Flushed results"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(work_type = %client.work_type(), id = %id, error = %e, "Unit failed");
                if let Err(e) = client.abort(id).await {
                    tracing::warn!(work_type = %client.work_type(), id = %id, error = %e, "Abort failed");
                }
            }
        }
    }
}

// ============================================================================
// Runner Handle
// ============================================================================

/// Handle to the running worker
pub struct RunnerHandle {
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl RunnerHandle {
    /// Wait for all loops to complete
    pub async fn wait(self) -> Result<(), RunnerError> {
        for handle in self.handles {
            handle
                .await
                .map_err(|e| RunnerError::ShutdownError(e.to_string()))?;
        }
        Ok(())
    }

    /// Signal shutdown and wait for the loops to drain
    pub async fn shutdown(self) -> Result<(), RunnerError> {
        let _ = self.shutdown.send(true);
        self.wait().await
    }

    /// Check if any loop is still running
    pub fn is_running(&self) -> bool {
        self.handles.iter().any(|h| !h.is_finished())
    }
}

// ============================================================================
// Runner Errors
// ============================================================================

/// Runner errors
#[derive(Debug, Clone)]
pub enum RunnerError {
    /// Initialization error
    InitError(String),

    /// Coordinator communication error
    CoordinatorError(String),

    /// Configuration error
    ConfigError(String),

    /// Shutdown error
    ShutdownError(String),
}

impl std::fmt::Display for RunnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InitError(msg) => write!(f, "Initialization error: {msg}"),
            Self::CoordinatorError(msg) => write!(f, "Coordinator error: {msg}"),
            Self::ConfigError(msg) => write!(f, "Config error: {msg}"),
            Self::ShutdownError(msg) => write!(f, "Shutdown error: {msg}"),
        }
    }
}

impl std::error::Error for RunnerError {}

impl From<ClientError> for RunnerError {
    fn from(e: ClientError) -> Self {
        Self::CoordinatorError(e.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================
