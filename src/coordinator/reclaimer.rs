//! Background sweeps
//!
//! The reclaimer deletes open leases whose heartbeat outlived the TTL, which
//! returns their entities to the unclaimed pool. It is the only recovery
//! path for units abandoned by crashed workers. The stats logger reports the
//! store counters on a fixed period.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::lease_manager::{LeaseError, LeaseManager};
use crate::metrics;
use crate::models::WorkType;

/// Periodic TTL sweep over every lease table
pub struct Reclaimer {
    manager: Arc<LeaseManager>,
    period: Duration,
}

impl Reclaimer {
    pub fn new(manager: Arc<LeaseManager>, period: Duration) -> Self {
        Self { manager, period }
    }

    /// Run a single sweep and log what it removed
    pub async fn run_once(&self) -> Result<Vec<(WorkType, usize)>, LeaseError> {
        let reclaimed = self.manager.reclaim_expired().await?;

        for (work_type, count) in &reclaimed {
            if *count > 0 {
                tracing::info!(work_type = %work_type, count, "Reclaimed expired leases");
            } else {
                tracing::debug!(work_type = %work_type, "No expired leases");
            }
        }
        Ok(reclaimed)
    }

    /// Sweep every period until shutdown is signalled
    pub fn spawn(self, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            tracing::error!(error = %e, "Reclaimer sweep failed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::info!("Reclaimer shutting down");
                        break;
                    }
                }
            }
        })
    }
}

/// Log store counters every `period` until shutdown is signalled
pub fn spawn_stats_logger(
    manager: Arc<LeaseManager>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match manager.stats().await {
                        Ok(stats) => {
                            metrics::set_open_leases(WorkType::Channel.as_str(), stats.open_channel_leases);
                            metrics::set_open_leases(WorkType::Video.as_str(), stats.open_video_leases);
                            tracing::info!(
                                channels = stats.known_channels,
                                completed_channels = stats.completed_channels,
                                videos = stats.known_videos,
                                completed_videos = stats.completed_videos,
                                annotations = stats.completed_annotations,
                                playlists = stats.known_playlists,
                                workers = stats.workers,
                                "Store stats"
                            );
                        }
                        Err(e) => tracing::warn!(error = %e, "Failed to collect stats"),
                    }
                    manager.registry().update_statuses().await;
                }
                _ = shutdown_rx.changed() => {
                    tracing::info!("Stats logger shutting down");
                    break;
                }
            }
        }
    })
}
