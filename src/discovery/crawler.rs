//! Discovery crawler
//!
//! Three loops share one [`DiscoveryCrawler`]:
//!
//! - the **seeder** tops up the queue from the [`SeedPool`] when it runs low
//! - the **scanner** keeps up to `process_concurrency` pages in flight
//! - the **submitter** periodically flushes discovered IDs to the
//!   coordinator and queues the ones that were new
//!
//! All three stop when the shutdown channel flips to `true`; the submitter
//! makes one last flush on the way out.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant};

use super::cache::SeenCache;
use super::config::DiscoveryConfig;
use super::queue::{Quotas, UnitKind, WorkQueue, WorkUnit};
use super::seeds::SeedPool;
use super::{Discovery, DiscoveryError, DiscoverySource, IdSink};
use crate::coordinator::{AdmissionGate, ClientError};
use crate::metrics;
use crate::models::EntityKind;
use crate::utils::retry::{with_retry_if, RetryConfig};

const SCAN_POLL: Duration = Duration::from_millis(100);
const SEED_POLL: Duration = Duration::from_secs(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Pending IDs
// ============================================================================

#[derive(Debug, Default)]
struct PendingIds {
    videos: HashSet<String>,
    channels: HashSet<String>,
    playlists: HashSet<String>,
}

impl PendingIds {
    fn add(&mut self, found: &Discovery) {
        self.videos.extend(found.videos.iter().cloned());
        self.channels.extend(found.channels.iter().cloned());
        self.playlists.extend(found.playlists.iter().cloned());
    }

    fn get_mut(&mut self, kind: EntityKind) -> &mut HashSet<String> {
        match kind {
            EntityKind::Video => &mut self.videos,
            EntityKind::Channel => &mut self.channels,
            EntityKind::Playlist => &mut self.playlists,
        }
    }
}

struct Caches {
    videos: SeenCache,
    channels: SeenCache,
    playlists: SeenCache,
}

impl Caches {
    fn get_mut(&mut self, kind: EntityKind) -> &mut SeenCache {
        match kind {
            EntityKind::Video => &mut self.videos,
            EntityKind::Channel => &mut self.channels,
            EntityKind::Playlist => &mut self.playlists,
        }
    }
}

// ============================================================================
// Stats
// ============================================================================

/// Snapshot of crawler progress
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlerStats {
    pub queued_videos: usize,
    pub queued_channels: usize,
    pub queued_playlists: usize,
    pub queued_continuations: usize,
    pub pending_submission: usize,
    pub pages_scanned: u64,
    pub pages_failed: u64,
    pub ids_submitted: u64,
    pub ids_inserted: u64,
}

/// Outcome of one submission round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitRound {
    pub submitted: usize,
    pub inserted: usize,
    pub enqueued: usize,
}

// ============================================================================
// Discovery Crawler
// ============================================================================

/// Crawls pages for IDs and feeds them to an [`IdSink`]
pub struct DiscoveryCrawler {
    config: DiscoveryConfig,
    source: Arc<dyn DiscoverySource>,
    sink: Arc<dyn IdSink>,
    seeds: SeedPool,
    queue: Mutex<WorkQueue>,
    pending: Mutex<PendingIds>,
    caches: Mutex<Caches>,
    submit_gate: AdmissionGate,
    page_retry: RetryConfig,
    submit_retry: RetryConfig,
    pages_scanned: AtomicU64,
    pages_failed: AtomicU64,
    ids_submitted: AtomicU64,
    ids_inserted: AtomicU64,
}

impl DiscoveryCrawler {
    pub fn new(
        config: DiscoveryConfig,
        source: Arc<dyn DiscoverySource>,
        sink: Arc<dyn IdSink>,
        seeds: SeedPool,
    ) -> Self {
        let caches = Caches {
            videos: SeenCache::new(config.video_cache_size),
            channels: SeenCache::new(config.channel_cache_size),
            playlists: SeenCache::new(config.playlist_cache_size),
        };

        Self {
            queue: Mutex::new(WorkQueue::new(Quotas::from_crawl_limit(config.crawl_limit))),
            pending: Mutex::new(PendingIds::default()),
            caches: Mutex::new(caches),
            submit_gate: AdmissionGate::new(config.submit_concurrency),
            page_retry: RetryConfig {
                max_retries: config.page_retries,
                base_delay_ms: 1000,
                max_delay_ms: 5000,
                backoff_multiplier: 1.3,
                jitter: true,
            },
            submit_retry: RetryConfig::unbounded(),
            pages_scanned: AtomicU64::new(0),
            pages_failed: AtomicU64::new(0),
            ids_submitted: AtomicU64::new(0),
            ids_inserted: AtomicU64::new(0),
            config,
            source,
            sink,
            seeds,
        }
    }

    /// Override the retry policies for page scans and submissions
    pub fn with_retry(mut self, page_retry: RetryConfig, submit_retry: RetryConfig) -> Self {
        self.page_retry = page_retry;
        self.submit_retry = submit_retry;
        self
    }

    // ------------------------------------------------------------------------
    // Queue
    // ------------------------------------------------------------------------

    /// Queue a unit at the position its kind belongs
    pub fn enqueue(&self, unit: WorkUnit) -> bool {
        lock(&self.queue).push(unit)
    }

    /// Queue every ID of a discovery result
    pub fn enqueue_discovery(&self, found: &Discovery) -> usize {
        let mut queue = lock(&self.queue);
        let units = found
            .videos
            .iter()
            .map(|id| WorkUnit::new(UnitKind::Video, id.as_str()))
            .chain(found.channels.iter().map(|id| WorkUnit::new(UnitKind::Channel, id.as_str())))
            .chain(found.playlists.iter().map(|id| WorkUnit::new(UnitKind::Playlist, id.as_str())));

        units.filter(|unit| queue.push(unit.clone())).count()
    }

    /// Queue loose IDs, sorting them by shape
    pub fn enqueue_ids(&self, ids: &[String]) -> usize {
        self.enqueue_discovery(&Discovery::from_ids(ids))
    }

    pub fn queue_len(&self) -> usize {
        lock(&self.queue).len()
    }

    fn dequeue(&self) -> Option<WorkUnit> {
        lock(&self.queue).dequeue()
    }

    /// Progress snapshot
    pub fn stats(&self) -> CrawlerStats {
        let queue = lock(&self.queue);
        let pending = lock(&self.pending);
        CrawlerStats {
            queued_videos: queue.count(UnitKind::Video),
            queued_channels: queue.count(UnitKind::Channel),
            queued_playlists: queue.count(UnitKind::Playlist),
            queued_continuations: queue.count(UnitKind::Continuation),
            pending_submission: pending.videos.len()
                + pending.channels.len()
                + pending.playlists.len(),
            pages_scanned: self.pages_scanned.load(Ordering::Relaxed),
            pages_failed: self.pages_failed.load(Ordering::Relaxed),
            ids_submitted: self.ids_submitted.load(Ordering::Relaxed),
            ids_inserted: self.ids_inserted.load(Ordering::Relaxed),
        }
    }

    // ------------------------------------------------------------------------
    // Single Steps
    // ------------------------------------------------------------------------

    /// Ask the seed pool for fresh IDs and queue them
    pub async fn seed_once(&self) -> Result<usize, DiscoveryError> {
        let found = self.seeds.select().await?;
        Ok(self.enqueue_discovery(&found))
    }

    /// Scan one unit, recording what it references
    pub async fn process_unit(&self, unit: WorkUnit) {
        for followup in unit.channel_followups() {
            self.enqueue(followup);
        }

        let source = &self.source;
        let result = with_retry_if(
            &self.page_retry,
            || source.discover(&unit),
            DiscoveryError::is_recoverable,
        )
        .await;

        match result {
            Ok(found) => {
                self.pages_scanned.fetch_add(1, Ordering::Relaxed);
                if let Some(path) = &found.next_seed {
                    self.enqueue(WorkUnit::new(UnitKind::Continuation, path.as_str()));
                }
                lock(&self.pending).add(&found);
            }
            Err(e) => {
                self.pages_failed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(kind = %unit.kind, id = %unit.id, error = %e, "Dropping unit");
            }
        }
    }

    /// Flush pending IDs to the sink and queue what should be crawled next
    ///
    /// IDs already in a seen-cache are skipped. Newly inserted IDs are always
    /// queued; when the queue is shorter than `crawl_threshold` every
    /// submitted ID is queued as well.
    pub async fn submit_pending(&self) -> SubmitRound {
        let batches: Vec<(EntityKind, Vec<String>)> = {
            let mut pending = lock(&self.pending);
            let mut caches = lock(&self.caches);
            [EntityKind::Channel, EntityKind::Video, EntityKind::Playlist]
                .into_iter()
                .map(|kind| {
                    let cache = caches.get_mut(kind);
                    let ids = std::mem::take(pending.get_mut(kind))
                        .into_iter()
                        .filter(|id| !cache.seen(id))
                        .collect();
                    (kind, ids)
                })
                .collect()
        };

        let results = join_all(
            batches
                .iter()
                .map(|(kind, ids)| self.submit_kind(*kind, ids)),
        )
        .await;

        let crawl_all = self.queue_len() < self.config.crawl_threshold;
        let mut round = SubmitRound::default();
        let mut next = Discovery::default();

        for ((kind, submitted), inserted) in batches.into_iter().zip(results) {
            round.submitted += submitted.len();
            round.inserted += inserted.len();

            let mut crawl = inserted;
            if crawl_all {
                let already: HashSet<&String> = crawl.iter().collect();
                let rest: Vec<String> = submitted
                    .iter()
                    .filter(|id| !already.contains(id))
                    .cloned()
                    .collect();
                crawl.extend(rest);
            }

            match kind {
                EntityKind::Video => next.videos = crawl,
                EntityKind::Channel => next.channels = crawl,
                EntityKind::Playlist => next.playlists = crawl,
            }
        }

        round.enqueued = self.enqueue_discovery(&next);
        self.ids_submitted
            .fetch_add(round.submitted as u64, Ordering::Relaxed);
        self.ids_inserted
            .fetch_add(round.inserted as u64, Ordering::Relaxed);
        round
    }

    /// Submit one kind in chunks, returning the IDs that were new
    async fn submit_kind(&self, kind: EntityKind, ids: &[String]) -> Vec<String> {
        if ids.is_empty() {
            return Vec::new();
        }

        let chunk_size = self.config.submit_chunk_size.max(1);
        let chunk_count = ids.len().div_ceil(chunk_size);

        let chunks = ids.chunks(chunk_size).enumerate().map(|(index, chunk)| async move {
            let _permit = match self.submit_gate.acquire().await {
                Ok(permit) => permit,
                Err(_) => return Vec::new(),
            };

            let sink = &self.sink;
            match with_retry_if(
                &self.submit_retry,
                || sink.submit(kind, chunk),
                ClientError::is_transient,
            )
            .await
            {
                Ok(inserted) => {
                    metrics::record_ids_submitted(kind.as_str(), chunk.len());
                    tracing::info!(
                        kind = %kind,
                        chunk = index + 1,
                        chunks = chunk_count,
                        submitted = chunk.len(),
                        inserted = inserted.len(),
                        "Submitted IDs"
                    );
                    inserted
                }
                Err(e) => {
                    tracing::warn!(kind = %kind, submitted = chunk.len(), error = %e, "Dropping chunk");
                    Vec::new()
                }
            }
        });

        join_all(chunks).await.into_iter().flatten().collect()
    }

    // ------------------------------------------------------------------------
    // Loops
    // ------------------------------------------------------------------------

    /// Run seeder, scanner and submitter until shutdown
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> CrawlerStats {
        tracing::info!(
            crawl_limit = self.config.crawl_limit,
            concurrency = self.config.process_concurrency,
            seed_sources = self.seeds.len(),
            "Discovery crawler started"
        );

        tokio::join!(
            Arc::clone(&self).seed_loop(shutdown.clone()),
            Arc::clone(&self).scan_loop(shutdown.clone()),
            Arc::clone(&self).submit_loop(shutdown),
        );

        let stats = self.stats();
        tracing::info!(
            pages_scanned = stats.pages_scanned,
            ids_submitted = stats.ids_submitted,
            ids_inserted = stats.ids_inserted,
            "Discovery crawler stopped"
        );
        stats
    }

    async fn seed_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        while !*shutdown.borrow() {
            if !self.seeds.is_empty() && self.queue_len() <= self.config.reseed_below {
                match self.seed_once().await {
                    Ok(queued) => tracing::debug!(queued, "Queued seeds"),
                    Err(e) => tracing::warn!(error = %e, "Seeding failed"),
                }
            }

            tokio::select! {
                _ = shutdown.changed() => {}
                _ = tokio::time::sleep(SEED_POLL) => {}
            }
        }
    }

    async fn scan_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut in_flight = JoinSet::new();

        while !*shutdown.borrow() {
            while in_flight.len() < self.config.process_concurrency {
                let Some(unit) = self.dequeue() else { break };
                let this = Arc::clone(&self);
                in_flight.spawn(async move { this.process_unit(unit).await });
            }

            tokio::select! {
                _ = shutdown.changed() => {}
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                _ = tokio::time::sleep(SCAN_POLL) => {}
            }
        }

        in_flight.shutdown().await;
    }

    async fn submit_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.submit_interval();
        let mut ticker = interval_at(Instant::now() + period, period);

        while !*shutdown.borrow() {
            tokio::select! {
                _ = shutdown.changed() => {}
                _ = ticker.tick() => {
                    let round = self.submit_pending().await;
                    let stats = self.stats();
                    tracing::info!(
                        submitted = round.submitted,
                        inserted = round.inserted,
                        queued = round.enqueued,
                        queue = self.queue_len(),
                        videos = stats.queued_videos,
                        channels = stats.queued_channels,
                        playlists = stats.queued_playlists,
                        continuations = stats.queued_continuations,
                        "Submission round"
                    );
                }
            }
        }

        match tokio::time::timeout(period, self.submit_pending()).await {
            Ok(round) => tracing::info!(submitted = round.submitted, "Final submission"),
            Err(_) => tracing::warn!("Final submission timed out"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
