//! ID discovery
//!
//! Feeds the coordinator's identifier store. A [`DiscoveryCrawler`] walks
//! pages reachable from a queue of units, collects the IDs it sees, and
//! submits them in chunks; IDs the coordinator had not seen before are
//! crawled further.
//!
//! ```text
//!   seed sources ──▶ work queue ──▶ DiscoverySource ──▶ seen caches
//!                        ▲                                   │
//!                        └──────── newly inserted ◀── submit ┘
//! ```

pub mod cache;
pub mod config;
pub mod crawler;
pub mod extract;
pub mod queue;
pub mod seeds;
pub mod source;

use async_trait::async_trait;
use thiserror::Error;

use crate::coordinator::{ClientError, CoordinatorClient};
use crate::fetcher::FetchError;
use crate::models::EntityKind;

pub use cache::SeenCache;
pub use config::{DiscoveryConfig, SeedSourceConfig};
pub use crawler::{CrawlerStats, DiscoveryCrawler};
pub use extract::extract_ids;
pub use queue::{UnitKind, WorkQueue, WorkUnit};
pub use seeds::{HttpSeedSource, SeedPool, SeedSource, StaticSeedSource};
pub use source::PageScanSource;

// ============================================================================
// Discovery Result
// ============================================================================

/// IDs found while scanning one unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    pub videos: Vec<String>,
    pub channels: Vec<String>,
    pub playlists: Vec<String>,
    /// Continuation path to scan next, if the page had one
    pub next_seed: Option<String>,
}

impl Discovery {
    /// Sort loose IDs into kinds by their shape, dropping unknown shapes
    pub fn from_ids(ids: &[String]) -> Self {
        let mut found = Self::default();
        for id in ids {
            if EntityKind::Channel.is_valid(id) {
                found.channels.push(id.clone());
            } else if EntityKind::Playlist.is_valid(id) {
                found.playlists.push(id.clone());
            } else if EntityKind::Video.is_valid(id) {
                found.videos.push(id.clone());
            } else {
                tracing::warn!(id = %id, "Ignoring ID with unknown shape");
            }
        }
        found
    }

    /// Number of IDs found
    pub fn total(&self) -> usize {
        self.videos.len() + self.channels.len() + self.playlists.len()
    }

    /// Whether nothing was found
    pub fn is_empty(&self) -> bool {
        self.total() == 0 && self.next_seed.is_none()
    }

    /// IDs of one kind
    pub fn ids(&self, kind: EntityKind) -> &[String] {
        match kind {
            EntityKind::Video => &self.videos,
            EntityKind::Channel => &self.channels,
            EntityKind::Playlist => &self.playlists,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Discovery errors
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// Page could not be fetched
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A seed source returned nothing usable
    #[error("Seed source '{source_name}' failed: {reason}")]
    SeedFailed { source_name: String, reason: String },

    /// Every seed source failed in one round
    #[error("All seed sources failed")]
    SeedsExhausted,

    /// No seed sources are configured
    #[error("No seed sources configured")]
    NoSeedSources,

    /// Submitting IDs to the coordinator failed
    #[error("Submission failed: {0}")]
    Submit(#[from] ClientError),
}

impl DiscoveryError {
    /// Whether retrying later may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_transient(),
            Self::SeedFailed { .. } | Self::SeedsExhausted => true,
            Self::NoSeedSources => false,
            Self::Submit(e) => e.is_transient(),
        }
    }
}

// ============================================================================
// Pluggable Seams
// ============================================================================

/// Scans one unit for IDs
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    /// Fetch the unit's page and report what it references
    async fn discover(&self, seed: &WorkUnit) -> Result<Discovery, DiscoveryError>;
}

/// Destination for discovered IDs
#[async_trait]
pub trait IdSink: Send + Sync {
    /// Submit IDs and return the ones that were new
    async fn submit(&self, kind: EntityKind, ids: &[String]) -> Result<Vec<String>, ClientError>;
}

#[async_trait]
impl IdSink for CoordinatorClient {
    async fn submit(&self, kind: EntityKind, ids: &[String]) -> Result<Vec<String>, ClientError> {
        CoordinatorClient::submit(self, kind, ids).await
    }
}
