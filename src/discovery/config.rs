//! Discovery crawler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::EntityKind;

/// One HTTP seed source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedSourceConfig {
    /// Name used in logs
    pub name: String,

    /// Page to request
    pub url: String,

    /// Regex whose first capture group is the seed ID
    pub pattern: String,

    /// Kind of the captured ID
    pub kind: EntityKind,

    /// Match against the `Location` header instead of the body
    #[serde(default)]
    pub redirect: bool,

    /// Preferred over random choice when set
    #[serde(default)]
    pub priority: Option<u32>,
}

/// Configuration for the discovery crawler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Total queue capacity, split between unit kinds
    pub crawl_limit: usize,

    /// Below this queue length, every submitted ID is crawled
    pub crawl_threshold: usize,

    /// Reseed when the queue is at or below this length
    pub reseed_below: usize,

    /// Pages scanned concurrently
    pub process_concurrency: usize,

    /// Page requests per second
    pub requests_per_second: u32,

    /// Attempts per page before giving up on it
    pub page_retries: u32,

    /// Seconds between submission rounds
    pub submit_interval_secs: u64,

    /// Maximum IDs per submission request
    pub submit_chunk_size: usize,

    /// Submission requests in flight at once
    pub submit_concurrency: usize,

    /// Seen-cache capacity for videos
    pub video_cache_size: usize,

    /// Seen-cache capacity for channels
    pub channel_cache_size: usize,

    /// Seen-cache capacity for playlists
    pub playlist_cache_size: usize,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// IDs queued on startup
    pub seeds: Vec<String>,

    /// HTTP seed sources used when the queue runs low
    pub seed_sources: Vec<SeedSourceConfig>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            crawl_limit: 100_000,
            crawl_threshold: 1_000,
            reseed_below: 100,
            process_concurrency: 20,
            requests_per_second: 10,
            page_retries: 10,
            submit_interval_secs: 10,
            submit_chunk_size: 25_000,
            submit_concurrency: 10,
            video_cache_size: 1_000_000,
            channel_cache_size: 200_000,
            playlist_cache_size: 200_000,
            request_timeout_secs: 30,
            seeds: Vec::new(),
            seed_sources: Vec::new(),
        }
    }
}

impl DiscoveryConfig {
    pub fn submit_interval(&self) -> Duration {
        Duration::from_secs(self.submit_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.crawl_limit < 10 {
            return Err("discovery.crawl_limit must be at least 10".to_string());
        }
        if self.process_concurrency == 0 {
            return Err("discovery.process_concurrency must be greater than 0".to_string());
        }
        if self.submit_chunk_size == 0 || self.submit_concurrency == 0 {
            return Err("discovery submission chunk size and concurrency must be non-zero".to_string());
        }
        if self.submit_interval_secs == 0 {
            return Err("discovery.submit_interval_secs must be greater than 0".to_string());
        }
        for source in &self.seed_sources {
            regex::Regex::new(&source.pattern).map_err(|e| {
                format!("seed source '{}' has an invalid pattern: {e}", source.name)
            })?;
        }
        Ok(())
    }
}
