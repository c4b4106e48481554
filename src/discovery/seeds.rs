//! Seed sources for the discovery crawler
//!
//! When the work queue runs low the crawler asks a [`SeedPool`] for a few
//! fresh IDs. A source that fails is blacklisted; once every source has
//! failed the blacklist is cleared and all of them are tried again.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use rand::seq::SliceRandom;
use regex::Regex;

use super::config::SeedSourceConfig;
use super::{Discovery, DiscoveryError};
use crate::fetcher::PageFetcher;
use crate::models::EntityKind;

/// Something that can produce starting IDs
#[async_trait]
pub trait SeedSource: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Higher priority sources are preferred over random choice
    fn priority(&self) -> Option<u32> {
        None
    }

    /// Produce a handful of IDs
    async fn seed(&self) -> Result<Discovery, DiscoveryError>;
}

// ============================================================================
// Static Seeds
// ============================================================================

/// Fixed list of IDs, sorted into kinds by shape
#[derive(Debug, Clone)]
pub struct StaticSeedSource {
    name: String,
    seeds: Discovery,
}

impl StaticSeedSource {
    pub fn new(name: impl Into<String>, ids: &[String]) -> Self {
        Self {
            name: name.into(),
            seeds: Discovery::from_ids(ids),
        }
    }
}

#[async_trait]
impl SeedSource for StaticSeedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn seed(&self) -> Result<Discovery, DiscoveryError> {
        if self.seeds.total() == 0 {
            return Err(DiscoveryError::SeedFailed {
                source_name: self.name.clone(),
                reason: "no valid IDs".to_string(),
            });
        }
        Ok(self.seeds.clone())
    }
}

// ============================================================================
// HTTP Seeds
// ============================================================================

/// Fetches a page (or just its redirect target) and captures one ID
pub struct HttpSeedSource {
    name: String,
    url: String,
    pattern: Regex,
    kind: EntityKind,
    from_redirect: bool,
    priority: Option<u32>,
    fetcher: Arc<PageFetcher>,
}

impl HttpSeedSource {
    pub fn from_config(
        config: &SeedSourceConfig,
        fetcher: Arc<PageFetcher>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            name: config.name.clone(),
            url: config.url.clone(),
            pattern: Regex::new(&config.pattern)?,
            kind: config.kind,
            from_redirect: config.redirect,
            priority: config.priority,
            fetcher,
        })
    }

    fn failed(&self, reason: impl Into<String>) -> DiscoveryError {
        DiscoveryError::SeedFailed {
            source_name: self.name.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl SeedSource for HttpSeedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> Option<u32> {
        self.priority
    }

    async fn seed(&self) -> Result<Discovery, DiscoveryError> {
        let text = if self.from_redirect {
            self.fetcher.fetch_redirect(&self.url).await?
        } else {
            self.fetcher.fetch_text(&self.url).await?
        };

        let id = self
            .pattern
            .captures(&text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| self.failed("pattern did not match"))?;

        if !self.kind.is_valid(&id) {
            return Err(self.failed(format!("captured malformed {} ID {id}", self.kind)));
        }

        let mut found = Discovery::default();
        match self.kind {
            EntityKind::Video => found.videos.push(id),
            EntityKind::Channel => found.channels.push(id),
            EntityKind::Playlist => found.playlists.push(id),
        }
        Ok(found)
    }
}

// ============================================================================
// Seed Pool
// ============================================================================

/// Picks seed sources, blacklisting the ones that fail
pub struct SeedPool {
    sources: Vec<Arc<dyn SeedSource>>,
    blacklist: Mutex<HashSet<usize>>,
}

impl SeedPool {
    pub fn new(sources: Vec<Arc<dyn SeedSource>>) -> Self {
        Self {
            sources,
            blacklist: Mutex::new(HashSet::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Number of sources currently blacklisted
    pub fn blacklisted(&self) -> usize {
        self.blacklist
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Try sources until one yields IDs
    ///
    /// Returns [`DiscoveryError::SeedsExhausted`] after every source failed
    /// in this round; the next call starts with a cleared blacklist.
    pub async fn select(&self) -> Result<Discovery, DiscoveryError> {
        if self.sources.is_empty() {
            return Err(DiscoveryError::NoSeedSources);
        }

        if self.blacklisted() >= self.sources.len() {
            tracing::info!("Resetting seed source blacklist");
            self.blacklist
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }

        while let Some(index) = self.pick() {
            let source = &self.sources[index];
            tracing::debug!(source = source.name(), "Using seed source");

            match source.seed().await {
                Ok(found) if found.total() > 0 => {
                    tracing::info!(source = source.name(), ids = found.total(), "Seeded work");
                    return Ok(found);
                }
                Ok(_) => {
                    tracing::warn!(source = source.name(), "Seed source returned nothing");
                }
                Err(e) => {
                    tracing::warn!(source = source.name(), error = %e, "Seed source failed");
                }
            }

            self.blacklist
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(index);
        }

        Err(DiscoveryError::SeedsExhausted)
    }

    fn pick(&self) -> Option<usize> {
        let blacklist = self.blacklist.lock().unwrap_or_else(PoisonError::into_inner);
        let pool: Vec<usize> = (0..self.sources.len())
            .filter(|i| !blacklist.contains(i))
            .collect();

        let top = pool
            .iter()
            .filter_map(|&i| self.sources[i].priority().map(|p| (p, i)))
            .max_by_key(|(p, _)| *p);

        match top {
            Some((_, index)) => Some(index),
            None => pool.choose(&mut rand::thread_rng()).copied(),
        }
    }
}
