//! Default discovery source: fetch the unit's page and scan it for IDs

use std::sync::Arc;

use async_trait::async_trait;

use super::extract::extract_ids;
use super::{Discovery, DiscoveryError, DiscoverySource, WorkUnit};
use crate::fetcher::PageFetcher;

/// Scans pages through a shared, rate-limited [`PageFetcher`]
pub struct PageScanSource {
    fetcher: Arc<PageFetcher>,
}

impl PageScanSource {
    pub fn new(fetcher: Arc<PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl DiscoverySource for PageScanSource {
    async fn discover(&self, seed: &WorkUnit) -> Result<Discovery, DiscoveryError> {
        let url = seed.url();
        let body = self.fetcher.fetch_text(&url).await?;
        let found = extract_ids(&body);

        tracing::debug!(
            kind = %seed.kind,
            id = %seed.id,
            videos = found.videos.len(),
            channels = found.channels.len(),
            playlists = found.playlists.len(),
            continuation = found.next_seed.is_some(),
            "Scanned page"
        );
        Ok(found)
    }
}
