//! Unit processors: turn one leased entity into its artifact

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::discovery::extract_ids;
use crate::fetcher::{FetchError, PageFetcher};
use crate::models::WorkType;
use crate::utils::join_url;

/// Why a unit could not be processed
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Unexpected page content: {0}")]
    Content(String),
}

/// Produces the artifact for one unit of a work type
#[async_trait]
pub trait UnitProcessor: Send + Sync {
    fn work_type(&self) -> WorkType;

    async fn process(&self, id: &str) -> Result<Value, ProcessError>;
}

// ============================================================================
// Annotation Fetcher
// ============================================================================

/// Fetches the raw annotation document of a video
pub struct AnnotationFetcher {
    fetcher: Arc<PageFetcher>,
    url_prefix: String,
}

impl AnnotationFetcher {
    /// `url_prefix` is requested with the video ID appended
    pub fn new(fetcher: Arc<PageFetcher>, url_prefix: impl Into<String>) -> Self {
        Self {
            fetcher,
            url_prefix: url_prefix.into(),
        }
    }
}

#[async_trait]
impl UnitProcessor for AnnotationFetcher {
    fn work_type(&self) -> WorkType {
        WorkType::Video
    }

    async fn process(&self, id: &str) -> Result<Value, ProcessError> {
        let url = format!("{}{}", self.url_prefix, id);
        let body = self.fetcher.fetch_text(&url).await?;
        Ok(Value::String(body))
    }
}

// ============================================================================
// Channel Scanner
// ============================================================================

/// Lists the videos of a channel by walking its video pages
pub struct ChannelScanner {
    fetcher: Arc<PageFetcher>,
    site_url: String,
    max_pages: usize,
}

impl ChannelScanner {
    pub fn new(fetcher: Arc<PageFetcher>, site_url: impl Into<String>, max_pages: usize) -> Self {
        Self {
            fetcher,
            site_url: site_url.into(),
            max_pages: max_pages.max(1),
        }
    }

    fn first_page(&self, channel: &str) -> String {
        join_url(
            &self.site_url,
            &format!("/channel/{channel}/videos?view=0&flow=grid"),
        )
    }
}

#[async_trait]
impl UnitProcessor for ChannelScanner {
    fn work_type(&self) -> WorkType {
        WorkType::Channel
    }

    async fn process(&self, id: &str) -> Result<Value, ProcessError> {
        let mut seen = HashSet::new();
        let mut videos = Vec::new();
        let mut next = Some(self.first_page(id));
        let mut pages = 0;

        while let Some(url) = next.take() {
            let body = self.fetcher.fetch_text(&url).await?;
            pages += 1;

            let found = extract_ids(&body);
            for video in found.videos {
                if seen.insert(video.clone()) {
                    videos.push(Value::String(video));
                }
            }

            if pages >= self.max_pages {
                tracing::debug!(channel = %id, pages, "Stopping at page limit");
                break;
            }
            next = found.next_seed.map(|path| join_url(&self.site_url, &path));
        }

        tracing::debug!(channel = %id, pages, videos = videos.len(), "Scanned channel");
        Ok(Value::Array(videos))
    }
}
