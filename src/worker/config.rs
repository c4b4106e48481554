//! Worker configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::coordinator::{ClientConfig, ConfigError};
use crate::models::WorkType;
use crate::utils::retry::RetryConfig;

/// Configuration for a lease-processing worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Coordinator base URL
    pub coordinator_url: String,

    /// Reuse an existing worker token instead of requesting one
    pub worker_id: Option<String>,

    /// Concurrent channel scans
    pub channel_jobs: usize,

    /// Concurrent annotation fetches
    pub video_jobs: usize,

    /// Channels leased per refill
    pub channel_fetch_limit: u32,

    /// Videos leased per refill
    pub video_fetch_limit: u32,

    /// Finished channels buffered before a completion request
    pub channel_submission_threshold: usize,

    /// Finished videos buffered before a completion request
    pub video_submission_threshold: usize,

    /// Ping leases whose processing runs longer than this
    pub keep_alive_secs: u64,

    /// Pause after an empty assignment
    pub idle_sleep_secs: u64,

    /// HTTP timeout for coordinator and page requests
    pub request_timeout_secs: u64,

    /// Retries for coordinator requests
    pub max_retries: u32,

    /// Page requests per second
    pub requests_per_second: u32,

    /// Site root for channel pages and continuations
    pub site_url: String,

    /// Annotation endpoint; the video ID is appended
    pub annotation_url: String,

    /// Continuation pages followed per channel
    pub max_channel_pages: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            coordinator_url: "http://localhost:8080".to_string(),
            worker_id: None,
            channel_jobs: 1,
            video_jobs: 4,
            channel_fetch_limit: 1,
            video_fetch_limit: 50,
            channel_submission_threshold: 1,
            video_submission_threshold: 10,
            keep_alive_secs: 60,
            idle_sleep_secs: 6,
            request_timeout_secs: 30,
            max_retries: 5,
            requests_per_second: 5,
            site_url: "https://www.youtube.com".to_string(),
            annotation_url: "https://www.youtube.com/annotations_invideo?video_id=".to_string(),
            max_channel_pages: 100,
        }
    }
}

impl WorkerConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_secs(self.idle_sleep_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Concurrent units for a work type
    pub fn jobs(&self, work_type: WorkType) -> usize {
        match work_type {
            WorkType::Channel => self.channel_jobs,
            WorkType::Video => self.video_jobs,
        }
    }

    /// Units leased per refill for a work type
    pub fn fetch_limit(&self, work_type: WorkType) -> u32 {
        match work_type {
            WorkType::Channel => self.channel_fetch_limit,
            WorkType::Video => self.video_fetch_limit,
        }
    }

    /// Buffered results per completion request for a work type
    pub fn submission_threshold(&self, work_type: WorkType) -> usize {
        match work_type {
            WorkType::Channel => self.channel_submission_threshold,
            WorkType::Video => self.video_submission_threshold,
        }
    }

    /// Client settings for talking to the coordinator
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(&self.coordinator_url)
            .with_timeout(self.request_timeout())
            .with_retry(RetryConfig {
                max_retries: self.max_retries,
                base_delay_ms: 1000,
                max_delay_ms: 5000,
                backoff_multiplier: 1.3,
                jitter: true,
            })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !crate::utils::is_http_url(&self.coordinator_url) {
            return Err(ConfigError::InvalidValue {
                field: "coordinator_url".to_string(),
                reason: "must be an http(s) URL".to_string(),
            });
        }

        if self.channel_jobs + self.video_jobs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "channel_jobs/video_jobs".to_string(),
                reason: "at least one job is required".to_string(),
            });
        }

        for work_type in WorkType::ALL {
            if self.jobs(work_type) > 0 && self.fetch_limit(work_type) == 0 {
                return Err(ConfigError::InvalidValue {
                    field: format!("{}_fetch_limit", work_type.as_str()),
                    reason: "must be greater than 0".to_string(),
                });
            }
            if self.submission_threshold(work_type) == 0 {
                return Err(ConfigError::InvalidValue {
                    field: format!("{}_submission_threshold", work_type.as_str()),
                    reason: "must be greater than 0".to_string(),
                });
            }
        }

        if self.keep_alive_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "keep_alive_secs".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        if self.requests_per_second == 0 {
            return Err(ConfigError::InvalidValue {
                field: "requests_per_second".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}
