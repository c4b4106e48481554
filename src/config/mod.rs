//! Configuration management for hivecrawl
//!
//! One TOML file (or a set of `HIVECRAWL_*` environment variables) configures
//! every role. Each subcommand reads the section it needs.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::coordinator::CoordinatorConfig;
use crate::discovery::DiscoveryConfig;
use crate::worker::WorkerConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Coordinator server settings
    pub coordinator: CoordinatorConfig,

    /// Lease-processing worker settings
    pub worker: WorkerConfig,

    /// Discovery crawler settings
    pub discovery: DiscoveryConfig,

    /// Identifier store location
    pub database: DatabaseConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/hivecrawl.db"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("HIVECRAWL_DATABASE_PATH") {
            config.database.path = PathBuf::from(path);
        }
        if let Ok(level) = std::env::var("HIVECRAWL_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("HIVECRAWL_LOG_FORMAT") {
            config.logging.format = format;
        }

        if let Ok(addr) = std::env::var("HIVECRAWL_BIND_ADDRESS") {
            config.coordinator.bind_address = addr
                .parse()
                .with_context(|| format!("Invalid HIVECRAWL_BIND_ADDRESS: {addr}"))?;
        }
        if let Some(ttl) = env_parse("HIVECRAWL_LEASE_TTL_SECS") {
            config.coordinator.lease_ttl_secs = ttl;
        }
        if let Some(interval) = env_parse("HIVECRAWL_RECLAIM_INTERVAL_SECS") {
            config.coordinator.reclaim_interval_secs = interval;
        }

        if let Ok(url) = std::env::var("HIVECRAWL_COORDINATOR_URL") {
            config.worker.coordinator_url = url;
        }
        config.worker.worker_id = std::env::var("HIVECRAWL_WORKER_ID").ok();
        if let Some(jobs) = env_parse("HIVECRAWL_CHANNEL_JOBS") {
            config.worker.channel_jobs = jobs;
        }
        if let Some(jobs) = env_parse("HIVECRAWL_VIDEO_JOBS") {
            config.worker.video_jobs = jobs;
        }
        if let Some(rps) = env_parse("HIVECRAWL_REQUESTS_PER_SECOND") {
            config.worker.requests_per_second = rps;
            config.discovery.requests_per_second = rps;
        }

        if let Some(limit) = env_parse("HIVECRAWL_CRAWL_LIMIT") {
            config.discovery.crawl_limit = limit;
        }

        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load from `path` when given, otherwise from the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::from_env(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.coordinator
            .validate()
            .context("Invalid [coordinator] section")?;
        self.worker.validate().context("Invalid [worker] section")?;
        self.discovery
            .validate()
            .map_err(anyhow::Error::msg)
            .context("Invalid [discovery] section")?;

        if self.database.path.as_os_str().is_empty() {
            anyhow::bail!("database.path must not be empty");
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("logging.format must be 'text' or 'json'");
        }

        Ok(())
    }

    /// Coordinator settings with the shared database path applied
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            database_path: self.database.path.clone(),
            ..self.coordinator.clone()
        }
    }
}
