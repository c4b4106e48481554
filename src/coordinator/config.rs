//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::{LimitRange, WorkType};

const DEFAULT_BIND: ([u8; 4], u16) = ([0, 0, 0, 0], 8080);

/// Completion batches carry whole annotation documents
const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Configuration for the coordinator server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Server bind address
    pub bind_address: SocketAddr,

    /// SQLite database file
    pub database_path: PathBuf,

    /// An open lease whose heartbeat is older than this is reclaimed
    pub lease_ttl_secs: u64,

    /// Interval between reclaimer sweeps
    pub reclaim_interval_secs: u64,

    /// Interval between stats log lines
    pub stats_interval_secs: u64,

    /// Clamp range for channel assignment
    pub channel_limits: LimitRange,

    /// Clamp range for video assignment
    pub video_limits: LimitRange,

    /// Largest accepted request body
    pub max_body_bytes: usize,

    /// Enable CORS for API
    pub enable_cors: bool,

    /// Enable request logging
    pub enable_request_logging: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(DEFAULT_BIND),
            database_path: PathBuf::from("data/hivecrawl.db"),
            lease_ttl_secs: 300,
            reclaim_interval_secs: 60,
            stats_interval_secs: 30,
            channel_limits: WorkType::Channel.default_limits(),
            video_limits: WorkType::Video.default_limits(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            enable_cors: true,
            enable_request_logging: true,
        }
    }
}

impl CoordinatorConfig {
    /// Create a new config builder
    pub fn builder() -> CoordinatorConfigBuilder {
        CoordinatorConfigBuilder::default()
    }

    /// Lease TTL as a duration
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    /// Reclaimer period as a duration
    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_secs)
    }

    /// Stats log period as a duration
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    /// Clamp range for a work type
    pub fn limits(&self, work_type: WorkType) -> LimitRange {
        match work_type {
            WorkType::Channel => self.channel_limits,
            WorkType::Video => self.video_limits,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reclaim_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reclaim_interval_secs".to_string(),
                reason: "Must be at least 1 second".to_string(),
            });
        }

        if self.lease_ttl_secs <= self.reclaim_interval_secs {
            return Err(ConfigError::InvalidValue {
                field: "lease_ttl_secs".to_string(),
                reason: "TTL must be greater than the reclaim interval".to_string(),
            });
        }

        if self.stats_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "stats_interval_secs".to_string(),
                reason: "Must be at least 1 second".to_string(),
            });
        }

        if self.max_body_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_body_bytes".to_string(),
                reason: "Must be non-zero".to_string(),
            });
        }

        for (field, limits) in [
            ("channel_limits", self.channel_limits),
            ("video_limits", self.video_limits),
        ] {
            if limits.default == 0 || limits.max == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: "Limits must be non-zero".to_string(),
                });
            }
            if limits.default > limits.max {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: format!("Default {} exceeds max {}", limits.default, limits.max),
                });
            }
        }

        Ok(())
    }
}

/// Builder for CoordinatorConfig
#[derive(Debug, Default)]
pub struct CoordinatorConfigBuilder {
    bind_address: Option<SocketAddr>,
    database_path: Option<PathBuf>,
    lease_ttl_secs: Option<u64>,
    reclaim_interval_secs: Option<u64>,
    stats_interval_secs: Option<u64>,
    channel_limits: Option<LimitRange>,
    video_limits: Option<LimitRange>,
    max_body_bytes: Option<usize>,
    enable_cors: Option<bool>,
    enable_request_logging: Option<bool>,
}

impl CoordinatorConfigBuilder {
    /// Set bind address
    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = Some(addr);
        self
    }

    /// Set bind address from string
    pub fn bind_address_str(mut self, addr: &str) -> Result<Self, ConfigError> {
        self.bind_address = Some(addr.parse().map_err(|_| ConfigError::InvalidValue {
            field: "bind_address".to_string(),
            reason: format!("Invalid address: {addr}"),
        })?);
        Ok(self)
    }

    /// Set database file
    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Set lease TTL
    pub fn lease_ttl_secs(mut self, secs: u64) -> Self {
        self.lease_ttl_secs = Some(secs);
        self
    }

    /// Set reclaimer period
    pub fn reclaim_interval_secs(mut self, secs: u64) -> Self {
        self.reclaim_interval_secs = Some(secs);
        self
    }

    /// Set stats log period
    pub fn stats_interval_secs(mut self, secs: u64) -> Self {
        self.stats_interval_secs = Some(secs);
        self
    }

    /// Set the clamp range of a work type
    pub fn limits(mut self, work_type: WorkType, limits: LimitRange) -> Self {
        match work_type {
            WorkType::Channel => self.channel_limits = Some(limits),
            WorkType::Video => self.video_limits = Some(limits),
        }
        self
    }

    /// Set the request body limit
    pub fn max_body_bytes(mut self, bytes: usize) -> Self {
        self.max_body_bytes = Some(bytes);
        self
    }

    /// Enable/disable CORS
    pub fn enable_cors(mut self, enable: bool) -> Self {
        self.enable_cors = Some(enable);
        self
    }

    /// Enable/disable request logging
    pub fn enable_request_logging(mut self, enable: bool) -> Self {
        self.enable_request_logging = Some(enable);
        self
    }

    /// Build the config
    pub fn build(self) -> Result<CoordinatorConfig, ConfigError> {
        let defaults = CoordinatorConfig::default();
        let config = CoordinatorConfig {
            bind_address: self.bind_address.unwrap_or(defaults.bind_address),
            database_path: self.database_path.unwrap_or(defaults.database_path),
            lease_ttl_secs: self.lease_ttl_secs.unwrap_or(defaults.lease_ttl_secs),
            reclaim_interval_secs: self
                .reclaim_interval_secs
                .unwrap_or(defaults.reclaim_interval_secs),
            stats_interval_secs: self
                .stats_interval_secs
                .unwrap_or(defaults.stats_interval_secs),
            channel_limits: self.channel_limits.unwrap_or(defaults.channel_limits),
            video_limits: self.video_limits.unwrap_or(defaults.video_limits),
            max_body_bytes: self.max_body_bytes.unwrap_or(defaults.max_body_bytes),
            enable_cors: self.enable_cors.unwrap_or(defaults.enable_cors),
            enable_request_logging: self
                .enable_request_logging
                .unwrap_or(defaults.enable_request_logging),
        };

        config.validate()?;
        Ok(config)
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue { field: String, reason: String },
    MissingField { field: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{field}': {reason}")
            }
            Self::MissingField { field } => {
                write!(f, "Missing required field: {field}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
