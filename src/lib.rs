//! hivecrawl - Distributed ID-space crawler
//!
//! A central coordinator hands out leases on channel and video IDs; any
//! number of workers lease units, process them, heartbeat long-running work
//! and commit or abort the result. Leases whose heartbeat lapses are
//! reclaimed, so crashed workers never stall the crawl.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`coordinator`] - Lease manager, admission gate, reclaimer and HTTP API
//! - [`worker`] - Lease client, unit processors and the worker runner
//! - [`discovery`] - Crawler that feeds new IDs into the identifier store
//! - [`storage`] - SQLite identifier store and lease tables
//! - [`models`] - Core data structures and ID validation
//! - [`fetcher`] - Rate-limited page fetching
//! - [`metrics`] - Prometheus metrics
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use hivecrawl::config::Config;
//! use hivecrawl::worker::WorkerRunner;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let runner = WorkerRunner::from_config(config.worker)?;
//!     let handle = runner.start().await?;
//!     handle.wait().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod discovery;
pub mod error;
pub mod fetcher;
pub mod metrics;
pub mod models;
pub mod storage;
pub mod utils;
pub mod worker;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::coordinator::{CoordinatorClient, CoordinatorConfig, CoordinatorServer, LeaseManager};
    pub use crate::discovery::{Discovery, DiscoveryCrawler, DiscoverySource};
    pub use crate::error::{Error, ErrorCategory, HiveErrorTrait, Result};
    pub use crate::models::{EntityKind, Lease, WorkType, WorkerId};
    pub use crate::storage::Database;
    pub use crate::worker::{LeaseApi, UnitProcessor, WorkerConfig, WorkerRunner};
}

// Direct re-exports for convenience
pub use models::{EntityKind, WorkType, WorkerId};
