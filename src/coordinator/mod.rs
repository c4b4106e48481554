//! Lease coordinator
//!
//! Hands out exclusive, time-bounded leases on channels and videos, records
//! completions, and reclaims leases whose workers went quiet.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            Coordinator Server            │
//! │                                          │
//! │  ┌────────────────────────────────────┐  │
//! │  │            REST API                │  │
//! │  │  GET  /worker                      │  │
//! │  │  GET  /channels  /videos           │  │
//! │  │  POST /channels  /videos           │  │
//! │  │  POST /{channels,videos}/abort     │  │
//! │  │  POST /{channels,videos}/ping      │  │
//! │  │  POST /{kind}/submit               │  │
//! │  └────────────────────────────────────┘  │
//! │                   │                      │
//! │  ┌────────────────────────────────────┐  │
//! │  │  Lease Manager                     │  │
//! │  │  - one admission gate per type     │  │
//! │  │  - validation, ownership checks    │  │
//! │  └────────────────────────────────────┘  │
//! │                   │                      │
//! │  ┌──────────────┐   ┌─────────────────┐  │
//! │  │  SQLite      │   │  Reclaimer      │  │
//! │  │  ids/leases  │   │  expired leases │  │
//! │  └──────────────┘   └─────────────────┘  │
//! └──────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use hivecrawl::coordinator::{CoordinatorConfig, CoordinatorServer};
//!
//! let config = CoordinatorConfig::default();
//! let server = CoordinatorServer::new(config)?;
//! server.start_with_shutdown(shutdown_signal()).await?;
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod gate;
pub mod lease_manager;
pub mod reclaimer;
pub mod registry;
pub mod server;

// Re-export main types
pub use client::{ClientConfig, ClientError, CoordinatorClient, HealthStatus};
pub use config::{ConfigError, CoordinatorConfig};
pub use gate::{AdmissionGate, GateClosed, GatePermit};
pub use lease_manager::{LeaseError, LeaseManager};
pub use reclaimer::Reclaimer;
pub use registry::{WorkerInfo, WorkerRegistry, WorkerStatus};
pub use server::{AppState, CoordinatorServer, ServerError};
