//! Lease-processing worker
//!
//! ```text
//!   ┌──────────────────────────── WorkerRunner ───────────────────────────┐
//!   │  channel loops ×N ─┐                          ┌─ video loops ×M     │
//!   │                    ▼                          ▼                     │
//!   │            LeaseClient(channel)       LeaseClient(video)            │
//!   │             backlog · buffer · ledger (one per work type)           │
//!   └────────────────────────────┬────────────────────────────────────────┘
//!                                │ LeaseApi (assign · ping · complete · abort)
//!                                ▼
//!                           coordinator
//! ```

pub mod config;
pub mod lease_client;
pub mod processor;
pub mod runner;
pub mod state;

pub use config::WorkerConfig;
pub use lease_client::{FlushOutcome, LeaseApi, LeaseClient};
pub use processor::{AnnotationFetcher, ChannelScanner, ProcessError, UnitProcessor};
pub use runner::{RunnerError, RunnerHandle, WorkerRunner};
pub use state::{LedgerCounts, StateError, UnitLedger, UnitState};
