//! Integration tests module
//!
//! End-to-end tests for the hivecrawl coordinator and its clients:
//! - Lease lifecycle: assign, heartbeat, complete, abort, reclaim
//! - Error codes on the HTTP API
//! - Workers and the discovery crawler talking to a live coordinator

pub mod api_test;
pub mod client_test;
pub mod discovery_test;
pub mod fixtures;
pub mod lease_protocol_test;
pub mod worker_test;
