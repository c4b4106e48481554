//! Unified error handling for the hivecrawl crate
//!
//! Each module keeps its own error enum; this module gathers them into a
//! single [`Error`] so that callers crossing module boundaries can still
//! classify a failure.
//!
//! # Architecture
//!
//! - [`HiveErrorTrait`] - Common interface implemented by the unified error
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use hivecrawl::error::{Error, ErrorCategory, HiveErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     match err.category() {
//!         ErrorCategory::LeaseConflict => { /* drop the unit, lease again */ }
//!         _ if err.is_recoverable() => { /* back off and retry */ }
//!         _ => eprintln!("Fatal error: {err}"),
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::coordinator::{ClientError, LeaseError};
pub use crate::discovery::DiscoveryError;
pub use crate::models::ValidationError;
pub use crate::storage::StorageError;

/// Common trait for hivecrawl error types
pub trait HiveErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed IDs or payloads; never retried
    Validation,
    /// The lease is not held any more; re-acquire instead of retrying
    LeaseConflict,
    /// Transport failures; retried with backoff
    Network,
    /// Storage and I/O errors
    Storage,
    /// Configuration errors; fatal
    Config,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Human readable name of the category
    pub fn description(&self) -> &'static str {
        match self {
            Self::Validation => "validation error",
            Self::LeaseConflict => "lease conflict",
            Self::Network => "network error",
            Self::Storage => "storage error",
            Self::Config => "configuration error",
            Self::Other => "other error",
        }
    }
}

/// Unified error type for the hivecrawl crate
#[derive(Error, Debug)]
pub enum Error {
    /// Shape errors in IDs or payloads
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Coordinator-side lease errors
    #[error("Lease error: {0}")]
    Lease(#[from] LeaseError),

    /// Database errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Coordinator client errors
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// Discovery source errors
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl HiveErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Lease(e) => e.is_conflict(),
            Self::Storage(_) => false,
            Self::Client(e) => e.is_transient() || e.is_conflict(),
            Self::Discovery(e) => e.is_recoverable(),
            Self::Io(_) => true,
            Self::Json(_) => false,
            Self::Http(_) => true,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Lease(e) if e.is_conflict() => ErrorCategory::LeaseConflict,
            Self::Lease(LeaseError::Validation(_)) => ErrorCategory::Validation,
            Self::Lease(LeaseError::Storage(_)) => ErrorCategory::Storage,
            Self::Lease(_) => ErrorCategory::Other,
            Self::Client(e) if e.is_conflict() => ErrorCategory::LeaseConflict,
            Self::Client(ClientError::Rejected { .. }) => ErrorCategory::Validation,
            Self::Client(_) | Self::Http(_) => ErrorCategory::Network,
            Self::Discovery(DiscoveryError::Fetch(_)) => ErrorCategory::Network,
            Self::Discovery(_) => ErrorCategory::Other,
            Self::Storage(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Json(_) => ErrorCategory::Other,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(StorageError::from(err))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
