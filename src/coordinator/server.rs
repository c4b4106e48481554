//! Coordinator server implementation
//!
//! Wires the database, lease manager, HTTP router and background sweeps
//! together.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::storage::{Database, StorageError};

use super::api::create_router;
use super::config::CoordinatorConfig;
use super::lease_manager::LeaseManager;
use super::reclaimer::{spawn_stats_logger, Reclaimer};
use super::registry::WorkerRegistry;

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Lease manager
    pub manager: Arc<LeaseManager>,

    /// Server start time
    pub start_time: Instant,

    /// Configuration
    pub config: CoordinatorConfig,
}

impl AppState {
    /// Build state over an already opened database
    pub fn new(db: Arc<Database>, config: CoordinatorConfig) -> Self {
        let registry = Arc::new(WorkerRegistry::new(config.lease_ttl()));
        let manager = Arc::new(LeaseManager::new(db, registry, &config));
        Self {
            manager,
            start_time: Instant::now(),
            config,
        }
    }
}

// ============================================================================
// Coordinator Server
// ============================================================================

/// Main coordinator server
pub struct CoordinatorServer {
    config: CoordinatorConfig,
    state: AppState,
    shutdown: watch::Sender<bool>,
}

impl CoordinatorServer {
    /// Open the configured database and create the server
    pub fn new(config: CoordinatorConfig) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::ConfigError(e.to_string()))?;

        let db = Database::open(&config.database_path)?;
        Ok(Self::with_database(Arc::new(db), config))
    }

    /// Create the server over an existing database
    pub fn with_database(db: Arc<Database>, config: CoordinatorConfig) -> Self {
        let state = AppState::new(db, config.clone());
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            state,
            shutdown,
        }
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone())
            .layer(DefaultBodyLimit::max(self.config.max_body_bytes));

        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        if self.config.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Start with graceful shutdown
    ///
    /// Background sweeps stop once the HTTP server has drained.
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let router = self.build_router();
        let addr = self.config.bind_address;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(e.to_string()))?;

        tracing::info!(address = %addr, "Starting coordinator server");

        let background = self.start_background_tasks();

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServerError::ServeError(e.to_string()));

        self.shutdown.send_replace(true);
        for handle in background {
            let _ = handle.await;
        }

        served?;
        tracing::info!("Coordinator server shutdown complete");
        Ok(())
    }

    /// Start the reclaimer and the stats logger
    fn start_background_tasks(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let manager = Arc::clone(&self.state.manager);

        let reclaimer = Reclaimer::new(Arc::clone(&manager), self.config.reclaim_interval())
            .spawn(self.shutdown.subscribe());
        let stats = spawn_stats_logger(
            manager,
            self.config.stats_interval(),
            self.shutdown.subscribe(),
        );

        tracing::info!(
            reclaim_interval_secs = self.config.reclaim_interval_secs,
            lease_ttl_secs = self.config.lease_ttl_secs,
            "Background tasks started"
        );
        vec![reclaimer, stats]
    }

    /// Get server info
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            bind_address: self.config.bind_address,
            lease_ttl_secs: self.config.lease_ttl_secs,
            reclaim_interval_secs: self.config.reclaim_interval_secs,
            cors_enabled: self.config.enable_cors,
            request_logging_enabled: self.config.enable_request_logging,
        }
    }
}

/// Server information
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub bind_address: SocketAddr,
    pub lease_ttl_secs: u64,
    pub reclaim_interval_secs: u64,
    pub cors_enabled: bool,
    pub request_logging_enabled: bool,
}

impl ServerInfo {
    /// Format as display string
    pub fn display(&self) -> String {
        format!(
            "Coordinator Server\n\
             {:-<40}\n\
             Bind Address: {}\n\
             Lease TTL: {}s\n\
             Reclaim Interval: {}s\n\
             CORS: {}\n\
             Request Logging: {}",
            "",
            self.bind_address,
            self.lease_ttl_secs,
            self.reclaim_interval_secs,
            if self.cors_enabled { "enabled" } else { "disabled" },
            if self.request_logging_enabled { "enabled" } else { "disabled" }
        )
    }
}

// ============================================================================
// Server Errors
// ============================================================================

/// Server errors
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error
    ConfigError(String),

    /// Database could not be opened
    StorageError(StorageError),

    /// Failed to bind to address
    BindError(String),

    /// Server error
    ServeError(String),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigError(msg) => write!(f, "Configuration error: {msg}"),
            Self::StorageError(e) => write!(f, "Storage error: {e}"),
            Self::BindError(msg) => write!(f, "Failed to bind: {msg}"),
            Self::ServeError(msg) => write!(f, "Server error: {msg}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::StorageError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for ServerError {
    fn from(e: StorageError) -> Self {
        Self::StorageError(e)
    }
}

// ============================================================================
// Tests
// ============================================================================
