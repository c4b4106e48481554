//! Common test utilities

use std::sync::Arc;
use std::time::Duration;

use hivecrawl::coordinator::{
    AppState, ClientConfig, CoordinatorClient, CoordinatorConfig, CoordinatorServer, LeaseManager,
};
use hivecrawl::models::EntityKind;
use hivecrawl::storage::Database;
use hivecrawl::utils::retry::RetryConfig;
use tokio::task::JoinHandle;

/// Coordinator configuration without request logging
pub fn test_config() -> CoordinatorConfig {
    CoordinatorConfig {
        enable_request_logging: false,
        ..Default::default()
    }
}

/// Coordinator server over a fresh in-memory database
pub fn test_server() -> CoordinatorServer {
    let db = Arc::new(Database::in_memory().expect("in-memory database"));
    CoordinatorServer::with_database(db, test_config())
}

/// Lease manager over a fresh in-memory database
pub fn test_manager() -> Arc<LeaseManager> {
    test_server().state().manager
}

/// Insert IDs straight into the identifier store
pub fn insert(manager: &LeaseManager, kind: EntityKind, ids: &[String]) {
    manager
        .database()
        .insert_ids(kind, ids, None, None)
        .expect("insert ids");
}

/// A coordinator listening on an ephemeral local port
pub struct TestCoordinator {
    pub url: String,
    pub state: AppState,
    task: JoinHandle<()>,
}

impl TestCoordinator {
    pub fn manager(&self) -> &Arc<LeaseManager> {
        &self.state.manager
    }

    pub fn database(&self) -> &Arc<Database> {
        self.state.manager.database()
    }
}

impl Drop for TestCoordinator {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Serve a fresh coordinator on 127.0.0.1
pub async fn spawn_coordinator() -> TestCoordinator {
    let server = test_server();
    let router = server.build_router();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");

    let task = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    TestCoordinator {
        url: format!("http://{addr}"),
        state: server.state(),
        task,
    }
}

/// Client with short timeouts and fast retries
#[allow(dead_code)]
pub fn test_client(url: &str) -> CoordinatorClient {
    CoordinatorClient::new(
        ClientConfig::new(url)
            .with_timeout(Duration::from_secs(5))
            .with_retry(RetryConfig::with_delays(2, 10, 50).without_jitter()),
    )
    .expect("coordinator client")
}

/// Poll `check` until it holds or `timeout` passes
#[allow(dead_code)]
pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    check()
}
