use anyhow::{Context, Result};
use std::net::SocketAddr;

use hivecrawl::config::Config;
use hivecrawl::coordinator::CoordinatorServer;

/// Command-line overrides for the coordinator
pub struct CoordinatorParams {
    pub bind: Option<SocketAddr>,
    pub database: Option<String>,
    pub lease_ttl: Option<u64>,
    pub reclaim_interval: Option<u64>,
}

/// Start the coordinator server
pub async fn coordinator_server(mut config: Config, params: CoordinatorParams) -> Result<()> {
    let CoordinatorParams {
        bind,
        database,
        lease_ttl,
        reclaim_interval,
    } = params;

    if let Some(bind) = bind {
        config.coordinator.bind_address = bind;
    }
    if let Some(database) = database {
        config.database.path = database.into();
    }
    if let Some(ttl) = lease_ttl {
        config.coordinator.lease_ttl_secs = ttl;
    }
    if let Some(interval) = reclaim_interval {
        config.coordinator.reclaim_interval_secs = interval;
    }

    let coordinator = config.coordinator_config();
    coordinator
        .validate()
        .context("Invalid coordinator configuration")?;

    let server = CoordinatorServer::new(coordinator).context("Failed to create coordinator server")?;

    println!("{}", server.info().display());
    println!("Database: {}", config.database.path.display());
    println!();
    println!("API Endpoints:");
    println!("  GET  /worker                     - Issue a worker token");
    println!("  GET  /channels?worker=&limit=    - Lease channels");
    println!("  GET  /videos?worker=&limit=      - Lease videos");
    println!("  POST /channels?worker=           - Complete channels");
    println!("  POST /videos?worker=             - Complete videos");
    println!("  POST /{{kind}}/abort?worker=       - Abort leases");
    println!("  POST /{{kind}}/ping?worker=        - Heartbeat leases");
    println!("  POST /{{kind}}/submit              - Submit discovered IDs");
    println!("  GET  /stats                      - Store and lease counters");
    println!("  GET  /health                     - Health check");
    println!("  GET  /metrics                    - Prometheus metrics");
    println!();
    println!("Press Ctrl+C to stop.\n");

    server
        .start_with_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Shutdown signal received");
                }
                Err(e) => {
                    tracing::error!("Failed to wait for Ctrl+C: {}", e);
                }
            }
        })
        .await?;

    println!("Coordinator server stopped.");
    Ok(())
}
