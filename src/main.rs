use anyhow::Result;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hivecrawl::config::Config;
use hivecrawl::models::EntityKind;

mod commands;

use commands::{CoordinatorParams, DiscoverParams, WorkerParams};

#[derive(Parser)]
#[command(
    name = "hivecrawl",
    version,
    about = "Distributed ID-space crawler with a lease-based work coordinator",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file (defaults to HIVECRAWL_* environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the config file
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the lease coordinator
    Coordinator {
        /// Address to listen on
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// SQLite database path
        #[arg(long)]
        database: Option<String>,

        /// Lease TTL in seconds
        #[arg(long)]
        lease_ttl: Option<u64>,

        /// Seconds between reclaimer sweeps
        #[arg(long)]
        reclaim_interval: Option<u64>,
    },

    /// Lease and process channels and videos
    Worker {
        /// Coordinator base URL
        #[arg(long)]
        coordinator: Option<String>,

        /// Existing worker token
        #[arg(long)]
        worker_id: Option<String>,

        /// Concurrent channel scans
        #[arg(long)]
        channel_jobs: Option<usize>,

        /// Concurrent annotation fetches
        #[arg(long)]
        video_jobs: Option<usize>,
    },

    /// Crawl for new IDs and submit them to the coordinator
    Discover {
        /// Coordinator base URL
        #[arg(long)]
        coordinator: Option<String>,

        /// Starting IDs (repeatable)
        #[arg(short, long = "seed")]
        seeds: Vec<String>,

        /// Total queue capacity
        #[arg(long)]
        crawl_limit: Option<usize>,
    },

    /// Load a JSON array of IDs into the identifier store
    Seed {
        /// JSON file with an array of IDs
        #[arg(short, long)]
        file: String,

        /// Kind of the IDs in the file
        #[arg(short, long, default_value = "channel")]
        kind: EntityKind,

        /// SQLite database path
        #[arg(long)]
        database: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&log_format, &config.logging.level, cli.verbose)?;

    if let Err(e) = config.validate() {
        tracing::error!(error = %format!("{e:#}"), "Invalid configuration");
        return Err(e);
    }

    if let Err(e) = hivecrawl::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics disabled");
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "hivecrawl starting");

    match cli.command {
        Commands::Coordinator {
            bind,
            database,
            lease_ttl,
            reclaim_interval,
        } => {
            tracing::info!(bind = ?bind, database = ?database, "Starting coordinator command");
            commands::coordinator_server(
                config,
                CoordinatorParams {
                    bind,
                    database,
                    lease_ttl,
                    reclaim_interval,
                },
            )
            .await?;
        }

        Commands::Worker {
            coordinator,
            worker_id,
            channel_jobs,
            video_jobs,
        } => {
            tracing::info!(coordinator = ?coordinator, "Starting worker command");
            commands::worker(
                config,
                WorkerParams {
                    coordinator,
                    worker_id,
                    channel_jobs,
                    video_jobs,
                },
            )
            .await?;
        }

        Commands::Discover {
            coordinator,
            seeds,
            crawl_limit,
        } => {
            tracing::info!(coordinator = ?coordinator, seeds = seeds.len(), "Starting discover command");
            commands::discover(
                config,
                DiscoverParams {
                    coordinator,
                    seeds,
                    crawl_limit,
                },
            )
            .await?;
        }

        Commands::Seed {
            file,
            kind,
            database,
        } => {
            tracing::info!(file = %file, kind = %kind, "Starting seed command");
            commands::seed(config, file, kind, database).await?;
        }
    }

    tracing::info!("hivecrawl completed successfully");
    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("hivecrawl=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("hivecrawl={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
