use anyhow::{Context, Result};

use hivecrawl::config::Config;
use hivecrawl::worker::WorkerRunner;

/// Command-line overrides for the worker
pub struct WorkerParams {
    pub coordinator: Option<String>,
    pub worker_id: Option<String>,
    pub channel_jobs: Option<usize>,
    pub video_jobs: Option<usize>,
}

/// Run lease loops until Ctrl+C
pub async fn worker(mut config: Config, params: WorkerParams) -> Result<()> {
    let WorkerParams {
        coordinator,
        worker_id,
        channel_jobs,
        video_jobs,
    } = params;

    if let Some(url) = coordinator {
        config.worker.coordinator_url = url;
    }
    if worker_id.is_some() {
        config.worker.worker_id = worker_id;
    }
    if let Some(jobs) = channel_jobs {
        config.worker.channel_jobs = jobs;
    }
    if let Some(jobs) = video_jobs {
        config.worker.video_jobs = jobs;
    }

    let settings = config.worker;
    println!("Starting worker");
    println!("===============");
    println!("  Coordinator: {}", settings.coordinator_url);
    println!(
        "  Channel jobs: {} (lease {} / submit every {})",
        settings.channel_jobs, settings.channel_fetch_limit, settings.channel_submission_threshold
    );
    println!(
        "  Video jobs: {} (lease {} / submit every {})",
        settings.video_jobs, settings.video_fetch_limit, settings.video_submission_threshold
    );
    println!("  Keep-alive: {}s", settings.keep_alive_secs);
    println!();

    let runner = WorkerRunner::from_config(settings).context("Failed to create worker")?;
    let handle = runner.start().await.context("Failed to start worker")?;

    println!("Press Ctrl+C to stop.\n");

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            println!("\nShutdown signal received, stopping...");
        }
        Err(e) => {
            tracing::error!("Failed to wait for Ctrl+C: {}", e);
        }
    }
    handle.shutdown().await?;

    println!("Worker stopped.");
    Ok(())
}
