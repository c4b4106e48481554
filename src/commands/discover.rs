use anyhow::{Context, Result};
use std::sync::Arc;

use hivecrawl::config::Config;
use hivecrawl::coordinator::{ClientConfig, CoordinatorClient};
use hivecrawl::discovery::{
    DiscoveryCrawler, HttpSeedSource, PageScanSource, SeedPool, SeedSource, StaticSeedSource,
};
use hivecrawl::fetcher::PageFetcher;
use hivecrawl::utils::retry::RetryConfig;

/// Command-line overrides for the discovery crawler
pub struct DiscoverParams {
    pub coordinator: Option<String>,
    pub seeds: Vec<String>,
    pub crawl_limit: Option<usize>,
}

/// Crawl for new IDs and feed them to the coordinator until Ctrl+C
pub async fn discover(mut config: Config, params: DiscoverParams) -> Result<()> {
    let DiscoverParams {
        coordinator,
        seeds,
        crawl_limit,
    } = params;

    if let Some(url) = coordinator {
        config.worker.coordinator_url = url;
    }
    if let Some(limit) = crawl_limit {
        config.discovery.crawl_limit = limit;
    }
    config.discovery.seeds.extend(seeds);

    let settings = config.discovery;
    settings
        .validate()
        .map_err(anyhow::Error::msg)
        .context("Invalid discovery configuration")?;

    let client = CoordinatorClient::new(
        ClientConfig::new(&config.worker.coordinator_url)
            .with_timeout(settings.request_timeout())
            .with_retry(RetryConfig::new(2)),
    )
    .context("Failed to create coordinator client")?;

    // Pages are retried by the crawler itself
    let fetcher = Arc::new(
        PageFetcher::with_retry(
            settings.requests_per_second,
            settings.request_timeout(),
            RetryConfig::new(0),
        )
        .context("Failed to create page fetcher")?,
    );

    let mut sources: Vec<Arc<dyn SeedSource>> = Vec::new();
    if !settings.seeds.is_empty() {
        sources.push(Arc::new(StaticSeedSource::new("configured", &settings.seeds)));
    }
    for source in &settings.seed_sources {
        let source = HttpSeedSource::from_config(source, Arc::clone(&fetcher))
            .with_context(|| format!("Invalid seed source '{}'", source.name))?;
        sources.push(Arc::new(source));
    }

    println!("Starting discovery crawler");
    println!("==========================");
    println!("  Coordinator: {}", config.worker.coordinator_url);
    println!("  Crawl limit: {}", settings.crawl_limit);
    println!("  Concurrency: {}", settings.process_concurrency);
    println!("  Seed sources: {}", sources.len());
    println!();

    let initial = settings.seeds.clone();
    let crawler = Arc::new(DiscoveryCrawler::new(
        settings,
        Arc::new(PageScanSource::new(fetcher)),
        Arc::new(client),
        SeedPool::new(sources),
    ));
    let queued = crawler.enqueue_ids(&initial);
    tracing::info!(queued, "Queued initial seeds");

    let (shutdown, shutdown_rx) = tokio::sync::watch::channel(false);
    let task = tokio::spawn(Arc::clone(&crawler).run(shutdown_rx));

    println!("Press Ctrl+C to stop.\n");
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            println!("\nShutdown signal received, stopping...");
        }
        Err(e) => {
            tracing::error!("Failed to wait for Ctrl+C: {}", e);
        }
    }
    shutdown.send_replace(true);

    let stats = task.await.context("Discovery crawler panicked")?;
    println!("Discovery stopped.");
    println!("  Pages scanned: {}", stats.pages_scanned);
    println!("  Pages failed: {}", stats.pages_failed);
    println!("  IDs submitted: {}", stats.ids_submitted);
    println!("  IDs new: {}", stats.ids_inserted);
    Ok(())
}
