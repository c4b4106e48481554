//! Discovery crawler tests
//!
//! The crawler submits to a live coordinator; page scanning is served by a
//! mock site or an in-memory page map.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hivecrawl::discovery::{
    Discovery, DiscoveryConfig, DiscoveryCrawler, DiscoveryError, DiscoverySource,
    PageScanSource, SeedPool, UnitKind, WorkUnit,
};
use hivecrawl::fetcher::PageFetcher;
use hivecrawl::models::EntityKind;
use hivecrawl::utils::retry::RetryConfig;

use super::fixtures::{CHANNEL, VIDEO};
use crate::common::{insert, spawn_coordinator, test_client, wait_until};

const RELATED: [&str; 2] = ["9bZkp7q19f0", "kJQP7kiw5Fk"];

/// Serves canned discoveries keyed by unit ID; unknown units are empty
struct PageMap(HashMap<String, Discovery>);

impl PageMap {
    fn single_video_page() -> Self {
        let mut pages = HashMap::new();
        pages.insert(
            VIDEO.to_string(),
            Discovery {
                videos: RELATED.iter().map(|s| s.to_string()).collect(),
                channels: vec![CHANNEL.to_string()],
                ..Default::default()
            },
        );
        Self(pages)
    }
}

#[async_trait]
impl DiscoverySource for PageMap {
    async fn discover(&self, seed: &WorkUnit) -> Result<Discovery, DiscoveryError> {
        Ok(self.0.get(&seed.id).cloned().unwrap_or_default())
    }
}

fn fast_crawler(config: DiscoveryConfig, url: &str) -> DiscoveryCrawler {
    let fast = RetryConfig::with_delays(1, 10, 20).without_jitter();
    DiscoveryCrawler::new(
        config,
        Arc::new(PageMap::single_video_page()),
        Arc::new(test_client(url)),
        SeedPool::new(Vec::new()),
    )
    .with_retry(fast.clone(), fast)
}

#[tokio::test]
async fn test_discovered_ids_reach_the_coordinator() {
    let coordinator = spawn_coordinator().await;
    insert(coordinator.manager(), EntityKind::Video, &[RELATED[0].to_string()]);
    let crawler = fast_crawler(DiscoveryConfig::default(), &coordinator.url);

    crawler.process_unit(WorkUnit::new(UnitKind::Video, VIDEO)).await;
    let round = crawler.submit_pending().await;

    assert_eq!(round.submitted, 3);
    assert_eq!(round.inserted, 2);
    // Below the crawl threshold everything submitted is queued
    assert_eq!(round.enqueued, 3);

    let db = coordinator.database();
    assert!(db.contains_id(EntityKind::Video, RELATED[1]).unwrap());
    assert!(db.contains_id(EntityKind::Channel, CHANNEL).unwrap());
}

#[tokio::test]
async fn test_only_new_ids_are_queued_above_threshold() {
    let coordinator = spawn_coordinator().await;
    insert(coordinator.manager(), EntityKind::Video, &[RELATED[0].to_string()]);
    let config = DiscoveryConfig {
        crawl_threshold: 0,
        ..Default::default()
    };
    let crawler = fast_crawler(config, &coordinator.url);

    crawler.process_unit(WorkUnit::new(UnitKind::Video, VIDEO)).await;
    let round = crawler.submit_pending().await;

    assert_eq!(round.inserted, 2);
    assert_eq!(round.enqueued, 2);
}

#[tokio::test]
async fn test_seen_ids_are_not_resubmitted() {
    let coordinator = spawn_coordinator().await;
    let crawler = fast_crawler(DiscoveryConfig::default(), &coordinator.url);

    crawler.process_unit(WorkUnit::new(UnitKind::Video, VIDEO)).await;
    assert_eq!(crawler.submit_pending().await.submitted, 3);

    crawler.process_unit(WorkUnit::new(UnitKind::Video, VIDEO)).await;
    let round = crawler.submit_pending().await;
    assert_eq!(round.submitted, 0);
    assert_eq!(crawler.stats().ids_submitted, 3);
}

#[tokio::test]
async fn test_run_feeds_coordinator_until_shutdown() {
    let coordinator = spawn_coordinator().await;
    let config = DiscoveryConfig {
        submit_interval_secs: 1,
        ..Default::default()
    };
    let crawler = Arc::new(fast_crawler(config, &coordinator.url));
    assert_eq!(crawler.enqueue_ids(&[VIDEO.to_string()]), 1);

    let (shutdown, shutdown_rx) = tokio::sync::watch::channel(false);
    let task = tokio::spawn(Arc::clone(&crawler).run(shutdown_rx));

    let db = coordinator.database().clone();
    let found = wait_until(Duration::from_secs(10), || {
        db.contains_id(EntityKind::Channel, CHANNEL).unwrap()
    })
    .await;
    shutdown.send_replace(true);
    let stats = task.await.unwrap();

    assert!(found, "discovered channel never reached the coordinator");
    assert!(stats.pages_scanned >= 1);
    assert_eq!(stats.pages_failed, 0);
    assert_eq!(db.count_ids(EntityKind::Video).unwrap(), 2);
}

#[tokio::test]
async fn test_page_scan_source_reads_mock_site() {
    let site = MockServer::start().await;
    let body = format!(
        r#"<html>
            <a href="/watch?v={}">related</a>
            <a href="/channel/{CHANNEL}">uploader</a>
            <a href="/playlist?list=PL0123456789ABCDEF&index=2">mix</a>
            <button data-uix-load-more-href="/browse_ajax?action_continuation=1&amp;continuation=next"></button>
        </html>"#,
        RELATED[0]
    );
    Mock::given(method("GET"))
        .and(path("/watch"))
        .and(query_param("v", VIDEO))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(1)
        .mount(&site)
        .await;

    let fetcher = PageFetcher::new(100, Duration::from_secs(5))
        .unwrap()
        .with_base_url(site.uri());
    let source = PageScanSource::new(Arc::new(fetcher));

    let found = source
        .discover(&WorkUnit::new(UnitKind::Video, VIDEO))
        .await
        .unwrap();

    assert_eq!(found.videos, vec![RELATED[0].to_string()]);
    assert_eq!(found.channels, vec![CHANNEL.to_string()]);
    assert_eq!(found.playlists, vec!["PL0123456789ABCDEF".to_string()]);
    assert_eq!(
        found.next_seed.as_deref(),
        Some("/browse_ajax?action_continuation=1&continuation=next")
    );
}

#[tokio::test]
async fn test_failed_pages_are_counted_and_dropped() {
    let site = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/watch"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&site)
        .await;

    let coordinator = spawn_coordinator().await;
    let fetcher = PageFetcher::with_retry(100, Duration::from_secs(5), RetryConfig::new(0))
        .unwrap()
        .with_base_url(site.uri());
    let fast = RetryConfig::with_delays(1, 10, 20).without_jitter();
    let crawler = DiscoveryCrawler::new(
        DiscoveryConfig::default(),
        Arc::new(PageScanSource::new(Arc::new(fetcher))),
        Arc::new(test_client(&coordinator.url)),
        SeedPool::new(Vec::new()),
    )
    .with_retry(fast.clone(), fast);

    crawler.process_unit(WorkUnit::new(UnitKind::Video, VIDEO)).await;

    let stats = crawler.stats();
    assert_eq!(stats.pages_scanned, 0);
    assert_eq!(stats.pages_failed, 1);
    assert_eq!(stats.pending_submission, 0);
}
