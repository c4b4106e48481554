//! Worker runner tests against a live coordinator

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hivecrawl::models::{EntityKind, WorkType};
use hivecrawl::worker::{ProcessError, UnitProcessor, WorkerConfig, WorkerRunner};

use super::fixtures::{channel_page, video_ids, CHANNEL};
use crate::common::{insert, spawn_coordinator, test_client, wait_until};

fn video_config(url: &str) -> WorkerConfig {
    WorkerConfig {
        coordinator_url: url.to_string(),
        channel_jobs: 0,
        video_jobs: 1,
        video_fetch_limit: 4,
        video_submission_threshold: 2,
        idle_sleep_secs: 1,
        max_retries: 2,
        requests_per_second: 100,
        ..Default::default()
    }
}

/// Answers every video with a fixed document; optionally fails the first
/// attempt on one ID
struct StaticAnnotations {
    fail_once: Option<String>,
    delay: Duration,
    attempts: Mutex<HashMap<String, usize>>,
    calls: AtomicUsize,
}

impl StaticAnnotations {
    fn new(fail_once: Option<&str>) -> Self {
        Self {
            fail_once: fail_once.map(str::to_string),
            delay: Duration::ZERO,
            attempts: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn attempts(&self, id: &str) -> usize {
        self.attempts.lock().unwrap().get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl UnitProcessor for StaticAnnotations {
    fn work_type(&self) -> WorkType {
        WorkType::Video
    }

    async fn process(&self, id: &str) -> Result<Value, ProcessError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(id.to_string()).or_insert(0);
            *n += 1;
            *n
        };

        if self.fail_once.as_deref() == Some(id) && attempt == 1 {
            return Err(ProcessError::Content("first attempt fails".to_string()));
        }
        Ok(Value::String(format!("<document id=\"{id}\"/>")))
    }
}

#[tokio::test]
async fn test_worker_drains_all_units() {
    let coordinator = spawn_coordinator().await;
    let ids = video_ids(6);
    insert(coordinator.manager(), EntityKind::Video, &ids);

    let processor = Arc::new(StaticAnnotations::new(None));
    let runner = WorkerRunner::new(
        video_config(&coordinator.url),
        Arc::new(test_client(&coordinator.url)),
    )
    .with_processor(processor.clone());

    let handle = runner.start().await.unwrap();
    assert!(handle.is_running());

    let db = coordinator.database().clone();
    let done = wait_until(Duration::from_secs(10), || {
        db.count_annotations().unwrap() == 6
    })
    .await;
    handle.shutdown().await.unwrap();

    assert!(done, "worker did not finish all units");
    assert_eq!(processor.calls.load(Ordering::SeqCst), 6);
    assert!(db.open_leases(WorkType::Video).unwrap().is_empty());
    assert_eq!(
        db.annotation(&ids[3]).unwrap().as_deref(),
        Some(format!("<document id=\"{}\"/>", ids[3]).as_str())
    );
}

#[tokio::test]
async fn test_failed_unit_is_aborted_and_retried() {
    let coordinator = spawn_coordinator().await;
    let ids = video_ids(3);
    insert(coordinator.manager(), EntityKind::Video, &ids);

    let config = WorkerConfig {
        video_submission_threshold: 1,
        ..video_config(&coordinator.url)
    };
    let processor = Arc::new(StaticAnnotations::new(Some(&ids[1])));
    let runner = WorkerRunner::new(config, Arc::new(test_client(&coordinator.url)))
        .with_processor(processor.clone());

    let handle = runner.start().await.unwrap();
    let db = coordinator.database().clone();
    let done = wait_until(Duration::from_secs(10), || {
        db.count_annotations().unwrap() == 3
    })
    .await;
    handle.shutdown().await.unwrap();

    assert!(done, "failed unit was never reprocessed");
    assert_eq!(processor.attempts(&ids[1]), 2);
    assert_eq!(processor.attempts(&ids[0]), 1);
}

#[tokio::test]
async fn test_tail_below_threshold_completes_while_running() {
    let coordinator = spawn_coordinator().await;
    let ids = video_ids(3);
    insert(coordinator.manager(), EntityKind::Video, &ids);

    let config = WorkerConfig {
        video_submission_threshold: 10,
        ..video_config(&coordinator.url)
    };
    let processor = Arc::new(StaticAnnotations::new(None));
    let runner = WorkerRunner::new(config, Arc::new(test_client(&coordinator.url)))
        .with_processor(processor.clone());

    let handle = runner.start().await.unwrap();
    let db = coordinator.database().clone();
    let done = wait_until(Duration::from_secs(10), || {
        db.count_annotations().unwrap() == 3
    })
    .await;

    // Checked before shutdown so the final flush cannot mask a stall
    assert!(done, "results below the threshold were never submitted");
    assert!(db.open_leases(WorkType::Video).unwrap().is_empty());
    handle.shutdown().await.unwrap();
    assert_eq!(processor.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_shutdown_flushes_buffered_results() {
    let coordinator = spawn_coordinator().await;
    insert(coordinator.manager(), EntityKind::Video, &video_ids(20));

    // Neither the threshold nor an empty pool is reached before shutdown
    let config = WorkerConfig {
        video_submission_threshold: 100,
        ..video_config(&coordinator.url)
    };
    let processor =
        Arc::new(StaticAnnotations::new(None).with_delay(Duration::from_millis(50)));
    let runner = WorkerRunner::new(config, Arc::new(test_client(&coordinator.url)))
        .with_processor(processor.clone());

    let handle = runner.start().await.unwrap();
    let processed = wait_until(Duration::from_secs(10), || {
        processor.calls.load(Ordering::SeqCst) >= 2
    })
    .await;
    assert!(processed);
    let db = coordinator.database().clone();
    assert_eq!(db.count_annotations().unwrap(), 0);

    handle.shutdown().await.unwrap();
    let calls = processor.calls.load(Ordering::SeqCst) as u64;
    assert_eq!(db.count_annotations().unwrap(), calls);
    // Unstarted units were handed back
    assert!(db.open_leases(WorkType::Video).unwrap().is_empty());
}

#[tokio::test]
async fn test_annotation_fetcher_end_to_end() {
    let coordinator = spawn_coordinator().await;
    let site = MockServer::start().await;
    let ids = video_ids(2);
    insert(coordinator.manager(), EntityKind::Video, &ids);

    for id in &ids {
        Mock::given(method("GET"))
            .and(path("/annotations_invideo"))
            .and(query_param("video_id", id.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("<annotations>{id}</annotations>")))
            .mount(&site)
            .await;
    }

    let config = WorkerConfig {
        video_submission_threshold: 1,
        annotation_url: format!("{}/annotations_invideo?video_id=", site.uri()),
        ..video_config(&coordinator.url)
    };
    let handle = WorkerRunner::from_config(config).unwrap().start().await.unwrap();

    let db = coordinator.database().clone();
    let done = wait_until(Duration::from_secs(10), || {
        db.count_annotations().unwrap() == 2
    })
    .await;
    handle.shutdown().await.unwrap();

    assert!(done);
    assert_eq!(
        db.annotation(&ids[0]).unwrap().as_deref(),
        Some(format!("<annotations>{}</annotations>", ids[0]).as_str())
    );
}

#[tokio::test]
async fn test_channel_scanner_end_to_end() {
    let coordinator = spawn_coordinator().await;
    let site = MockServer::start().await;
    insert(coordinator.manager(), EntityKind::Channel, &[CHANNEL.to_string()]);

    Mock::given(method("GET"))
        .and(path(format!("/channel/{CHANNEL}/videos")))
        .and(query_param("view", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_string(channel_page(
            &["dQw4w9WgXcQ", "9bZkp7q19f0"],
            Some("/browse_ajax?action_continuation=1&amp;continuation=page2"),
        )))
        .expect(1)
        .mount(&site)
        .await;
    Mock::given(method("GET"))
        .and(path("/browse_ajax"))
        .and(query_param("continuation", "page2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(channel_page(&["9bZkp7q19f0", "kJQP7kiw5Fk"], None)),
        )
        .expect(1)
        .mount(&site)
        .await;

    let config = WorkerConfig {
        coordinator_url: coordinator.url.clone(),
        channel_jobs: 1,
        video_jobs: 0,
        idle_sleep_secs: 1,
        max_retries: 2,
        requests_per_second: 100,
        site_url: site.uri(),
        ..Default::default()
    };
    let handle = WorkerRunner::from_config(config).unwrap().start().await.unwrap();

    let db = coordinator.database().clone();
    let done = wait_until(Duration::from_secs(10), || {
        db.stats().unwrap().completed_channels == 1
    })
    .await;
    handle.shutdown().await.unwrap();

    assert!(done);
    assert_eq!(db.count_ids(EntityKind::Video).unwrap(), 3);
    assert_eq!(db.video_source("kJQP7kiw5Fk").unwrap().as_deref(), Some(CHANNEL));
}
