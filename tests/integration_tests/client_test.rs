//! Coordinator client tests
//!
//! Wire behavior is checked against a mock server; the lease cycle is run
//! against a live coordinator.

use serde_json::json;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hivecrawl::coordinator::ClientError;
use hivecrawl::models::{EntityKind, WorkType, WorkerId};

use super::fixtures::{video_ids, VIDEO};
use crate::common::{insert, spawn_coordinator, test_client};

// ============================================================================
// Wire Format
// ============================================================================

#[tokio::test]
async fn test_new_worker_reads_token() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/worker"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "status": "success", "workerID": "abc123" })),
        )
        .expect(1)
        .mount(&mock)
        .await;

    let client = test_client(&mock.uri());
    assert_eq!(client.new_worker().await.unwrap(), WorkerId::new("abc123"));
}

#[tokio::test]
async fn test_assign_sends_worker_and_limit() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/videos"))
        .and(query_param("worker", "w1"))
        .and(query_param("limit", "25"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "status": "success", "videos": [VIDEO] })),
        )
        .expect(1)
        .mount(&mock)
        .await;

    let client = test_client(&mock.uri());
    let ids = client
        .assign(WorkType::Video, &WorkerId::new("w1"), 25)
        .await
        .unwrap();
    assert_eq!(ids, vec![VIDEO.to_string()]);
}

#[tokio::test]
async fn test_complete_posts_batch_and_accepts_204() {
    let mock = MockServer::start().await;
    let batch = json!({ VIDEO: "<doc/>" });
    Mock::given(method("POST"))
        .and(path("/videos"))
        .and(query_param("worker", "w1"))
        .and(body_json(&batch))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock)
        .await;

    let client = test_client(&mock.uri());
    client
        .complete(WorkType::Video, &WorkerId::new("w1"), &batch)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_rejection_is_not_retried() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/channels/abort"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({ "status": "error", "code": 3 })),
        )
        .expect(1)
        .mount(&mock)
        .await;

    let client = test_client(&mock.uri());
    let err = client
        .abort(WorkType::Channel, &WorkerId::new("w1"), &["UCuAXFkgsw1L7xaCfnd5JJOw".to_string()])
        .await
        .unwrap_err();

    assert_eq!(err, ClientError::Rejected { code: 3 });
    assert!(err.is_conflict());
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/videos/ping"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/videos/ping"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock)
        .await;

    let client = test_client(&mock.uri());
    client
        .ping(WorkType::Video, &WorkerId::new("w1"), &[VIDEO.to_string()])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_retries_give_up() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/worker"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(3)
        .mount(&mock)
        .await;

    let client = test_client(&mock.uri());
    let err = client.new_worker().await.unwrap_err();
    assert!(matches!(err, ClientError::HttpError { status: 500, .. }));
}

#[tokio::test]
async fn test_missing_response_key_is_invalid() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/channels"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "success" })))
        .mount(&mock)
        .await;

    let client = test_client(&mock.uri());
    let err = client
        .assign(WorkType::Channel, &WorkerId::new("w1"), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidResponse(_)));
}

// ============================================================================
// Live Coordinator
// ============================================================================

#[tokio::test]
async fn test_lease_cycle_against_live_coordinator() {
    let coordinator = spawn_coordinator().await;
    insert(coordinator.manager(), EntityKind::Video, &video_ids(3));
    let client = test_client(&coordinator.url);

    let health = client.health_check().await.unwrap();
    assert!(health.healthy);

    let worker = client.new_worker().await.unwrap();
    let ids = client.assign(WorkType::Video, &worker, 2).await.unwrap();
    assert_eq!(ids.len(), 2);

    client.ping(WorkType::Video, &worker, &ids).await.unwrap();
    client.abort(WorkType::Video, &worker, &ids[1..]).await.unwrap();

    let batch = json!({ ids[0].clone(): "<doc/>" });
    client.complete(WorkType::Video, &worker, &batch).await.unwrap();

    // Resubmitting the same batch is accepted
    client.complete(WorkType::Video, &worker, &batch).await.unwrap();

    // The aborted unit comes back
    let again = client.assign(WorkType::Video, &worker, 5).await.unwrap();
    assert!(again.contains(&ids[1]));
    assert!(!again.contains(&ids[0]));

    let stats = coordinator.database().stats().unwrap();
    assert_eq!(stats.completed_annotations, 1);
}

#[tokio::test]
async fn test_rejections_from_live_coordinator() {
    let coordinator = spawn_coordinator().await;
    let client = test_client(&coordinator.url);

    let err = client
        .assign(WorkType::Video, &WorkerId::new("never-issued"), 1)
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(2));

    let worker = client.new_worker().await.unwrap();
    let err = client
        .complete(WorkType::Video, &worker, &json!({ VIDEO: "<doc/>" }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(3));
}

#[tokio::test]
async fn test_submit_against_live_coordinator() {
    let coordinator = spawn_coordinator().await;
    let client = test_client(&coordinator.url);
    let ids = video_ids(5);

    let inserted = client.submit(EntityKind::Video, &ids).await.unwrap();
    assert_eq!(inserted.len(), 5);
    let inserted = client.submit(EntityKind::Video, &ids[..2]).await.unwrap();
    assert!(inserted.is_empty());

    let err = client
        .submit(EntityKind::Video, &["bad".to_string()])
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(6));
}
