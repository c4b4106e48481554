//! HTTP API tests
//!
//! Requests go through the full router with `tower::ServiceExt::oneshot`,
//! so routing, body decoding and error mapping are all exercised.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;

use hivecrawl::coordinator::{CoordinatorConfig, CoordinatorServer};
use hivecrawl::models::{EntityKind, WorkType, WorkerId};
use hivecrawl::storage::Database;

use super::fixtures::{video_ids, CHANNEL, VIDEO};
use crate::common::{insert, test_config, test_server};

// ============================================================================
// Helpers
// ============================================================================

async fn call(router: &Router, method: Method, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
        .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    call(router, Method::GET, uri, None).await
}

async fn post(router: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    call(router, Method::POST, uri, Some(&body.to_string())).await
}

async fn new_worker(router: &Router) -> String {
    let (status, body) = get(router, "/worker").await;
    assert_eq!(status, StatusCode::OK);
    body["workerID"].as_str().unwrap().to_string()
}

fn assert_code(response: (StatusCode, Value), code: u64) {
    assert_eq!(response.0, StatusCode::BAD_REQUEST, "body: {}", response.1);
    assert_eq!(response.1["status"], "error");
    assert_eq!(response.1["code"], code);
}

fn setup() -> (CoordinatorServer, Router) {
    let server = test_server();
    let router = server.build_router();
    (server, router)
}

// ============================================================================
// Worker Tokens
// ============================================================================

#[tokio::test]
async fn test_new_worker_issues_distinct_tokens() {
    let (_server, router) = setup();

    let (status, body) = get(&router, "/worker").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");

    let first = body["workerID"].as_str().unwrap().to_string();
    let second = new_worker(&router).await;
    assert!(!first.is_empty());
    assert_ne!(first, second);
}

#[tokio::test]
async fn test_missing_and_unknown_worker() {
    let (_server, router) = setup();

    assert_code(get(&router, "/videos").await, 1);
    assert_code(get(&router, "/videos?worker=").await, 1);
    assert_code(get(&router, "/channels?worker=nobody").await, 2);
    assert_code(post(&router, "/videos/ping?worker=nobody", json!([VIDEO])).await, 2);
}

#[tokio::test]
async fn test_authentication_runs_before_body_checks() {
    let (_server, router) = setup();
    assert_code(post(&router, "/videos", json!(["not an object"])).await, 1);
}

// ============================================================================
// Lease Routes
// ============================================================================

#[tokio::test]
async fn test_full_lease_cycle_over_http() {
    let (server, router) = setup();
    let worker = new_worker(&router).await;

    let (status, body) = post(&router, "/videos/submit", json!({ "videos": [VIDEO] })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["inserted"], json!([VIDEO]));

    let (status, body) = get(&router, &format!("/videos?worker={worker}&limit=5")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["videos"], json!([VIDEO]));

    let (status, _) = post(&router, &format!("/videos/ping?worker={worker}"), json!([VIDEO])).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = post(
        &router,
        &format!("/videos?worker={worker}"),
        json!({ VIDEO: "<document/>" }),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let db = server.state().manager.database().clone();
    assert_eq!(db.annotation(VIDEO).unwrap().as_deref(), Some("<document/>"));
    assert!(db.open_leases(WorkType::Video).unwrap().is_empty());
}

#[tokio::test]
async fn test_large_annotation_batch_is_accepted() {
    let (server, router) = setup();
    insert(&server.state().manager, EntityKind::Video, &[VIDEO.to_string()]);
    let worker = new_worker(&router).await;
    get(&router, &format!("/videos?worker={worker}")).await;

    // Larger than axum's 2 MB default
    let document = format!("<annotations>{}</annotations>", "a".repeat(3 * 1024 * 1024));
    let (status, _) = post(
        &router,
        &format!("/videos?worker={worker}"),
        json!({ VIDEO: document }),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let db = server.state().manager.database().clone();
    assert_eq!(db.annotation(VIDEO).unwrap().map(|d| d.len()), Some(document.len()));
}

#[tokio::test]
async fn test_body_over_configured_limit_is_refused() {
    let db = Arc::new(Database::in_memory().unwrap());
    let config = CoordinatorConfig {
        max_body_bytes: 1024,
        ..test_config()
    };
    let router = CoordinatorServer::with_database(db, config).build_router();
    let worker = new_worker(&router).await;

    let (status, _) = post(
        &router,
        &format!("/videos?worker={worker}"),
        json!({ VIDEO: "a".repeat(4096) }),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_channel_assignment_response_key() {
    let (server, router) = setup();
    insert(&server.state().manager, EntityKind::Channel, &[CHANNEL.to_string()]);
    let worker = new_worker(&router).await;

    let (status, body) = get(&router, &format!("/channels?worker={worker}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["channels"], json!([CHANNEL]));

    let (status, body) = get(&router, &format!("/channels?worker={worker}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["channels"], json!([]));
}

#[tokio::test]
async fn test_abort_frees_the_unit() {
    let (server, router) = setup();
    insert(&server.state().manager, EntityKind::Video, &video_ids(3));
    let worker = new_worker(&router).await;

    let (_, body) = get(&router, &format!("/videos?worker={worker}&limit=3")).await;
    let leased: Vec<String> = serde_json::from_value(body["videos"].clone()).unwrap();
    assert_eq!(leased.len(), 3);

    let (status, _) = post(
        &router,
        &format!("/videos/abort?worker={worker}"),
        json!([leased[0]]),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = get(&router, &format!("/videos?worker={worker}")).await;
    assert_eq!(body["videos"], json!([leased[0]]));
}

// ============================================================================
// Error Codes
// ============================================================================

#[tokio::test]
async fn test_lease_not_held_is_code_3() {
    let (server, router) = setup();
    insert(&server.state().manager, EntityKind::Video, &[VIDEO.to_string()]);
    let worker = new_worker(&router).await;

    assert_code(
        post(&router, &format!("/videos/abort?worker={worker}"), json!([VIDEO])).await,
        3,
    );
    assert_code(
        post(&router, &format!("/videos?worker={worker}"), json!({ VIDEO: "<d/>" })).await,
        3,
    );
}

#[tokio::test]
async fn test_unknown_entity_is_code_4() {
    let (server, router) = setup();
    let worker = new_worker(&router).await;
    server
        .state()
        .manager
        .database()
        .insert_leases(WorkType::Video, &WorkerId::new(worker.as_str()), &[VIDEO.to_string()], Utc::now())
        .unwrap();

    assert_code(
        post(&router, &format!("/videos?worker={worker}"), json!({ VIDEO: "<d/>" })).await,
        4,
    );
}

#[tokio::test]
async fn test_validation_codes() {
    let (_server, router) = setup();
    let worker = new_worker(&router).await;
    let q = format!("?worker={worker}");

    // 5: malformed channel ID
    assert_code(post(&router, &format!("/channels/ping{q}"), json!([VIDEO])).await, 5);
    assert_code(post(&router, &format!("/channels{q}"), json!({ "UCshort": [] })).await, 5);

    // 6: malformed video ID
    assert_code(post(&router, &format!("/videos/abort{q}"), json!(["short"])).await, 6);
    assert_code(
        post(&router, &format!("/channels{q}"), json!({ CHANNEL: ["short"] })).await,
        6,
    );

    // 7: expected an array
    assert_code(post(&router, &format!("/videos/ping{q}"), json!({ "a": 1 })).await, 7);

    // 8: expected an object
    assert_code(post(&router, &format!("/videos{q}"), json!([VIDEO])).await, 8);

    // 10: annotation payload is not a string
    assert_code(post(&router, &format!("/videos{q}"), json!({ VIDEO: 42 })).await, 10);
}

#[tokio::test]
async fn test_garbage_body_is_rejected_by_shape() {
    let (_server, router) = setup();
    let worker = new_worker(&router).await;

    assert_code(
        call(
            &router,
            Method::POST,
            &format!("/videos/ping?worker={worker}"),
            Some("definitely not json"),
        )
        .await,
        7,
    );
    assert_code(
        call(&router, Method::POST, &format!("/videos?worker={worker}"), Some("{")).await,
        8,
    );
}

// ============================================================================
// Submission, Stats and Health
// ============================================================================

#[tokio::test]
async fn test_submit_reports_only_new_ids() {
    let (_server, router) = setup();

    let body = json!({ "channels": [CHANNEL, "UCaaaaaaaaaaaaaaaaaaaaaa"] });
    let (status, first) = post(&router, "/channels/submit", body.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["inserted"].as_array().unwrap().len(), 2);

    let (_, second) = post(&router, "/channels/submit", body).await;
    assert_eq!(second["inserted"], json!([]));

    assert_code(post(&router, "/channels/submit", json!({ "channels": ["bad"] })).await, 5);
    assert_code(post(&router, "/playlists/submit", json!({ "playlists": ["PLnope"] })).await, 9);
    assert_code(post(&router, "/videos/submit", json!([VIDEO])).await, 8);
}

#[tokio::test]
async fn test_playlists_submit_accepts_known_shapes() {
    let (_server, router) = setup();
    let body = json!({ "playlists": [
        "PL0123456789ABCDEF",
        "UUuAXFkgsw1L7xaCfnd5JJOw",
    ] });

    let (status, result) = post(&router, "/playlists/submit", body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["inserted"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_stats_counts_store_and_leases() {
    let (server, router) = setup();
    insert(&server.state().manager, EntityKind::Video, &video_ids(4));
    let worker = new_worker(&router).await;
    get(&router, &format!("/videos?worker={worker}&limit=3")).await;

    let (status, body) = get(&router, "/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["knownVideos"], 4);
    assert_eq!(body["openVideoLeases"], 3);
    assert_eq!(body["workers"], 1);
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_server, router) = setup();

    let (status, body) = get(&router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}
