//! Lease lifecycle tests
//!
//! Drives the lease manager through the scenarios a fleet of workers
//! produces:
//! 1. Exclusive batch assignment
//! 2. Heartbeats and reclaiming of stale leases
//! 3. All-or-nothing completion and idempotent resubmission
//! 4. Aborts returning units to the pool

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};

use hivecrawl::models::{EntityKind, WorkType};

use super::fixtures::{channel_ids, video_ids, CHANNEL, VIDEO};
use crate::common::{insert, test_manager};

fn reclaimed(counts: &[(WorkType, usize)], work_type: WorkType) -> usize {
    counts
        .iter()
        .find(|(wt, _)| *wt == work_type)
        .map(|(_, n)| *n)
        .unwrap_or(0)
}

// ============================================================================
// Assignment
// ============================================================================

#[tokio::test]
async fn test_batch_is_exclusive_across_workers() {
    let manager = test_manager();
    insert(&manager, EntityKind::Video, &video_ids(10));

    let w1 = manager.register_worker().await.unwrap();
    let w2 = manager.register_worker().await.unwrap();

    let first = manager.assign_batch(WorkType::Video, &w1, Some("50")).await.unwrap();
    assert_eq!(first.len(), 10);

    let second = manager.assign_batch(WorkType::Video, &w2, Some("50")).await.unwrap();
    assert!(second.is_empty());
}

#[tokio::test]
async fn test_concurrent_assignments_never_overlap() {
    let manager = test_manager();
    insert(&manager, EntityKind::Video, &video_ids(40));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let manager = manager.clone();
        tasks.push(tokio::spawn(async move {
            let worker = manager.register_worker().await.unwrap();
            manager
                .assign_batch(WorkType::Video, &worker, Some("10"))
                .await
                .unwrap()
        }));
    }

    let mut all = Vec::new();
    for task in tasks {
        all.extend(task.await.unwrap());
    }

    let unique: HashSet<_> = all.iter().collect();
    assert_eq!(all.len(), 40);
    assert_eq!(unique.len(), 40);
}

#[tokio::test]
async fn test_limit_is_clamped() {
    let manager = test_manager();
    insert(&manager, EntityKind::Channel, &channel_ids(60));
    let worker = manager.register_worker().await.unwrap();

    let batch = manager
        .assign_batch(WorkType::Channel, &worker, Some("1000"))
        .await
        .unwrap();
    assert_eq!(batch.len(), 50);

    let batch = manager
        .assign_batch(WorkType::Channel, &worker, Some("zero"))
        .await
        .unwrap();
    assert_eq!(batch.len(), 1);
}

// ============================================================================
// Heartbeats and Reclaiming
// ============================================================================

#[tokio::test]
async fn test_stale_lease_is_reclaimed_and_reassigned() {
    let manager = test_manager();
    insert(&manager, EntityKind::Video, &[VIDEO.to_string()]);

    let w1 = manager.register_worker().await.unwrap();
    let w2 = manager.register_worker().await.unwrap();

    let batch = manager.assign_batch(WorkType::Video, &w1, None).await.unwrap();
    assert_eq!(batch, vec![VIDEO.to_string()]);
    assert!(manager
        .assign_batch(WorkType::Video, &w2, None)
        .await
        .unwrap()
        .is_empty());

    // W1 goes silent past the TTL
    let counts = manager
        .reclaim_stale(Utc::now() + chrono::Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(reclaimed(&counts, WorkType::Video), 1);

    let batch = manager.assign_batch(WorkType::Video, &w2, None).await.unwrap();
    assert_eq!(batch, vec![VIDEO.to_string()]);

    // The late completion from W1 is refused
    let late = manager
        .complete(WorkType::Video, &w1, &json!({ VIDEO: "<doc/>" }))
        .await
        .unwrap_err();
    assert_eq!(late.code(), Some(3));

    manager
        .complete(WorkType::Video, &w2, &json!({ VIDEO: "<doc/>" }))
        .await
        .unwrap();
    assert_eq!(
        manager.database().annotation(VIDEO).unwrap().as_deref(),
        Some("<doc/>")
    );
}

#[tokio::test]
async fn test_heartbeat_keeps_lease_alive() {
    let manager = test_manager();
    let ids = video_ids(2);
    insert(&manager, EntityKind::Video, &ids);
    let worker = manager.register_worker().await.unwrap();

    manager.assign_batch(WorkType::Video, &worker, None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let cutoff = Utc::now();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let refreshed = manager
        .heartbeat(WorkType::Video, &worker, &json!([ids[0]]))
        .await
        .unwrap();
    assert_eq!(refreshed, 1);

    let counts = manager.reclaim_stale(cutoff).await.unwrap();
    assert_eq!(reclaimed(&counts, WorkType::Video), 1);

    let open = manager.database().open_leases(WorkType::Video).unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].entity_id, ids[0]);
}

#[tokio::test]
async fn test_heartbeat_on_foreign_lease_is_ignored() {
    let manager = test_manager();
    insert(&manager, EntityKind::Video, &[VIDEO.to_string()]);
    let owner = manager.register_worker().await.unwrap();
    let other = manager.register_worker().await.unwrap();

    manager.assign_batch(WorkType::Video, &owner, None).await.unwrap();
    let refreshed = manager
        .heartbeat(WorkType::Video, &other, &json!([VIDEO]))
        .await
        .unwrap();
    assert_eq!(refreshed, 0);
}

#[tokio::test]
async fn test_completed_leases_survive_reclaiming() {
    let manager = test_manager();
    insert(&manager, EntityKind::Video, &[VIDEO.to_string()]);
    let worker = manager.register_worker().await.unwrap();

    manager.assign_batch(WorkType::Video, &worker, None).await.unwrap();
    manager
        .complete(WorkType::Video, &worker, &json!({ VIDEO: "<doc/>" }))
        .await
        .unwrap();

    let counts = manager
        .reclaim_stale(Utc::now() + chrono::Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(reclaimed(&counts, WorkType::Video), 0);

    let batch = manager.assign_batch(WorkType::Video, &worker, None).await.unwrap();
    assert!(batch.is_empty());
}

// ============================================================================
// Completion
// ============================================================================

#[tokio::test]
async fn test_invalid_video_in_channel_completion_leaves_lease_open() {
    let manager = test_manager();
    insert(&manager, EntityKind::Channel, &[CHANNEL.to_string()]);
    let worker = manager.register_worker().await.unwrap();
    manager.assign_batch(WorkType::Channel, &worker, None).await.unwrap();

    let err = manager
        .complete(
            WorkType::Channel,
            &worker,
            &json!({ CHANNEL: [VIDEO, "not-a-video"] }),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(6));

    let lease = manager
        .database()
        .lease(WorkType::Channel, CHANNEL)
        .unwrap()
        .unwrap();
    assert!(lease.is_open());
    assert!(!manager.database().contains_id(EntityKind::Video, VIDEO).unwrap());
}

#[tokio::test]
async fn test_channel_completion_records_discovered_videos() {
    let manager = test_manager();
    insert(&manager, EntityKind::Channel, &[CHANNEL.to_string()]);
    let worker = manager.register_worker().await.unwrap();
    manager.assign_batch(WorkType::Channel, &worker, None).await.unwrap();

    let body = json!({ CHANNEL: [VIDEO, "9bZkp7q19f0"] });
    let closed = manager.complete(WorkType::Channel, &worker, &body).await.unwrap();
    assert_eq!(closed, 1);

    let db = manager.database();
    assert_eq!(db.count_ids(EntityKind::Video).unwrap(), 2);
    assert_eq!(db.video_source(VIDEO).unwrap().as_deref(), Some(CHANNEL));

    // Discovered videos become leasable
    let batch = manager.assign_batch(WorkType::Video, &worker, None).await.unwrap();
    assert_eq!(batch.len(), 2);
}

#[tokio::test]
async fn test_resubmitted_completion_is_idempotent() {
    let manager = test_manager();
    insert(&manager, EntityKind::Channel, &[CHANNEL.to_string()]);
    let worker = manager.register_worker().await.unwrap();
    manager.assign_batch(WorkType::Channel, &worker, None).await.unwrap();

    let body = json!({ CHANNEL: [VIDEO] });
    assert_eq!(manager.complete(WorkType::Channel, &worker, &body).await.unwrap(), 1);
    let first = manager
        .database()
        .lease(WorkType::Channel, CHANNEL)
        .unwrap()
        .unwrap();

    assert_eq!(manager.complete(WorkType::Channel, &worker, &body).await.unwrap(), 0);
    let second = manager
        .database()
        .lease(WorkType::Channel, CHANNEL)
        .unwrap()
        .unwrap();

    assert_eq!(first.completed_at, second.completed_at);
    assert_eq!(manager.database().count_ids(EntityKind::Video).unwrap(), 1);
}

#[tokio::test]
async fn test_partial_batch_rejection_persists_nothing() {
    let manager = test_manager();
    let ids = video_ids(2);
    insert(&manager, EntityKind::Video, &ids[..1]);
    let worker = manager.register_worker().await.unwrap();
    manager.assign_batch(WorkType::Video, &worker, None).await.unwrap();
    insert(&manager, EntityKind::Video, &ids[1..]);

    let mut body = serde_json::Map::new();
    body.insert(ids[0].clone(), Value::String("<a/>".into()));
    body.insert(ids[1].clone(), Value::String("<b/>".into()));

    let err = manager
        .complete(WorkType::Video, &worker, &Value::Object(body))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(3));

    let db = manager.database();
    assert!(db.annotation(&ids[0]).unwrap().is_none());
    assert!(db.lease(WorkType::Video, &ids[0]).unwrap().unwrap().is_open());
}

#[tokio::test]
async fn test_lease_on_unknown_entity_is_rejected() {
    let manager = test_manager();
    let worker = manager.register_worker().await.unwrap();

    // A lease row whose entity never reached the identifier store
    manager
        .database()
        .insert_leases(WorkType::Video, &worker, &[VIDEO.to_string()], Utc::now())
        .unwrap();

    let err = manager
        .complete(WorkType::Video, &worker, &json!({ VIDEO: "<doc/>" }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(4));
    assert!(err.is_conflict());
}

// ============================================================================
// Abort
// ============================================================================

#[tokio::test]
async fn test_abort_returns_units_to_the_pool() {
    let manager = test_manager();
    insert(&manager, EntityKind::Video, &[VIDEO.to_string()]);
    let w1 = manager.register_worker().await.unwrap();
    let w2 = manager.register_worker().await.unwrap();

    manager.assign_batch(WorkType::Video, &w1, None).await.unwrap();

    let err = manager
        .abort(WorkType::Video, &w2, &json!([VIDEO]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(3));

    let deleted = manager.abort(WorkType::Video, &w1, &json!([VIDEO])).await.unwrap();
    assert_eq!(deleted, 1);

    let batch = manager.assign_batch(WorkType::Video, &w2, None).await.unwrap();
    assert_eq!(batch, vec![VIDEO.to_string()]);
}

#[tokio::test]
async fn test_abort_after_completion_keeps_the_result() {
    let manager = test_manager();
    insert(&manager, EntityKind::Video, &[VIDEO.to_string()]);
    let worker = manager.register_worker().await.unwrap();

    manager.assign_batch(WorkType::Video, &worker, None).await.unwrap();
    manager
        .complete(WorkType::Video, &worker, &json!({ VIDEO: "<doc/>" }))
        .await
        .unwrap();

    let deleted = manager
        .abort(WorkType::Video, &worker, &json!([VIDEO]))
        .await
        .unwrap();
    assert_eq!(deleted, 0);
    assert!(manager.database().annotation(VIDEO).unwrap().is_some());
}
