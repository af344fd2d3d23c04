//! Queue intake integration tests
//!
//! These tests exercise intake routing, the one-open-entry-per-user rule,
//! pending list ordering, and removal through the full engine.

use std::sync::Arc;

use claimdial_dialer_engine::prelude::*;
use tempfile::TempDir;
use tokio_test::assert_ok;

fn outstanding(user: &str, claim: &str, sig: bool, req: bool, contact: bool) -> ClaimContext {
    ClaimContext {
        user_id: user.to_string(),
        claim_id: claim.to_string(),
        signature_outstanding: sig,
        requirements_outstanding: req,
        contact_outstanding: contact,
    }
}

async fn create_test_engine(
    dir: &TempDir,
) -> Result<(Arc<DialerEngine>, Arc<StaticClaimLookup>)> {
    let lookup = Arc::new(StaticClaimLookup::new());
    let mut config = DialerConfig::default();
    config.database.database_path = dir.path().join("dialer.db").to_string_lossy().into_owned();
    let engine = DialerEngine::new(config, lookup.clone()).await?;
    Ok((engine, lookup))
}

#[tokio::test]
async fn claim_state_routes_users_to_their_queues() {
    let dir = TempDir::new().expect("temp dir");
    let (engine, lookup) = create_test_engine(&dir).await.expect("engine creation failed");

    lookup.set(outstanding("user-sig", "cl-1", true, true, true));
    lookup.set(outstanding("user-req", "cl-2", false, true, true));
    lookup.set(outstanding("user-gen", "cl-3", false, false, true));

    let entry = engine.enqueue_user("user-sig", "cl-1").await.expect("enqueue failed");
    assert_eq!(entry.queue_type, QueueType::UnsignedSignature);
    assert_eq!(entry.status, EntryStatus::Pending);
    assert!(entry.queue_reason.contains("signature outstanding"));

    let entry = engine.enqueue_user("user-req", "cl-2").await.expect("enqueue failed");
    assert_eq!(entry.queue_type, QueueType::OutstandingRequirements);

    let entry = engine.enqueue_user("user-gen", "cl-3").await.expect("enqueue failed");
    assert_eq!(entry.queue_type, QueueType::Generic);

    let stats = engine.stats().await.expect("stats query failed");
    for queue in &stats.queues {
        assert_eq!(queue.pending, 1, "queue {} should hold one user", queue.queue_type);
        assert_eq!(queue.open_total(), 1);
    }
}

#[tokio::test]
async fn users_with_nothing_outstanding_are_rejected() {
    let dir = TempDir::new().expect("temp dir");
    let (engine, lookup) = create_test_engine(&dir).await.expect("engine creation failed");

    lookup.set(ClaimContext::resolved("user-done", "cl-9"));
    assert!(matches!(
        engine.enqueue_user("user-done", "cl-9").await,
        Err(DialerError::Validation(_))
    ));

    // A user the lookup has never heard of is a different failure.
    assert!(matches!(
        engine.enqueue_user("user-unknown", "cl-9").await,
        Err(DialerError::NotFound(_))
    ));

    let stats = engine.stats().await.expect("stats query failed");
    assert!(stats.queues.iter().all(|q| q.open_total() == 0));
}

#[tokio::test]
async fn requeue_refreshes_the_single_open_entry() {
    let dir = TempDir::new().expect("temp dir");
    let (engine, lookup) = create_test_engine(&dir).await.expect("engine creation failed");

    lookup.set(outstanding("user-3001", "cl-5", true, true, false));
    let first = engine.enqueue_user("user-3001", "cl-5").await.expect("enqueue failed");
    assert_eq!(first.queue_type, QueueType::UnsignedSignature);
    assert_eq!(first.priority_score, 0);

    // Signature collected and the score reset while the user waited.
    lookup.set(outstanding("user-3001", "cl-5", false, true, false));
    engine.set_base_score("user-3001", 40).await.expect("set base score");

    let second = engine.enqueue_user("user-3001", "cl-5").await.expect("re-enqueue failed");
    assert_eq!(second.id, first.id, "the open entry is refreshed, not duplicated");
    assert_eq!(second.queue_type, QueueType::OutstandingRequirements);
    assert_eq!(second.priority_score, 40);

    let open = engine
        .find_open_entry("user-3001")
        .await
        .expect("open entry query failed")
        .expect("user should still be queued");
    assert_eq!(open.id, first.id);

    let stats = engine.stats().await.expect("stats query failed");
    let total: i64 = stats.queues.iter().map(|q| q.open_total()).sum();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn pending_lists_are_ordered_and_capped() {
    let dir = TempDir::new().expect("temp dir");
    let lookup = Arc::new(StaticClaimLookup::new());
    let mut config = DialerConfig::default();
    config.database.database_path = dir.path().join("dialer.db").to_string_lossy().into_owned();
    config.queues.default_list_limit = 2;
    let engine = DialerEngine::new(config, lookup.clone())
        .await
        .expect("engine creation failed");

    for (user, base) in [("user-a", 10), ("user-b", 30), ("user-c", 20)] {
        lookup.set(outstanding(user, "cl-7", false, false, true));
        engine.set_base_score(user, base).await.expect("set base score");
        engine.enqueue_user(user, "cl-7").await.expect("enqueue failed");
    }

    let best_two = engine
        .list_pending(QueueType::Generic, None)
        .await
        .expect("list failed");
    assert_eq!(best_two.len(), 2, "the configured page size caps the default list");
    assert_eq!(best_two[0].user_id, "user-b");
    assert_eq!(best_two[1].user_id, "user-c");

    let all = engine
        .list_pending(QueueType::Generic, Some(10))
        .await
        .expect("list failed");
    assert_eq!(all.len(), 3);
    let scores: Vec<i64> = all.iter().map(|e| e.priority_score).collect();
    assert_eq!(scores, vec![30, 20, 10]);
}

#[tokio::test]
async fn removal_frees_the_user_for_a_fresh_entry() {
    let dir = TempDir::new().expect("temp dir");
    let (engine, lookup) = create_test_engine(&dir).await.expect("engine creation failed");

    lookup.set(outstanding("user-4001", "cl-8", false, false, true));
    let entry = engine.enqueue_user("user-4001", "cl-8").await.expect("enqueue failed");

    let removed = engine
        .remove_user("user-4001", "user asked to stop calling")
        .await
        .expect("removal failed");
    assert_eq!(removed.id, entry.id);
    assert_eq!(removed.status, EntryStatus::Removed);
    assert_eq!(removed.queue_reason, "user asked to stop calling");

    assert!(engine
        .find_open_entry("user-4001")
        .await
        .expect("open entry query failed")
        .is_none());
    assert!(matches!(
        engine.remove_user("user-4001", "again").await,
        Err(DialerError::NotFound(_))
    ));

    // The removed entry stays in history; a new enqueue gets a fresh entry.
    let fresh = assert_ok!(engine.enqueue_user("user-4001", "cl-8").await);
    assert_ne!(fresh.id, entry.id);
    assert_eq!(fresh.status, EntryStatus::Pending);
}
