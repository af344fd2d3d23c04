//! Call session integration tests
//!
//! These tests work the claim/start/complete/release lifecycle through a full
//! engine, including the lease expiry sweep and the parked-outcome retry path.
//! The claim lookup used here can be switched into a failing mode to force
//! post-call follow-ups to fail.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use claimdial_dialer_engine::prelude::*;
use serial_test::serial;
use tempfile::TempDir;

/// Claim lookup that can be told to fail, standing in for a flaky upstream
struct FlakyLookup {
    inner: StaticClaimLookup,
    failing: AtomicBool,
}

impl FlakyLookup {
    fn new() -> Self {
        Self {
            inner: StaticClaimLookup::new(),
            failing: AtomicBool::new(false),
        }
    }

    fn set(&self, ctx: ClaimContext) {
        self.inner.set(ctx);
    }

    fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl UserClaimLookup for FlakyLookup {
    async fn lookup(&self, user_id: &str, claim_id: &str) -> Result<ClaimContext> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DialerError::transient("claim service unavailable"));
        }
        self.inner.lookup(user_id, claim_id).await
    }
}

fn follow_up(user: &str, claim: &str) -> ClaimContext {
    ClaimContext {
        user_id: user.to_string(),
        claim_id: claim.to_string(),
        signature_outstanding: false,
        requirements_outstanding: false,
        contact_outstanding: true,
    }
}

async fn create_test_engine(dir: &TempDir) -> Result<(Arc<DialerEngine>, Arc<FlakyLookup>)> {
    let lookup = Arc::new(FlakyLookup::new());
    let mut config = DialerConfig::default();
    config.database.database_path = dir.path().join("dialer.db").to_string_lossy().into_owned();
    let engine = DialerEngine::new(config, lookup.clone()).await?;
    Ok((engine, lookup))
}

/// Pretend the entry was claimed this long ago
async fn backdate_assignment(engine: &DialerEngine, entry_id: &str, age: Duration) {
    sqlx::query("UPDATE legacy_queue SET assigned_at = ?1 WHERE id = ?2")
        .bind(Utc::now() - age)
        .bind(entry_id)
        .execute(engine.database().pool())
        .await
        .expect("backdating failed");
}

/// Make every parked outcome due right now
async fn make_retries_due(engine: &DialerEngine) {
    sqlx::query("UPDATE rescore_retry SET next_attempt_at = ?1")
        .bind(Utc::now() - Duration::seconds(1))
        .execute(engine.database().pool())
        .await
        .expect("backdating failed");
}

#[tokio::test]
async fn call_flow_reenqueues_users_still_needing_contact() {
    let dir = TempDir::new().expect("temp dir");
    let (engine, lookup) = create_test_engine(&dir).await.expect("engine creation failed");

    lookup.set(follow_up("user-1001", "cl-1"));
    let entry = engine.enqueue_user("user-1001", "cl-1").await.expect("enqueue failed");

    let claimed = engine.claim(&entry.id, "agent-42").await.expect("claim failed");
    assert_eq!(claimed.status, EntryStatus::Assigned);
    assert_eq!(claimed.assigned_agent_id.as_deref(), Some("agent-42"));
    assert!(claimed.assigned_at.is_some());

    let started = engine.start(&entry.id, "agent-42").await.expect("start failed");
    assert_eq!(started.status, EntryStatus::InProgress);

    let completed = engine
        .complete(
            &entry.id,
            "agent-42",
            OutcomeEvent::new("call-0001", CallOutcome::NoAnswer, Utc::now()),
        )
        .await
        .expect("complete failed");
    assert_eq!(completed.status, EntryStatus::Completed);

    // Still outstanding, so the follow-up queued a fresh entry at the new score.
    let reentry = engine
        .find_open_entry("user-1001")
        .await
        .expect("open entry query failed")
        .expect("user should be re-enqueued");
    assert_ne!(reentry.id, entry.id);
    assert_eq!(reentry.status, EntryStatus::Pending);
    assert_eq!(reentry.priority_score, 5);

    let record = engine
        .get_score("user-1001")
        .await
        .expect("score query failed")
        .expect("record should exist");
    assert_eq!(record.total_attempts, 1);
    assert_eq!(record.last_outcome, Some(CallOutcome::NoAnswer));
}

#[tokio::test]
async fn resolved_users_leave_the_queue_after_contact() {
    let dir = TempDir::new().expect("temp dir");
    let (engine, lookup) = create_test_engine(&dir).await.expect("engine creation failed");

    lookup.set(follow_up("user-1002", "cl-2"));
    let entry = engine.enqueue_user("user-1002", "cl-2").await.expect("enqueue failed");
    engine.claim(&entry.id, "agent-7").await.expect("claim failed");
    engine.start(&entry.id, "agent-7").await.expect("start failed");

    // The call settles everything on the claim.
    lookup.set(ClaimContext::resolved("user-1002", "cl-2"));
    engine
        .complete(
            &entry.id,
            "agent-7",
            OutcomeEvent::new("call-0002", CallOutcome::Contacted, Utc::now()),
        )
        .await
        .expect("complete failed");

    assert!(engine
        .find_open_entry("user-1002")
        .await
        .expect("open entry query failed")
        .is_none());

    let record = engine
        .get_score("user-1002")
        .await
        .expect("score query failed")
        .expect("record should exist");
    assert_eq!(record.successful_calls, 1);
}

#[tokio::test]
#[serial]
async fn only_one_agent_wins_a_contested_claim() {
    let dir = TempDir::new().expect("temp dir");
    let (engine, lookup) = create_test_engine(&dir).await.expect("engine creation failed");

    lookup.set(follow_up("user-1003", "cl-3"));
    let entry = engine.enqueue_user("user-1003", "cl-3").await.expect("enqueue failed");

    let (first, second) = tokio::join!(
        engine.claim(&entry.id, "agent-1"),
        engine.claim(&entry.id, "agent-2")
    );
    let winners = [first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(winners, 1, "exactly one agent should win the claim");

    let loser = if first.is_ok() { second } else { first };
    assert!(matches!(loser, Err(DialerError::Conflict(_))));

    let open = engine
        .find_open_entry("user-1003")
        .await
        .expect("open entry query failed")
        .expect("entry should still be open");
    assert_eq!(open.status, EntryStatus::Assigned);
}

#[tokio::test]
async fn lifecycle_transitions_enforce_status_and_holder() {
    let dir = TempDir::new().expect("temp dir");
    let (engine, lookup) = create_test_engine(&dir).await.expect("engine creation failed");

    lookup.set(follow_up("user-1004", "cl-4"));
    let entry = engine.enqueue_user("user-1004", "cl-4").await.expect("enqueue failed");
    let event = OutcomeEvent::new("call-0004", CallOutcome::Busy, Utc::now());

    // Pending entries cannot be started or completed.
    assert!(matches!(
        engine.start(&entry.id, "agent-1").await,
        Err(DialerError::Conflict(_))
    ));
    assert!(matches!(
        engine.complete(&entry.id, "agent-1", event.clone()).await,
        Err(DialerError::Conflict(_))
    ));

    engine.claim(&entry.id, "agent-1").await.expect("claim failed");

    // Only the holder may move the entry.
    assert!(matches!(
        engine.start(&entry.id, "agent-2").await,
        Err(DialerError::Conflict(_))
    ));
    assert!(matches!(
        engine.release(&entry.id, "agent-2").await,
        Err(DialerError::Conflict(_))
    ));
    assert!(matches!(
        engine.claim(&entry.id, "agent-2").await,
        Err(DialerError::Conflict(_))
    ));

    // Unknown entries are a different failure than bad transitions.
    assert!(matches!(
        engine.claim("no-such-entry", "agent-1").await,
        Err(DialerError::NotFound(_))
    ));
}

#[tokio::test]
async fn released_entries_return_to_pending_intact() {
    let dir = TempDir::new().expect("temp dir");
    let (engine, lookup) = create_test_engine(&dir).await.expect("engine creation failed");

    lookup.set(follow_up("user-1005", "cl-5"));
    let entry = engine.enqueue_user("user-1005", "cl-5").await.expect("enqueue failed");
    engine.claim(&entry.id, "agent-1").await.expect("claim failed");

    let released = engine.release(&entry.id, "agent-1").await.expect("release failed");
    assert_eq!(released.status, EntryStatus::Pending);
    assert!(released.assigned_agent_id.is_none());
    assert!(released.assigned_at.is_none());

    // Another agent can pick it up immediately.
    let reclaimed = engine.claim(&entry.id, "agent-2").await.expect("reclaim failed");
    assert_eq!(reclaimed.assigned_agent_id.as_deref(), Some("agent-2"));
}

#[tokio::test]
#[serial]
async fn expired_claim_leases_are_swept_back_to_pending() {
    let dir = TempDir::new().expect("temp dir");
    let (engine, lookup) = create_test_engine(&dir).await.expect("engine creation failed");

    lookup.set(follow_up("user-1006", "cl-6"));
    lookup.set(follow_up("user-1007", "cl-6"));
    let stalled = engine.enqueue_user("user-1006", "cl-6").await.expect("enqueue failed");
    let active = engine.enqueue_user("user-1007", "cl-6").await.expect("enqueue failed");

    // One agent walks away after claiming; another is mid-call.
    engine.claim(&stalled.id, "agent-1").await.expect("claim failed");
    engine.claim(&active.id, "agent-2").await.expect("claim failed");
    engine.start(&active.id, "agent-2").await.expect("start failed");

    backdate_assignment(&engine, &stalled.id, Duration::minutes(10)).await;
    backdate_assignment(&engine, &active.id, Duration::minutes(10)).await;

    let released = engine.sweep_expired_claims().await.expect("sweep failed");
    assert_eq!(released, 1, "only the abandoned claim should be swept");

    let entry = engine
        .get_entry(&stalled.id)
        .await
        .expect("entry query failed")
        .expect("entry should exist");
    assert_eq!(entry.status, EntryStatus::Pending);
    assert!(entry.assigned_agent_id.is_none());

    // Calls already in progress keep their lease.
    let entry = engine
        .get_entry(&active.id)
        .await
        .expect("entry query failed")
        .expect("entry should exist");
    assert_eq!(entry.status, EntryStatus::InProgress);

    assert_eq!(engine.sweep_expired_claims().await.expect("sweep failed"), 0);
}

#[tokio::test]
async fn failed_followups_park_the_outcome_for_retry() {
    let dir = TempDir::new().expect("temp dir");
    let (engine, lookup) = create_test_engine(&dir).await.expect("engine creation failed");

    lookup.set(follow_up("user-2001", "cl-9"));
    let entry = engine.enqueue_user("user-2001", "cl-9").await.expect("enqueue failed");
    engine.claim(&entry.id, "agent-1").await.expect("claim failed");
    engine.start(&entry.id, "agent-1").await.expect("start failed");

    // The upstream goes down between the call and the follow-up.
    lookup.fail(true);
    let completed = engine
        .complete(
            &entry.id,
            "agent-1",
            OutcomeEvent::new("call-2001", CallOutcome::NoAnswer, Utc::now()),
        )
        .await
        .expect("completion must stick even when the follow-up fails");
    assert_eq!(completed.status, EntryStatus::Completed);

    // The score was applied before the lookup failed; the re-enqueue was not.
    let record = engine
        .get_score("user-2001")
        .await
        .expect("score query failed")
        .expect("record should exist");
    assert_eq!(record.current_score, 5);
    assert!(engine
        .find_open_entry("user-2001")
        .await
        .expect("open entry query failed")
        .is_none());

    let stats = engine.stats().await.expect("stats query failed");
    assert_eq!(stats.rescore_backlog, 1);

    // Nothing is due yet; the first retry waits out the backoff.
    let drained = engine.drain_rescore_retries().await.expect("drain failed");
    assert_eq!(drained.processed, 0);

    lookup.fail(false);
    make_retries_due(&engine).await;
    let drained = engine.drain_rescore_retries().await.expect("drain failed");
    assert_eq!(drained.processed, 1);
    assert_eq!(drained.succeeded, 1);
    assert_eq!(drained.failed, 0);

    let stats = engine.stats().await.expect("stats query failed");
    assert_eq!(stats.rescore_backlog, 0);

    // Replaying the parked event did not double-count the attempt.
    let record = engine
        .get_score("user-2001")
        .await
        .expect("score query failed")
        .expect("record should exist");
    assert_eq!(record.total_attempts, 1);
    assert_eq!(record.current_score, 5);

    let reentry = engine
        .find_open_entry("user-2001")
        .await
        .expect("open entry query failed")
        .expect("drain should re-enqueue the user");
    assert_eq!(reentry.priority_score, 5);
}

#[tokio::test]
async fn drain_failures_back_off_and_wait() {
    let dir = TempDir::new().expect("temp dir");
    let (engine, lookup) = create_test_engine(&dir).await.expect("engine creation failed");

    lookup.set(follow_up("user-2002", "cl-9"));
    let entry = engine.enqueue_user("user-2002", "cl-9").await.expect("enqueue failed");
    engine.claim(&entry.id, "agent-1").await.expect("claim failed");
    engine.start(&entry.id, "agent-1").await.expect("start failed");

    lookup.fail(true);
    engine
        .complete(
            &entry.id,
            "agent-1",
            OutcomeEvent::new("call-2002", CallOutcome::Failed, Utc::now()),
        )
        .await
        .expect("complete failed");

    // The upstream stays down through the retry.
    make_retries_due(&engine).await;
    let drained = engine.drain_rescore_retries().await.expect("drain failed");
    assert_eq!(drained.processed, 1);
    assert_eq!(drained.failed, 1);
    assert_eq!(drained.succeeded, 0);

    let (attempts, next_attempt_at): (i64, DateTime<Utc>) = sqlx::query_as(
        "SELECT attempts, next_attempt_at FROM rescore_retry WHERE outcome_id = ?1",
    )
    .bind("call-2002")
    .fetch_one(engine.database().pool())
    .await
    .expect("retry row should remain");
    assert_eq!(attempts, 1);
    assert!(next_attempt_at > Utc::now(), "failure should push the next attempt out");

    // Not due again until the backoff elapses.
    let drained = engine.drain_rescore_retries().await.expect("drain failed");
    assert_eq!(drained.processed, 0);
    assert_eq!(engine.stats().await.expect("stats query failed").rescore_backlog, 1);
}

#[tokio::test]
async fn parked_outcomes_apply_in_occurred_order() {
    let dir = TempDir::new().expect("temp dir");
    let (engine, lookup) = create_test_engine(&dir).await.expect("engine creation failed");

    lookup.set(follow_up("user-2003", "cl-9"));
    let t1 = Utc::now() - Duration::minutes(5);
    let t2 = t1 + Duration::minutes(1);

    // First call completes while the upstream is down: the outcome parks.
    let entry = engine.enqueue_user("user-2003", "cl-9").await.expect("enqueue failed");
    engine.claim(&entry.id, "agent-1").await.expect("claim failed");
    engine.start(&entry.id, "agent-1").await.expect("start failed");
    lookup.fail(true);
    engine
        .complete(
            &entry.id,
            "agent-1",
            OutcomeEvent::new("call-a", CallOutcome::NoAnswer, t1),
        )
        .await
        .expect("complete failed");
    lookup.fail(false);

    // Second call happens after the upstream recovers, but the user still has
    // a parked outcome, so this one parks behind it instead of applying.
    let entry = engine.enqueue_user("user-2003", "cl-9").await.expect("enqueue failed");
    engine.claim(&entry.id, "agent-1").await.expect("claim failed");
    engine.start(&entry.id, "agent-1").await.expect("start failed");
    engine
        .complete(
            &entry.id,
            "agent-1",
            OutcomeEvent::new("call-b", CallOutcome::Contacted, t2),
        )
        .await
        .expect("complete failed");

    let record = engine
        .get_score("user-2003")
        .await
        .expect("score query failed")
        .expect("record should exist");
    assert_eq!(record.successful_calls, 0, "the contact must wait behind the miss");
    assert_eq!(engine.stats().await.expect("stats query failed").rescore_backlog, 2);

    make_retries_due(&engine).await;

    // One drain pass surfaces only the oldest outcome per user.
    let drained = engine.drain_rescore_retries().await.expect("drain failed");
    assert_eq!(drained.processed, 1);
    assert_eq!(drained.succeeded, 1);
    let record = engine
        .get_score("user-2003")
        .await
        .expect("score query failed")
        .expect("record should exist");
    assert_eq!(record.last_outcome, Some(CallOutcome::NoAnswer));

    let drained = engine.drain_rescore_retries().await.expect("drain failed");
    assert_eq!(drained.processed, 1);
    assert_eq!(drained.succeeded, 1);

    let record = engine
        .get_score("user-2003")
        .await
        .expect("score query failed")
        .expect("record should exist");
    assert_eq!(record.last_outcome, Some(CallOutcome::Contacted));
    assert_eq!(record.successful_calls, 1);
    assert_eq!(record.total_attempts, 2);
    assert_eq!(record.outcome_penalty_score, 0);
    assert_eq!(engine.stats().await.expect("stats query failed").rescore_backlog, 0);

    // The follow-up for the final outcome re-enqueued the user at the settled score.
    let reentry = engine
        .find_open_entry("user-2003")
        .await
        .expect("open entry query failed")
        .expect("user should be re-enqueued");
    assert_eq!(reentry.priority_score, 0);
}
