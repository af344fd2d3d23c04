//! Rescore retry persistence
//!
//! When the post-call follow-up for a completed entry fails (scoring, claim
//! lookup, or re-enqueue), the outcome event is parked here and retried with
//! backoff. Rows are keyed by `outcome_id`, so parking the same event twice is
//! a no-op.
//!
//! Per-user ordering matters: a user's later outcome must never be applied
//! before an earlier one that is still parked. [`RescoreRetryStore::due`]
//! therefore only surfaces each user's oldest parked event.

use chrono::{DateTime, Utc};

use crate::error::{DialerError, Result};
use crate::scoring::{CallOutcome, OutcomeEvent};

use super::DialerDatabase;

#[derive(Debug, Clone, sqlx::FromRow)]
struct RetryRow {
    outcome_id: String,
    user_id: String,
    claim_id: String,
    outcome: String,
    occurred_at: DateTime<Utc>,
    attempts: i64,
}

/// One parked outcome event awaiting a rescore retry
#[derive(Debug, Clone)]
pub struct PendingRescore {
    /// Idempotency key of the parked event
    pub outcome_id: String,
    /// User the outcome belongs to
    pub user_id: String,
    /// Claim the call was about
    pub claim_id: String,
    /// The call outcome to apply
    pub outcome: CallOutcome,
    /// When the call attempt happened
    pub occurred_at: DateTime<Utc>,
    /// Failed attempts so far
    pub attempts: i64,
}

impl PendingRescore {
    /// Rebuild the outcome event this row parked
    pub fn event(&self) -> OutcomeEvent {
        OutcomeEvent::new(self.outcome_id.clone(), self.outcome, self.occurred_at)
    }
}

impl TryFrom<RetryRow> for PendingRescore {
    type Error = DialerError;

    fn try_from(row: RetryRow) -> Result<Self> {
        Ok(Self {
            outcome_id: row.outcome_id,
            user_id: row.user_id,
            claim_id: row.claim_id,
            outcome: CallOutcome::parse(&row.outcome)?,
            occurred_at: row.occurred_at,
            attempts: row.attempts,
        })
    }
}

/// Store for parked rescore retries
#[derive(Clone)]
pub struct RescoreRetryStore {
    db: DialerDatabase,
}

impl RescoreRetryStore {
    /// Create a store over a database handle
    pub fn new(db: DialerDatabase) -> Self {
        Self { db }
    }

    /// Park an outcome event for later retry. Returns false if it was already parked.
    pub async fn enqueue(
        &self,
        user_id: &str,
        claim_id: &str,
        event: &OutcomeEvent,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO rescore_retry
                (outcome_id, user_id, claim_id, outcome, occurred_at, attempts, last_error, next_attempt_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?8)
             ON CONFLICT(outcome_id) DO NOTHING",
        )
        .bind(&event.outcome_id)
        .bind(user_id)
        .bind(claim_id)
        .bind(event.outcome.as_str())
        .bind(event.occurred_at)
        .bind(error)
        .bind(next_attempt_at)
        .bind(Utc::now())
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Parked events ready to retry, oldest-per-user only.
    ///
    /// A user's newer events stay hidden until their older ones drain, even
    /// when the newer ones are past their `next_attempt_at`.
    pub async fn due(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<PendingRescore>> {
        let rows = sqlx::query_as::<_, RetryRow>(
            "SELECT outcome_id, user_id, claim_id, outcome, occurred_at, attempts
             FROM rescore_retry r
             WHERE r.next_attempt_at <= ?1
               AND NOT EXISTS (
                   SELECT 1 FROM rescore_retry earlier
                   WHERE earlier.user_id = r.user_id
                     AND earlier.occurred_at < r.occurred_at
               )
             ORDER BY r.occurred_at ASC, r.outcome_id ASC
             LIMIT ?2",
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(PendingRescore::try_from).collect()
    }

    /// Record a failed retry attempt and push the next attempt out
    pub async fn record_failure(
        &self,
        outcome_id: &str,
        error: &str,
        attempts: i64,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE rescore_retry
             SET attempts = ?2, last_error = ?3, next_attempt_at = ?4
             WHERE outcome_id = ?1",
        )
        .bind(outcome_id)
        .bind(attempts)
        .bind(error)
        .bind(next_attempt_at)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Remove a successfully applied event
    pub async fn delete(&self, outcome_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM rescore_retry WHERE outcome_id = ?1")
            .bind(outcome_id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Whether the user has any parked events at all
    pub async fn has_pending_for_user(&self, user_id: &str) -> Result<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM rescore_retry WHERE user_id = ?1")
                .bind(user_id)
                .fetch_one(self.db.pool())
                .await?;
        Ok(count > 0)
    }

    /// Total parked events
    pub async fn backlog(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rescore_retry")
            .fetch_one(self.db.pool())
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn due_surfaces_only_each_users_oldest_event() {
        let db = DialerDatabase::new_in_memory().await.unwrap();
        let store = RescoreRetryStore::new(db);
        let now = Utc::now();

        let older = OutcomeEvent::new("evt-old", CallOutcome::NoAnswer, now - Duration::hours(2));
        let newer = OutcomeEvent::new("evt-new", CallOutcome::Busy, now - Duration::hours(1));
        // Older event backs off into the future; newer event is nominally due.
        store.enqueue("u1", "c1", &older, "lookup down", now + Duration::minutes(5)).await.unwrap();
        store.enqueue("u1", "c1", &newer, "queued behind earlier outcome", now).await.unwrap();

        // Nothing surfaces: the only eligible row per user is the oldest one,
        // and the oldest is not due yet.
        assert!(store.due(now, 10).await.unwrap().is_empty());

        let later = now + Duration::minutes(6);
        let due = store.due(later, 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].outcome_id, "evt-old");
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_per_outcome() {
        let db = DialerDatabase::new_in_memory().await.unwrap();
        let store = RescoreRetryStore::new(db);
        let now = Utc::now();

        let event = OutcomeEvent::new("evt-1", CallOutcome::Failed, now);
        assert!(store.enqueue("u1", "c1", &event, "boom", now).await.unwrap());
        assert!(!store.enqueue("u1", "c1", &event, "boom again", now).await.unwrap());
        assert_eq!(store.backlog().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_clears_pending_flag() {
        let db = DialerDatabase::new_in_memory().await.unwrap();
        let store = RescoreRetryStore::new(db);
        let now = Utc::now();

        let event = OutcomeEvent::new("evt-1", CallOutcome::Voicemail, now);
        store.enqueue("u1", "c1", &event, "boom", now).await.unwrap();
        assert!(store.has_pending_for_user("u1").await.unwrap());

        store.delete("evt-1").await.unwrap();
        assert!(!store.has_pending_for_user("u1").await.unwrap());
        assert_eq!(store.backlog().await.unwrap(), 0);
    }
}
