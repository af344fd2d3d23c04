//! Call session coordination
//!
//! The completion path is the critical one. Completing an entry records the
//! call durably first, then runs the follow-up: apply the outcome to the
//! user's score, look up fresh claim state, and either re-enqueue the user in
//! the right queue or leave them out if nothing is outstanding. A follow-up
//! failure never un-completes the call; the outcome event is parked in the
//! rescore retry backlog and drained with backoff.
//!
//! Ordering rule: while a user has parked outcomes, any newly completed
//! outcome for that user is parked behind them instead of being applied, so
//! outcomes always apply in `occurred_at` order per user.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ClaimConfig;
use crate::database::queue_store::QueueStore;
use crate::database::retry_store::RescoreRetryStore;
use crate::error::{DialerError, Result};
use crate::queue::QueueEntry;
use crate::routing::{QueueRouter, UserClaimLookup};
use crate::scoring::{OutcomeEvent, ScoringEngine};

/// Counters from one rescore retry drain pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetryDrainResult {
    /// Parked outcomes attempted
    pub processed: u64,
    /// Applied and removed from the backlog
    pub succeeded: u64,
    /// Failed again and pushed out with backoff
    pub failed: u64,
}

/// Coordinates agent call sessions over the queue
pub struct CallSessionCoordinator {
    queue_store: QueueStore,
    scoring: ScoringEngine,
    retry_store: RescoreRetryStore,
    lookup: Arc<dyn UserClaimLookup>,
    config: ClaimConfig,
}

impl CallSessionCoordinator {
    /// Wire up a session coordinator
    pub fn new(
        queue_store: QueueStore,
        scoring: ScoringEngine,
        retry_store: RescoreRetryStore,
        lookup: Arc<dyn UserClaimLookup>,
        config: ClaimConfig,
    ) -> Self {
        Self {
            queue_store,
            scoring,
            retry_store,
            lookup,
            config,
        }
    }

    /// Route a user into the right queue from their current claim state.
    ///
    /// Creates the user's score record on first contact with the system. A
    /// user with nothing outstanding is rejected rather than queued.
    pub async fn enqueue_user(&self, user_id: &str, claim_id: &str) -> Result<QueueEntry> {
        let ctx = self.lookup.lookup(user_id, claim_id).await?;
        if ctx.is_resolved() {
            return Err(DialerError::validation(format!(
                "user {user_id} has nothing outstanding on claim {claim_id}"
            )));
        }
        let record = self.scoring.ensure_record(user_id).await?;
        let queue_type = QueueRouter::route(&ctx);
        let reason = QueueRouter::queue_reason(&ctx);
        let entry = self
            .queue_store
            .upsert_entry(user_id, claim_id, queue_type, record.current_score, &reason)
            .await?;
        info!(
            "📋 User {} enqueued to {} at score {}",
            user_id, entry.queue_type, entry.priority_score
        );
        Ok(entry)
    }

    /// Claim a pending entry for an agent
    pub async fn claim(&self, entry_id: &str, agent_id: &str) -> Result<QueueEntry> {
        let entry = self.queue_store.claim_entry(entry_id, agent_id).await?;
        info!("📞 Agent {} claimed entry {} (user {})", agent_id, entry.id, entry.user_id);
        Ok(entry)
    }

    /// Start the call on a claimed entry
    pub async fn start(&self, entry_id: &str, agent_id: &str) -> Result<QueueEntry> {
        let entry = self.queue_store.start_entry(entry_id, agent_id).await?;
        info!("📞 Agent {} started call for user {}", agent_id, entry.user_id);
        Ok(entry)
    }

    /// Hand a claimed entry back to the queue untouched
    pub async fn release(&self, entry_id: &str, agent_id: &str) -> Result<QueueEntry> {
        let entry = self.queue_store.release_entry(entry_id, agent_id).await?;
        info!("🔄 Agent {} released entry {} back to pending", agent_id, entry.id);
        Ok(entry)
    }

    /// Complete an in-progress call and run the post-call follow-up.
    ///
    /// The completion itself always sticks once the status change commits. A
    /// failed follow-up parks the outcome for retry and still returns the
    /// completed entry.
    pub async fn complete(
        &self,
        entry_id: &str,
        agent_id: &str,
        event: OutcomeEvent,
    ) -> Result<QueueEntry> {
        let entry = self.queue_store.complete_entry(entry_id, agent_id).await?;
        info!(
            "✅ Call completed for user {} with outcome {}",
            entry.user_id, event.outcome
        );

        let now = Utc::now();
        if self.retry_store.has_pending_for_user(&entry.user_id).await? {
            warn!(
                "⏰ User {} has parked outcomes; parking {} behind them to preserve order",
                entry.user_id, event.outcome_id
            );
            self.retry_store
                .enqueue(&entry.user_id, &entry.claim_id, &event, "parked behind an earlier outcome", now)
                .await?;
            return Ok(entry);
        }

        if let Err(e) = self.run_followup(&entry.user_id, &entry.claim_id, &event).await {
            warn!(
                "⚠️ Post-call follow-up failed for user {}: {}; outcome parked for retry",
                entry.user_id, e
            );
            self.retry_store
                .enqueue(
                    &entry.user_id,
                    &entry.claim_id,
                    &event,
                    &e.to_string(),
                    now + self.backoff_for(0),
                )
                .await?;
        }
        Ok(entry)
    }

    /// Return entries with expired claim leases to pending
    pub async fn sweep_expired_claims(&self) -> Result<u64> {
        let cutoff = Utc::now() - Duration::seconds(self.config.claim_lease_timeout_secs as i64);
        let released = self.queue_store.sweep_expired_assignments(cutoff).await?;
        if released > 0 {
            warn!("⏰ Released {} expired claim leases back to pending", released);
        }
        Ok(released)
    }

    /// Drain due parked outcomes, oldest-per-user first
    pub async fn drain_rescore_retries(&self) -> Result<RetryDrainResult> {
        let now = Utc::now();
        let due = self.retry_store.due(now, self.config.retry_batch_size).await?;
        let mut result = RetryDrainResult::default();

        for item in due {
            result.processed += 1;
            let event = item.event();
            match self.run_followup(&item.user_id, &item.claim_id, &event).await {
                Ok(()) => {
                    self.retry_store.delete(&item.outcome_id).await?;
                    result.succeeded += 1;
                    debug!(
                        "✅ Parked outcome {} applied for user {}",
                        item.outcome_id, item.user_id
                    );
                }
                Err(e) => {
                    let attempts = item.attempts + 1;
                    let next_attempt_at = Utc::now() + self.backoff_for(attempts);
                    self.retry_store
                        .record_failure(&item.outcome_id, &e.to_string(), attempts, next_attempt_at)
                        .await?;
                    result.failed += 1;
                    debug!(
                        "⚠️ Retry {} for parked outcome {} failed: {}",
                        attempts, item.outcome_id, e
                    );
                }
            }
        }

        if result.processed > 0 {
            info!(
                "🔄 Rescore drain: {} processed, {} applied, {} failed",
                result.processed, result.succeeded, result.failed
            );
        }
        Ok(result)
    }

    /// Parked outcomes currently awaiting retry
    pub async fn retry_backlog(&self) -> Result<i64> {
        self.retry_store.backlog().await
    }

    /// Apply the outcome, refresh claim state, and re-enqueue if still needed
    async fn run_followup(&self, user_id: &str, claim_id: &str, event: &OutcomeEvent) -> Result<()> {
        let record = self.scoring.apply_outcome(user_id, event).await?;
        let ctx = self.lookup.lookup(user_id, claim_id).await?;
        if ctx.is_resolved() {
            info!("🎉 User {} has nothing outstanding; not re-enqueued", user_id);
            return Ok(());
        }
        let queue_type = QueueRouter::route(&ctx);
        let reason = QueueRouter::queue_reason(&ctx);
        let entry = self
            .queue_store
            .upsert_entry(user_id, claim_id, queue_type, record.current_score, &reason)
            .await?;
        debug!(
            "📋 User {} re-enqueued to {} at score {}",
            user_id, entry.queue_type, entry.priority_score
        );
        Ok(())
    }

    fn backoff_for(&self, attempts: i64) -> Duration {
        let shift = attempts.clamp(0, 10) as u32;
        let secs = self
            .config
            .retry_backoff_secs
            .saturating_mul(1u64 << shift)
            .min(self.config.retry_backoff_cap_secs);
        Duration::seconds(secs as i64)
    }
}
