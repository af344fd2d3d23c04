//! Priority scoring engine
//!
//! Applies call outcomes to score records exactly once. The arithmetic lives
//! in [`compute_next`], a pure function over a record and an outcome; the
//! engine wraps it with the idempotency journal and persistence handled by
//! [`ScoreStore`](crate::database::score_store::ScoreStore).
//!
//! A score has three components:
//!
//! - `base_score`: set at intake, never changed by calls
//! - `outcome_penalty_score`: accumulates the configured per-outcome deltas,
//!   clamped to `[0, outcome_penalty_cap]`
//! - `time_penalty_score`: grows with full days waited between attempts,
//!   clamped to `[0, time_penalty.cap]`, reset to zero by a contact
//!
//! `current_score = base + outcome_penalty + time_penalty`, clamped to the
//! engine-wide bounds. Higher scores are called sooner.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::ScoringConfig;
use crate::database::score_store::ScoreStore;
use crate::error::{DialerError, Result};

use super::{CallOutcome, OutcomeEvent, ScoreRecord, SCORE_CEILING, SCORE_FLOOR};

/// Compute the score record that results from applying one outcome.
///
/// Pure function: no clock reads, no storage. `occurred_at` is when the call
/// attempt happened (drives the time penalty); `now` stamps `updated_at`.
pub fn compute_next(
    record: &ScoreRecord,
    outcome: CallOutcome,
    occurred_at: DateTime<Utc>,
    now: DateTime<Utc>,
    config: &ScoringConfig,
) -> ScoreRecord {
    let mut next = record.clone();

    next.total_attempts = record.total_attempts + 1;
    if outcome.is_successful() {
        next.successful_calls = record.successful_calls + 1;
    }

    let delta = config.outcome_deltas.delta_for(outcome);
    next.outcome_penalty_score =
        (record.outcome_penalty_score + delta).clamp(0, config.outcome_penalty_cap.max(0));

    if outcome.is_successful() {
        next.time_penalty_score = 0;
    } else {
        // Days waited since the previous attempt; first attempts add nothing.
        let waited_days = record
            .last_call_at
            .map(|last| occurred_at.signed_duration_since(last).num_days().max(0))
            .unwrap_or(0);
        let grown = record.time_penalty_score + waited_days * config.time_penalty.per_day;
        next.time_penalty_score = grown.clamp(0, config.time_penalty.cap.max(0));
    }

    next.current_score = (next.base_score + next.outcome_penalty_score + next.time_penalty_score)
        .clamp(SCORE_FLOOR, SCORE_CEILING);
    next.last_outcome = Some(outcome);
    next.last_call_at = Some(occurred_at);
    next.updated_at = now;

    next
}

/// Applies call outcomes to per-user score records
#[derive(Clone)]
pub struct ScoringEngine {
    store: ScoreStore,
    config: ScoringConfig,
}

impl ScoringEngine {
    /// Create a scoring engine over a score store
    pub fn new(store: ScoreStore, config: ScoringConfig) -> Self {
        Self { store, config }
    }

    /// Apply one call outcome to a user's score, exactly once.
    ///
    /// Re-submitting an event with an `outcome_id` that was already applied
    /// returns the current record unchanged. Users without a score record get
    /// one created with the configured default base score first.
    pub async fn apply_outcome(&self, user_id: &str, event: &OutcomeEvent) -> Result<ScoreRecord> {
        if user_id.trim().is_empty() {
            return Err(DialerError::validation("user_id cannot be empty"));
        }
        if event.outcome_id.trim().is_empty() {
            return Err(DialerError::validation("outcome_id cannot be empty"));
        }

        let (record, applied) = self.store.record_outcome(user_id, event, &self.config).await?;
        if applied {
            info!(
                "📊 Outcome {} for user {}: score now {} (base {} + outcome {} + time {})",
                event.outcome,
                user_id,
                record.current_score,
                record.base_score,
                record.outcome_penalty_score,
                record.time_penalty_score
            );
        } else {
            debug!(
                "Outcome {} already applied for user {}, score unchanged at {}",
                event.outcome_id, user_id, record.current_score
            );
        }
        Ok(record)
    }

    /// Fetch a user's score record
    pub async fn get_score(&self, user_id: &str) -> Result<Option<ScoreRecord>> {
        self.store.get(user_id).await
    }

    /// Fetch the user's score record, creating one with the default base score if missing
    pub async fn ensure_record(&self, user_id: &str) -> Result<ScoreRecord> {
        if user_id.trim().is_empty() {
            return Err(DialerError::validation("user_id cannot be empty"));
        }
        self.store.ensure(user_id, self.config.default_base_score).await
    }

    /// Create or reset a user's score record with an explicit base score
    pub async fn set_base_score(&self, user_id: &str, base_score: i64) -> Result<ScoreRecord> {
        if base_score < SCORE_FLOOR || base_score > SCORE_CEILING {
            return Err(DialerError::validation(format!(
                "base score {base_score} outside [{SCORE_FLOOR}, {SCORE_CEILING}]"
            )));
        }
        self.store.set_base(user_id, base_score).await
    }
}
