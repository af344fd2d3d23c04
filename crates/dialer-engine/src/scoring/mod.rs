//! Priority scoring types
//!
//! Each user carries one [`ScoreRecord`]. The record's `current_score` decides
//! how soon the user is called: pending queue entries are ordered by score,
//! highest first. Call outcomes adjust the score through the
//! [`ScoringEngine`](crate::scoring::ScoringEngine); the arithmetic itself is
//! the pure [`compute_next`](crate::scoring::compute_next) function.

pub mod engine;

pub use engine::{compute_next, ScoringEngine};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DialerError, Result};

/// Lowest representable priority score
pub const SCORE_FLOOR: i64 = 0;

/// Highest representable priority score
pub const SCORE_CEILING: i64 = 9999;

/// Result of an outbound call attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    /// The user was reached
    Contacted,
    /// The call rang out
    NoAnswer,
    /// The call hit voicemail
    Voicemail,
    /// The line was busy
    Busy,
    /// The call could not be placed
    Failed,
}

impl CallOutcome {
    /// Stable string form used in storage and on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contacted => "contacted",
            Self::NoAnswer => "no_answer",
            Self::Voicemail => "voicemail",
            Self::Busy => "busy",
            Self::Failed => "failed",
        }
    }

    /// Parse the stable string form
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "contacted" => Ok(Self::Contacted),
            "no_answer" => Ok(Self::NoAnswer),
            "voicemail" => Ok(Self::Voicemail),
            "busy" => Ok(Self::Busy),
            "failed" => Ok(Self::Failed),
            other => Err(DialerError::validation(format!("unknown call outcome '{other}'"))),
        }
    }

    /// True when the outcome counts as a successful contact
    pub fn is_successful(&self) -> bool {
        matches!(self, Self::Contacted)
    }
}

impl std::fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One call outcome report, identified for exactly-once application.
///
/// The `outcome_id` is the idempotency key: applying the same event twice
/// changes nothing the second time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeEvent {
    /// Caller-supplied unique identifier for this report
    pub outcome_id: String,
    /// What happened on the call
    pub outcome: CallOutcome,
    /// When the call attempt happened
    pub occurred_at: DateTime<Utc>,
}

impl OutcomeEvent {
    /// Create an outcome event
    pub fn new(outcome_id: impl Into<String>, outcome: CallOutcome, occurred_at: DateTime<Utc>) -> Self {
        Self {
            outcome_id: outcome_id.into(),
            outcome,
            occurred_at,
        }
    }

    /// Parse an event from wire strings, validating the outcome code
    pub fn parse(outcome_id: impl Into<String>, outcome: &str, occurred_at: DateTime<Utc>) -> Result<Self> {
        let outcome_id = outcome_id.into();
        if outcome_id.trim().is_empty() {
            return Err(DialerError::validation("outcome_id cannot be empty"));
        }
        Ok(Self {
            outcome_id,
            outcome: CallOutcome::parse(outcome)?,
            occurred_at,
        })
    }
}

/// One user's priority score and call history counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    /// The user this record scores
    pub user_id: String,
    /// Effective priority, `base + outcome_penalty + time_penalty` clamped to bounds
    pub current_score: i64,
    /// Static intake component
    pub base_score: i64,
    /// Accumulated outcome adjustments (never negative, capped)
    pub outcome_penalty_score: i64,
    /// Accumulated waiting-time escalation (never negative, capped)
    pub time_penalty_score: i64,
    /// Total call attempts recorded
    pub total_attempts: i64,
    /// Attempts that reached the user
    pub successful_calls: i64,
    /// Most recent outcome, if any attempt was recorded
    pub last_outcome: Option<CallOutcome>,
    /// When the most recent attempt happened
    pub last_call_at: Option<DateTime<Utc>>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl ScoreRecord {
    /// Fresh record for a user with no call history
    pub fn new_for_user(user_id: impl Into<String>, base_score: i64, now: DateTime<Utc>) -> Self {
        let base_score = base_score.clamp(SCORE_FLOOR, SCORE_CEILING);
        Self {
            user_id: user_id.into(),
            current_score: base_score,
            base_score,
            outcome_penalty_score: 0,
            time_penalty_score: 0,
            total_attempts: 0,
            successful_calls: 0,
            last_outcome: None,
            last_call_at: None,
            updated_at: now,
        }
    }

    /// Check the record invariants
    pub fn validate(&self) -> Result<()> {
        if self.current_score < SCORE_FLOOR || self.current_score > SCORE_CEILING {
            return Err(DialerError::internal(format!(
                "score {} for user {} outside [{}, {}]",
                self.current_score, self.user_id, SCORE_FLOOR, SCORE_CEILING
            )));
        }
        if self.successful_calls < 0 || self.successful_calls > self.total_attempts {
            return Err(DialerError::internal(format!(
                "user {} has {} successful calls out of {} attempts",
                self.user_id, self.successful_calls, self.total_attempts
            )));
        }
        if self.outcome_penalty_score < 0 || self.time_penalty_score < 0 {
            return Err(DialerError::internal(format!(
                "negative penalty component for user {}",
                self.user_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_round_trips_through_strings() {
        for outcome in [
            CallOutcome::Contacted,
            CallOutcome::NoAnswer,
            CallOutcome::Voicemail,
            CallOutcome::Busy,
            CallOutcome::Failed,
        ] {
            assert_eq!(CallOutcome::parse(outcome.as_str()).unwrap(), outcome);
        }
        assert!(CallOutcome::parse("wrong_number").is_err());
    }

    #[test]
    fn event_parse_rejects_bad_input() {
        let now = Utc::now();
        assert!(OutcomeEvent::parse("evt-1", "busy", now).is_ok());
        assert!(OutcomeEvent::parse("evt-2", "hung_up", now).is_err());
        assert!(OutcomeEvent::parse("  ", "busy", now).is_err());
    }

    #[test]
    fn fresh_record_clamps_base_to_bounds() {
        let now = Utc::now();
        let record = ScoreRecord::new_for_user("u1", 12_000, now);
        assert_eq!(record.base_score, SCORE_CEILING);
        assert_eq!(record.current_score, SCORE_CEILING);
        assert!(record.validate().is_ok());
    }
}
