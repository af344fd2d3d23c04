//! Score record persistence
//!
//! Owns the `score_records` and `outcome_journal` tables. Outcome application
//! is exactly-once: the journal insert and the score update share one write
//! transaction, keyed by the caller-supplied `outcome_id`. A journal hit means
//! the event was already applied, and the stored record is returned untouched.

use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::Sqlite;

use crate::config::ScoringConfig;
use crate::error::{DialerError, Result};
use crate::scoring::{compute_next, CallOutcome, OutcomeEvent, ScoreRecord};

use super::DialerDatabase;

const SCORE_COLUMNS: &str = "user_id, current_score, base_score, outcome_penalty_score, \
     time_penalty_score, total_attempts, successful_calls, last_outcome, last_call_at, updated_at";

#[derive(Debug, Clone, sqlx::FromRow)]
struct ScoreRow {
    user_id: String,
    current_score: i64,
    base_score: i64,
    outcome_penalty_score: i64,
    time_penalty_score: i64,
    total_attempts: i64,
    successful_calls: i64,
    last_outcome: Option<String>,
    last_call_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ScoreRow> for ScoreRecord {
    type Error = DialerError;

    fn try_from(row: ScoreRow) -> Result<Self> {
        let last_outcome = row
            .last_outcome
            .as_deref()
            .map(CallOutcome::parse)
            .transpose()?;
        let record = ScoreRecord {
            user_id: row.user_id,
            current_score: row.current_score,
            base_score: row.base_score,
            outcome_penalty_score: row.outcome_penalty_score,
            time_penalty_score: row.time_penalty_score,
            total_attempts: row.total_attempts,
            successful_calls: row.successful_calls,
            last_outcome,
            last_call_at: row.last_call_at,
            updated_at: row.updated_at,
        };
        record.validate()?;
        Ok(record)
    }
}

/// Store for per-user score records and the outcome journal
#[derive(Clone)]
pub struct ScoreStore {
    db: DialerDatabase,
}

impl ScoreStore {
    /// Create a score store over a database handle
    pub fn new(db: DialerDatabase) -> Self {
        Self { db }
    }

    /// Fetch a user's score record
    pub async fn get(&self, user_id: &str) -> Result<Option<ScoreRecord>> {
        let row = sqlx::query_as::<_, ScoreRow>(&format!(
            "SELECT {SCORE_COLUMNS} FROM score_records WHERE user_id = ?1"
        ))
        .bind(user_id)
        .fetch_optional(self.db.pool())
        .await?;
        row.map(ScoreRecord::try_from).transpose()
    }

    /// Fetch the record, creating one with the given base score if missing
    pub async fn ensure(&self, user_id: &str, default_base_score: i64) -> Result<ScoreRecord> {
        let fresh = ScoreRecord::new_for_user(user_id, default_base_score, Utc::now());
        sqlx::query(&format!(
            "INSERT OR IGNORE INTO score_records ({SCORE_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        ))
        .bind(&fresh.user_id)
        .bind(fresh.current_score)
        .bind(fresh.base_score)
        .bind(fresh.outcome_penalty_score)
        .bind(fresh.time_penalty_score)
        .bind(fresh.total_attempts)
        .bind(fresh.successful_calls)
        .bind(fresh.last_outcome.map(|o| o.as_str()))
        .bind(fresh.last_call_at)
        .bind(fresh.updated_at)
        .execute(self.db.pool())
        .await?;

        self.get(user_id).await?.ok_or_else(|| {
            DialerError::internal(format!("score record for user {user_id} missing after insert"))
        })
    }

    /// Create or reset a user's record to a fresh one with the given base score
    pub async fn set_base(&self, user_id: &str, base_score: i64) -> Result<ScoreRecord> {
        let fresh = ScoreRecord::new_for_user(user_id, base_score, Utc::now());
        sqlx::query(&format!(
            "INSERT INTO score_records ({SCORE_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(user_id) DO UPDATE SET
                current_score = excluded.current_score,
                base_score = excluded.base_score,
                outcome_penalty_score = excluded.outcome_penalty_score,
                time_penalty_score = excluded.time_penalty_score,
                total_attempts = excluded.total_attempts,
                successful_calls = excluded.successful_calls,
                last_outcome = excluded.last_outcome,
                last_call_at = excluded.last_call_at,
                updated_at = excluded.updated_at"
        ))
        .bind(&fresh.user_id)
        .bind(fresh.current_score)
        .bind(fresh.base_score)
        .bind(fresh.outcome_penalty_score)
        .bind(fresh.time_penalty_score)
        .bind(fresh.total_attempts)
        .bind(fresh.successful_calls)
        .bind(fresh.last_outcome.map(|o| o.as_str()))
        .bind(fresh.last_call_at)
        .bind(fresh.updated_at)
        .execute(self.db.pool())
        .await?;
        Ok(fresh)
    }

    /// Apply one outcome event to a user's record, exactly once.
    ///
    /// Returns the record after the call and whether this invocation applied
    /// the event (false when the `outcome_id` was seen before).
    pub async fn record_outcome(
        &self,
        user_id: &str,
        event: &OutcomeEvent,
        config: &ScoringConfig,
    ) -> Result<(ScoreRecord, bool)> {
        let now = Utc::now();
        let mut conn = self.db.begin_immediate().await?;
        let result = Self::record_outcome_in_tx(&mut conn, user_id, event, config, now).await;
        match result {
            Ok(applied) => {
                DialerDatabase::commit(&mut conn).await?;
                Ok(applied)
            }
            Err(e) => {
                DialerDatabase::rollback(&mut conn).await;
                Err(e)
            }
        }
    }

    async fn record_outcome_in_tx(
        conn: &mut PoolConnection<Sqlite>,
        user_id: &str,
        event: &OutcomeEvent,
        config: &ScoringConfig,
        now: DateTime<Utc>,
    ) -> Result<(ScoreRecord, bool)> {
        let journal_insert = sqlx::query(
            "INSERT INTO outcome_journal (outcome_id, user_id, outcome, occurred_at, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(outcome_id) DO NOTHING",
        )
        .bind(&event.outcome_id)
        .bind(user_id)
        .bind(event.outcome.as_str())
        .bind(event.occurred_at)
        .bind(now)
        .execute(&mut **conn)
        .await?;

        let current = match Self::fetch_in_tx(conn, user_id).await? {
            Some(record) => record,
            None => {
                let record = ScoreRecord::new_for_user(user_id, config.default_base_score, now);
                Self::insert_in_tx(conn, &record).await?;
                record
            }
        };

        if journal_insert.rows_affected() == 0 {
            // Event already applied; nothing changes.
            return Ok((current, false));
        }

        let next = compute_next(&current, event.outcome, event.occurred_at, now, config);
        next.validate()?;
        Self::update_in_tx(conn, &next).await?;
        Ok((next, true))
    }

    async fn fetch_in_tx(
        conn: &mut PoolConnection<Sqlite>,
        user_id: &str,
    ) -> Result<Option<ScoreRecord>> {
        let row = sqlx::query_as::<_, ScoreRow>(&format!(
            "SELECT {SCORE_COLUMNS} FROM score_records WHERE user_id = ?1"
        ))
        .bind(user_id)
        .fetch_optional(&mut **conn)
        .await?;
        row.map(ScoreRecord::try_from).transpose()
    }

    async fn insert_in_tx(conn: &mut PoolConnection<Sqlite>, record: &ScoreRecord) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO score_records ({SCORE_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        ))
        .bind(&record.user_id)
        .bind(record.current_score)
        .bind(record.base_score)
        .bind(record.outcome_penalty_score)
        .bind(record.time_penalty_score)
        .bind(record.total_attempts)
        .bind(record.successful_calls)
        .bind(record.last_outcome.map(|o| o.as_str()))
        .bind(record.last_call_at)
        .bind(record.updated_at)
        .execute(&mut **conn)
        .await?;
        Ok(())
    }

    async fn update_in_tx(conn: &mut PoolConnection<Sqlite>, record: &ScoreRecord) -> Result<()> {
        sqlx::query(
            "UPDATE score_records SET
                current_score = ?2,
                base_score = ?3,
                outcome_penalty_score = ?4,
                time_penalty_score = ?5,
                total_attempts = ?6,
                successful_calls = ?7,
                last_outcome = ?8,
                last_call_at = ?9,
                updated_at = ?10
             WHERE user_id = ?1",
        )
        .bind(&record.user_id)
        .bind(record.current_score)
        .bind(record.base_score)
        .bind(record.outcome_penalty_score)
        .bind(record.time_penalty_score)
        .bind(record.total_attempts)
        .bind(record.successful_calls)
        .bind(record.last_outcome.map(|o| o.as_str()))
        .bind(record.last_call_at)
        .bind(record.updated_at)
        .execute(&mut **conn)
        .await?;
        Ok(())
    }
}
