//! Database schema
//!
//! All four queue tables share one row shape so entries can be mirrored
//! between the legacy table and the specialized tables by id during the
//! storage migration. Timestamps are stored as TEXT and always written from
//! bound `DateTime<Utc>` values, never from SQL-side defaults, so every row
//! carries the same format.

use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use tracing::debug;

use crate::error::Result;
use crate::queue::QueueType;

/// The single shared queue table being migrated away from
pub const LEGACY_QUEUE_TABLE: &str = "legacy_queue";

/// The specialized per-queue tables being migrated onto
pub const NEW_QUEUE_TABLES: [&str; 3] = [
    "unsigned_signature_queue",
    "outstanding_requirements_queue",
    "generic_queue",
];

/// Statuses that count as live queue membership, as a SQL IN-list body
pub const OPEN_STATUSES_SQL: &str = "'pending', 'assigned', 'in_progress'";

/// Column list shared by all four queue tables, in insert order
pub const QUEUE_ENTRY_COLUMNS: &str = "id, user_id, claim_id, queue_type, priority_score, \
     status, queue_reason, assigned_agent_id, assigned_at, created_at, updated_at";

/// The specialized table that stores entries of a queue type
pub fn queue_table_for(queue_type: QueueType) -> &'static str {
    match queue_type {
        QueueType::UnsignedSignature => "unsigned_signature_queue",
        QueueType::OutstandingRequirements => "outstanding_requirements_queue",
        QueueType::Generic => "generic_queue",
    }
}

/// Create every table and index, then seed the migration state singleton
pub async fn create_all(pool: &SqlitePool) -> Result<()> {
    create_queue_table(pool, LEGACY_QUEUE_TABLE).await?;
    for table in NEW_QUEUE_TABLES {
        create_queue_table(pool, table).await?;
    }
    create_score_records_table(pool).await?;
    create_outcome_journal_table(pool).await?;
    create_migration_state_table(pool).await?;
    create_rescore_retry_table(pool).await?;
    seed_migration_state(pool).await?;
    debug!("Schema ready");
    Ok(())
}

async fn create_queue_table(pool: &SqlitePool, table: &str) -> Result<()> {
    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            claim_id TEXT NOT NULL,
            queue_type TEXT NOT NULL CHECK (queue_type IN ('unsigned_signature', 'outstanding_requirements', 'generic')),
            priority_score INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'assigned', 'in_progress', 'completed', 'removed')),
            queue_reason TEXT NOT NULL DEFAULT '',
            assigned_agent_id TEXT,
            assigned_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )"
    ))
    .execute(pool)
    .await?;

    // One live membership per user within the table. The engine also checks
    // this across tables inside its write transactions; the index is the
    // in-table backstop that turns a race loser into a constraint error.
    sqlx::query(&format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_{table}_open_user
         ON {table} (user_id) WHERE status IN ({OPEN_STATUSES_SQL})"
    ))
    .execute(pool)
    .await?;

    // Matches the pending-list ordering: score desc, oldest first, user id tiebreak.
    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_{table}_pending_order
         ON {table} (status, priority_score DESC, created_at ASC, user_id ASC)"
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_{table}_assigned_at
         ON {table} (status, assigned_at)"
    ))
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_score_records_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS score_records (
            user_id TEXT PRIMARY KEY,
            current_score INTEGER NOT NULL DEFAULT 0 CHECK (current_score BETWEEN 0 AND 9999),
            base_score INTEGER NOT NULL DEFAULT 0,
            outcome_penalty_score INTEGER NOT NULL DEFAULT 0 CHECK (outcome_penalty_score >= 0),
            time_penalty_score INTEGER NOT NULL DEFAULT 0 CHECK (time_penalty_score >= 0),
            total_attempts INTEGER NOT NULL DEFAULT 0,
            successful_calls INTEGER NOT NULL DEFAULT 0 CHECK (successful_calls >= 0),
            last_outcome TEXT,
            last_call_at TEXT,
            updated_at TEXT NOT NULL,
            CHECK (successful_calls <= total_attempts)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_outcome_journal_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS outcome_journal (
            outcome_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            outcome TEXT NOT NULL,
            occurred_at TEXT NOT NULL,
            recorded_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_outcome_journal_user
         ON outcome_journal (user_id, occurred_at)",
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_migration_state_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS migration_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            phase TEXT NOT NULL DEFAULT 'pre_migration',
            write_legacy INTEGER NOT NULL DEFAULT 1,
            write_new INTEGER NOT NULL DEFAULT 0,
            read_new_first INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL,
            note TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_rescore_retry_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rescore_retry (
            outcome_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            claim_id TEXT NOT NULL,
            outcome TEXT NOT NULL,
            occurred_at TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            next_attempt_at TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_rescore_retry_due
         ON rescore_retry (next_attempt_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_rescore_retry_user
         ON rescore_retry (user_id, occurred_at)",
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Seed the migration state singleton at `pre_migration` if it is missing
async fn seed_migration_state(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO migration_state (id, phase, write_legacy, write_new, read_new_first, updated_at)
         VALUES (1, 'pre_migration', 1, 0, 0, ?1)",
    )
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}
