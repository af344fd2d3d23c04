//! Migration state persistence
//!
//! The migration state is a singleton row. The phase string is authoritative;
//! the routing flags are stored next to it for operator visibility and are
//! cross-checked on every load. Disagreement marks the state invalid, which
//! the coordinator treats as corruption and refuses to transition on.

use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::Sqlite;

use crate::error::{DialerError, Result};
use crate::migration::{MigrationPhase, MigrationState};

use super::DialerDatabase;

#[derive(Debug, Clone, sqlx::FromRow)]
struct MigrationStateRow {
    phase: String,
    write_legacy: bool,
    write_new: bool,
    read_new_first: bool,
    updated_at: DateTime<Utc>,
    note: Option<String>,
}

/// Store for the migration state singleton
#[derive(Clone)]
pub struct MigrationStateStore {
    db: DialerDatabase,
}

impl MigrationStateStore {
    /// Create a store over a database handle
    pub fn new(db: DialerDatabase) -> Self {
        Self { db }
    }

    /// Load the migration state, validating the stored flags against the phase
    pub async fn load(&self) -> Result<MigrationState> {
        let row = sqlx::query_as::<_, MigrationStateRow>(
            "SELECT phase, write_legacy, write_new, read_new_first, updated_at, note
             FROM migration_state WHERE id = 1",
        )
        .fetch_optional(self.db.pool())
        .await?
        .ok_or_else(|| DialerError::fatal("migration state row missing"))?;

        let phase = MigrationPhase::parse(&row.phase)?;
        let valid = row.write_legacy == phase.writes_legacy()
            && row.write_new == phase.writes_new()
            && row.read_new_first == phase.reads_new_first();

        Ok(MigrationState {
            phase,
            write_legacy: row.write_legacy,
            write_new: row.write_new,
            read_new_first: row.read_new_first,
            valid,
            updated_at: row.updated_at,
            note: row.note,
        })
    }

    /// Persist a new phase with its canonical flags
    pub async fn save(&self, phase: MigrationPhase, note: Option<&str>) -> Result<()> {
        sqlx::query(
            "UPDATE migration_state
             SET phase = ?1, write_legacy = ?2, write_new = ?3, read_new_first = ?4,
                 updated_at = ?5, note = ?6
             WHERE id = 1",
        )
        .bind(phase.as_str())
        .bind(phase.writes_legacy())
        .bind(phase.writes_new())
        .bind(phase.reads_new_first())
        .bind(Utc::now())
        .bind(note)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Persist a new phase inside an already-open write transaction
    pub async fn save_in_tx(
        conn: &mut PoolConnection<Sqlite>,
        phase: MigrationPhase,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE migration_state
             SET phase = ?1, write_legacy = ?2, write_new = ?3, read_new_first = ?4,
                 updated_at = ?5, note = ?6
             WHERE id = 1",
        )
        .bind(phase.as_str())
        .bind(phase.writes_legacy())
        .bind(phase.writes_new())
        .bind(phase.reads_new_first())
        .bind(now)
        .bind(note)
        .execute(&mut **conn)
        .await?;
        Ok(())
    }
}
