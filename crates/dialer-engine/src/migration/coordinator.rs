//! Migration coordination
//!
//! Owns the persisted migration phase and applies transitions:
//!
//! - forward, one phase at a time, backfilling the specialized tables on
//!   entry to `dual_write` and gating later steps on a consistency check
//! - backward, straight to `pre_migration`, re-deriving legacy content from
//!   the specialized tables and refusing to flip the phase if the backfill
//!   cannot be verified
//!
//! The current phase is cached in memory; queue operations snapshot it
//! through [`MigrationCoordinator::storage_plan`] without touching the
//! database. Corrupted persisted state halts transitions but leaves
//! operations running on the last cached phase.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::MigrationConfig;
use crate::database::migration_store::MigrationStateStore;
use crate::database::schema::{
    queue_table_for, LEGACY_QUEUE_TABLE, NEW_QUEUE_TABLES, OPEN_STATUSES_SQL, QUEUE_ENTRY_COLUMNS,
};
use crate::database::DialerDatabase;
use crate::error::{DialerError, Result};
use crate::queue::QueueType;

use super::consistency::{self, ConsistencyReport};
use super::{MigrationPhase, MigrationState, StoragePlan};

/// What a phase transition did (or would do, for a dry run)
#[derive(Debug, Clone, Serialize)]
pub struct TransitionReport {
    /// Phase the transition started from
    pub from: MigrationPhase,
    /// Phase the transition targets
    pub to: MigrationPhase,
    /// Whether this was a dry run
    pub dry_run: bool,
    /// Whether the phase change was persisted
    pub applied: bool,
    /// Whether the consistency gate (where one applies) passed
    pub gate_passed: bool,
    /// Rows copied between storage shapes (backfill or rollback re-derive)
    pub rows_copied: u64,
    /// Legacy rows deleted on decommission
    pub legacy_rows_cleared: u64,
    /// The consistency report backing the verdict, when one was run
    pub consistency: Option<ConsistencyReport>,
}

impl TransitionReport {
    fn new(from: MigrationPhase, to: MigrationPhase, dry_run: bool) -> Self {
        Self {
            from,
            to,
            dry_run,
            applied: false,
            gate_passed: true,
            rows_copied: 0,
            legacy_rows_cleared: 0,
            consistency: None,
        }
    }

    /// Whether the transition (or its dry run) should count as a success
    pub fn succeeded(&self) -> bool {
        self.gate_passed && (self.applied || self.dry_run)
    }
}

impl std::fmt::Display for TransitionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Transition {} -> {}{}",
            self.from,
            self.to,
            if self.dry_run { " (dry run)" } else { "" }
        )?;
        writeln!(f, "  rows copied:     {}", self.rows_copied)?;
        if self.to == MigrationPhase::LegacyDecommissioned {
            writeln!(f, "  legacy cleared:  {}", self.legacy_rows_cleared)?;
        }
        if let Some(check) = &self.consistency {
            writeln!(f, "  consistency:")?;
            for line in check.to_string().lines() {
                writeln!(f, "    {line}")?;
            }
        }
        let applied = if self.applied {
            "yes"
        } else if self.dry_run {
            "no (dry run)"
        } else {
            "no (refused)"
        };
        write!(f, "  applied:         {applied}")
    }
}

/// Coordinates the phased queue storage migration
pub struct MigrationCoordinator {
    db: DialerDatabase,
    store: MigrationStateStore,
    config: MigrationConfig,
    phase: RwLock<MigrationPhase>,
    transitions_halted: AtomicBool,
}

impl MigrationCoordinator {
    /// Load the persisted state and build a coordinator.
    ///
    /// A phase that cannot be parsed at all is fatal. Flags that merely
    /// disagree with the phase halt transitions but keep operations running
    /// on the stored phase.
    pub async fn new(db: DialerDatabase, config: MigrationConfig) -> Result<Arc<Self>> {
        let store = MigrationStateStore::new(db.clone());
        let state = store.load().await?;
        if state.valid {
            info!("🔄 Migration coordinator ready at phase {}", state.phase);
        } else {
            warn!(
                "🛑 Migration flags corrupted for phase {}; transitions halted, operations continue",
                state.phase
            );
        }
        Ok(Arc::new(Self {
            db,
            store,
            config,
            phase: RwLock::new(state.phase),
            transitions_halted: AtomicBool::new(!state.valid),
        }))
    }

    /// The cached current phase
    pub fn current_phase(&self) -> MigrationPhase {
        *self.phase.read()
    }

    /// Snapshot the storage plan for one queue operation
    pub fn storage_plan(&self) -> StoragePlan {
        StoragePlan::for_phase(self.current_phase())
    }

    /// Whether transitions are currently refused because of corrupt state
    pub fn transitions_halted(&self) -> bool {
        self.transitions_halted.load(Ordering::SeqCst)
    }

    /// Fresh read of the persisted state, refreshing the cache when sane
    pub async fn status(&self) -> Result<MigrationState> {
        let state = self.store.load().await?;
        if state.valid {
            *self.phase.write() = state.phase;
            self.transitions_halted.store(false, Ordering::SeqCst);
        } else {
            self.transitions_halted.store(true, Ordering::SeqCst);
            warn!(
                "🛑 Migration flags disagree with phase {}; transitions halted",
                state.phase
            );
        }
        Ok(state)
    }

    /// Run the consistency check with the configured tolerance
    pub async fn check_consistency(&self) -> Result<ConsistencyReport> {
        consistency::compare_queue_content(
            &self.db,
            self.config.consistency_tolerance,
            self.config.consistency_sample_limit,
        )
        .await
    }

    /// Advance the migration one phase forward.
    ///
    /// Entering `dual_write` backfills open legacy entries into the
    /// specialized tables in the same transaction that flips the phase.
    /// Entering `dual_read_prefer_new` or `new_only` is gated on the
    /// consistency check and refused with a consistency error on failure.
    /// Entering `legacy_decommissioned` clears the legacy table. A dry run
    /// reports the same work without committing anything.
    pub async fn advance(&self, dry_run: bool, note: Option<&str>) -> Result<TransitionReport> {
        let state = self.ensure_sane_state().await?;
        let from = state.phase;
        let to = from.next().ok_or_else(|| {
            DialerError::validation(format!("phase {from} is terminal; nothing to advance to"))
        })?;
        let mut report = TransitionReport::new(from, to, dry_run);

        match to {
            MigrationPhase::DualWrite => {
                report.rows_copied = self.count_open_legacy().await?;
                if !dry_run {
                    report.rows_copied = self.apply_dual_write_entry(note).await?;
                }
            }
            MigrationPhase::DualReadPreferNew | MigrationPhase::NewOnly => {
                let check = self.check_consistency().await?;
                report.gate_passed = check.passed();
                let summary = check.summary();
                report.consistency = Some(check);
                if !report.gate_passed {
                    if dry_run {
                        info!("👀 Dry run: advance {} -> {} would be refused ({})", from, to, summary);
                        return Ok(report);
                    }
                    error!("🛑 Refusing advance {} -> {}: {}", from, to, summary);
                    return Err(DialerError::consistency(format!(
                        "cannot advance {from} -> {to}: {summary}"
                    )));
                }
                if !dry_run {
                    self.store.save(to, note).await?;
                }
            }
            MigrationPhase::LegacyDecommissioned => {
                report.legacy_rows_cleared = self.count_all_legacy().await?;
                if !dry_run {
                    report.legacy_rows_cleared = self.apply_decommission(note).await?;
                }
            }
            MigrationPhase::PreMigration => {
                return Err(DialerError::internal("advance cannot target pre_migration"));
            }
        }

        if dry_run {
            info!("👀 Dry run: advance {} -> {} would succeed", from, to);
        } else {
            *self.phase.write() = to;
            report.applied = true;
            info!("✅ Migration advanced: {} -> {}", from, to);
        }
        Ok(report)
    }

    /// Roll the migration back to `pre_migration`.
    ///
    /// Legacy queue content is re-derived from the specialized tables first
    /// (copy-by-id, terminal states included, so post-freeze changes land
    /// too). The phase only flips after the consistency check verifies the
    /// backfill; otherwise the phase stays put and a consistency error is
    /// returned.
    pub async fn rollback_to_pre_migration(
        &self,
        dry_run: bool,
        note: Option<&str>,
    ) -> Result<TransitionReport> {
        let state = self.ensure_sane_state().await?;
        let from = state.phase;
        if from == MigrationPhase::PreMigration {
            return Err(DialerError::validation("already at pre_migration; nothing to roll back"));
        }
        let mut report = TransitionReport::new(from, MigrationPhase::PreMigration, dry_run);
        report.rows_copied = self.count_all_new().await?;

        if dry_run {
            report.consistency = Some(self.check_consistency().await?);
            info!(
                "👀 Dry run: rollback {} -> pre_migration would re-derive {} rows",
                from, report.rows_copied
            );
            return Ok(report);
        }

        warn!("🔄 Rolling back migration: {} -> pre_migration", from);
        report.rows_copied = self.backfill_legacy_from_new().await?;

        let check = self.check_consistency().await?;
        report.gate_passed = check.passed();
        let summary = check.summary();
        report.consistency = Some(check);
        if !report.gate_passed {
            error!("🛑 Rollback verification failed, phase left at {}: {}", from, summary);
            return Err(DialerError::consistency(format!(
                "rollback backfill could not be verified, phase unchanged: {summary}"
            )));
        }

        self.store.save(MigrationPhase::PreMigration, note).await?;
        *self.phase.write() = MigrationPhase::PreMigration;
        report.applied = true;
        warn!(
            "🔄 Rollback complete: {} -> pre_migration ({} rows re-derived)",
            from, report.rows_copied
        );
        Ok(report)
    }

    // ========== transition internals ==========

    /// Fresh state load that refuses to transition on corrupt flags
    async fn ensure_sane_state(&self) -> Result<MigrationState> {
        let state = self.store.load().await?;
        if !state.valid {
            self.transitions_halted.store(true, Ordering::SeqCst);
            return Err(DialerError::fatal(format!(
                "stored flags disagree with phase {}; fix migration_state before transitioning",
                state.phase
            )));
        }
        self.transitions_halted.store(false, Ordering::SeqCst);
        *self.phase.write() = state.phase;
        Ok(state)
    }

    /// Copy open legacy entries into the specialized tables and flip the
    /// phase, atomically
    async fn apply_dual_write_entry(&self, note: Option<&str>) -> Result<u64> {
        let now = chrono::Utc::now();
        let mut conn = self.db.begin_immediate().await?;
        let result: Result<u64> = async {
            let mut copied = 0u64;
            for qt in QueueType::all() {
                let target = queue_table_for(qt);
                let res = sqlx::query(&format!(
                    "INSERT OR REPLACE INTO {target} ({QUEUE_ENTRY_COLUMNS})
                     SELECT {QUEUE_ENTRY_COLUMNS} FROM {LEGACY_QUEUE_TABLE}
                     WHERE queue_type = ?1 AND status IN ({OPEN_STATUSES_SQL})"
                ))
                .bind(qt.as_str())
                .execute(&mut *conn)
                .await?;
                copied += res.rows_affected();
            }
            MigrationStateStore::save_in_tx(&mut conn, MigrationPhase::DualWrite, note, now).await?;
            Ok(copied)
        }
        .await;
        match result {
            Ok(copied) => {
                DialerDatabase::commit(&mut conn).await?;
                info!("📋 Backfilled {} open entries into specialized queues", copied);
                Ok(copied)
            }
            Err(e) => {
                DialerDatabase::rollback(&mut conn).await;
                Err(e)
            }
        }
    }

    /// Clear legacy content and flip the phase, atomically
    async fn apply_decommission(&self, note: Option<&str>) -> Result<u64> {
        let now = chrono::Utc::now();
        let mut conn = self.db.begin_immediate().await?;
        let result: Result<u64> = async {
            let res = sqlx::query(&format!("DELETE FROM {LEGACY_QUEUE_TABLE}"))
                .execute(&mut *conn)
                .await?;
            MigrationStateStore::save_in_tx(&mut conn, MigrationPhase::LegacyDecommissioned, note, now)
                .await?;
            Ok(res.rows_affected())
        }
        .await;
        match result {
            Ok(cleared) => {
                DialerDatabase::commit(&mut conn).await?;
                info!("🗄️ Legacy queue decommissioned, {} rows cleared", cleared);
                Ok(cleared)
            }
            Err(e) => {
                DialerDatabase::rollback(&mut conn).await;
                Err(e)
            }
        }
    }

    /// Copy every specialized row back into legacy, by id
    async fn backfill_legacy_from_new(&self) -> Result<u64> {
        let mut conn = self.db.begin_immediate().await?;
        let result: Result<u64> = async {
            let mut copied = 0u64;
            for table in NEW_QUEUE_TABLES {
                let res = sqlx::query(&format!(
                    "INSERT OR REPLACE INTO {LEGACY_QUEUE_TABLE} ({QUEUE_ENTRY_COLUMNS})
                     SELECT {QUEUE_ENTRY_COLUMNS} FROM {table}"
                ))
                .execute(&mut *conn)
                .await?;
                copied += res.rows_affected();
            }
            Ok(copied)
        }
        .await;
        match result {
            Ok(copied) => {
                DialerDatabase::commit(&mut conn).await?;
                Ok(copied)
            }
            Err(e) => {
                DialerDatabase::rollback(&mut conn).await;
                Err(e)
            }
        }
    }

    async fn count_open_legacy(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {LEGACY_QUEUE_TABLE} WHERE status IN ({OPEN_STATUSES_SQL})"
        ))
        .fetch_one(self.db.pool())
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn count_all_legacy(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {LEGACY_QUEUE_TABLE}"))
            .fetch_one(self.db.pool())
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn count_all_new(&self) -> Result<u64> {
        let mut total = 0u64;
        for table in NEW_QUEUE_TABLES {
            let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(self.db.pool())
                .await?;
            total += count.max(0) as u64;
        }
        Ok(total)
    }
}
