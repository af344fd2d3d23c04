//! Dialer engine facade
//!
//! [`DialerEngine`] wires the database, migration coordinator, queue store,
//! scoring engine, and session coordinator together behind one handle. Server
//! loops, the CLI, and tests all drive the engine through this surface.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::config::DialerConfig;
use crate::database::queue_store::QueueStore;
use crate::database::retry_store::RescoreRetryStore;
use crate::database::score_store::ScoreStore;
use crate::database::DialerDatabase;
use crate::error::{DialerError, Result};
use crate::migration::{ConsistencyReport, MigrationCoordinator, MigrationPhase, MigrationState, TransitionReport};
use crate::queue::{QueueEntry, QueueType, QueueTypeStats};
use crate::routing::UserClaimLookup;
use crate::scoring::{OutcomeEvent, ScoreRecord, ScoringEngine};
use crate::sessions::{CallSessionCoordinator, RetryDrainResult};

/// Engine-wide counters for monitoring
#[derive(Debug, Clone, Serialize)]
pub struct DialerStats {
    /// Current migration phase
    pub phase: MigrationPhase,
    /// Whether migration transitions are halted on corrupt state
    pub transitions_halted: bool,
    /// Open-entry counts per queue
    pub queues: Vec<QueueTypeStats>,
    /// Parked outcomes awaiting rescore retry
    pub rescore_backlog: i64,
}

/// The assembled dialer engine
pub struct DialerEngine {
    config: DialerConfig,
    database: DialerDatabase,
    migration: Arc<MigrationCoordinator>,
    queue_store: QueueStore,
    scoring: ScoringEngine,
    sessions: CallSessionCoordinator,
}

impl DialerEngine {
    /// Validate the configuration, open the database, and assemble the engine
    pub async fn new(config: DialerConfig, lookup: Arc<dyn UserClaimLookup>) -> Result<Arc<Self>> {
        info!("🚀 Starting dialer engine");
        config.validate().map_err(DialerError::Config)?;

        let database = DialerDatabase::connect(&config.database).await?;
        let migration = MigrationCoordinator::new(database.clone(), config.migration.clone()).await?;
        let queue_store = QueueStore::new(database.clone(), migration.clone());
        let scoring = ScoringEngine::new(ScoreStore::new(database.clone()), config.scoring.clone());
        let sessions = CallSessionCoordinator::new(
            queue_store.clone(),
            scoring.clone(),
            RescoreRetryStore::new(database.clone()),
            lookup,
            config.claims.clone(),
        );

        info!("✅ Dialer engine ready (phase: {})", migration.current_phase());
        Ok(Arc::new(Self {
            config,
            database,
            migration,
            queue_store,
            scoring,
            sessions,
        }))
    }

    // ========== intake and queue reads ==========

    /// Route a user into the right queue from their current claim state
    pub async fn enqueue_user(&self, user_id: &str, claim_id: &str) -> Result<QueueEntry> {
        self.sessions.enqueue_user(user_id, claim_id).await
    }

    /// Withdraw a user's open entry from the queue
    pub async fn remove_user(&self, user_id: &str, reason: &str) -> Result<QueueEntry> {
        self.queue_store.remove_entry(user_id, reason).await
    }

    /// Pending entries of one queue, best-first; `None` uses the configured page size
    pub async fn list_pending(&self, queue_type: QueueType, limit: Option<u32>) -> Result<Vec<QueueEntry>> {
        let limit = limit.unwrap_or(self.config.queues.default_list_limit);
        self.queue_store.list_pending(queue_type, limit).await
    }

    /// The user's open entry, if any
    pub async fn find_open_entry(&self, user_id: &str) -> Result<Option<QueueEntry>> {
        self.queue_store.find_open_entry(user_id).await
    }

    /// Fetch one entry by id
    pub async fn get_entry(&self, entry_id: &str) -> Result<Option<QueueEntry>> {
        self.queue_store.get_entry(entry_id).await
    }

    // ========== call sessions ==========

    /// Claim a pending entry for an agent
    pub async fn claim(&self, entry_id: &str, agent_id: &str) -> Result<QueueEntry> {
        self.sessions.claim(entry_id, agent_id).await
    }

    /// Start the call on a claimed entry
    pub async fn start(&self, entry_id: &str, agent_id: &str) -> Result<QueueEntry> {
        self.sessions.start(entry_id, agent_id).await
    }

    /// Complete an in-progress call and run the post-call follow-up
    pub async fn complete(&self, entry_id: &str, agent_id: &str, event: OutcomeEvent) -> Result<QueueEntry> {
        self.sessions.complete(entry_id, agent_id, event).await
    }

    /// Hand a claimed entry back to the queue untouched
    pub async fn release(&self, entry_id: &str, agent_id: &str) -> Result<QueueEntry> {
        self.sessions.release(entry_id, agent_id).await
    }

    /// Return entries with expired claim leases to pending
    pub async fn sweep_expired_claims(&self) -> Result<u64> {
        self.sessions.sweep_expired_claims().await
    }

    /// Drain due parked outcomes
    pub async fn drain_rescore_retries(&self) -> Result<RetryDrainResult> {
        self.sessions.drain_rescore_retries().await
    }

    // ========== scoring ==========

    /// Apply one call outcome to a user's score, exactly once
    pub async fn apply_outcome(&self, user_id: &str, event: &OutcomeEvent) -> Result<ScoreRecord> {
        self.scoring.apply_outcome(user_id, event).await
    }

    /// Fetch a user's score record
    pub async fn get_score(&self, user_id: &str) -> Result<Option<ScoreRecord>> {
        self.scoring.get_score(user_id).await
    }

    /// Create or reset a user's score record with an explicit base score
    pub async fn set_base_score(&self, user_id: &str, base_score: i64) -> Result<ScoreRecord> {
        self.scoring.set_base_score(user_id, base_score).await
    }

    // ========== migration ==========

    /// Fresh read of the persisted migration state
    pub async fn migration_status(&self) -> Result<MigrationState> {
        self.migration.status().await
    }

    /// Advance the migration one phase forward
    pub async fn advance_migration(&self, dry_run: bool, note: Option<&str>) -> Result<TransitionReport> {
        self.migration.advance(dry_run, note).await
    }

    /// Roll the migration back to `pre_migration`
    pub async fn rollback_migration(&self, dry_run: bool, note: Option<&str>) -> Result<TransitionReport> {
        self.migration.rollback_to_pre_migration(dry_run, note).await
    }

    /// Run the consistency check between storage shapes
    pub async fn check_consistency(&self) -> Result<ConsistencyReport> {
        self.migration.check_consistency().await
    }

    // ========== monitoring ==========

    /// Engine-wide counters
    pub async fn stats(&self) -> Result<DialerStats> {
        Ok(DialerStats {
            phase: self.migration.current_phase(),
            transitions_halted: self.migration.transitions_halted(),
            queues: self.queue_store.queue_stats().await?,
            rescore_backlog: self.sessions.retry_backlog().await?,
        })
    }

    /// The engine configuration
    pub fn config(&self) -> &DialerConfig {
        &self.config
    }

    /// The underlying database handle
    pub fn database(&self) -> &DialerDatabase {
        &self.database
    }

    /// Close the database pool
    pub async fn close(&self) {
        self.database.close().await;
    }
}
