//! Queue entry persistence across both storage shapes
//!
//! This store is where the migration phases become concrete. Every operation
//! snapshots one [`StoragePlan`] from the migration coordinator up front and
//! follows it for the whole call:
//!
//! - writes land in the legacy table, the specialized tables, or both,
//!   mirrored by entry id inside a single immediate transaction
//! - reads go to the side the plan prefers; point lookups may fall back to
//!   legacy during `dual_read_prefer_new`, logging the drift they heal around
//!
//! The one-open-entry-per-user rule is enforced here: the open-entry search
//! inside the write transaction covers every table the plan keeps live, and
//! the per-table partial unique index backstops races.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::Sqlite;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{DialerError, Result};
use crate::migration::{MigrationCoordinator, StoragePlan};
use crate::queue::{EntryStatus, QueueEntry, QueueType, QueueTypeStats};
use crate::scoring::{SCORE_CEILING, SCORE_FLOOR};

use super::schema::{
    queue_table_for, LEGACY_QUEUE_TABLE, NEW_QUEUE_TABLES, OPEN_STATUSES_SQL, QUEUE_ENTRY_COLUMNS,
};
use super::DialerDatabase;

#[derive(Debug, Clone, sqlx::FromRow)]
struct EntryRow {
    id: String,
    user_id: String,
    claim_id: String,
    queue_type: String,
    priority_score: i64,
    status: String,
    queue_reason: String,
    assigned_agent_id: Option<String>,
    assigned_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EntryRow> for QueueEntry {
    type Error = DialerError;

    fn try_from(row: EntryRow) -> Result<Self> {
        Ok(QueueEntry {
            queue_type: QueueType::parse(&row.queue_type)?,
            status: EntryStatus::parse(&row.status)?,
            id: row.id,
            user_id: row.user_id,
            claim_id: row.claim_id,
            priority_score: row.priority_score,
            queue_reason: row.queue_reason,
            assigned_agent_id: row.assigned_agent_id,
            assigned_at: row.assigned_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// How a lifecycle transition treats the agent binding
#[derive(Debug, Clone, Copy)]
enum AgentEffect {
    /// Record the acting agent and start the lease clock
    Bind,
    /// Leave the binding as recorded
    Keep,
    /// Drop the binding and the lease
    Clear,
}

/// One row in the entry lifecycle table
#[derive(Debug, Clone, Copy)]
struct Transition {
    verb: &'static str,
    expect: EntryStatus,
    to: EntryStatus,
    requires_holder: bool,
    agent: AgentEffect,
}

const CLAIM: Transition = Transition {
    verb: "claim",
    expect: EntryStatus::Pending,
    to: EntryStatus::Assigned,
    requires_holder: false,
    agent: AgentEffect::Bind,
};

const START: Transition = Transition {
    verb: "start",
    expect: EntryStatus::Assigned,
    to: EntryStatus::InProgress,
    requires_holder: true,
    agent: AgentEffect::Keep,
};

const COMPLETE: Transition = Transition {
    verb: "complete",
    expect: EntryStatus::InProgress,
    to: EntryStatus::Completed,
    requires_holder: true,
    agent: AgentEffect::Keep,
};

const RELEASE: Transition = Transition {
    verb: "release",
    expect: EntryStatus::Assigned,
    to: EntryStatus::Pending,
    requires_holder: true,
    agent: AgentEffect::Clear,
};

/// Store for queue entries, aware of the storage migration
#[derive(Clone)]
pub struct QueueStore {
    db: DialerDatabase,
    migration: Arc<MigrationCoordinator>,
}

impl QueueStore {
    /// Create a queue store over a database handle and migration coordinator
    pub fn new(db: DialerDatabase, migration: Arc<MigrationCoordinator>) -> Self {
        Self { db, migration }
    }

    /// Create or refresh a user's queue membership.
    ///
    /// A user with an open entry gets that entry updated in place, keeping its
    /// id and creation time even when the queue type changes. Otherwise a new
    /// pending entry is created. Either way the user ends up with exactly one
    /// open entry.
    pub async fn upsert_entry(
        &self,
        user_id: &str,
        claim_id: &str,
        queue_type: QueueType,
        priority_score: i64,
        queue_reason: &str,
    ) -> Result<QueueEntry> {
        if user_id.trim().is_empty() {
            return Err(DialerError::validation("user_id cannot be empty"));
        }
        if claim_id.trim().is_empty() {
            return Err(DialerError::validation("claim_id cannot be empty"));
        }
        if !(SCORE_FLOOR..=SCORE_CEILING).contains(&priority_score) {
            return Err(DialerError::validation(format!(
                "priority score {priority_score} outside [{SCORE_FLOOR}, {SCORE_CEILING}]"
            )));
        }

        let plan = self.migration.storage_plan();
        let now = Utc::now();
        let mut conn = self.db.begin_immediate().await?;
        let result =
            Self::upsert_in_tx(&mut conn, &plan, user_id, claim_id, queue_type, priority_score, queue_reason, now)
                .await;
        match result {
            Ok(entry) => {
                DialerDatabase::commit(&mut conn).await?;
                debug!(
                    "📋 Queue entry {} for user {} upserted into {} at score {}",
                    entry.id, entry.user_id, entry.queue_type, entry.priority_score
                );
                Ok(entry)
            }
            Err(e) => {
                DialerDatabase::rollback(&mut conn).await;
                Err(e)
            }
        }
    }

    /// Pending entries of one queue, highest score first, oldest first on ties
    pub async fn list_pending(&self, queue_type: QueueType, limit: u32) -> Result<Vec<QueueEntry>> {
        let plan = self.migration.storage_plan();
        let table = if plan.read_new_first {
            queue_table_for(queue_type)
        } else {
            LEGACY_QUEUE_TABLE
        };
        let rows = sqlx::query_as::<_, EntryRow>(&format!(
            "SELECT {QUEUE_ENTRY_COLUMNS} FROM {table}
             WHERE status = 'pending' AND queue_type = ?1
             ORDER BY priority_score DESC, created_at ASC, user_id ASC
             LIMIT ?2"
        ))
        .bind(queue_type.as_str())
        .bind(limit as i64)
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(QueueEntry::try_from).collect()
    }

    /// The user's open entry, if any, from the read-preferred side
    pub async fn find_open_entry(&self, user_id: &str) -> Result<Option<QueueEntry>> {
        let plan = self.migration.storage_plan();
        for table in Self::read_tables(&plan) {
            let row = sqlx::query_as::<_, EntryRow>(&format!(
                "SELECT {QUEUE_ENTRY_COLUMNS} FROM {table}
                 WHERE user_id = ?1 AND status IN ({OPEN_STATUSES_SQL})"
            ))
            .bind(user_id)
            .fetch_optional(self.db.pool())
            .await?;
            if let Some(row) = row {
                if plan.read_new_first && table == LEGACY_QUEUE_TABLE {
                    warn!(
                        "⚠️ Open entry for user {} served from legacy fallback during {}",
                        user_id, plan.phase
                    );
                }
                return Ok(Some(row.try_into()?));
            }
        }
        Ok(None)
    }

    /// Fetch one entry by id from the read-preferred side
    pub async fn get_entry(&self, entry_id: &str) -> Result<Option<QueueEntry>> {
        let plan = self.migration.storage_plan();
        for table in Self::read_tables(&plan) {
            let row = sqlx::query_as::<_, EntryRow>(&format!(
                "SELECT {QUEUE_ENTRY_COLUMNS} FROM {table} WHERE id = ?1"
            ))
            .bind(entry_id)
            .fetch_optional(self.db.pool())
            .await?;
            if let Some(row) = row {
                if plan.read_new_first && table == LEGACY_QUEUE_TABLE {
                    warn!(
                        "⚠️ Entry {} served from legacy fallback during {}",
                        entry_id, plan.phase
                    );
                }
                return Ok(Some(row.try_into()?));
            }
        }
        Ok(None)
    }

    /// Claim a pending entry for an agent, starting its lease
    pub async fn claim_entry(&self, entry_id: &str, agent_id: &str) -> Result<QueueEntry> {
        self.transition(entry_id, agent_id, CLAIM).await
    }

    /// Mark a claimed entry as having its call in progress
    pub async fn start_entry(&self, entry_id: &str, agent_id: &str) -> Result<QueueEntry> {
        self.transition(entry_id, agent_id, START).await
    }

    /// Mark an in-progress entry completed
    pub async fn complete_entry(&self, entry_id: &str, agent_id: &str) -> Result<QueueEntry> {
        self.transition(entry_id, agent_id, COMPLETE).await
    }

    /// Hand a claimed entry back to the queue untouched
    pub async fn release_entry(&self, entry_id: &str, agent_id: &str) -> Result<QueueEntry> {
        self.transition(entry_id, agent_id, RELEASE).await
    }

    /// Withdraw a user's open entry from the queue
    pub async fn remove_entry(&self, user_id: &str, reason: &str) -> Result<QueueEntry> {
        let plan = self.migration.storage_plan();
        let now = Utc::now();
        let mut conn = self.db.begin_immediate().await?;
        let result = Self::remove_in_tx(&mut conn, &plan, user_id, reason, now).await;
        match result {
            Ok(entry) => {
                DialerDatabase::commit(&mut conn).await?;
                debug!("🗑️ Queue entry {} for user {} removed: {}", entry.id, user_id, reason);
                Ok(entry)
            }
            Err(e) => {
                DialerDatabase::rollback(&mut conn).await;
                Err(e)
            }
        }
    }

    /// Return entries whose claim lease started before `cutoff` to pending.
    ///
    /// Applies to `assigned` entries only; an in-progress call is live work
    /// and is never swept. Returns how many entries went back to pending.
    pub async fn sweep_expired_assignments(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let plan = self.migration.storage_plan();
        let now = Utc::now();
        let mut conn = self.db.begin_immediate().await?;
        let result = Self::sweep_in_tx(&mut conn, &plan, cutoff, now).await;
        match result {
            Ok(released) => {
                DialerDatabase::commit(&mut conn).await?;
                Ok(released)
            }
            Err(e) => {
                DialerDatabase::rollback(&mut conn).await;
                Err(e)
            }
        }
    }

    /// Open-entry counts per queue from the read-preferred side
    pub async fn queue_stats(&self) -> Result<Vec<QueueTypeStats>> {
        let plan = self.migration.storage_plan();
        let mut stats: Vec<QueueTypeStats> =
            QueueType::all().iter().map(|qt| QueueTypeStats::empty(*qt)).collect();

        if plan.read_new_first {
            for qt in QueueType::all() {
                let rows = sqlx::query_as::<_, (String, i64)>(&format!(
                    "SELECT status, COUNT(*) FROM {}
                     WHERE status IN ({OPEN_STATUSES_SQL})
                     GROUP BY status",
                    queue_table_for(qt)
                ))
                .fetch_all(self.db.pool())
                .await?;
                for (status, count) in rows {
                    Self::bump(&mut stats, qt, EntryStatus::parse(&status)?, count);
                }
            }
        } else {
            let rows = sqlx::query_as::<_, (String, String, i64)>(&format!(
                "SELECT queue_type, status, COUNT(*) FROM {LEGACY_QUEUE_TABLE}
                 WHERE status IN ({OPEN_STATUSES_SQL})
                 GROUP BY queue_type, status"
            ))
            .fetch_all(self.db.pool())
            .await?;
            for (queue_type, status, count) in rows {
                Self::bump(&mut stats, QueueType::parse(&queue_type)?, EntryStatus::parse(&status)?, count);
            }
        }
        Ok(stats)
    }

    // ========== plan-derived table sets ==========

    /// Tables reads consult, preferred side first
    fn read_tables(plan: &StoragePlan) -> Vec<&'static str> {
        if plan.read_new_first {
            let mut tables: Vec<&'static str> = NEW_QUEUE_TABLES.to_vec();
            if plan.legacy_fallback() {
                tables.push(LEGACY_QUEUE_TABLE);
            }
            tables
        } else {
            vec![LEGACY_QUEUE_TABLE]
        }
    }

    /// Every table that may hold a live row under the plan, authoritative side first.
    ///
    /// Excludes frozen legacy content once the plan stops writing it: stale
    /// open rows left behind in a frozen table are not live membership.
    fn search_tables(plan: &StoragePlan) -> Vec<&'static str> {
        let mut tables: Vec<&'static str> = Vec::new();
        if plan.read_new_first {
            tables.extend(NEW_QUEUE_TABLES);
            if plan.write_legacy {
                tables.push(LEGACY_QUEUE_TABLE);
            }
        } else {
            tables.push(LEGACY_QUEUE_TABLE);
            if plan.write_new {
                tables.extend(NEW_QUEUE_TABLES);
            }
        }
        tables
    }

    // ========== transaction bodies ==========

    async fn upsert_in_tx(
        conn: &mut PoolConnection<Sqlite>,
        plan: &StoragePlan,
        user_id: &str,
        claim_id: &str,
        queue_type: QueueType,
        priority_score: i64,
        queue_reason: &str,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry> {
        let existing = Self::find_open_in_tx(conn, plan, user_id).await?;
        let entry = match existing {
            Some((found_in, mut entry)) => {
                if plan.read_new_first && found_in == LEGACY_QUEUE_TABLE {
                    warn!(
                        "⚠️ Open entry {} for user {} existed only in legacy during {}",
                        entry.id, user_id, plan.phase
                    );
                }
                entry.claim_id = claim_id.to_string();
                entry.queue_type = queue_type;
                entry.priority_score = priority_score;
                entry.queue_reason = queue_reason.to_string();
                entry.updated_at = now;
                entry
            }
            None => QueueEntry {
                id: Uuid::new_v4().to_string(),
                user_id: user_id.to_string(),
                claim_id: claim_id.to_string(),
                queue_type,
                priority_score,
                status: EntryStatus::Pending,
                queue_reason: queue_reason.to_string(),
                assigned_agent_id: None,
                assigned_at: None,
                created_at: now,
                updated_at: now,
            },
        };
        Self::persist_entry_in_tx(conn, plan, &entry).await?;
        Ok(entry)
    }

    async fn remove_in_tx(
        conn: &mut PoolConnection<Sqlite>,
        plan: &StoragePlan,
        user_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry> {
        let (_, mut entry) = Self::find_open_in_tx(conn, plan, user_id)
            .await?
            .ok_or_else(|| DialerError::not_found(format!("no open queue entry for user {user_id}")))?;
        entry.status = EntryStatus::Removed;
        entry.queue_reason = reason.to_string();
        entry.assigned_agent_id = None;
        entry.assigned_at = None;
        entry.updated_at = now;
        Self::persist_entry_in_tx(conn, plan, &entry).await?;
        Ok(entry)
    }

    async fn sweep_in_tx(
        conn: &mut PoolConnection<Sqlite>,
        plan: &StoragePlan,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut released: u64 = 0;
        for table in Self::search_tables(plan) {
            let result = sqlx::query(&format!(
                "UPDATE {table}
                 SET status = 'pending', assigned_agent_id = NULL, assigned_at = NULL, updated_at = ?1
                 WHERE status = 'assigned' AND assigned_at IS NOT NULL AND assigned_at < ?2"
            ))
            .bind(now)
            .bind(cutoff)
            .execute(&mut **conn)
            .await?;

            // Mirrored rows expire together; count only the read-preferred
            // side so each released entry counts once.
            let preferred = if plan.read_new_first {
                table != LEGACY_QUEUE_TABLE
            } else {
                table == LEGACY_QUEUE_TABLE
            };
            if preferred {
                released += result.rows_affected();
            }
        }
        Ok(released)
    }

    async fn transition(&self, entry_id: &str, agent_id: &str, op: Transition) -> Result<QueueEntry> {
        if agent_id.trim().is_empty() {
            return Err(DialerError::validation("agent_id cannot be empty"));
        }
        let plan = self.migration.storage_plan();
        let now = Utc::now();
        let mut conn = self.db.begin_immediate().await?;
        let result = Self::transition_in_tx(&mut conn, &plan, entry_id, agent_id, op, now).await;
        match result {
            Ok(entry) => {
                DialerDatabase::commit(&mut conn).await?;
                debug!(
                    "📞 Entry {} {}ed by agent {} (now {})",
                    entry.id, op.verb, agent_id, entry.status
                );
                Ok(entry)
            }
            Err(e) => {
                DialerDatabase::rollback(&mut conn).await;
                Err(e)
            }
        }
    }

    async fn transition_in_tx(
        conn: &mut PoolConnection<Sqlite>,
        plan: &StoragePlan,
        entry_id: &str,
        agent_id: &str,
        op: Transition,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry> {
        // The immediate transaction holds the write lock from BEGIN, so this
        // read cannot go stale before the writes below land.
        let (_, current) = Self::find_by_id_in_tx(conn, plan, entry_id)
            .await?
            .ok_or_else(|| DialerError::not_found(format!("queue entry {entry_id} not found")))?;

        if current.status != op.expect {
            return Err(DialerError::conflict(format!(
                "cannot {} entry {entry_id}: status is {} (expected {})",
                op.verb, current.status, op.expect
            )));
        }
        if op.requires_holder {
            match current.assigned_agent_id.as_deref() {
                Some(holder) if holder == agent_id => {}
                Some(holder) => {
                    return Err(DialerError::conflict(format!(
                        "entry {entry_id} is held by agent {holder}, not {agent_id}"
                    )));
                }
                None => {
                    return Err(DialerError::conflict(format!(
                        "entry {entry_id} has no holding agent"
                    )));
                }
            }
        }

        // A user holds at most one active claim system-wide. The open-entry
        // invariant makes a second one unreachable, but drift between storage
        // shapes could surface one, so a claim re-checks before binding.
        if matches!(op.agent, AgentEffect::Bind) {
            for table in Self::search_tables(plan) {
                let other: Option<String> = sqlx::query_scalar(&format!(
                    "SELECT id FROM {table}
                     WHERE user_id = ?1 AND id != ?2 AND status IN ('assigned', 'in_progress')"
                ))
                .bind(&current.user_id)
                .bind(entry_id)
                .fetch_optional(&mut **conn)
                .await?;
                if let Some(other) = other {
                    return Err(DialerError::conflict(format!(
                        "user {} already holds active entry {other}",
                        current.user_id
                    )));
                }
            }
        }

        let mut updated = current;
        updated.status = op.to;
        updated.updated_at = now;
        match op.agent {
            AgentEffect::Bind => {
                updated.assigned_agent_id = Some(agent_id.to_string());
                updated.assigned_at = Some(now);
            }
            AgentEffect::Clear => {
                updated.assigned_agent_id = None;
                updated.assigned_at = None;
            }
            AgentEffect::Keep => {}
        }
        Self::persist_entry_in_tx(conn, plan, &updated).await?;
        Ok(updated)
    }

    // ========== row primitives ==========

    async fn find_open_in_tx(
        conn: &mut PoolConnection<Sqlite>,
        plan: &StoragePlan,
        user_id: &str,
    ) -> Result<Option<(&'static str, QueueEntry)>> {
        for table in Self::search_tables(plan) {
            let row = sqlx::query_as::<_, EntryRow>(&format!(
                "SELECT {QUEUE_ENTRY_COLUMNS} FROM {table}
                 WHERE user_id = ?1 AND status IN ({OPEN_STATUSES_SQL})"
            ))
            .bind(user_id)
            .fetch_optional(&mut **conn)
            .await?;
            if let Some(row) = row {
                return Ok(Some((table, row.try_into()?)));
            }
        }
        Ok(None)
    }

    async fn find_by_id_in_tx(
        conn: &mut PoolConnection<Sqlite>,
        plan: &StoragePlan,
        entry_id: &str,
    ) -> Result<Option<(&'static str, QueueEntry)>> {
        for table in Self::search_tables(plan) {
            let row = sqlx::query_as::<_, EntryRow>(&format!(
                "SELECT {QUEUE_ENTRY_COLUMNS} FROM {table} WHERE id = ?1"
            ))
            .bind(entry_id)
            .fetch_optional(&mut **conn)
            .await?;
            if let Some(row) = row {
                return Ok(Some((table, row.try_into()?)));
            }
        }
        Ok(None)
    }

    /// Write the entry to every table the plan targets, mirrored by id.
    ///
    /// The specialized copy moves between tables (delete plus rewrite, same
    /// id) when the entry's queue type changed; the legacy copy is updated in
    /// place.
    async fn persist_entry_in_tx(
        conn: &mut PoolConnection<Sqlite>,
        plan: &StoragePlan,
        entry: &QueueEntry,
    ) -> Result<()> {
        if plan.write_legacy {
            Self::write_entry_row(conn, LEGACY_QUEUE_TABLE, entry).await?;
        }
        if plan.write_new {
            let target = queue_table_for(entry.queue_type);
            for table in NEW_QUEUE_TABLES {
                if table != target {
                    sqlx::query(&format!("DELETE FROM {table} WHERE id = ?1"))
                        .bind(&entry.id)
                        .execute(&mut **conn)
                        .await?;
                }
            }
            Self::write_entry_row(conn, target, entry).await?;
        }
        Ok(())
    }

    /// Update-by-id, inserting when the row does not exist yet
    async fn write_entry_row(
        conn: &mut PoolConnection<Sqlite>,
        table: &str,
        entry: &QueueEntry,
    ) -> Result<()> {
        let updated = sqlx::query(&format!(
            "UPDATE {table} SET
                user_id = ?2, claim_id = ?3, queue_type = ?4, priority_score = ?5,
                status = ?6, queue_reason = ?7, assigned_agent_id = ?8, assigned_at = ?9,
                created_at = ?10, updated_at = ?11
             WHERE id = ?1"
        ))
        .bind(&entry.id)
        .bind(&entry.user_id)
        .bind(&entry.claim_id)
        .bind(entry.queue_type.as_str())
        .bind(entry.priority_score)
        .bind(entry.status.as_str())
        .bind(&entry.queue_reason)
        .bind(&entry.assigned_agent_id)
        .bind(entry.assigned_at)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&mut **conn)
        .await?;

        if updated.rows_affected() == 0 {
            sqlx::query(&format!(
                "INSERT INTO {table} ({QUEUE_ENTRY_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ))
            .bind(&entry.id)
            .bind(&entry.user_id)
            .bind(&entry.claim_id)
            .bind(entry.queue_type.as_str())
            .bind(entry.priority_score)
            .bind(entry.status.as_str())
            .bind(&entry.queue_reason)
            .bind(&entry.assigned_agent_id)
            .bind(entry.assigned_at)
            .bind(entry.created_at)
            .bind(entry.updated_at)
            .execute(&mut **conn)
            .await?;
        }
        Ok(())
    }

    fn bump(stats: &mut [QueueTypeStats], queue_type: QueueType, status: EntryStatus, count: i64) {
        if let Some(entry) = stats.iter_mut().find(|s| s.queue_type == queue_type) {
            match status {
                EntryStatus::Pending => entry.pending += count,
                EntryStatus::Assigned => entry.assigned += count,
                EntryStatus::InProgress => entry.in_progress += count,
                EntryStatus::Completed | EntryStatus::Removed => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MigrationConfig;

    async fn store() -> QueueStore {
        let db = DialerDatabase::new_in_memory().await.unwrap();
        let migration = MigrationCoordinator::new(db.clone(), MigrationConfig::default())
            .await
            .unwrap();
        QueueStore::new(db, migration)
    }

    #[tokio::test]
    async fn upsert_keeps_one_open_entry_per_user() {
        let store = store().await;

        let first = store
            .upsert_entry("u1", "c1", QueueType::UnsignedSignature, 10, "signature outstanding")
            .await
            .unwrap();
        let second = store
            .upsert_entry("u1", "c1", QueueType::OutstandingRequirements, 14, "requirements outstanding")
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.queue_type, QueueType::OutstandingRequirements);
        assert_eq!(second.priority_score, 14);
        assert!(store
            .list_pending(QueueType::UnsignedSignature, 10)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            store.list_pending(QueueType::OutstandingRequirements, 10).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn pending_order_is_score_then_age_then_user() {
        let store = store().await;

        store.upsert_entry("u-b", "c1", QueueType::Generic, 20, "follow-up").await.unwrap();
        store.upsert_entry("u-a", "c2", QueueType::Generic, 20, "follow-up").await.unwrap();
        store.upsert_entry("u-c", "c3", QueueType::Generic, 30, "follow-up").await.unwrap();

        let pending = store.list_pending(QueueType::Generic, 10).await.unwrap();
        let users: Vec<&str> = pending.iter().map(|e| e.user_id.as_str()).collect();
        // u-c wins on score; u-b beats u-a on age (created first).
        assert_eq!(users, vec!["u-c", "u-b", "u-a"]);
    }

    #[tokio::test]
    async fn lifecycle_transitions_enforce_status_and_holder() {
        let store = store().await;
        let entry = store
            .upsert_entry("u1", "c1", QueueType::Generic, 5, "follow-up")
            .await
            .unwrap();

        let claimed = store.claim_entry(&entry.id, "agent-1").await.unwrap();
        assert_eq!(claimed.status, EntryStatus::Assigned);
        assert!(claimed.assigned_at.is_some());

        // Second claim loses.
        assert!(matches!(
            store.claim_entry(&entry.id, "agent-2").await,
            Err(DialerError::Conflict(_))
        ));
        // Only the holder may drive the entry forward.
        assert!(matches!(
            store.start_entry(&entry.id, "agent-2").await,
            Err(DialerError::Conflict(_))
        ));

        let started = store.start_entry(&entry.id, "agent-1").await.unwrap();
        assert_eq!(started.status, EntryStatus::InProgress);
        let completed = store.complete_entry(&entry.id, "agent-1").await.unwrap();
        assert_eq!(completed.status, EntryStatus::Completed);

        // Terminal entries stay terminal.
        assert!(matches!(
            store.claim_entry(&entry.id, "agent-1").await,
            Err(DialerError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn release_returns_entry_to_pending_unchanged() {
        let store = store().await;
        let entry = store
            .upsert_entry("u1", "c1", QueueType::Generic, 7, "follow-up")
            .await
            .unwrap();

        store.claim_entry(&entry.id, "agent-1").await.unwrap();
        let released = store.release_entry(&entry.id, "agent-1").await.unwrap();
        assert_eq!(released.status, EntryStatus::Pending);
        assert!(released.assigned_agent_id.is_none());
        assert!(released.assigned_at.is_none());
        assert_eq!(released.priority_score, 7);

        // Claimable again by anyone.
        let reclaimed = store.claim_entry(&entry.id, "agent-2").await.unwrap();
        assert_eq!(reclaimed.assigned_agent_id.as_deref(), Some("agent-2"));
    }

    #[tokio::test]
    async fn removed_entries_free_the_user_for_a_fresh_entry() {
        let store = store().await;
        let first = store
            .upsert_entry("u1", "c1", QueueType::Generic, 5, "follow-up")
            .await
            .unwrap();

        let removed = store.remove_entry("u1", "claim withdrawn").await.unwrap();
        assert_eq!(removed.id, first.id);
        assert_eq!(removed.status, EntryStatus::Removed);
        assert!(store.find_open_entry("u1").await.unwrap().is_none());

        let fresh = store
            .upsert_entry("u1", "c1", QueueType::Generic, 5, "follow-up")
            .await
            .unwrap();
        assert_ne!(fresh.id, first.id);
    }
}
