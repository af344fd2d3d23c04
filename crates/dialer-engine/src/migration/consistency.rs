//! Consistency checking between storage shapes
//!
//! Compares the open queue content of the legacy table against the union of
//! the specialized tables. Rows are reduced to a canonical line per user
//! (`user|claim|queue|score|status`), both sides are checksummed over the
//! user-sorted lines, and mismatching users are sampled for the report.
//!
//! Forward phase transitions gate on [`ConsistencyReport::passed`]; rollback
//! uses the same check to verify its backfill.

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::database::schema::{LEGACY_QUEUE_TABLE, NEW_QUEUE_TABLES, OPEN_STATUSES_SQL};
use crate::database::DialerDatabase;
use crate::error::Result;

/// Outcome of comparing open queue content across both storage shapes
#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyReport {
    /// Open rows in the legacy table
    pub legacy_open_rows: i64,
    /// Open rows across the specialized tables
    pub specialized_open_rows: i64,
    /// Absolute open-row count difference
    pub row_drift: i64,
    /// Users whose open entry differs between sides (full count)
    pub mismatched_users: i64,
    /// Bounded sample of mismatching user ids
    pub mismatch_sample: Vec<String>,
    /// SHA-256 over the legacy side's canonical lines
    pub legacy_checksum: String,
    /// SHA-256 over the specialized side's canonical lines
    pub specialized_checksum: String,
    /// Whether the two checksums agree
    pub checksums_match: bool,
    /// Tolerance the verdict was judged against
    pub tolerance: i64,
}

impl ConsistencyReport {
    /// Whether the drift is within tolerance
    pub fn passed(&self) -> bool {
        self.row_drift <= self.tolerance && self.mismatched_users <= self.tolerance
    }

    /// One-line verdict for logs and error messages
    pub fn summary(&self) -> String {
        format!(
            "{}: legacy {} vs specialized {} open rows (drift {}, tolerance {}), {} mismatched users, checksums {}",
            if self.passed() { "PASS" } else { "FAIL" },
            self.legacy_open_rows,
            self.specialized_open_rows,
            self.row_drift,
            self.tolerance,
            self.mismatched_users,
            if self.checksums_match { "match" } else { "differ" },
        )
    }
}

impl std::fmt::Display for ConsistencyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "legacy open rows:      {}", self.legacy_open_rows)?;
        writeln!(f, "specialized open rows: {}", self.specialized_open_rows)?;
        writeln!(f, "row drift:             {} (tolerance {})", self.row_drift, self.tolerance)?;
        writeln!(f, "mismatched users:      {}", self.mismatched_users)?;
        if !self.mismatch_sample.is_empty() {
            writeln!(f, "mismatch sample:       {}", self.mismatch_sample.join(", "))?;
        }
        writeln!(f, "legacy checksum:       {}", self.legacy_checksum)?;
        writeln!(f, "specialized checksum:  {}", self.specialized_checksum)?;
        write!(f, "verdict:               {}", if self.passed() { "PASS" } else { "FAIL" })
    }
}

/// Compare open queue content between the legacy table and the specialized tables
pub async fn compare_queue_content(
    db: &DialerDatabase,
    tolerance: i64,
    sample_limit: u32,
) -> Result<ConsistencyReport> {
    let legacy = side_content(db, &[LEGACY_QUEUE_TABLE]).await?;
    let specialized = side_content(db, &NEW_QUEUE_TABLES).await?;

    let mut mismatched: Vec<String> = Vec::new();
    for (user, line) in &legacy {
        if specialized.get(user) != Some(line) {
            mismatched.push(user.clone());
        }
    }
    for user in specialized.keys() {
        if !legacy.contains_key(user) {
            mismatched.push(user.clone());
        }
    }
    mismatched.sort();
    mismatched.dedup();

    let legacy_checksum = checksum(&legacy);
    let specialized_checksum = checksum(&specialized);
    let mismatched_users = mismatched.len() as i64;
    mismatched.truncate(sample_limit as usize);

    Ok(ConsistencyReport {
        legacy_open_rows: legacy.len() as i64,
        specialized_open_rows: specialized.len() as i64,
        row_drift: (legacy.len() as i64 - specialized.len() as i64).abs(),
        mismatched_users,
        mismatch_sample: mismatched,
        checksums_match: legacy_checksum == specialized_checksum,
        legacy_checksum,
        specialized_checksum,
        tolerance,
    })
}

/// Canonical open-row line per user for one side
async fn side_content(db: &DialerDatabase, tables: &[&str]) -> Result<BTreeMap<String, String>> {
    let mut content = BTreeMap::new();
    for table in tables {
        let rows = sqlx::query_as::<_, (String, String, String, i64, String)>(&format!(
            "SELECT user_id, claim_id, queue_type, priority_score, status
             FROM {table} WHERE status IN ({OPEN_STATUSES_SQL})"
        ))
        .fetch_all(db.pool())
        .await?;
        for (user_id, claim_id, queue_type, score, status) in rows {
            let line = format!("{user_id}|{claim_id}|{queue_type}|{score}|{status}");
            content.insert(user_id, line);
        }
    }
    Ok(content)
}

fn checksum(content: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for line in content.values() {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    async fn insert_open_row(db: &DialerDatabase, table: &str, user: &str, score: i64) {
        let now = Utc::now();
        sqlx::query(&format!(
            "INSERT INTO {table} (id, user_id, claim_id, queue_type, priority_score, status, queue_reason, created_at, updated_at)
             VALUES (?1, ?2, 'c1', 'generic', ?3, 'pending', 'follow-up', ?4, ?4)"
        ))
        .bind(format!("id-{table}-{user}"))
        .bind(user)
        .bind(score)
        .bind(now)
        .execute(db.pool())
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn identical_sides_pass_with_matching_checksums() {
        let db = DialerDatabase::new_in_memory().await.unwrap();
        insert_open_row(&db, "legacy_queue", "u1", 10).await;
        insert_open_row(&db, "generic_queue", "u1", 10).await;

        let report = compare_queue_content(&db, 0, 5).await.unwrap();
        assert!(report.passed());
        assert!(report.checksums_match);
        assert_eq!(report.row_drift, 0);
        assert_eq!(report.mismatched_users, 0);
    }

    #[tokio::test]
    async fn missing_specialized_row_fails_and_names_the_user() {
        let db = DialerDatabase::new_in_memory().await.unwrap();
        insert_open_row(&db, "legacy_queue", "u1", 10).await;
        insert_open_row(&db, "legacy_queue", "u2", 20).await;
        insert_open_row(&db, "generic_queue", "u1", 10).await;

        let report = compare_queue_content(&db, 0, 5).await.unwrap();
        assert!(!report.passed());
        assert_eq!(report.row_drift, 1);
        assert_eq!(report.mismatch_sample, vec!["u2".to_string()]);
        assert!(!report.checksums_match);
    }

    #[tokio::test]
    async fn same_counts_with_different_content_still_fail() {
        let db = DialerDatabase::new_in_memory().await.unwrap();
        insert_open_row(&db, "legacy_queue", "u1", 10).await;
        insert_open_row(&db, "generic_queue", "u1", 99).await;

        let report = compare_queue_content(&db, 0, 5).await.unwrap();
        assert_eq!(report.row_drift, 0);
        assert_eq!(report.mismatched_users, 1);
        assert!(!report.passed());
    }

    #[tokio::test]
    async fn tolerance_permits_bounded_drift() {
        let db = DialerDatabase::new_in_memory().await.unwrap();
        insert_open_row(&db, "legacy_queue", "u1", 10).await;
        insert_open_row(&db, "legacy_queue", "u2", 20).await;
        insert_open_row(&db, "generic_queue", "u1", 10).await;

        let report = compare_queue_content(&db, 1, 5).await.unwrap();
        assert!(report.passed());
        assert!(!report.checksums_match);
    }
}
