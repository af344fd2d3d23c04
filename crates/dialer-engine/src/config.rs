//! Configuration for the dialer engine
//!
//! All tunable behavior lives here: the scoring delta table, the time-penalty
//! curve, claim lease timeouts, and the migration consistency tolerance. The
//! defaults are production values; tests override individual fields.
//!
//! # Example
//!
//! ```rust
//! use claimdial_dialer_engine::config::DialerConfig;
//!
//! let mut config = DialerConfig::default();
//! config.database.database_path = "/var/lib/claimdial/dialer.db".to_string();
//! config.claims.claim_lease_timeout_secs = 600;
//! assert!(config.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};

use crate::scoring::{CallOutcome, SCORE_CEILING, SCORE_FLOOR};

/// Main configuration for the dialer engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DialerConfig {
    /// General engine settings
    pub general: GeneralConfig,

    /// Database settings
    pub database: DatabaseConfig,

    /// Priority scoring settings
    pub scoring: ScoringConfig,

    /// Queue listing settings
    pub queues: QueueConfig,

    /// Claim lease and rescore retry settings
    pub claims: ClaimConfig,

    /// Queue migration settings
    pub migration: MigrationConfig,
}

/// General engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// How often the server logs queue statistics (seconds)
    pub monitor_interval_secs: u64,

    /// How often expired claim leases are swept back to pending (seconds)
    pub sweep_interval_secs: u64,

    /// How often the rescore retry backlog is drained (seconds)
    pub retry_drain_interval_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file (empty string selects an in-memory database)
    pub database_path: String,

    /// Maximum pooled connections (in-memory databases are forced to 1)
    pub max_connections: u32,

    /// How long a connection waits on a locked database before failing (seconds)
    pub busy_timeout_secs: u64,
}

/// Priority scoring configuration
///
/// A user's score is `base + outcome_penalty + time_penalty`, clamped to the
/// engine-wide score bounds. Higher scores are called sooner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Base score assigned when a score record is first created
    pub default_base_score: i64,

    /// Per-outcome adjustments to the outcome penalty component
    pub outcome_deltas: OutcomeDeltas,

    /// Upper bound on the accumulated outcome penalty component
    pub outcome_penalty_cap: i64,

    /// Time-based escalation settings
    pub time_penalty: TimePenaltyConfig,
}

/// Signed score deltas applied to the outcome penalty component per call outcome.
///
/// Positive values raise urgency (call again sooner), negative values lower it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutcomeDeltas {
    /// Delta when the user was reached
    pub contacted: i64,

    /// Delta when the call rang out
    pub no_answer: i64,

    /// Delta when the call hit voicemail
    pub voicemail: i64,

    /// Delta when the line was busy
    pub busy: i64,

    /// Delta when the call could not be placed
    pub failed: i64,
}

impl OutcomeDeltas {
    /// Look up the delta for a call outcome
    pub fn delta_for(&self, outcome: CallOutcome) -> i64 {
        match outcome {
            CallOutcome::Contacted => self.contacted,
            CallOutcome::NoAnswer => self.no_answer,
            CallOutcome::Voicemail => self.voicemail,
            CallOutcome::Busy => self.busy,
            CallOutcome::Failed => self.failed,
        }
    }
}

/// Time-penalty escalation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimePenaltyConfig {
    /// Points added per full day waited since the previous call attempt
    pub per_day: i64,

    /// Upper bound on the accumulated time penalty component
    pub cap: i64,
}

/// Queue listing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Default page size for pending-entry listings
    pub default_list_limit: u32,
}

/// Claim lease and rescore retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimConfig {
    /// How long an agent may hold an assigned entry before the lease expires (seconds)
    pub claim_lease_timeout_secs: u64,

    /// Maximum rescore retries processed per drain pass
    pub retry_batch_size: u32,

    /// Initial backoff before a failed rescore is retried (seconds)
    pub retry_backoff_secs: u64,

    /// Upper bound on the rescore retry backoff (seconds)
    pub retry_backoff_cap_secs: u64,
}

/// Queue migration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Maximum open-row count difference tolerated by the consistency gate.
    ///
    /// Zero demands exact agreement between the legacy queue and the
    /// specialized queues before a forward phase transition is allowed.
    pub consistency_tolerance: i64,

    /// Maximum mismatched users included in a consistency report
    pub consistency_sample_limit: u32,
}

impl DialerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.general.monitor_interval_secs == 0 {
            return Err("Monitor interval must be greater than 0".to_string());
        }
        if self.general.sweep_interval_secs == 0 {
            return Err("Sweep interval must be greater than 0".to_string());
        }
        if self.general.retry_drain_interval_secs == 0 {
            return Err("Retry drain interval must be greater than 0".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("Database pool needs at least 1 connection".to_string());
        }
        if self.scoring.default_base_score < SCORE_FLOOR || self.scoring.default_base_score > SCORE_CEILING {
            return Err(format!(
                "Default base score must be between {} and {}",
                SCORE_FLOOR, SCORE_CEILING
            ));
        }
        if self.scoring.outcome_penalty_cap < 0 {
            return Err("Outcome penalty cap cannot be negative".to_string());
        }
        if self.scoring.time_penalty.per_day < 0 {
            return Err("Time penalty per day cannot be negative".to_string());
        }
        if self.scoring.time_penalty.cap < 0 {
            return Err("Time penalty cap cannot be negative".to_string());
        }
        if self.queues.default_list_limit == 0 {
            return Err("Default list limit must be greater than 0".to_string());
        }
        if self.claims.claim_lease_timeout_secs == 0 {
            return Err("Claim lease timeout must be greater than 0".to_string());
        }
        if self.claims.retry_batch_size == 0 {
            return Err("Retry batch size must be greater than 0".to_string());
        }
        if self.claims.retry_backoff_secs == 0 {
            return Err("Retry backoff must be greater than 0".to_string());
        }
        if self.claims.retry_backoff_cap_secs < self.claims.retry_backoff_secs {
            return Err("Retry backoff cap cannot be below the initial backoff".to_string());
        }
        if self.migration.consistency_tolerance < 0 {
            return Err("Consistency tolerance cannot be negative".to_string());
        }
        if self.migration.consistency_sample_limit == 0 {
            return Err("Consistency sample limit must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            database: DatabaseConfig::default(),
            scoring: ScoringConfig::default(),
            queues: QueueConfig::default(),
            claims: ClaimConfig::default(),
            migration: MigrationConfig::default(),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            monitor_interval_secs: 60,     // 1 minute
            sweep_interval_secs: 30,       // 30 seconds
            retry_drain_interval_secs: 60, // 1 minute
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_path: String::new(), // empty = in-memory
            max_connections: 5,
            busy_timeout_secs: 5,
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            default_base_score: 0,
            outcome_deltas: OutcomeDeltas::default(),
            outcome_penalty_cap: 15,
            time_penalty: TimePenaltyConfig::default(),
        }
    }
}

impl Default for OutcomeDeltas {
    fn default() -> Self {
        Self {
            contacted: -5, // reached them, back off
            no_answer: 5,
            voicemail: 3,
            busy: 4,
            failed: 2,
        }
    }
}

impl Default for TimePenaltyConfig {
    fn default() -> Self {
        Self {
            per_day: 1,
            cap: 30,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_list_limit: 50,
        }
    }
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            claim_lease_timeout_secs: 300, // 5 minutes
            retry_batch_size: 25,
            retry_backoff_secs: 30,
            retry_backoff_cap_secs: 3600, // 1 hour
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            consistency_tolerance: 0, // exact agreement required
            consistency_sample_limit: 10,
        }
    }
}
