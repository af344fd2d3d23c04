//! Queue storage migration
//!
//! The dialer is moving queue storage from one shared legacy table to three
//! specialized per-queue tables without stopping call work. The move runs
//! through five phases; each phase fixes which side is written and which side
//! is read:
//!
//! | phase                  | writes          | reads                        |
//! |------------------------|-----------------|------------------------------|
//! | `pre_migration`        | legacy          | legacy                       |
//! | `dual_write`           | both            | legacy                       |
//! | `dual_read_prefer_new` | both            | specialized, legacy fallback |
//! | `new_only`             | specialized     | specialized                  |
//! | `legacy_decommissioned`| specialized     | specialized                  |
//!
//! Phases only ever advance one step at a time, gated by a consistency check
//! over both sides. Rollback jumps straight back to `pre_migration` after
//! re-deriving legacy content from the specialized tables.

pub mod consistency;
pub mod coordinator;

pub use consistency::ConsistencyReport;
pub use coordinator::{MigrationCoordinator, TransitionReport};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DialerError, Result};

/// Phase of the queue storage migration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    /// Legacy table only
    PreMigration,
    /// Writes mirror to both shapes, reads stay on legacy
    DualWrite,
    /// Reads prefer the specialized tables, legacy still written and consulted on misses
    DualReadPreferNew,
    /// Specialized tables only; legacy content frozen
    NewOnly,
    /// Legacy content cleared (terminal)
    LegacyDecommissioned,
}

impl MigrationPhase {
    /// Stable string form used in storage
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreMigration => "pre_migration",
            Self::DualWrite => "dual_write",
            Self::DualReadPreferNew => "dual_read_prefer_new",
            Self::NewOnly => "new_only",
            Self::LegacyDecommissioned => "legacy_decommissioned",
        }
    }

    /// Parse the stable string form.
    ///
    /// An unknown phase means the persisted state row is corrupt, so this is
    /// fatal rather than a validation problem.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pre_migration" => Ok(Self::PreMigration),
            "dual_write" => Ok(Self::DualWrite),
            "dual_read_prefer_new" => Ok(Self::DualReadPreferNew),
            "new_only" => Ok(Self::NewOnly),
            "legacy_decommissioned" => Ok(Self::LegacyDecommissioned),
            other => Err(DialerError::fatal(format!("unknown migration phase '{other}'"))),
        }
    }

    /// The next phase forward, or `None` at the terminal phase
    pub fn next(&self) -> Option<MigrationPhase> {
        match self {
            Self::PreMigration => Some(Self::DualWrite),
            Self::DualWrite => Some(Self::DualReadPreferNew),
            Self::DualReadPreferNew => Some(Self::NewOnly),
            Self::NewOnly => Some(Self::LegacyDecommissioned),
            Self::LegacyDecommissioned => None,
        }
    }

    /// Whether writes in this phase land in the legacy table
    pub fn writes_legacy(&self) -> bool {
        matches!(self, Self::PreMigration | Self::DualWrite | Self::DualReadPreferNew)
    }

    /// Whether writes in this phase land in the specialized tables
    pub fn writes_new(&self) -> bool {
        !matches!(self, Self::PreMigration)
    }

    /// Whether reads in this phase consult the specialized tables first
    pub fn reads_new_first(&self) -> bool {
        matches!(self, Self::DualReadPreferNew | Self::NewOnly | Self::LegacyDecommissioned)
    }

    /// Whether a point lookup missing on the preferred side may fall back to legacy
    pub fn legacy_fallback(&self) -> bool {
        matches!(self, Self::DualReadPreferNew)
    }
}

impl std::fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which storage shapes an operation touches, derived from the current phase.
///
/// Queue operations take one plan snapshot up front and follow it for the
/// whole operation, so a concurrent phase change never splits a single write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoragePlan {
    /// Phase the plan was derived from
    pub phase: MigrationPhase,
    /// Writes go to the legacy table
    pub write_legacy: bool,
    /// Writes go to the specialized tables
    pub write_new: bool,
    /// Reads consult the specialized tables first
    pub read_new_first: bool,
}

impl StoragePlan {
    /// Derive the plan for a phase
    pub fn for_phase(phase: MigrationPhase) -> Self {
        Self {
            phase,
            write_legacy: phase.writes_legacy(),
            write_new: phase.writes_new(),
            read_new_first: phase.reads_new_first(),
        }
    }

    /// Whether point lookups may fall back to legacy on a preferred-side miss
    pub fn legacy_fallback(&self) -> bool {
        self.phase.legacy_fallback()
    }
}

/// Persisted migration state: the phase, its routing flags, and validity.
///
/// The flags are stored alongside the phase so operators can see exactly what
/// the engine is doing; `valid` is false when the stored flags disagree with
/// the canonical flags for the stored phase, which halts transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationState {
    /// Current phase
    pub phase: MigrationPhase,
    /// Stored write-legacy flag
    pub write_legacy: bool,
    /// Stored write-new flag
    pub write_new: bool,
    /// Stored read-new-first flag
    pub read_new_first: bool,
    /// Whether the stored flags match the canonical flags for the phase
    pub valid: bool,
    /// When the state last changed
    pub updated_at: DateTime<Utc>,
    /// Operator note recorded with the last transition
    pub note: Option<String>,
}

impl MigrationState {
    /// Derive the storage plan from the stored phase
    pub fn plan(&self) -> StoragePlan {
        StoragePlan::for_phase(self.phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_advance_one_step_to_the_terminal() {
        let mut phase = MigrationPhase::PreMigration;
        let mut walked = vec![phase];
        while let Some(next) = phase.next() {
            phase = next;
            walked.push(phase);
        }
        assert_eq!(walked.len(), 5);
        assert_eq!(phase, MigrationPhase::LegacyDecommissioned);
        assert!(phase.next().is_none());
    }

    #[test]
    fn phase_round_trips_through_strings() {
        for phase in [
            MigrationPhase::PreMigration,
            MigrationPhase::DualWrite,
            MigrationPhase::DualReadPreferNew,
            MigrationPhase::NewOnly,
            MigrationPhase::LegacyDecommissioned,
        ] {
            assert_eq!(MigrationPhase::parse(phase.as_str()).unwrap(), phase);
        }
        assert!(matches!(
            MigrationPhase::parse("halfway"),
            Err(DialerError::Fatal(_))
        ));
    }

    #[test]
    fn plan_flags_match_the_phase_table() {
        let pre = StoragePlan::for_phase(MigrationPhase::PreMigration);
        assert!(pre.write_legacy && !pre.write_new && !pre.read_new_first);

        let dual = StoragePlan::for_phase(MigrationPhase::DualWrite);
        assert!(dual.write_legacy && dual.write_new && !dual.read_new_first);

        let prefer = StoragePlan::for_phase(MigrationPhase::DualReadPreferNew);
        assert!(prefer.write_legacy && prefer.write_new && prefer.read_new_first);
        assert!(prefer.legacy_fallback());

        let new_only = StoragePlan::for_phase(MigrationPhase::NewOnly);
        assert!(!new_only.write_legacy && new_only.write_new && new_only.read_new_first);
        assert!(!new_only.legacy_fallback());

        let done = StoragePlan::for_phase(MigrationPhase::LegacyDecommissioned);
        assert!(!done.write_legacy && done.write_new && done.read_new_first);
    }
}
