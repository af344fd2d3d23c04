//! Call queue types
//!
//! A queue entry represents one user who needs an outbound call about one
//! claim. Entries carry a priority score snapshot and move through a small
//! status lifecycle:
//!
//! ```text
//! pending ──claim──> assigned ──start──> in_progress ──complete──> completed
//!    ▲                  │
//!    └──release/sweep───┘                            remove ────> removed
//! ```
//!
//! `completed` and `removed` are terminal. A user may hold at most one
//! non-terminal entry across every queue at any time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DialerError, Result};

/// Which call queue an entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueType {
    /// Claims waiting on a signature
    UnsignedSignature,
    /// Claims with outstanding documentation requirements
    OutstandingRequirements,
    /// Everything else that still needs a call
    Generic,
}

impl QueueType {
    /// Stable string form used in storage and on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnsignedSignature => "unsigned_signature",
            Self::OutstandingRequirements => "outstanding_requirements",
            Self::Generic => "generic",
        }
    }

    /// Parse the stable string form
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "unsigned_signature" => Ok(Self::UnsignedSignature),
            "outstanding_requirements" => Ok(Self::OutstandingRequirements),
            "generic" => Ok(Self::Generic),
            other => Err(DialerError::validation(format!("unknown queue type '{other}'"))),
        }
    }

    /// All queue types, in routing precedence order
    pub fn all() -> [QueueType; 3] {
        [Self::UnsignedSignature, Self::OutstandingRequirements, Self::Generic]
    }
}

impl std::fmt::Display for QueueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Waiting to be claimed
    Pending,
    /// Claimed by an agent, call not yet started
    Assigned,
    /// Call in progress
    InProgress,
    /// Call finished and outcome recorded (terminal)
    Completed,
    /// Withdrawn from the queue (terminal)
    Removed,
}

impl EntryStatus {
    /// Stable string form used in storage
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Removed => "removed",
        }
    }

    /// Parse the stable string form
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "assigned" => Ok(Self::Assigned),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "removed" => Ok(Self::Removed),
            other => Err(DialerError::validation(format!("unknown entry status '{other}'"))),
        }
    }

    /// True for statuses that count as live queue membership
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Assigned | Self::InProgress)
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One user's membership in a call queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Stable entry identifier, preserved across storage shapes
    pub id: String,
    /// The user to call
    pub user_id: String,
    /// The claim the call is about
    pub claim_id: String,
    /// Which queue the entry currently belongs to
    pub queue_type: QueueType,
    /// Priority score snapshot at enqueue time (higher is sooner)
    pub priority_score: i64,
    /// Lifecycle status
    pub status: EntryStatus,
    /// Why the entry is queued (human-readable)
    pub queue_reason: String,
    /// Agent currently holding the entry, if any
    pub assigned_agent_id: Option<String>,
    /// When the current claim lease started, if any
    pub assigned_at: Option<DateTime<Utc>>,
    /// When the entry was first enqueued
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl QueueEntry {
    /// True while the entry counts as live queue membership
    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }
}

/// Per-queue entry counts for monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueTypeStats {
    /// Which queue these counts describe
    pub queue_type: QueueType,
    /// Entries waiting to be claimed
    pub pending: i64,
    /// Entries claimed but not started
    pub assigned: i64,
    /// Entries with a call in progress
    pub in_progress: i64,
}

impl QueueTypeStats {
    /// Zeroed counts for a queue
    pub fn empty(queue_type: QueueType) -> Self {
        Self {
            queue_type,
            pending: 0,
            assigned: 0,
            in_progress: 0,
        }
    }

    /// Total live entries in the queue
    pub fn open_total(&self) -> i64 {
        self.pending + self.assigned + self.in_progress
    }
}
