//! # Claimdial Dialer Engine
//!
//! This crate provides outbound call queue orchestration for claim follow-up
//! work. It decides who to call next: users are routed into typed call queues
//! from the state of their claims, ordered by a priority score that reacts to
//! call outcomes and waiting time, and handed to agents under short-lived
//! claim leases.
//!
//! ## Features
//!
//! - **Call Queuing**: Typed queues with one live entry per user across all queues
//! - **Priority Scoring**: Outcome- and time-driven scores with exactly-once outcome application
//! - **Queue Routing**: Claim-state routing with fixed precedence between queues
//! - **Call Sessions**: Claim/start/complete/release lifecycle with lease expiry sweeps
//! - **Rescore Retries**: Parked post-call follow-ups replayed in per-user order
//! - **Storage Migration**: Phased, reversible move from one queue table to per-queue tables
//! - **Database Integration**: Persistent storage with SQLite via sqlx
//!
//! ## Architecture
//!
//! The dialer is organized into several key modules:
//!
//! - [`queue`]: Queue entry types and lifecycle
//! - [`scoring`]: Priority score records and the outcome scoring engine
//! - [`routing`]: Claim-state routing and the claim lookup seam
//! - [`sessions`]: Agent call session coordination
//! - [`migration`]: Queue storage migration phases and coordinator
//! - [`engine`]: The assembled engine facade
//! - [`server`]: Long-running server with background maintenance tasks
//! - [`database`]: Persistent storage with SQLite
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use claimdial_dialer_engine::prelude::*;
//! use claimdial_dialer_engine::routing::ClaimContext;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Describe where users stand on their claims
//!     let lookup = Arc::new(StaticClaimLookup::new());
//!     lookup.set(ClaimContext {
//!         user_id: "user-1001".to_string(),
//!         claim_id: "claim-77".to_string(),
//!         signature_outstanding: true,
//!         requirements_outstanding: false,
//!         contact_outstanding: false,
//!     });
//!
//!     // Initialize the engine (empty database path = in-memory)
//!     let engine = DialerEngine::new(DialerConfig::default(), lookup).await?;
//!
//!     // Queue the user for an outbound call
//!     let entry = engine.enqueue_user("user-1001", "claim-77").await?;
//!     println!("queued into {} at score {}", entry.queue_type, entry.priority_score);
//!
//!     // Agents work the queue
//!     let entry = engine.claim(&entry.id, "agent-42").await?;
//!     let entry = engine.start(&entry.id, "agent-42").await?;
//!     let event = OutcomeEvent::new("call-0001", CallOutcome::NoAnswer, Utc::now());
//!     engine.complete(&entry.id, "agent-42", event).await?;
//!
//!     Ok(())
//! }
//! ```

// Core modules
pub mod config;
pub mod error;

// Dialer functionality modules
pub mod migration;
pub mod queue;
pub mod routing;
pub mod scoring;
pub mod sessions;

// Engine and server surfaces
pub mod engine;
pub mod server;

// Database integration
pub mod database;

// Re-exports for convenience
pub use config::DialerConfig;
pub use engine::{DialerEngine, DialerStats};
pub use error::{DialerError, Result};
pub use server::{DialerServer, DialerServerBuilder};

/// Prelude module for convenient imports
pub mod prelude {
    // Core types
    pub use crate::{DialerConfig, DialerEngine, DialerError, DialerStats, Result};

    // Configuration types
    pub use crate::config::{
        ClaimConfig, DatabaseConfig, GeneralConfig, MigrationConfig, OutcomeDeltas, QueueConfig,
        ScoringConfig, TimePenaltyConfig,
    };

    // Queue types
    pub use crate::queue::{EntryStatus, QueueEntry, QueueType, QueueTypeStats};

    // Scoring types
    pub use crate::scoring::{
        CallOutcome, OutcomeEvent, ScoreRecord, ScoringEngine, SCORE_CEILING, SCORE_FLOOR,
    };

    // Routing types
    pub use crate::routing::{ClaimContext, QueueRouter, StaticClaimLookup, UserClaimLookup};

    // Session types
    pub use crate::sessions::{CallSessionCoordinator, RetryDrainResult};

    // Migration types
    pub use crate::migration::{
        ConsistencyReport, MigrationCoordinator, MigrationPhase, MigrationState, StoragePlan,
        TransitionReport,
    };

    // Database types
    pub use crate::database::{
        migration_store::MigrationStateStore,
        queue_store::QueueStore,
        retry_store::{PendingRescore, RescoreRetryStore},
        score_store::ScoreStore,
        DialerDatabase,
    };

    // Server types
    pub use crate::server::{DialerServer, DialerServerBuilder};

    // Common external types
    pub use chrono::{DateTime, Utc};
    pub use uuid::Uuid;
}
