//! # Dialer Server Manager
//!
//! This module provides a high-level server management interface for outbound
//! dialing operations, handling the complete lifecycle of the dialer engine,
//! background queue maintenance, and monitoring. It offers a production-ready
//! server implementation with graceful startup/shutdown and integrated
//! periodic processing.
//!
//! ## Overview
//!
//! The Dialer Server Manager is the primary entry point for deploying the
//! dialer as a long-running process. It owns the [`DialerEngine`] and keeps
//! three background tasks alive around it: a claim lease sweeper that returns
//! abandoned entries to pending, a rescore retry drainer that replays parked
//! call outcomes, and a monitor that logs queue depths and the current storage
//! phase. Operational tooling that only needs one-shot commands should use
//! [`DialerEngine`] directly instead.
//!
//! ## Server Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │             DialerServer                │
//! ├─────────────────────────────────────────┤
//! │  Sweeper │ Retry Drainer │ Monitor      │
//! ├─────────────────────────────────────────┤
//! │             DialerEngine                │
//! ├─────────────────────────────────────────┤
//! │   Queues │ Scoring │ Migration │ SQLite │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Examples
//!
//! ### Basic Server Setup and Operation
//!
//! ```rust
//! use std::sync::Arc;
//! use claimdial_dialer_engine::{
//!     server::{DialerServer, DialerServerBuilder},
//!     config::DialerConfig,
//!     routing::StaticClaimLookup,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Create server configuration
//! let config = DialerConfig::default();
//!
//! // Build and start the server
//! let mut server = DialerServerBuilder::new()
//!     .with_config(config)
//!     .with_in_memory_database()
//!     .with_claim_lookup(Arc::new(StaticClaimLookup::new()))
//!     .build()
//!     .await?;
//!
//! // Start server operations
//! server.start().await?;
//!
//! println!("✅ Dialer server started successfully");
//! println!("📞 Ready to queue and distribute outbound calls");
//!
//! // In production, you would call server.run().await to keep it running
//!
//! // Graceful shutdown when needed
//! server.stop().await?;
//! println!("🛑 Server stopped gracefully");
//! # Ok(())
//! # }
//! ```
//!
//! ### Production Server Setup
//!
//! ```rust
//! use std::sync::Arc;
//! use claimdial_dialer_engine::{
//!     server::DialerServerBuilder,
//!     config::{DialerConfig, DatabaseConfig, GeneralConfig},
//!     routing::StaticClaimLookup,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Production configuration
//! let config = DialerConfig {
//!     general: GeneralConfig {
//!         sweep_interval_secs: 15,
//!         ..Default::default()
//!     },
//!     database: DatabaseConfig {
//!         database_path: "/var/lib/claimdial/dialer.db".to_string(),
//!         ..Default::default()
//!     },
//!     ..Default::default()
//! };
//!
//! let mut server = DialerServerBuilder::new()
//!     .with_config(config)
//!     .with_database_path("/var/lib/claimdial/dialer.db".to_string())
//!     .with_claim_lookup(Arc::new(StaticClaimLookup::new()))
//!     .build()
//!     .await?;
//!
//! server.start().await?;
//! println!("🚀 Production server started");
//!
//! // In production, this would run indefinitely
//! // server.run().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};
use tracing::{error, info};

use crate::config::DialerConfig;
use crate::engine::DialerEngine;
use crate::error::{DialerError, Result};
use crate::routing::UserClaimLookup;

/// A complete dialer server that manages engine lifecycle and background tasks
pub struct DialerServer {
    /// The core dialer engine
    engine: Arc<DialerEngine>,

    /// Server configuration
    config: DialerConfig,

    /// Optional handle to the claim lease sweeper task
    sweep_handle: Option<JoinHandle<()>>,

    /// Optional handle to the rescore retry drainer task
    retry_handle: Option<JoinHandle<()>>,

    /// Optional handle to the monitoring task
    monitor_handle: Option<JoinHandle<()>>,
}

impl DialerServer {
    /// Create a new DialerServer with the given configuration and claim lookup
    pub async fn new(config: DialerConfig, lookup: Arc<dyn UserClaimLookup>) -> Result<Self> {
        info!("🚀 Creating dialer engine for server operation");

        let engine = DialerEngine::new(config.clone(), lookup).await?;
        info!("✅ Dialer engine initialized");

        Ok(Self {
            engine,
            config,
            sweep_handle: None,
            retry_handle: None,
            monitor_handle: None,
        })
    }

    /// Create a new DialerServer with an in-memory database
    pub async fn new_in_memory(config: DialerConfig, lookup: Arc<dyn UserClaimLookup>) -> Result<Self> {
        let mut config = config;
        config.database.database_path = String::new();
        Self::new(config, lookup).await
    }

    /// Start the background tasks
    pub async fn start(&mut self) -> Result<()> {
        // Claim lease sweeper
        let engine = self.engine.clone();
        let sweep_secs = self.config.general.sweep_interval_secs;
        self.sweep_handle = Some(tokio::spawn(async move {
            Self::sweep_loop(engine, sweep_secs).await;
        }));
        info!("✅ Started claim lease sweeper (every {}s)", sweep_secs);

        // Rescore retry drainer
        let engine = self.engine.clone();
        let drain_secs = self.config.general.retry_drain_interval_secs;
        self.retry_handle = Some(tokio::spawn(async move {
            Self::retry_loop(engine, drain_secs).await;
        }));
        info!("✅ Started rescore retry drainer (every {}s)", drain_secs);

        // Periodic monitoring
        let engine = self.engine.clone();
        let monitor_secs = self.config.general.monitor_interval_secs;
        self.monitor_handle = Some(tokio::spawn(async move {
            Self::monitor_loop(engine, monitor_secs).await;
        }));
        info!("✅ Started queue monitor (every {}s)", monitor_secs);

        Ok(())
    }

    /// Stop the server gracefully
    pub async fn stop(&mut self) -> Result<()> {
        info!("🛑 Stopping dialer server...");

        if let Some(handle) = self.sweep_handle.take() {
            handle.abort();
            let _ = handle.await;
        }

        if let Some(handle) = self.retry_handle.take() {
            handle.abort();
            let _ = handle.await;
        }

        if let Some(handle) = self.monitor_handle.take() {
            handle.abort();
            let _ = handle.await;
        }

        self.engine.close().await;

        info!("✅ Dialer server stopped");
        Ok(())
    }

    /// Run the server indefinitely
    pub async fn run(&self) -> Result<()> {
        info!("📞 Dialer server is running");

        self.display_info();

        loop {
            sleep(Duration::from_secs(60)).await;

            match self.engine.stats().await {
                Ok(stats) => {
                    let pending: i64 = stats.queues.iter().map(|q| q.pending).sum();
                    let active: i64 = stats.queues.iter().map(|q| q.assigned + q.in_progress).sum();
                    info!(
                        "📊 Stats - Phase: {}, Pending: {}, Active: {}, Retry backlog: {}",
                        stats.phase, pending, active, stats.rescore_backlog
                    );
                }
                Err(e) => error!("Failed to get dialer stats: {}", e),
            }
        }
    }

    /// Get a reference to the engine (for advanced usage)
    pub fn engine(&self) -> &Arc<DialerEngine> {
        &self.engine
    }

    /// Display server information
    fn display_info(&self) {
        println!("\n📞 DIALER IS READY!");
        println!("===================");
        println!("\n🔧 Configuration:");
        if self.config.database.database_path.is_empty() {
            println!("  - Database: in-memory");
        } else {
            println!("  - Database: {}", self.config.database.database_path);
        }
        println!("  - Claim lease timeout: {}s", self.config.claims.claim_lease_timeout_secs);
        println!("  - Lease sweep interval: {}s", self.config.general.sweep_interval_secs);
        println!("  - Retry drain interval: {}s", self.config.general.retry_drain_interval_secs);
        println!("\n🛑 Press Ctrl+C to stop the server\n");
    }

    /// Internal claim lease sweeper loop
    async fn sweep_loop(engine: Arc<DialerEngine>, interval_secs: u64) {
        info!("⏰ Starting claim lease sweeper");

        let mut interval = interval(Duration::from_secs(interval_secs));

        loop {
            interval.tick().await;

            match engine.sweep_expired_claims().await {
                Ok(0) => {}
                Ok(released) => info!("⏰ Returned {} expired claim(s) to pending", released),
                Err(e) => error!("Claim lease sweep failed: {}", e),
            }
        }
    }

    /// Internal rescore retry drainer loop
    async fn retry_loop(engine: Arc<DialerEngine>, interval_secs: u64) {
        info!("🔄 Starting rescore retry drainer");

        let mut interval = interval(Duration::from_secs(interval_secs));

        loop {
            interval.tick().await;

            match engine.drain_rescore_retries().await {
                Ok(result) if result.processed > 0 => {
                    info!(
                        "🔄 Rescore retry drain: {} processed, {} succeeded, {} failed",
                        result.processed, result.succeeded, result.failed
                    );
                }
                Ok(_) => {}
                Err(e) => error!("Rescore retry drain failed: {}", e),
            }
        }
    }

    /// Internal monitoring loop
    async fn monitor_loop(engine: Arc<DialerEngine>, interval_secs: u64) {
        info!("👀 Starting queue monitor");

        let mut interval = interval(Duration::from_secs(interval_secs));

        loop {
            interval.tick().await;

            match engine.stats().await {
                Ok(stats) => {
                    info!("📊 === Dialer Status Update ===");
                    info!("🗄️ Storage phase: {}", stats.phase);
                    if stats.transitions_halted {
                        error!("🚨 ALERT: Migration transitions halted on corrupt state");
                    }
                    for queue in &stats.queues {
                        info!(
                            "  📋 Queue '{}': {} pending, {} assigned, {} in progress",
                            queue.queue_type, queue.pending, queue.assigned, queue.in_progress
                        );
                    }
                    info!("🔄 Rescore retry backlog: {}", stats.rescore_backlog);
                    info!("================================");
                }
                Err(e) => error!("Failed to get dialer stats: {}", e),
            }
        }
    }
}

/// Builder for DialerServer with fluent API
pub struct DialerServerBuilder {
    config: Option<DialerConfig>,
    db_path: Option<String>,
    lookup: Option<Arc<dyn UserClaimLookup>>,
}

impl DialerServerBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            config: None,
            db_path: None,
            lookup: None,
        }
    }

    /// Set the configuration
    pub fn with_config(mut self, config: DialerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the database path
    pub fn with_database_path(mut self, path: String) -> Self {
        self.db_path = Some(path);
        self
    }

    /// Use an in-memory database
    pub fn with_in_memory_database(mut self) -> Self {
        self.db_path = Some(String::new());
        self
    }

    /// Set the claim lookup backing routing decisions
    pub fn with_claim_lookup(mut self, lookup: Arc<dyn UserClaimLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    /// Build the server
    pub async fn build(self) -> Result<DialerServer> {
        let mut config = self
            .config
            .ok_or_else(|| DialerError::Config("Configuration not provided".to_string()))?;

        if let Some(path) = self.db_path {
            config.database.database_path = path;
        }

        let lookup = self
            .lookup
            .ok_or_else(|| DialerError::Config("Claim lookup not provided".to_string()))?;

        DialerServer::new(config, lookup).await
    }
}

impl Default for DialerServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
