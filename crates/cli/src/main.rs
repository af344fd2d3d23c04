//! Command-line tool for managing the claimdial outbound dialer
//!
//! Operates directly on the dialer database: queueing users, working call
//! sessions, inspecting scores, and driving the queue storage migration.
//! Long-running deployments use `claimdial serve`; everything else is a
//! one-shot command suitable for scripts and runbooks.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Deserialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tracing_subscriber::EnvFilter;

use claimdial_dialer_engine::prelude::*;

#[derive(Parser)]
#[command(name = "claimdial", version, about = "Outbound dialer queue management")]
struct Cli {
    /// Path to the SQLite database file (omit for in-memory)
    #[arg(long, env = "CLAIMDIAL_DB", global = true)]
    database: Option<String>,

    /// TOML configuration file; --database overrides its database path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// TOML file of claim contexts backing routing decisions
    #[arg(long, global = true)]
    contexts: Option<PathBuf>,

    /// Emit machine-readable JSON instead of formatted output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the dialer server with background maintenance tasks
    Serve,

    /// Queue a user for an outbound call from their claim state
    Enqueue {
        #[arg(long)]
        user: String,
        #[arg(long)]
        claim: String,
        /// A required signature has not been collected
        #[arg(long)]
        signature: bool,
        /// Documentation requirements remain unmet
        #[arg(long)]
        requirements: bool,
        /// The user still needs to be reached about something else
        #[arg(long)]
        contact: bool,
    },

    /// Withdraw a user's open queue entry
    Remove {
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "removed by operator")]
        reason: String,
    },

    /// List pending entries, best candidate first
    List {
        /// Restrict to one queue (unsigned_signature, outstanding_requirements, generic)
        #[arg(long)]
        queue: Option<String>,
        /// Maximum entries per queue
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Show queue depths, storage phase, and retry backlog
    Stats,

    /// Claim a pending entry for an agent
    Claim {
        #[arg(long)]
        entry: String,
        #[arg(long)]
        agent: String,
    },

    /// Start the call on a claimed entry
    Start {
        #[arg(long)]
        entry: String,
        #[arg(long)]
        agent: String,
    },

    /// Complete an in-progress call with an outcome
    Complete {
        #[arg(long)]
        entry: String,
        #[arg(long)]
        agent: String,
        /// Call outcome (contacted, no_answer, voicemail, busy, failed)
        #[arg(long)]
        outcome: String,
        /// Idempotency key for the outcome report (generated when omitted)
        #[arg(long)]
        outcome_id: Option<String>,
        /// When the attempt happened, RFC 3339 (defaults to now)
        #[arg(long)]
        occurred_at: Option<String>,
    },

    /// Hand a claimed entry back to the queue untouched
    Release {
        #[arg(long)]
        entry: String,
        #[arg(long)]
        agent: String,
    },

    /// Apply a call outcome to a user's score without a session
    Outcome {
        #[arg(long)]
        user: String,
        /// Call outcome (contacted, no_answer, voicemail, busy, failed)
        #[arg(long)]
        outcome: String,
        #[arg(long)]
        outcome_id: Option<String>,
        #[arg(long)]
        occurred_at: Option<String>,
    },

    /// Show a user's score record
    Score {
        #[arg(long)]
        user: String,
    },

    /// Create or reset a user's score record with a base score
    SetBaseScore {
        #[arg(long)]
        user: String,
        #[arg(long)]
        score: i64,
    },

    /// Return expired claim leases to pending once
    Sweep,

    /// Drain due rescore retries once
    Drain,

    /// Queue storage migration operations
    Migrate {
        #[command(subcommand)]
        cmd: MigrateCommand,
    },
}

#[derive(Subcommand)]
enum MigrateCommand {
    /// Show the persisted migration state
    Status,

    /// Advance the migration one phase forward
    Advance {
        /// Report what would happen without changing anything
        #[arg(long)]
        dry_run: bool,
        /// Operator note recorded with the transition
        #[arg(long)]
        note: Option<String>,
    },

    /// Roll all the way back to pre_migration
    Rollback {
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        note: Option<String>,
    },

    /// Compare legacy and specialized queue content
    Check,
}

/// Claim contexts file: a list of `[[contexts]]` tables
#[derive(Deserialize)]
struct ContextsFile {
    #[serde(default)]
    contexts: Vec<ClaimContext>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("claimdial=info")),
        )
        .init();

    let cli = Cli::parse();

    if matches!(cli.cmd, Command::Serve) {
        return serve(&cli).await;
    }

    let json = cli.json;
    let config = load_config(&cli)?;
    let lookup = load_lookup(&cli)?;
    let engine = DialerEngine::new(config, lookup.clone()).await?;

    match cli.cmd {
        // Serve returns early above; it builds its own engine
        Command::Serve => {}

        Command::Enqueue { user, claim, signature, requirements, contact } => {
            // Inline flags take precedence over the contexts file
            if signature || requirements || contact {
                lookup.set(ClaimContext {
                    user_id: user.clone(),
                    claim_id: claim.clone(),
                    signature_outstanding: signature,
                    requirements_outstanding: requirements,
                    contact_outstanding: contact,
                });
            }
            let entry = engine.enqueue_user(&user, &claim).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entry)?);
            } else {
                println!(
                    "✅ Queued {} into {} at score {} (entry {})",
                    entry.user_id,
                    entry.queue_type.to_string().cyan(),
                    entry.priority_score,
                    entry.id
                );
            }
        }

        Command::Remove { user, reason } => {
            let entry = engine.remove_user(&user, &reason).await?;
            println!("✅ Removed {} from {} ({})", entry.user_id, entry.queue_type, reason);
        }

        Command::List { queue, limit } => {
            let queue_types = match queue {
                Some(s) => vec![QueueType::parse(&s)?],
                None => QueueType::all().to_vec(),
            };
            let mut entries = Vec::new();
            for queue_type in queue_types {
                entries.extend(engine.list_pending(queue_type, limit).await?);
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("No pending entries");
            } else {
                print_entries(&entries);
            }
        }

        Command::Stats => {
            let stats = engine.stats().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("🗄️ Storage phase: {}", stats.phase.to_string().cyan());
                if stats.transitions_halted {
                    println!("{}", "🚨 Migration transitions halted on corrupt state".red().bold());
                }
                for queue in &stats.queues {
                    println!(
                        "📋 {}: {} pending, {} assigned, {} in progress",
                        queue.queue_type, queue.pending, queue.assigned, queue.in_progress
                    );
                }
                println!("🔄 Rescore retry backlog: {}", stats.rescore_backlog);
            }
        }

        Command::Claim { entry, agent } => {
            let entry = engine.claim(&entry, &agent).await?;
            println!("✅ {} claimed {} (user {})", agent, entry.id, entry.user_id);
        }

        Command::Start { entry, agent } => {
            let entry = engine.start(&entry, &agent).await?;
            println!("📞 Call started for {} (user {})", entry.id, entry.user_id);
        }

        Command::Complete { entry, agent, outcome, outcome_id, occurred_at } => {
            let event = parse_event(outcome_id, &outcome, occurred_at.as_deref())?;
            let entry = engine.complete(&entry, &agent, event).await?;
            println!("✅ Completed call for {} with outcome {}", entry.user_id, outcome.cyan());
        }

        Command::Release { entry, agent } => {
            let entry = engine.release(&entry, &agent).await?;
            println!("✅ {} released back to pending (user {})", entry.id, entry.user_id);
        }

        Command::Outcome { user, outcome, outcome_id, occurred_at } => {
            let event = parse_event(outcome_id, &outcome, occurred_at.as_deref())?;
            let record = engine.apply_outcome(&user, &event).await?;
            println!("✅ Score for {} is now {}", user, record.current_score);
        }

        Command::Score { user } => {
            let record = engine
                .get_score(&user)
                .await?
                .with_context(|| format!("no score record for user {user}"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                print_score(&record);
            }
        }

        Command::SetBaseScore { user, score } => {
            let record = engine.set_base_score(&user, score).await?;
            println!("✅ Base score for {} set to {} (current {})", user, record.base_score, record.current_score);
        }

        Command::Sweep => {
            let released = engine.sweep_expired_claims().await?;
            println!("⏰ Returned {} expired claim(s) to pending", released);
        }

        Command::Drain => {
            let result = engine.drain_rescore_retries().await?;
            println!(
                "🔄 Drained {} parked outcome(s): {} succeeded, {} failed",
                result.processed, result.succeeded, result.failed
            );
        }

        Command::Migrate { cmd } => match cmd {
            MigrateCommand::Status => {
                let state = engine.migration_status().await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&state)?);
                } else {
                    print_migration_state(&state);
                }
            }

            MigrateCommand::Advance { dry_run, note } => {
                let report = engine.advance_migration(dry_run, note.as_deref()).await?;
                print_transition(&report, json)?;
                if !report.succeeded() {
                    std::process::exit(1);
                }
            }

            MigrateCommand::Rollback { dry_run, note } => {
                let report = engine.rollback_migration(dry_run, note.as_deref()).await?;
                print_transition(&report, json)?;
                if !report.succeeded() {
                    std::process::exit(1);
                }
            }

            MigrateCommand::Check => {
                let report = engine.check_consistency().await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                } else {
                    println!("{report}");
                }
                if !report.passed() {
                    std::process::exit(1);
                }
            }
        },
    }

    Ok(())
}

/// Run the long-lived server with background sweeps, drains, and monitoring
async fn serve(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    let lookup = load_lookup(cli)?;

    let mut server = DialerServerBuilder::new()
        .with_config(config)
        .with_claim_lookup(lookup)
        .build()
        .await?;

    server.start().await?;
    server.run().await?;
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<DialerConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str(&text)
                .with_context(|| format!("parsing config file {}", path.display()))?
        }
        None => DialerConfig::default(),
    };
    if let Some(database) = &cli.database {
        config.database.database_path = database.clone();
    }
    Ok(config)
}

fn load_lookup(cli: &Cli) -> anyhow::Result<Arc<StaticClaimLookup>> {
    let lookup = Arc::new(StaticClaimLookup::new());
    if let Some(path) = &cli.contexts {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading contexts file {}", path.display()))?;
        let file: ContextsFile = toml::from_str(&text)
            .with_context(|| format!("parsing contexts file {}", path.display()))?;
        for ctx in file.contexts {
            lookup.set(ctx);
        }
    }
    Ok(lookup)
}

fn parse_event(
    outcome_id: Option<String>,
    outcome: &str,
    occurred_at: Option<&str>,
) -> anyhow::Result<OutcomeEvent> {
    let occurred_at = match occurred_at {
        Some(s) => DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("parsing --occurred-at '{s}'"))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };
    let outcome_id = outcome_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    Ok(OutcomeEvent::parse(outcome_id, outcome, occurred_at)?)
}

#[derive(Tabled)]
struct EntryRow {
    #[tabled(rename = "ENTRY")]
    id: String,
    #[tabled(rename = "USER")]
    user: String,
    #[tabled(rename = "CLAIM")]
    claim: String,
    #[tabled(rename = "QUEUE")]
    queue: String,
    #[tabled(rename = "SCORE")]
    score: i64,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "QUEUED AT")]
    queued_at: String,
}

fn print_entries(entries: &[QueueEntry]) {
    let rows: Vec<EntryRow> = entries
        .iter()
        .map(|entry| EntryRow {
            id: entry.id.clone(),
            user: entry.user_id.clone(),
            claim: entry.claim_id.clone(),
            queue: entry.queue_type.to_string(),
            score: entry.priority_score,
            status: entry.status.to_string(),
            queued_at: entry.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn print_score(record: &ScoreRecord) {
    println!("📊 Score for {}", record.user_id);
    println!(
        "  current:  {} (base {} + outcome {} + time {})",
        record.current_score.to_string().bold(),
        record.base_score,
        record.outcome_penalty_score,
        record.time_penalty_score
    );
    println!(
        "  attempts: {} total, {} successful",
        record.total_attempts, record.successful_calls
    );
    match (record.last_outcome, record.last_call_at) {
        (Some(outcome), Some(at)) => {
            println!("  last:     {} at {}", outcome, at.format("%Y-%m-%d %H:%M:%S"));
        }
        _ => println!("  last:     never called"),
    }
}

fn print_migration_state(state: &MigrationState) {
    println!("🗄️ Phase: {}", state.phase.to_string().cyan().bold());
    println!("  writes legacy:   {}", if state.write_legacy { "yes" } else { "no" });
    println!("  writes new:      {}", if state.write_new { "yes" } else { "no" });
    println!("  reads new first: {}", if state.read_new_first { "yes" } else { "no" });
    if state.valid {
        println!("  state valid:     {}", "yes".green());
    } else {
        println!("  state valid:     {}", "NO (transitions halted)".red().bold());
    }
    println!("  updated at:      {}", state.updated_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(note) = &state.note {
        println!("  note:            {note}");
    }
}

fn print_transition(report: &TransitionReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("{report}");
        if report.succeeded() {
            if report.applied {
                println!("{}", format!("✅ Now in phase {}", report.to).green());
            } else {
                println!("{}", "✅ Dry run passed".green());
            }
        } else {
            println!("{}", "❌ Transition refused".red().bold());
        }
    }
    Ok(())
}
