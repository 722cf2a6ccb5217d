//! # Atlascope CLI (`atlascope`)
//!
//! The `atlascope` binary runs ingestion, answers questions, inspects the
//! report store, and starts the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! atlascope --config ./config/atlascope.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `atlascope init` | Create the SQLite database and schema |
//! | `atlascope ingest` | One ingestion pass over the configured lookback |
//! | `atlascope backfill` | One ingestion pass over a longer lookback |
//! | `atlascope schedule` | Ingest every `schedule.interval_secs` until killed |
//! | `atlascope query "<text>"` | Answer a question, print JSON |
//! | `atlascope get <id>` | Print a stored report |
//! | `atlascope last-updated` | Print the newest report timestamp |
//! | `atlascope recent` | Recent reports grouped by location |
//! | `atlascope reset` | Drop all stored reports |
//! | `atlascope serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! atlascope init --config ./config/atlascope.toml
//! atlascope backfill --days 5
//! atlascope query "earthquakes in Asia in the last week" --identity 203.0.113.7
//! atlascope recent --days 3
//! ```

use atlascope::{config, gateway, get, ingest, logging, migrate, scheduler, server};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

/// Atlascope CLI: disaster report ingestion and natural-language querying.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/atlascope.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "atlascope",
    about = "Atlascope: disaster report ingestion and natural-language querying",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/atlascope.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the reports and lock tables.
    /// Safe to run repeatedly.
    Init,

    /// Run one ingestion pass over `[now - feed.lookback_hours, now)`.
    Ingest,

    /// Run one ingestion pass over a longer window.
    ///
    /// Defaults to `feed.backfill_days`.
    Backfill {
        /// Lookback in days.
        #[arg(long, conflicts_with = "hours")]
        days: Option<i64>,

        /// Lookback in hours.
        #[arg(long)]
        hours: Option<i64>,
    },

    /// Ingest on a fixed interval until interrupted.
    Schedule,

    /// Answer a natural-language question against the report store.
    Query {
        /// The question.
        text: String,

        /// Caller identity used for quota accounting.
        #[arg(long, default_value = "cli")]
        identity: String,

        /// Treat the caller as signed in (no quota).
        #[arg(long)]
        authenticated: bool,
    },

    /// Print a stored report.
    Get {
        /// Report id.
        id: i64,
    },

    /// Print when the newest stored report was created.
    LastUpdated,

    /// Print recent reports grouped by location.
    Recent {
        /// How many days back to look.
        #[arg(long, default_value_t = 7)]
        days: i64,
    },

    /// Drop the reports table.
    Reset,

    /// Start the HTTP server (and the ingestion schedule when enabled).
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init_tracing(&cfg.logging)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest => {
            ingest::run_ingest(&cfg).await?;
        }
        Commands::Backfill { days, hours } => {
            ingest::run_backfill_command(&cfg, days, hours).await?;
        }
        Commands::Schedule => {
            let pool = atlascope::db::connect(&cfg).await?;
            let ingestor = Arc::new(ingest::Ingestor::from_config(&cfg, pool)?);
            tokio::select! {
                _ = scheduler::run_schedule(ingestor, cfg.schedule.interval()) => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown signal received");
                }
            }
        }
        Commands::Query {
            text,
            identity,
            authenticated,
        } => {
            gateway::run_query(&cfg, &text, &identity, authenticated).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, id).await?;
        }
        Commands::LastUpdated => {
            get::run_last_updated(&cfg).await?;
        }
        Commands::Recent { days } => {
            get::run_recent(&cfg, days).await?;
        }
        Commands::Reset => {
            get::run_reset(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
