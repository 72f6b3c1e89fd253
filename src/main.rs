//! # Basarometer CLI (`basar`)
//!
//! ## Usage
//!
//! ```bash
//! basar --config ./config/basar.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `basar init` | Create the SQLite database and run schema migrations |
//! | `basar seed` | Load canonical cuts and retailers from the rule table |
//! | `basar ingest <file>` | Run listings through the pipeline |
//! | `basar classify "<name>"` | Classify one product name |
//! | `basar validate <file>` | Purity report for a listings file |
//! | `basar queue` | Show items awaiting review |
//! | `basar approve <id>` | Approve or reject one item |
//! | `basar bulk-approve <ids..>` | Approve or reject many items |
//! | `basar conflicts <action>` | Detect, list and resolve price conflicts |
//! | `basar stats` | Database statistics |
//! | `basar serve` | Start the admin HTTP API |
//!
//! Logs go to stderr; set `RUST_LOG` (default `info`) to adjust.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use basarometer::review::ApproveArgs;
use basarometer::{
    catalog, classify, config, conflicts, ingest, migrate, review, server, stats,
};

/// Basarometer: identity resolution and price reconciliation for Hebrew
/// retail meat listings.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/basar.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "basar",
    about = "Basarometer — meat listing classification and price reconciliation",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/basar.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Load canonical cuts and retailers from the rule table.
    Seed,

    /// Ingest listings from a JSON array or JSON-lines file.
    Ingest {
        file: PathBuf,

        /// Classify and map without writing anything.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of listings to process.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Classify a single product name and print the result as JSON.
    Classify {
        name: String,

        #[arg(long)]
        category: Option<String>,
    },

    /// Classify every listing in a file and report meat purity.
    Validate { file: PathBuf },

    /// List discovery-queue items awaiting review.
    Queue {
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Approve (or reject) a discovery-queue item.
    ///
    /// Approval creates a mapping rule and nudges the confidence of similar
    /// pending items.
    Approve {
        id: String,

        #[arg(long)]
        reject: bool,

        #[arg(long)]
        notes: Option<String>,

        /// Override the normalized name stored in the rule.
        #[arg(long)]
        normalized_name: Option<String>,

        /// Override the quality grade stored in the rule.
        #[arg(long)]
        grade: Option<String>,

        /// Override the rule confidence (0.0–1.0).
        #[arg(long)]
        confidence: Option<f64>,
    },

    /// Approve (or reject) many discovery-queue items at once.
    BulkApprove {
        #[arg(required = true)]
        ids: Vec<String>,

        #[arg(long)]
        reject: bool,
    },

    /// Detect, list and resolve cross-retailer price conflicts.
    Conflicts {
        #[command(subcommand)]
        action: ConflictAction,
    },

    /// Show database statistics.
    Stats,

    /// Start the admin HTTP API.
    Serve,
}

#[derive(Subcommand)]
enum ConflictAction {
    /// Scan active observations for new conflicts.
    Detect,

    /// List conflicts.
    List {
        /// `all`, `unresolved`, `resolved` or `needs_review`.
        #[arg(long, default_value = "unresolved")]
        status: String,
    },

    /// Resolve one conflict automatically, or escalate it.
    Resolve { id: String },

    /// Resolve one conflict with an admin-supplied price.
    ResolveManual {
        id: String,

        #[arg(long)]
        price: f64,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Resolve every confident conflict and flag the rest.
    Sweep,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Seed => {
            catalog::run_seed(&cfg).await?;
        }
        Commands::Ingest {
            file,
            dry_run,
            limit,
        } => {
            ingest::run_ingest(&cfg, &file, dry_run, limit).await?;
        }
        Commands::Classify { name, category } => {
            classify::run_classify(&cfg, &name, category.as_deref()).await?;
        }
        Commands::Validate { file } => {
            classify::run_validate(&cfg, &file).await?;
        }
        Commands::Queue { limit } => {
            review::run_queue(&cfg, limit).await?;
        }
        Commands::Approve {
            id,
            reject,
            notes,
            normalized_name,
            grade,
            confidence,
        } => {
            let args = ApproveArgs {
                reject,
                notes,
                normalized_name,
                grade,
                confidence,
            };
            review::run_approve(&cfg, &id, args).await?;
        }
        Commands::BulkApprove { ids, reject } => {
            review::run_bulk_approve(&cfg, &ids, reject).await?;
        }
        Commands::Conflicts { action } => match action {
            ConflictAction::Detect => conflicts::run_detect(&cfg).await?,
            ConflictAction::List { status } => conflicts::run_list(&cfg, &status).await?,
            ConflictAction::Resolve { id } => conflicts::run_resolve(&cfg, &id).await?,
            ConflictAction::ResolveManual { id, price, notes } => {
                conflicts::run_resolve_manual(&cfg, &id, price, notes.as_deref()).await?
            }
            ConflictAction::Sweep => conflicts::run_sweep(&cfg).await?,
        },
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
