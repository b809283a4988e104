//! # Point Blocks CLI (`kpb`)
//!
//! ## Usage
//!
//! ```bash
//! kpb --config ./config/kpb.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kpb init` | Create the SQLite database and the content directory |
//! | `kpb sync <code>` | Sync one topic code |
//! | `kpb sync --all` | Sync every document in the content directory |
//! | `kpb show <code>` | Print the live-parsed document, or stored blocks when no file matches |
//! | `kpb blocks <code>` | Print persisted blocks |
//! | `kpb diagnose <code>` | Explain what the file, parser and store see |
//! | `kpb coverage` | Per-file stage and module coverage |
//! | `kpb stats` | Store statistics |
//! | `kpb serve` | Start the HTTP server |
//!
//! Logs go to stderr. `RUST_LOG` sets the filter and `KPB_LOG_FORMAT=json`
//! switches to JSON lines.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use point_blocks::models::{ModuleCode, StageId};
use point_blocks::{config, content, coverage, diagnose, migrate, server, stats, sync};

/// Knowledge-point content block parser and synchronizer.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/kpb.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "kpb",
    about = "Parse knowledge-point documents into stage/module blocks and sync them to SQLite",
    version
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "./config/kpb.toml")]
    config: PathBuf,

    /// Print machine-readable JSON instead of text where supported.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema and content directory.
    Init,

    /// Sync one code, or every document with `--all`.
    Sync {
        /// Topic code, e.g. C8.4.10.
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        code: Option<String>,

        #[arg(long)]
        all: bool,

        /// Re-import even when the file is unchanged.
        #[arg(long)]
        force: bool,

        /// Parse and count without writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the live-parsed document for a code, falling back to stored
    /// blocks when no file matches.
    Show { code: String },

    /// List persisted blocks for a code.
    Blocks {
        code: String,

        /// stage1, stage2 or stage3.
        #[arg(long)]
        stage: Option<StageId>,

        /// M02..M06.
        #[arg(long)]
        module: Option<ModuleCode>,
    },

    /// Diagnose why a code has no (or stale) blocks.
    Diagnose { code: String },

    /// Report stage and module coverage for every document.
    Coverage,

    /// Show store statistics.
    Stats,

    /// Start the HTTP server.
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("point_blocks=info,kpb=info,sqlx=warn"));
    let json = std::env::var("KPB_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .flatten_event(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            std::fs::create_dir_all(&cfg.content.dir)?;
            println!("Database initialized successfully.");
        }
        Commands::Sync {
            code,
            all: _,
            force,
            dry_run,
        } => {
            sync::run_sync(&cfg, code.as_deref(), force, dry_run).await?;
        }
        Commands::Show { code } => {
            content::run_show(&cfg, &code, cli.json).await?;
        }
        Commands::Blocks {
            code,
            stage,
            module,
        } => {
            content::run_blocks(&cfg, &code, stage, module, cli.json).await?;
        }
        Commands::Diagnose { code } => {
            diagnose::run_diagnose(&cfg, &code, cli.json).await?;
        }
        Commands::Coverage => {
            coverage::run_coverage(&cfg, cli.json)?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg, cli.json).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
