//! # Receipt Trace CLI (`rtrace`)
//!
//! ## Usage
//!
//! ```bash
//! rtrace --config ./config/rtrace.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rtrace init` | Create the SQLite database and run schema migrations |
//! | `rtrace process <path>` | Process one image, or every matching image under a directory |
//! | `rtrace candidates <image>` | Show OCR lines and rule candidates without calling the model |
//! | `rtrace list` | List stored receipts, newest first |
//! | `rtrace show <id>` | Show one receipt with field provenance |
//! | `rtrace serve` | Start the read-only HTTP API |
//! | `rtrace completions <shell>` | Print a shell completion script |
//!
//! ## Examples
//!
//! ```bash
//! rtrace init
//! rtrace process ./inbox --dry-run
//! rtrace process ./inbox
//! rtrace show 3 --json
//! RUST_LOG=receipt_trace=debug rtrace process ./inbox/walmart.jpg
//! ```

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use receipt_trace::{config, get, migrate, process, server};

/// Receipt Trace: traceable receipt field extraction.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rtrace.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rtrace",
    about = "Receipt Trace: extract merchant, date, total, and currency from receipt images with traceable provenance",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rtrace.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace). Overrides RUST_LOG.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Process a receipt image or a directory of images.
    ///
    /// Each image is OCR'd, scanned for rule candidates, sent to the model,
    /// reconciled, and upserted by content hash. Re-processing an image
    /// updates its existing record.
    Process {
        /// Image file or directory.
        path: PathBuf,

        /// List the files that would be processed, without processing them.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show OCR lines and rule candidates for one file.
    Candidates {
        /// Image file (or text transcription with --text).
        file: PathBuf,

        /// Treat the file as plain text, one OCR line per line.
        #[arg(long)]
        text: bool,
    },

    /// List stored receipts, newest first.
    List {
        #[arg(long, default_value = "20")]
        limit: i64,
    },

    /// Show a stored receipt.
    Show {
        id: i64,

        /// Print the full record as JSON, with artifacts parsed.
        #[arg(long)]
        json: bool,
    },

    /// Start the read-only HTTP API on `[server].bind`.
    Serve,

    /// Print a shell completion script to stdout.
    Completions {
        shell: clap_complete::Shell,
    },
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "rtrace", &mut std::io::stdout());
        return Ok(());
    }

    dotenvy::dotenv().ok();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Process { path, dry_run } => {
            process::run_process(&cfg, &path, dry_run).await?;
        }
        Commands::Candidates { file, text } => {
            process::run_candidates(&cfg, &file, text).await?;
        }
        Commands::List { limit } => {
            get::run_list(&cfg, limit).await?;
        }
        Commands::Show { id, json } => {
            get::run_show(&cfg, id, json).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Completions { .. } => {
            // Handled above (before config loading)
        }
    }

    Ok(())
}
