//! `rg`: operator entry point for the enforcement engine.
//!
//! Thin on purpose: argument parsing, tracing setup, and dispatch. Everything
//! that touches state lives in `commands`.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rg")]
#[command(about = "RiskGuard risk enforcement engine", long_about = None)]
struct Cli {
    /// Layered config files in merge order (later overrides earlier).
    /// Without any, built-in defaults apply.
    #[arg(long = "config", global = true)]
    config_paths: Vec<PathBuf>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one enforcement pass against a file-backed paper venue
    Tick {
        /// Paper venue book (JSON); written back after the pass
        #[arg(long)]
        venue: PathBuf,
    },

    /// Run the enforcement loop until Ctrl-C
    Run {
        /// Paper venue book (JSON); written back on shutdown
        #[arg(long)]
        venue: PathBuf,
    },

    /// Print the persisted state of every rule module
    Status,

    /// Store the drawdown unlock secret (hashed). Without an argument the
    /// value comes from the env var named by `secrets.unlock_env`.
    SetSecret { secret: Option<String> },

    /// Clear the drawdown lock with the unlock secret
    Unlock {
        secret: String,

        /// Paper venue book; its automation switch is re-enabled on success
        #[arg(long)]
        venue: PathBuf,
    },

    /// Set the drawdown peak so the venue's equity sits <PCT>% below it
    SimulateDd {
        pct: f64,

        #[arg(long)]
        venue: PathBuf,
    },

    /// Append an operator reply to the file notifier inbox
    Reply { text: String },

    /// Compute layered config hash + print canonical JSON
    ConfigHash,

    /// Verify the hash chain of an event log file
    VerifyLog { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env.local if present (dev convenience). Silent if absent.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cli = Cli::parse();
    let paths = cli.config_paths;

    match cli.cmd {
        Commands::ConfigHash => commands::config_hash(&paths),
        Commands::VerifyLog { path } => commands::verify_log(&path),
        Commands::Reply { text } => commands::operator::reply(&commands::load_config(&paths)?, &text),
        Commands::Status => commands::operator::status(&commands::load_config(&paths)?),
        Commands::SetSecret { secret } => {
            commands::operator::set_secret(&commands::load_config(&paths)?, secret.as_deref())
        }
        Commands::Tick { venue } => commands::engine::tick(&commands::load_config(&paths)?, &venue),
        Commands::Run { venue } => commands::engine::run(&commands::load_config(&paths)?, &venue).await,
        Commands::Unlock { secret, venue } => {
            commands::engine::unlock(&commands::load_config(&paths)?, &venue, &secret)
        }
        Commands::SimulateDd { pct, venue } => {
            commands::engine::simulate_dd(&commands::load_config(&paths)?, &venue, pct)
        }
    }
}

/// Logs go to stderr; stdout carries command output only.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}
