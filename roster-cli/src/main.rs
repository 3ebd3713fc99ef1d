//! Roster — directory membership sync tooling.
//!
//! # Usage
//!
//! ```text
//! roster check --config <path>
//! roster records --config <path> [--status pending|resolved|failed|expired|cancelled|removed] [--json]
//! ```
//!
//! `check` validates a configuration file; `records` inspects the persisted
//! invitation mapping store.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{check::CheckArgs, records::RecordsArgs};

#[derive(Parser, Debug)]
#[command(
    name = "roster",
    version,
    about = "Reconcile organization membership against source directory groups",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a configuration file and show the effective settings.
    Check(CheckArgs),

    /// List persisted invitation records from the mapping store.
    Records(RecordsArgs),
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Check(args) => args.run(),
        Commands::Records(args) => args.run().await,
    }
}
