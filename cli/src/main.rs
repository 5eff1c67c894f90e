//! contacts-sync - keeps the address books of several accounts identical.
//!
//! Each run reconciles every configured account: additions, deletions and
//! edits made on any of them since the last run are copied to all others.
//!
//! The first run over accounts that were never synced must pass `--init`,
//! which links the accounts by matching contact and group names.

mod config;
mod error;
mod journal;
mod persist;
mod replica;
mod sync;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::EXIT_OK;
use crate::sync::RunOptions;

/// Sync contacts and contact groups across accounts.
#[derive(Parser, Debug)]
#[command(name = "contacts-sync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Initialize by syncing using names
    #[arg(long)]
    init: bool,

    /// With --init, wait this many seconds after each record pushed
    #[arg(long, value_name = "SECONDS", requires = "init")]
    rlim: Option<u64>,

    /// Directory holding config.json and journal.json
    #[arg(long, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Log per-record detail
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn default_filter(&self) -> &'static str {
        if self.verbose {
            "contacts_sync=debug,contacts_sync_engine=debug"
        } else if self.quiet {
            "contacts_sync=warn,contacts_sync_engine=warn"
        } else {
            "contacts_sync=info,contacts_sync_engine=info"
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| cli.default_filter().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let dir = match config::resolve_dir(cli.config_dir.clone()) {
        Ok(dir) => dir,
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::from(error::AppError::from(e).exit_code());
        }
    };

    let options = RunOptions {
        init: cli.init,
        rlim: cli.rlim,
    };
    match sync::run(&dir, &options) {
        Ok(report) => {
            for (kind, r) in [("groups", &report.groups), ("contacts", &report.contacts)] {
                tracing::info!(
                    resumed = r.resumed,
                    deleted = r.deleted,
                    added = r.added,
                    updated = r.updated,
                    bootstrapped = r.bootstrapped,
                    done_before = r.done_before,
                    "{kind} synced"
                );
            }
            ExitCode::from(EXIT_OK)
        }
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}
