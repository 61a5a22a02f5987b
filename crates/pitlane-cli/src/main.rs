//! pitlane - operator CLI for the race-event assignment ledger.
//!
//! Puts kids on teams and vehicles, and reads back the history of every
//! change, against either a local JSON store or Firestore.

mod cli;
mod commands;

use std::io;
use std::path::Path;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pitlane_core::Config;

use cli::Cli;
use commands::App;

/// Log file name prefix inside the data directory's `logs/` folder
const LOG_FILE_PREFIX: &str = "pitlane.log";

/// Initialize the tracing subscriber for logging.
///
/// Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug).
/// Output goes to stderr and to a daily log file; the returned guard
/// flushes the file writer on drop.
fn init_tracing(data_dir: &Path) -> WorkerGuard {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let file_appender = tracing_appender::rolling::daily(data_dir.join("logs"), LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = Config::load()?;
    config.apply_overrides(|key| std::env::var(key).ok())?;
    let data_dir = config.data_dir()?;

    let guard = init_tracing(&data_dir);
    info!(backend = ?config.backend, "pitlane starting");

    let result = App::new(config, data_dir).run(cli).await;
    drop(guard);

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}
