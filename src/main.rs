//! Seriesync - Parquet to SQLite sync engine
//!
//! Entry point for the `sync` and `watch` commands.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use seriesync::config::{parse_root, DEFAULT_EXCLUDED_PATTERNS};
use seriesync::observability::{init_tracing, TracingConfig};
use seriesync::sync::{SyncReport, Synchronizer};
use seriesync::Config;

/// Seriesync - incremental Parquet to SQLite sync
#[derive(Parser, Debug)]
#[command(name = "seriesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path of the `SQLite` store
    #[arg(short, long, global = true, env = "SERIESYNC_DATABASE", default_value = "./data/series.db")]
    database: PathBuf,

    /// Country source root as <country>=<dir> (repeatable)
    #[arg(
        short,
        long = "root",
        global = true,
        env = "SERIESYNC_ROOTS",
        value_delimiter = ',',
        value_parser = parse_root
    )]
    roots: Vec<(String, PathBuf)>,

    /// File-name fragments that exclude a source file
    #[arg(long = "exclude", global = true, env = "SERIESYNC_EXCLUDE", value_delimiter = ',')]
    excluded: Vec<String>,

    /// Quiet period before a watch-mode update, in seconds
    #[arg(long, global = true, env = "SERIESYNC_DEBOUNCE_SECS", default_value = "30")]
    debounce_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "SERIESYNC_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, global = true, env = "SERIESYNC_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one sync and print the report as JSON
    Sync {
        /// Countries to update (default: all configured)
        #[arg(short, long = "country", value_delimiter = ',')]
        countries: Vec<String>,

        /// Drop every table and reload all sources
        #[arg(long)]
        rebuild: bool,
    },
    /// Watch the source roots and update after each quiet period
    Watch {
        /// Run a single incremental update for all countries and exit
        #[arg(long)]
        once: bool,
    },
}

impl Cli {
    fn config(&self) -> Config {
        let excluded_patterns = if self.excluded.is_empty() {
            DEFAULT_EXCLUDED_PATTERNS
                .iter()
                .map(|p| (*p).to_string())
                .collect()
        } else {
            self.excluded.clone()
        };

        self.roots.iter().fold(
            Config {
                database_path: self.database.clone(),
                excluded_patterns,
                debounce: Duration::from_secs(self.debounce_secs),
                log_level: self.log_level.clone(),
                ..Config::default()
            },
            |config, (country, root)| config.with_root(country.as_str(), root.clone()),
        )
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&TracingConfig {
        level: cli.log_level.clone(),
        json: cli.log_json,
    })?;

    tracing::info!("Seriesync v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = cli.config();
    tracing::debug!(?config, "Configuration loaded");

    let synchronizer = Arc::new(Synchronizer::from_config(&config)?);

    match cli.command {
        Command::Sync { countries, rebuild } => {
            let report = run_sync(&synchronizer, countries, rebuild).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Watch { once: true } => {
            tracing::info!("Single pass: running incremental update for all countries");
            run_sync(&synchronizer, Vec::new(), false).await?;
        }
        Command::Watch { once: false } => {
            let shutdown = CancellationToken::new();
            tokio::spawn(shutdown_signal(shutdown.clone()));
            seriesync::watcher::run(&config, synchronizer, shutdown).await?;
        }
    }

    Ok(())
}

async fn run_sync(
    synchronizer: &Arc<Synchronizer>,
    countries: Vec<String>,
    rebuild: bool,
) -> anyhow::Result<SyncReport> {
    let synchronizer = Arc::clone(synchronizer);
    let report = tokio::task::spawn_blocking(move || synchronizer.sync(&countries, rebuild))
        .await
        .context("sync task panicked")??;

    for failure in &report.failures {
        tracing::warn!(path = %failure.path, error = %failure.error, "File will be retried next run");
    }
    Ok(report)
}

/// Cancel `token` on SIGTERM (Unix) or Ctrl+C.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    token.cancel();
}
