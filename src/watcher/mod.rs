//! Watch mode: source directory events debounced into incremental syncs.
//!
//! This module provides:
//! - Directory watching using notify-rs
//! - Path-to-country routing of change events
//! - The debounce trigger serializing update runs

mod events;
mod handler;
mod trigger;
#[allow(clippy::module_inception)]
mod watcher;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

pub use events::EventBatch;
pub use handler::{EventHandler, WatcherStats, WatcherStatsSnapshot};
pub use trigger::{TriggerAction, TriggerState, UpdateRunner, WatchTrigger};
pub use watcher::{FileWatcher, WatcherConfig};

use crate::sync::Synchronizer;
use crate::{Config, Result};

/// Watch every configured root until `shutdown` is cancelled.
///
/// Changes are routed to their country and debounced by
/// [`Config::debounce`]; each quiet period ends in one incremental sync of
/// the affected countries. On shutdown a pending debounce is dropped and a
/// running sync is allowed to finish.
///
/// # Errors
///
/// Returns an error if no root can be watched.
pub async fn run(
    config: &Config,
    synchronizer: Arc<Synchronizer>,
    shutdown: CancellationToken,
) -> Result<WatcherStatsSnapshot> {
    let filter = synchronizer.filter().clone();

    let mut watcher = FileWatcher::new(&WatcherConfig {
        watch_dirs: config.roots.values().cloned().collect(),
        ..WatcherConfig::default()
    })?;

    let trigger = WatchTrigger::new(synchronizer, config.debounce)?;
    let handler = EventHandler::new(filter, trigger.clone(), WatcherStats::new());

    tracing::info!(
        roots = watcher.watched_dirs().len(),
        debounce_secs = config.debounce.as_secs(),
        "Watching for source changes. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                tracing::info!("Shutting down watcher");
                break;
            }
            batch = watcher.recv() => {
                let Some(batch) = batch else {
                    tracing::warn!("Watcher channel closed");
                    break;
                };
                handler.process_batch(&batch);
            }
        }
    }

    drop(watcher);
    trigger.shutdown().await;

    let stats = handler.stats().snapshot();
    tracing::info!(
        detected = stats.files_detected,
        routed = stats.files_routed,
        runs = trigger.completed_runs(),
        "Watcher stopped"
    );
    Ok(stats)
}
