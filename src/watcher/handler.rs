//! Routes file change events to the watch trigger.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::events::EventBatch;
use super::trigger::WatchTrigger;
use crate::sync::SourceFilter;

/// Statistics for file watching.
#[derive(Debug, Default)]
pub struct WatcherStats {
    pub files_detected: AtomicU64,
    pub files_filtered: AtomicU64,
    pub files_routed: AtomicU64,
}

impl WatcherStats {
    /// Create new stats tracker.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Get snapshot of current stats.
    #[must_use]
    pub fn snapshot(&self) -> WatcherStatsSnapshot {
        WatcherStatsSnapshot {
            files_detected: self.files_detected.load(Ordering::Relaxed),
            files_filtered: self.files_filtered.load(Ordering::Relaxed),
            files_routed: self.files_routed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of watcher stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherStatsSnapshot {
    pub files_detected: u64,
    pub files_filtered: u64,
    pub files_routed: u64,
}

/// Event handler that maps changed paths to countries.
#[derive(Debug)]
pub struct EventHandler {
    filter: SourceFilter,
    trigger: WatchTrigger,
    stats: Arc<WatcherStats>,
}

impl EventHandler {
    /// Create a new event handler.
    #[must_use]
    pub fn new(filter: SourceFilter, trigger: WatchTrigger, stats: Arc<WatcherStats>) -> Self {
        Self {
            filter,
            trigger,
            stats,
        }
    }

    /// Process a batch of file events.
    ///
    /// Paths outside every root, or whose names are not source files, are
    /// counted and dropped.
    pub fn process_batch(&self, batch: &EventBatch) {
        self.stats
            .files_detected
            .fetch_add(batch.len() as u64, Ordering::Relaxed);

        for path in &batch.paths {
            if let Some(country) = self.filter.route(path) {
                tracing::info!(path = %path.display(), country = %country, "Source change detected");
                self.trigger.notify(country);
                self.stats.files_routed.fetch_add(1, Ordering::Relaxed);
            } else {
                tracing::trace!(path = %path.display(), "Ignoring event");
                self.stats.files_filtered.fetch_add(1, Ordering::Relaxed);
            }
        }

        let snapshot = self.stats.snapshot();
        tracing::debug!(
            detected = snapshot.files_detected,
            routed = snapshot.files_routed,
            filtered = snapshot.files_filtered,
            "Processed event batch"
        );
    }

    /// Get current stats.
    #[must_use]
    pub fn stats(&self) -> Arc<WatcherStats> {
        Arc::clone(&self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::time::Duration;

    use crate::config::DEFAULT_EXCLUDED_PATTERNS;
    use crate::sync::SyncReport;
    use crate::watcher::trigger::{TriggerState, UpdateRunner};
    use crate::Result;

    struct NoopRunner;

    impl UpdateRunner for NoopRunner {
        fn run_update(&self, _countries: &[String]) -> Result<SyncReport> {
            Err(crate::Error::internal("not used"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_routes_and_filters() {
        let mut roots = BTreeMap::new();
        roots.insert("jp".to_string(), PathBuf::from("/data/jp"));
        roots.insert("cn".to_string(), PathBuf::from("/data/cn"));
        let filter = SourceFilter::new(&roots, DEFAULT_EXCLUDED_PATTERNS);

        let trigger = WatchTrigger::new(Arc::new(NoopRunner), Duration::from_secs(30)).unwrap();
        let stats = WatcherStats::new();
        let handler = EventHandler::new(filter, trigger.clone(), Arc::clone(&stats));

        let batch: EventBatch = [
            "/data/jp/cpi_m.parquet",
            "/data/cn/gdp_q.parquet",
            "/data/jp/cpi_latest_m.parquet",
            "/data/jp/notes.txt",
            "/elsewhere/x_m.parquet",
        ]
        .into_iter()
        .map(PathBuf::from)
        .collect();

        handler.process_batch(&batch);

        assert_eq!(
            stats.snapshot(),
            WatcherStatsSnapshot {
                files_detected: 5,
                files_filtered: 3,
                files_routed: 2,
            }
        );
        match trigger.state() {
            TriggerState::Debouncing { pending } => {
                assert_eq!(pending.into_iter().collect::<Vec<_>>(), vec!["cn", "jp"]);
            }
            other => panic!("unexpected state {other:?}"),
        }
        assert_eq!(handler.stats().snapshot().files_routed, 2);
    }
}
