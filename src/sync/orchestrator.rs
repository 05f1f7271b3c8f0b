//! Sync orchestration: full rebuild or incremental update.

use std::time::Instant;

use serde::Serialize;

use super::detector::{detect_changes, file_mtime, ChangeSet};
use super::filter::SourceFilter;
use super::index::rebuild_indexes;
use super::inventory::{scan_sources, Inventory, SourceFile};
use super::loader::{load_file, remove_file, LoadOutcome};
use crate::storage::{
    is_stale, migration_reason, open_store, reset_schema, AggregateStats, Database,
    RebuildReason, StatsCache,
};
use crate::{Config, Result};

/// How a run was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncMode {
    /// Every table dropped and every configured country reloaded.
    Full { reason: RebuildReason },
    /// Only changed, new and removed files processed.
    Incremental,
}

/// A file that could not be loaded or torn down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub path: String,
    pub error: String,
}

/// Summary of one sync run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub mode: SyncMode,
    /// Countries the run covered.
    pub countries: Vec<String>,
    /// Countries whose root was unknown or unreadable.
    pub unavailable: Vec<String>,
    pub files_scanned: usize,
    /// Files that were new or whose mtime changed (every file on a full rebuild).
    pub files_changed: usize,
    pub files_unchanged: usize,
    pub files_removed: usize,
    pub failures: Vec<FileFailure>,
    pub series_loaded: usize,
    pub series_removed: usize,
    pub points_loaded: usize,
    pub indexes_rebuilt: bool,
    /// Fresh aggregate stats when the indexes were rebuilt.
    pub stats: Option<AggregateStats>,
    /// Whether the closing WAL checkpoint left a self-contained file.
    pub checkpointed: bool,
    pub elapsed_ms: u64,
}

impl SyncReport {
    fn new(mode: SyncMode, countries: Vec<String>) -> Self {
        Self {
            mode,
            countries,
            unavailable: Vec::new(),
            files_scanned: 0,
            files_changed: 0,
            files_unchanged: 0,
            files_removed: 0,
            failures: Vec::new(),
            series_loaded: 0,
            series_removed: 0,
            points_loaded: 0,
            indexes_rebuilt: false,
            stats: None,
            checkpointed: false,
            elapsed_ms: 0,
        }
    }

    /// Whether every file was processed without error.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Series written or deleted by this run.
    #[must_use]
    pub const fn series_touched(&self) -> usize {
        self.series_loaded + self.series_removed
    }

    fn record_failure(&mut self, path: String, error: &crate::Error) {
        tracing::error!(path = %path, error = %error, "Failed to process source file");
        self.failures.push(FileFailure {
            path,
            error: error.to_string(),
        });
    }

    fn record_load(&mut self, outcome: LoadOutcome) {
        self.series_loaded += outcome.series;
        self.series_removed += outcome.dropped;
        self.points_loaded += outcome.points;
    }
}

/// Drives sync runs against one store.
///
/// Owns the store handle and the stats cache for its lifetime; query code
/// that shares the store should share the cache via [`Self::stats_cache`].
#[derive(Debug, Clone)]
pub struct Synchronizer {
    db: Database,
    filter: SourceFilter,
    stats: StatsCache,
}

impl Synchronizer {
    /// Create a synchronizer over an open store.
    #[must_use]
    pub fn new(db: Database, filter: SourceFilter) -> Self {
        Self {
            db,
            filter,
            stats: StatsCache::new(),
        }
    }

    /// Open the configured store and build the source filter.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the store cannot
    /// be opened.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let db = open_store(&config.database_path)?;
        Ok(Self::new(db, SourceFilter::from_config(config)))
    }

    /// Use an existing stats cache instead of a private one.
    #[must_use]
    pub fn with_stats_cache(mut self, stats: StatsCache) -> Self {
        self.stats = stats;
        self
    }

    /// The store handle.
    #[must_use]
    pub const fn database(&self) -> &Database {
        &self.db
    }

    /// The stats cache refreshed after every rebuild.
    #[must_use]
    pub const fn stats_cache(&self) -> &StatsCache {
        &self.stats
    }

    /// The source filter used for inventory and event routing.
    #[must_use]
    pub const fn filter(&self) -> &SourceFilter {
        &self.filter
    }

    /// Bring the store up to date with the source files.
    ///
    /// An empty `countries` slice means every configured country. A full
    /// rebuild happens when `force_full_rebuild` is set or the store lacks
    /// consistent tracking state; it always covers every country.
    ///
    /// Per-file failures are reported in [`SyncReport::failures`] and never
    /// abort the run.
    ///
    /// # Errors
    ///
    /// Returns an error only for store-wide failures (schema reset, ledger
    /// read, index rebuild, checkpoint).
    pub fn sync(&self, countries: &[String], force_full_rebuild: bool) -> Result<SyncReport> {
        let started = Instant::now();

        let reason = if force_full_rebuild {
            Some(RebuildReason::Requested)
        } else {
            self.db.with_conn(migration_reason)?
        };

        let mut report = match reason {
            Some(reason) => self.full_rebuild(reason)?,
            None => self.incremental(&self.requested(countries))?,
        };

        let checkpoint = self.db.checkpoint()?;
        report.checkpointed = checkpoint.is_complete();
        if !report.checkpointed {
            tracing::warn!(
                wal_frames = checkpoint.wal_frames,
                checkpointed_frames = checkpoint.checkpointed_frames,
                "WAL still in use by a reader, store file is not self-contained yet"
            );
        }
        report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        tracing::info!(
            mode = ?report.mode,
            changed = report.files_changed,
            unchanged = report.files_unchanged,
            removed = report.files_removed,
            failed = report.failures.len(),
            series = report.series_touched(),
            elapsed_ms = report.elapsed_ms,
            "Sync complete"
        );
        Ok(report)
    }

    fn requested(&self, countries: &[String]) -> Vec<String> {
        if countries.is_empty() {
            return self.filter.countries();
        }

        let mut requested: Vec<String> = Vec::with_capacity(countries.len());
        for country in countries {
            let country = country.trim().to_lowercase();
            if !requested.contains(&country) {
                requested.push(country);
            }
        }
        requested
    }

    fn full_rebuild(&self, reason: RebuildReason) -> Result<SyncReport> {
        let countries = self.filter.countries();
        tracing::info!(reason = ?reason, countries = ?countries, "Starting full rebuild");

        let inventory = scan_sources(&self.filter, &countries);
        let mut report = SyncReport::new(SyncMode::Full { reason }, countries);
        report.unavailable = inventory.unavailable_countries();
        report.files_scanned = inventory.files.len();

        self.db.with_transaction(reset_schema)?;
        self.stats.invalidate();

        self.db.set_bulk_load(true)?;
        for source in &inventory.files {
            report.files_changed += 1;
            let outcome = file_mtime(&source.path).and_then(|mtime| load_file(&self.db, source, mtime));
            match outcome {
                Ok(outcome) => report.record_load(outcome),
                Err(e) => report.record_failure(source.key(), &e),
            }
        }
        self.db.set_bulk_load(false)?;

        report.stats = Some(rebuild_indexes(&self.db, &self.stats)?);
        report.indexes_rebuilt = true;

        self.db.vacuum()?;
        Ok(report)
    }

    fn incremental(&self, countries: &[String]) -> Result<SyncReport> {
        tracing::info!(countries = ?countries, "Starting incremental update");

        let inventory = scan_sources(&self.filter, countries);
        let changes = self.db.with_conn(|conn| detect_changes(conn, &inventory))?;

        let mut report = SyncReport::new(SyncMode::Incremental, countries.to_vec());
        report.unavailable = inventory.unavailable_countries();
        report.files_scanned = inventory.files.len();
        report.files_unchanged = changes.unchanged;

        // Rows committed by a run whose rebuild failed still need indexing.
        let stale = self.db.with_conn(is_stale)?;
        if changes.is_empty() && !stale {
            tracing::info!("No source changes detected");
            return Ok(report);
        }
        if changes.is_empty() {
            tracing::info!("No source changes, rebuilding out-of-date indexes");
        }

        self.apply_changes(&changes, &mut report);

        report.stats = Some(rebuild_indexes(&self.db, &self.stats)?);
        report.indexes_rebuilt = true;
        Ok(report)
    }

    /// Removals first, so a renamed file's old rows are gone before its new
    /// rows are written.
    fn apply_changes(&self, changes: &ChangeSet, report: &mut SyncReport) {
        for path in &changes.removed {
            report.files_removed += 1;
            match remove_file(&self.db, path) {
                Ok(series) => report.series_removed += series,
                Err(e) => report.record_failure(path.clone(), &e),
            }
        }

        for pending in &changes.changed {
            report.files_changed += 1;
            match load_file(&self.db, &pending.source, pending.mtime) {
                Ok(outcome) => report.record_load(outcome),
                Err(e) => report.record_failure(pending.source.key(), &e),
            }
        }
    }

    /// Inventory the given countries without touching the store.
    #[must_use]
    pub fn inventory(&self, countries: &[String]) -> Inventory {
        scan_sources(&self.filter, &self.requested(countries))
    }

    /// Ingest one file outside of a batch, e.g. for ad-hoc repair.
    ///
    /// Does not rebuild indexes; call [`Self::sync`] afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be stat'ed or loaded.
    pub fn load_one(&self, source: &SourceFile) -> Result<LoadOutcome> {
        let mtime = file_mtime(&source.path)?;
        load_file(&self.db, source, mtime)
    }
}
