//! `SQLite` store for series, data points and sync bookkeeping.
//!
//! This module provides persistent storage for:
//! - Series metadata and long-form data points
//! - The processed-file ledger for incremental sync
//! - The full-text search index and aggregate statistics

mod connection;
mod ledger;
mod models;
mod schema;
mod search;
mod series;
mod stats;

pub use connection::{CheckpointOutcome, Database, DEFAULT_BUSY_TIMEOUT};
pub use ledger::{
    count_processed_files, delete_processed_file, get_processed_file, list_processed_files,
    mtimes_for_countries, upsert_processed_file,
};
pub use models::{AggregateStats, DataPoint, Frequency, ProcessedFile, SeriesRecord};
pub use schema::{
    create_schema, migration_reason, reset_schema, table_exists, RebuildReason, SCHEMA_VERSION,
};
pub use search::{rebuild_search_index, search_series, SearchOptions};
pub use series::{
    count_points, count_series, delete_points_for_series, delete_series, get_points, get_series,
    insert_points, list_series_for_file, series_ids_for_source, series_ids_from_file,
    upsert_series, SeriesOrigin, SeriesSummary, DATE_FORMAT,
};
pub use stats::{compute_stats, is_stale, mark_stale, read_stats, write_stats, StatsCache};

/// Open (or create) the store file and check that it responds.
///
/// Tables are not created here: the orchestrator first probes the existing
/// schema with [`migration_reason`] to choose between full and incremental
/// sync.
///
/// # Errors
///
/// Returns an error if the database cannot be opened.
pub fn open_store(path: impl AsRef<std::path::Path>) -> crate::Result<Database> {
    let db = Database::open(path)?;
    db.health_check()?;
    tracing::info!(path = db.path(), "Store opened, schema version {SCHEMA_VERSION}");
    Ok(db)
}
