//! Database schema definitions and migration probing.
//!
//! The store is never migrated in place: when the probe finds a ledger or
//! schema inconsistency the orchestrator drops everything and rebuilds.

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::Result;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Tables owned by the sync engine, in drop order.
const TABLES: &[&str] = &[
    "data",
    "series_fts",
    "series",
    "processed_files",
    "stats",
    "schema_migrations",
];

/// Why a full rebuild was chosen over an incremental update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildReason {
    /// The caller asked for it.
    Requested,
    /// No processing ledger table (fresh or legacy store).
    MissingLedger,
    /// The series table lacks the `source_file` provenance column.
    MissingProvenance,
    /// The store was written by a different schema version.
    SchemaVersion,
    /// The ledger is empty but series rows already exist.
    UntrackedData,
}

/// Create all tables and secondary indexes if they don't exist.
///
/// # Errors
///
/// Returns an error if any statement fails.
pub fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS series (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            country TEXT NOT NULL,
            frequency TEXT NOT NULL,
            source_file TEXT,
            min_date TEXT,
            max_date TEXT,
            count INTEGER,
            UNIQUE(name, frequency)
        );

        CREATE TABLE IF NOT EXISTS data (
            series_id INTEGER NOT NULL REFERENCES series(id) ON DELETE CASCADE,
            date TEXT NOT NULL,
            value REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS processed_files (
            filepath TEXT PRIMARY KEY,
            country TEXT NOT NULL,
            frequency TEXT NOT NULL,
            mtime INTEGER NOT NULL,
            series_count INTEGER NOT NULL,
            last_processed TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS stats (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_series_name ON series(name);
        CREATE INDEX IF NOT EXISTS idx_series_country ON series(country);
        CREATE INDEX IF NOT EXISTS idx_series_freq ON series(frequency);
        CREATE INDEX IF NOT EXISTS idx_series_source ON series(source_file);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_data_date ON data(series_id, date);
        CREATE INDEX IF NOT EXISTS idx_processed_country ON processed_files(country);
        ",
    )
    .map_err(|e| StorageError::Migration(format!("failed to create schema: {e}")))?;

    if current_version(conn)? < SCHEMA_VERSION {
        record_version(conn, SCHEMA_VERSION)?;
    }

    Ok(())
}

/// Drop every table and recreate an empty schema.
///
/// # Errors
///
/// Returns an error if any table cannot be dropped or created.
pub fn reset_schema(conn: &Connection) -> Result<()> {
    for table in TABLES {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {table}"))
            .map_err(|e| StorageError::Migration(format!("failed to drop {table}: {e}")))?;
    }
    tracing::info!("Dropped all tables for full rebuild");

    create_schema(conn)
}

/// Decide whether an incremental update is unsafe on this store.
///
/// Returns the reason a full rebuild is required, or `None` when the ledger
/// and provenance columns are consistent.
///
/// # Errors
///
/// Returns an error if probing the schema fails.
pub fn migration_reason(conn: &Connection) -> Result<Option<RebuildReason>> {
    if !table_exists(conn, "processed_files")? || !table_exists(conn, "series")? {
        return Ok(Some(RebuildReason::MissingLedger));
    }

    if !column_exists(conn, "series", "source_file")? {
        return Ok(Some(RebuildReason::MissingProvenance));
    }

    if !table_exists(conn, "schema_migrations")? || current_version(conn)? != SCHEMA_VERSION {
        return Ok(Some(RebuildReason::SchemaVersion));
    }

    let tracked = count(conn, "processed_files")?;
    let series = count(conn, "series")?;
    if tracked == 0 && series > 0 {
        return Ok(Some(RebuildReason::UntrackedData));
    }

    Ok(None)
}

/// Check whether a table (or virtual table) exists.
///
/// # Errors
///
/// Returns an error if the catalog query fails.
pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?",
        [table],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .map_err(|e| StorageError::Migration(format!("failed to probe table {table}: {e}")).into())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .map_err(|e| StorageError::Migration(format!("failed to inspect {table}: {e}")))?;

    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(|e| StorageError::Migration(format!("failed to inspect {table}: {e}")))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| StorageError::Migration(format!("failed to inspect {table}: {e}")))?;

    Ok(columns.iter().any(|c| c == column))
}

fn count(conn: &Connection, table: &str) -> Result<i64> {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .map_err(|e| StorageError::Database(format!("failed to count {table}: {e}")).into())
}

fn current_version(conn: &Connection) -> Result<i32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
    .map_err(|e| StorageError::Migration(format!("failed to get version: {e}")).into())
}

fn record_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_migrations (version, applied_at) VALUES (?, ?)",
        rusqlite::params![version, chrono::Utc::now().timestamp()],
    )
    .map_err(|e| StorageError::Migration(format!("failed to record version: {e}")))?;

    tracing::debug!(version, "Recorded schema version");
    Ok(())
}
