//! Precomputed aggregate statistics and their in-process cache.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rusqlite::{Connection, OptionalExtension};

use super::connection::Database;
use super::models::AggregateStats;
use crate::error::StorageError;
use crate::Result;

const KEY_TOTAL_SERIES: &str = "total_series";
const KEY_TOTAL_SERIES_FREQ: &str = "total_series_freq";
const KEY_TOTAL_DATA_POINTS: &str = "total_data_points";
const KEY_BY_COUNTRY: &str = "by_country";
const KEY_BY_FREQUENCY: &str = "by_frequency";
/// Present while series rows have changed since the last rebuild.
const KEY_STALE: &str = "stale";

fn scalar(conn: &Connection, sql: &str) -> Result<i64> {
    conn.query_row(sql, [], |row| row.get(0))
        .map_err(|e| StorageError::Database(format!("stats query failed: {e}")).into())
}

fn grouped(conn: &Connection, sql: &str) -> Result<BTreeMap<String, i64>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| StorageError::Database(format!("stats query failed: {e}")))?;

    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
        .map_err(|e| StorageError::Database(format!("stats query failed: {e}")))?
        .collect::<std::result::Result<BTreeMap<_, _>, _>>()
        .map_err(|e| StorageError::Database(format!("stats query failed: {e}")))?;

    Ok(rows)
}

/// Aggregate the current series table.
///
/// # Errors
///
/// Returns an error if any aggregation query fails.
pub fn compute_stats(conn: &Connection) -> Result<AggregateStats> {
    Ok(AggregateStats {
        total_series: scalar(conn, "SELECT COUNT(DISTINCT name) FROM series")?,
        total_series_freq: scalar(conn, "SELECT COUNT(*) FROM series")?,
        total_data_points: scalar(conn, "SELECT COALESCE(SUM(count), 0) FROM series")?,
        by_country: grouped(
            conn,
            "SELECT country, COUNT(DISTINCT name) FROM series GROUP BY country",
        )?,
        by_frequency: grouped(conn, "SELECT frequency, COUNT(*) FROM series GROUP BY frequency")?,
    })
}

/// Replace the contents of the `stats` table.
///
/// # Errors
///
/// Returns an error if the table cannot be written.
pub fn write_stats(conn: &Connection, stats: &AggregateStats) -> Result<()> {
    let by_country = serde_json::to_string(&stats.by_country)
        .map_err(|e| crate::Error::internal(format!("failed to encode stats: {e}")))?;
    let by_frequency = serde_json::to_string(&stats.by_frequency)
        .map_err(|e| crate::Error::internal(format!("failed to encode stats: {e}")))?;

    let entries = [
        (KEY_TOTAL_SERIES, stats.total_series.to_string()),
        (KEY_TOTAL_SERIES_FREQ, stats.total_series_freq.to_string()),
        (KEY_TOTAL_DATA_POINTS, stats.total_data_points.to_string()),
        (KEY_BY_COUNTRY, by_country),
        (KEY_BY_FREQUENCY, by_frequency),
    ];

    conn.execute("DELETE FROM stats", [])
        .map_err(|e| StorageError::Database(format!("failed to clear stats: {e}")))?;

    for (key, value) in entries {
        conn.execute(
            "INSERT INTO stats (key, value) VALUES (?, ?)",
            rusqlite::params![key, value],
        )
        .map_err(|e| StorageError::Database(format!("failed to write stat {key}: {e}")))?;
    }

    Ok(())
}

/// Flag the search index and stats as out of date.
///
/// Called inside every write transaction that touches series rows. The
/// flag is cleared by [`write_stats`], so it survives a failed rebuild.
///
/// # Errors
///
/// Returns an error if the flag cannot be written.
pub fn mark_stale(conn: &Connection) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO stats (key, value) VALUES (?, '1')",
        [KEY_STALE],
    )
    .map_err(|e| StorageError::Database(format!("failed to flag stale stats: {e}")))?;
    Ok(())
}

/// Whether series rows changed after the last successful rebuild.
///
/// # Errors
///
/// Returns an error if the stats table cannot be read.
pub fn is_stale(conn: &Connection) -> Result<bool> {
    conn.query_row("SELECT 1 FROM stats WHERE key = ?", [KEY_STALE], |_| Ok(()))
        .optional()
        .map(|found| found.is_some())
        .map_err(|e| StorageError::Database(format!("failed to read stats: {e}")).into())
}

/// Read the materialized statistics.
///
/// Returns `None` if the table has never been populated.
///
/// # Errors
///
/// Returns an error if the table cannot be read or a value is malformed.
pub fn read_stats(conn: &Connection) -> Result<Option<AggregateStats>> {
    let mut raw = grouped_text(conn)?;
    raw.remove(KEY_STALE);
    if raw.is_empty() {
        return Ok(None);
    }

    let number = |key: &str| -> Result<i64> {
        raw.get(key)
            .map_or(Ok(0), |v| v.parse::<i64>())
            .map_err(|e| StorageError::Database(format!("malformed stat {key}: {e}")).into())
    };
    let map = |key: &str| -> Result<BTreeMap<String, i64>> {
        raw.get(key)
            .map_or_else(|| Ok(BTreeMap::new()), |v| serde_json::from_str(v))
            .map_err(|e| StorageError::Database(format!("malformed stat {key}: {e}")).into())
    };

    Ok(Some(AggregateStats {
        total_series: number(KEY_TOTAL_SERIES)?,
        total_series_freq: number(KEY_TOTAL_SERIES_FREQ)?,
        total_data_points: number(KEY_TOTAL_DATA_POINTS)?,
        by_country: map(KEY_BY_COUNTRY)?,
        by_frequency: map(KEY_BY_FREQUENCY)?,
    }))
}

fn grouped_text(conn: &Connection) -> Result<BTreeMap<String, String>> {
    let mut stmt = conn
        .prepare("SELECT key, value FROM stats")
        .map_err(|e| StorageError::Database(format!("failed to read stats: {e}")))?;

    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(|e| StorageError::Database(format!("failed to read stats: {e}")))?
        .collect::<std::result::Result<BTreeMap<_, _>, _>>()
        .map_err(|e| StorageError::Database(format!("failed to read stats: {e}")))?;

    Ok(rows)
}

/// Process-lifetime cache of the aggregate statistics.
///
/// Owned by whoever serves stats; the index builder replaces the cached copy
/// after every batch. Clone is cheap and clones share the cache.
#[derive(Debug, Clone, Default)]
pub struct StatsCache {
    inner: Arc<RwLock<Option<AggregateStats>>>,
}

impl StatsCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached copy, if any.
    #[must_use]
    pub fn cached(&self) -> Option<AggregateStats> {
        self.inner.read().clone()
    }

    /// Return the cached stats, loading them from the store on a miss.
    ///
    /// # Errors
    ///
    /// Returns an error if the stats table cannot be read.
    pub fn get_or_load(&self, db: &Database) -> Result<AggregateStats> {
        if let Some(stats) = self.cached() {
            return Ok(stats);
        }

        let loaded = db.with_conn(read_stats)?.unwrap_or_default();
        *self.inner.write() = Some(loaded.clone());
        Ok(loaded)
    }

    /// Replace the cached copy with freshly computed stats.
    pub fn replace(&self, stats: AggregateStats) {
        *self.inner.write() = Some(stats);
    }

    /// Drop the cached copy so the next read goes to the store.
    pub fn invalidate(&self) {
        *self.inner.write() = None;
    }
}
