//! Per-file ingestion and teardown.
//!
//! Each operation is one transaction: a failure anywhere rolls back every
//! row it touched and leaves the previous ledger entry in place, so the file
//! is retried on the next run.

use rusqlite::Connection;

use super::inventory::SourceFile;
use super::reader::{read_long_frame, LongFrame};
use crate::storage::{
    delete_points_for_series, delete_processed_file, delete_series, insert_points, mark_stale,
    series_ids_for_source, series_ids_from_file, upsert_processed_file, upsert_series, Database,
    ProcessedFile, SeriesOrigin,
};
use crate::Result;

/// Outcome of loading one file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    /// Series written from the file.
    pub series: usize,
    /// Data points written from the file.
    pub points: usize,
    /// Series from an earlier version of the file that no longer exist.
    pub dropped: usize,
}

/// Ingest one source file, replacing everything it contributed before.
///
/// The file is decoded before the transaction starts so readers are not
/// blocked on Parquet I/O.
///
/// # Errors
///
/// Returns an error if the file cannot be read or any write fails; nothing
/// is committed in that case.
pub fn load_file(db: &Database, file: &SourceFile, mtime: i64) -> Result<LoadOutcome> {
    let frame = read_long_frame(&file.path)?;
    let key = file.key();

    let outcome = db.with_transaction(|conn| replace_file(conn, file, &key, mtime, &frame))?;

    tracing::debug!(
        path = %key,
        country = %file.country,
        series = outcome.series,
        points = outcome.points,
        dropped = outcome.dropped,
        "Loaded source file"
    );
    Ok(outcome)
}

fn replace_file(
    conn: &Connection,
    file: &SourceFile,
    key: &str,
    mtime: i64,
    frame: &LongFrame,
) -> Result<LoadOutcome> {
    let origin = SeriesOrigin {
        country: &file.country,
        frequency: file.frequency,
        source_file: key,
    };

    // Anything this file owned that the new version no longer carries.
    let previous = series_ids_for_source(conn, key, file.frequency)?;
    let stale: Vec<i64> = previous
        .iter()
        .filter(|(name, _)| !frame.series.iter().any(|s| &s.name == *name))
        .map(|(_, id)| *id)
        .collect();
    if !stale.is_empty() {
        delete_series(conn, &stale)?;
    }

    let summaries = frame.summaries();
    upsert_series(conn, origin, &summaries)?;

    let ids = series_ids_for_source(conn, key, file.frequency)?;
    let owned: Vec<i64> = ids.values().copied().collect();
    delete_points_for_series(conn, &owned)?;

    let mut points = 0;
    for series in &frame.series {
        let Some(id) = ids.get(&series.name) else {
            continue;
        };
        insert_points(conn, *id, &series.points)?;
        points += series.points.len();
    }

    let count = i64::try_from(frame.series.len()).unwrap_or(i64::MAX);
    upsert_processed_file(
        conn,
        &ProcessedFile::new(key, &file.country, file.frequency, mtime, count),
    )?;
    mark_stale(conn)?;

    Ok(LoadOutcome {
        series: frame.series.len(),
        points,
        dropped: stale.len(),
    })
}

/// Tear down everything a vanished source file contributed.
///
/// Returns the number of series removed.
///
/// # Errors
///
/// Returns an error if any delete fails; nothing is committed in that case.
pub fn remove_file(db: &Database, filepath: &str) -> Result<usize> {
    let removed = db.with_transaction(|conn| {
        let ids = series_ids_from_file(conn, filepath)?;
        let removed = delete_series(conn, &ids)?;
        delete_processed_file(conn, filepath)?;
        mark_stale(conn)?;
        Ok(removed)
    })?;

    tracing::debug!(path = %filepath, series = removed, "Removed source file");
    Ok(removed)
}
