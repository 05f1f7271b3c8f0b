//! Series and data-point storage operations.
//!
//! Writes here are building blocks for the per-file replace; callers wrap
//! them in a single transaction.

use std::collections::HashMap;

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};

use super::models::{DataPoint, Frequency, SeriesRecord};
use crate::error::StorageError;
use crate::Result;

/// Maximum ids bound into one `IN (...)` clause.
const ID_BATCH: usize = 500;

/// ISO calendar-day format used for stored dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Per-series aggregates computed from one file's long-form rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesSummary {
    pub name: String,
    pub min_date: NaiveDate,
    pub max_date: NaiveDate,
    pub count: i64,
}

/// Provenance shared by every series row written from one file.
#[derive(Debug, Clone, Copy)]
pub struct SeriesOrigin<'a> {
    pub country: &'a str,
    pub frequency: Frequency,
    pub source_file: &'a str,
}

fn row_to_series(row: &rusqlite::Row<'_>) -> rusqlite::Result<SeriesRecord> {
    Ok(SeriesRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        country: row.get(2)?,
        frequency: row.get(3)?,
        source_file: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        min_date: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        max_date: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        count: row.get::<_, Option<i64>>(7)?.unwrap_or_default(),
    })
}

const SERIES_COLUMNS: &str =
    "id, name, country, frequency, source_file, min_date, max_date, count";

/// Insert or update series rows keyed by `(name, frequency)`.
///
/// # Errors
///
/// Returns an error if any statement fails.
pub fn upsert_series(
    conn: &Connection,
    origin: SeriesOrigin<'_>,
    summaries: &[SeriesSummary],
) -> Result<()> {
    let mut stmt = conn
        .prepare_cached(
            "INSERT INTO series (name, country, frequency, source_file, min_date, max_date, count)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(name, frequency) DO UPDATE SET
                 country = excluded.country,
                 source_file = excluded.source_file,
                 min_date = excluded.min_date,
                 max_date = excluded.max_date,
                 count = excluded.count",
        )
        .map_err(|e| StorageError::Database(format!("failed to prepare series upsert: {e}")))?;

    for summary in summaries {
        stmt.execute(params![
            summary.name,
            origin.country,
            origin.frequency,
            origin.source_file,
            summary.min_date.format(DATE_FORMAT).to_string(),
            summary.max_date.format(DATE_FORMAT).to_string(),
            summary.count,
        ])
        .map_err(|e| {
            StorageError::Database(format!("failed to upsert series '{}': {e}", summary.name))
        })?;
    }

    tracing::trace!(count = summaries.len(), source = origin.source_file, "Upserted series");
    Ok(())
}

/// Map series name to id for every series attributed to a file and frequency.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn series_ids_for_source(
    conn: &Connection,
    source_file: &str,
    frequency: Frequency,
) -> Result<HashMap<String, i64>> {
    let mut stmt = conn
        .prepare_cached("SELECT name, id FROM series WHERE source_file = ? AND frequency = ?")
        .map_err(|e| StorageError::Database(e.to_string()))?;

    let ids = stmt
        .query_map(params![source_file, frequency], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })
        .map_err(|e| StorageError::Database(e.to_string()))?
        .collect::<std::result::Result<HashMap<_, _>, _>>()
        .map_err(|e| StorageError::Database(e.to_string()))?;

    Ok(ids)
}

/// Delete every data point owned by the given series. Returns rows deleted.
///
/// # Errors
///
/// Returns an error if a delete fails.
pub fn delete_points_for_series(conn: &Connection, series_ids: &[i64]) -> Result<usize> {
    delete_by_ids(conn, "data", "series_id", series_ids)
}

/// Delete series rows (and their data points). Returns series deleted.
///
/// # Errors
///
/// Returns an error if a delete fails.
pub fn delete_series(conn: &Connection, series_ids: &[i64]) -> Result<usize> {
    delete_points_for_series(conn, series_ids)?;
    delete_by_ids(conn, "series", "id", series_ids)
}

fn delete_by_ids(conn: &Connection, table: &str, column: &str, ids: &[i64]) -> Result<usize> {
    let mut deleted = 0;
    for batch in ids.chunks(ID_BATCH) {
        let placeholders = vec!["?"; batch.len()].join(",");
        let sql = format!("DELETE FROM {table} WHERE {column} IN ({placeholders})");
        deleted += conn
            .execute(&sql, rusqlite::params_from_iter(batch))
            .map_err(|e| StorageError::Database(format!("failed to delete from {table}: {e}")))?;
    }
    Ok(deleted)
}

/// Bulk-insert data points for one series.
///
/// # Errors
///
/// Returns an error if an insert fails, including a duplicate date.
pub fn insert_points(conn: &Connection, series_id: i64, points: &[(NaiveDate, f64)]) -> Result<()> {
    let mut stmt = conn
        .prepare_cached("INSERT INTO data (series_id, date, value) VALUES (?, ?, ?)")
        .map_err(|e| StorageError::Database(format!("failed to prepare data insert: {e}")))?;

    for (date, value) in points {
        stmt.execute(params![series_id, date.format(DATE_FORMAT).to_string(), value])
            .map_err(|e| StorageError::Database(format!("failed to insert data point: {e}")))?;
    }
    Ok(())
}

/// Ids of every series whose rows came from a file, regardless of frequency.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn series_ids_from_file(conn: &Connection, source_file: &str) -> Result<Vec<i64>> {
    let mut stmt = conn
        .prepare_cached("SELECT id FROM series WHERE source_file = ?")
        .map_err(|e| StorageError::Database(e.to_string()))?;

    let ids = stmt
        .query_map([source_file], |row| row.get(0))
        .map_err(|e| StorageError::Database(e.to_string()))?
        .collect::<std::result::Result<Vec<i64>, _>>()
        .map_err(|e| StorageError::Database(e.to_string()))?;

    Ok(ids)
}

/// Look up a series by name, optionally narrowed to one frequency.
///
/// Without a frequency the series with the most data points wins.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_series(
    conn: &Connection,
    name: &str,
    frequency: Option<Frequency>,
) -> Result<Option<SeriesRecord>> {
    let result = match frequency {
        Some(freq) => conn
            .query_row(
                &format!("SELECT {SERIES_COLUMNS} FROM series WHERE name = ? AND frequency = ?"),
                params![name, freq],
                row_to_series,
            )
            .optional(),
        None => conn
            .query_row(
                &format!(
                    "SELECT {SERIES_COLUMNS} FROM series WHERE name = ?
                     ORDER BY count DESC, frequency LIMIT 1"
                ),
                [name],
                row_to_series,
            )
            .optional(),
    };

    result.map_err(|e| StorageError::Database(format!("failed to get series: {e}")).into())
}

/// List series attributed to a source file, ordered by name.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn list_series_for_file(conn: &Connection, source_file: &str) -> Result<Vec<SeriesRecord>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {SERIES_COLUMNS} FROM series WHERE source_file = ? ORDER BY name, frequency"
        ))
        .map_err(|e| StorageError::Database(e.to_string()))?;

    let series = stmt
        .query_map([source_file], row_to_series)
        .map_err(|e| StorageError::Database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| StorageError::Database(e.to_string()))?;

    Ok(series)
}

/// Fetch a series' data points in date order, optionally bounded.
///
/// Bounds are inclusive ISO dates.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_points(
    conn: &Connection,
    series_id: i64,
    start: Option<&str>,
    end: Option<&str>,
) -> Result<Vec<DataPoint>> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT date, value FROM data
             WHERE series_id = ?1
               AND (?2 IS NULL OR date >= ?2)
               AND (?3 IS NULL OR date <= ?3)
             ORDER BY date",
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

    let points = stmt
        .query_map(params![series_id, start, end], |row| {
            Ok(DataPoint {
                date: row.get(0)?,
                value: row.get(1)?,
            })
        })
        .map_err(|e| StorageError::Database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| StorageError::Database(e.to_string()))?;

    Ok(points)
}

/// Count all stored data points.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn count_points(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM data", [], |row| row.get(0))
        .map_err(|e| StorageError::Database(e.to_string()).into())
}

/// Count all series rows.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn count_series(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM series", [], |row| row.get(0))
        .map_err(|e| StorageError::Database(e.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{create_schema, Database};

    fn setup_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(create_schema).unwrap();
        db
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn summary(name: &str, min: &str, max: &str, count: i64) -> SeriesSummary {
        SeriesSummary {
            name: name.to_string(),
            min_date: day(min),
            max_date: day(max),
            count,
        }
    }

    const ORIGIN: SeriesOrigin<'static> = SeriesOrigin {
        country: "jp",
        frequency: Frequency::Monthly,
        source_file: "/jp/prices_m.parquet",
    };

    #[test]
    fn test_upsert_is_idempotent() {
        let db = setup_db();

        db.with_conn(|conn| {
            let rows = [summary("cpi", "2020-01-01", "2020-03-01", 3)];
            upsert_series(conn, ORIGIN, &rows)?;
            let first = get_series(conn, "cpi", Some(Frequency::Monthly))?.unwrap();

            upsert_series(conn, ORIGIN, &rows)?;
            let second = get_series(conn, "cpi", Some(Frequency::Monthly))?.unwrap();

            assert_eq!(first, second);
            assert_eq!(count_series(conn)?, 1);
            assert_eq!(second.min_date, "2020-01-01");
            assert_eq!(second.count, 3);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_same_name_different_frequency_is_distinct() {
        let db = setup_db();

        db.with_conn(|conn| {
            upsert_series(conn, ORIGIN, &[summary("gdp", "2020-01-01", "2020-12-01", 12)])?;
            let quarterly = SeriesOrigin {
                frequency: Frequency::Quarterly,
                source_file: "/jp/gdp_q.parquet",
                ..ORIGIN
            };
            upsert_series(conn, quarterly, &[summary("gdp", "2020-01-01", "2020-10-01", 4)])?;

            assert_eq!(count_series(conn)?, 2);
            let best = get_series(conn, "gdp", None)?.unwrap();
            assert_eq!(best.frequency, Frequency::Monthly);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_insert_and_read_points_in_order() {
        let db = setup_db();

        db.with_conn(|conn| {
            upsert_series(conn, ORIGIN, &[summary("cpi", "2020-01-01", "2020-03-01", 3)])?;
            let ids = series_ids_for_source(conn, ORIGIN.source_file, Frequency::Monthly)?;
            let id = ids["cpi"];

            insert_points(
                conn,
                id,
                &[
                    (day("2020-03-01"), 3.0),
                    (day("2020-01-01"), 1.0),
                    (day("2020-02-01"), 2.0),
                ],
            )?;

            let all = get_points(conn, id, None, None)?;
            let dates: Vec<_> = all.iter().map(|p| p.date.as_str()).collect();
            assert_eq!(dates, vec!["2020-01-01", "2020-02-01", "2020-03-01"]);

            let ranged = get_points(conn, id, Some("2020-02-01"), None)?;
            assert_eq!(ranged.len(), 2);
            let ranged = get_points(conn, id, Some("2020-01-15"), Some("2020-02-15"))?;
            assert_eq!(ranged, vec![DataPoint { date: "2020-02-01".to_string(), value: 2.0 }]);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_duplicate_date_rejected() {
        let db = setup_db();

        db.with_conn(|conn| {
            upsert_series(conn, ORIGIN, &[summary("cpi", "2020-01-01", "2020-01-01", 1)])?;
            let id = series_ids_for_source(conn, ORIGIN.source_file, Frequency::Monthly)?["cpi"];
            let result = insert_points(conn, id, &[(day("2020-01-01"), 1.0), (day("2020-01-01"), 2.0)]);
            assert!(result.is_err());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_delete_series_removes_points() {
        let db = setup_db();

        db.with_conn(|conn| {
            upsert_series(
                conn,
                ORIGIN,
                &[
                    summary("cpi", "2020-01-01", "2020-01-01", 1),
                    summary("ppi", "2020-01-01", "2020-01-01", 1),
                ],
            )?;
            let ids = series_ids_for_source(conn, ORIGIN.source_file, Frequency::Monthly)?;
            for id in ids.values() {
                insert_points(conn, *id, &[(day("2020-01-01"), 1.0)])?;
            }
            assert_eq!(count_points(conn)?, 2);

            let from_file = series_ids_from_file(conn, ORIGIN.source_file)?;
            assert_eq!(from_file.len(), 2);

            assert_eq!(delete_series(conn, &from_file)?, 2);
            assert_eq!(count_points(conn)?, 0);
            assert!(list_series_for_file(conn, ORIGIN.source_file)?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_delete_in_batches() {
        let db = setup_db();

        db.with_conn(|conn| {
            let rows: Vec<_> = (0..1203)
                .map(|i| summary(&format!("s{i}"), "2021-01-01", "2021-01-01", 1))
                .collect();
            upsert_series(conn, ORIGIN, &rows)?;
            let ids: Vec<i64> = series_ids_from_file(conn, ORIGIN.source_file)?;
            assert_eq!(delete_series(conn, &ids)?, 1203);
            assert_eq!(count_series(conn)?, 0);
            Ok(())
        })
        .unwrap();
    }
}
