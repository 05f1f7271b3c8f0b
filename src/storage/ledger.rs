//! Processed-file ledger for incremental synchronization.

use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension};

use super::models::ProcessedFile;
use crate::error::StorageError;
use crate::Result;

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProcessedFile> {
    Ok(ProcessedFile {
        filepath: row.get(0)?,
        country: row.get(1)?,
        frequency: row.get(2)?,
        mtime: row.get(3)?,
        series_count: row.get(4)?,
        last_processed: row.get(5)?,
    })
}

/// Get the ledger entry for a file.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn get_processed_file(conn: &Connection, filepath: &str) -> Result<Option<ProcessedFile>> {
    conn.query_row(
        "SELECT filepath, country, frequency, mtime, series_count, last_processed
         FROM processed_files WHERE filepath = ?",
        [filepath],
        row_to_entry,
    )
    .optional()
    .map_err(|e| StorageError::Database(e.to_string()).into())
}

/// Insert or update a ledger entry.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn upsert_processed_file(conn: &Connection, entry: &ProcessedFile) -> Result<()> {
    conn.execute(
        "INSERT INTO processed_files (filepath, country, frequency, mtime, series_count, last_processed)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(filepath) DO UPDATE SET
             country = excluded.country,
             frequency = excluded.frequency,
             mtime = excluded.mtime,
             series_count = excluded.series_count,
             last_processed = excluded.last_processed",
        rusqlite::params![
            entry.filepath,
            entry.country,
            entry.frequency,
            entry.mtime,
            entry.series_count,
            entry.last_processed
        ],
    )
    .map_err(|e| StorageError::Database(format!("failed to record processed file: {e}")))?;
    Ok(())
}

/// Delete a ledger entry. Returns whether a row was removed.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn delete_processed_file(conn: &Connection, filepath: &str) -> Result<bool> {
    let removed = conn
        .execute("DELETE FROM processed_files WHERE filepath = ?", [filepath])
        .map_err(|e| StorageError::Database(e.to_string()))?;
    Ok(removed > 0)
}

/// Stored modification times for every file of the given countries.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn mtimes_for_countries(
    conn: &Connection,
    countries: &[String],
) -> Result<HashMap<String, i64>> {
    if countries.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders = vec!["?"; countries.len()].join(",");
    let sql =
        format!("SELECT filepath, mtime FROM processed_files WHERE country IN ({placeholders})");

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| StorageError::Database(e.to_string()))?;

    let rows = stmt
        .query_map(rusqlite::params_from_iter(countries), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })
        .map_err(|e| StorageError::Database(e.to_string()))?
        .collect::<std::result::Result<HashMap<_, _>, _>>()
        .map_err(|e| StorageError::Database(e.to_string()))?;

    Ok(rows)
}

/// List all ledger entries ordered by path.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn list_processed_files(conn: &Connection) -> Result<Vec<ProcessedFile>> {
    let mut stmt = conn
        .prepare(
            "SELECT filepath, country, frequency, mtime, series_count, last_processed
             FROM processed_files ORDER BY filepath",
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

    let entries = stmt
        .query_map([], row_to_entry)
        .map_err(|e| StorageError::Database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| StorageError::Database(e.to_string()))?;

    Ok(entries)
}

/// Count tracked files.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn count_processed_files(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM processed_files", [], |row| row.get(0))
        .map_err(|e| StorageError::Database(e.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{create_schema, Database, Frequency};

    fn setup_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(create_schema).unwrap();
        db
    }

    #[test]
    fn test_upsert_and_get() {
        let db = setup_db();

        db.with_conn(|conn| {
            let entry = ProcessedFile::new("/jp/cpi_m.parquet", "jp", Frequency::Monthly, 100, 4);
            upsert_processed_file(conn, &entry)?;

            let stored = get_processed_file(conn, "/jp/cpi_m.parquet")?.unwrap();
            assert_eq!(stored, entry);

            let updated = ProcessedFile::new("/jp/cpi_m.parquet", "jp", Frequency::Monthly, 200, 5);
            upsert_processed_file(conn, &updated)?;
            let stored = get_processed_file(conn, "/jp/cpi_m.parquet")?.unwrap();
            assert_eq!(stored.mtime, 200);
            assert_eq!(stored.series_count, 5);
            assert_eq!(count_processed_files(conn)?, 1);

            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_get_nonexistent() {
        let db = setup_db();
        let result = db
            .with_conn(|conn| get_processed_file(conn, "/nonexistent"))
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_delete() {
        let db = setup_db();

        db.with_conn(|conn| {
            upsert_processed_file(
                conn,
                &ProcessedFile::new("/kr/gdp_q.parquet", "kr", Frequency::Quarterly, 1, 1),
            )?;
            assert!(delete_processed_file(conn, "/kr/gdp_q.parquet")?);
            assert!(!delete_processed_file(conn, "/kr/gdp_q.parquet")?);
            assert!(get_processed_file(conn, "/kr/gdp_q.parquet")?.is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_mtimes_scoped_to_countries() {
        let db = setup_db();

        db.with_conn(|conn| {
            upsert_processed_file(
                conn,
                &ProcessedFile::new("/jp/a_m.parquet", "jp", Frequency::Monthly, 10, 1),
            )?;
            upsert_processed_file(
                conn,
                &ProcessedFile::new("/cn/b_a.parquet", "cn", Frequency::Annual, 20, 1),
            )?;

            let jp = mtimes_for_countries(conn, &["jp".to_string()])?;
            assert_eq!(jp.len(), 1);
            assert_eq!(jp.get("/jp/a_m.parquet"), Some(&10));

            let both = mtimes_for_countries(conn, &["jp".to_string(), "cn".to_string()])?;
            assert_eq!(both.len(), 2);

            assert!(mtimes_for_countries(conn, &[])?.is_empty());
            assert_eq!(list_processed_files(conn)?.len(), 2);
            Ok(())
        })
        .unwrap();
    }
}
