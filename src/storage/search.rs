//! Full-text search over series names.
//!
//! `series_fts` is an FTS5 external-content table over `series.name`. It is
//! rebuilt wholesale after every sync batch rather than maintained by
//! triggers.

use rusqlite::Connection;

use super::models::{Frequency, SeriesRecord};
use crate::error::StorageError;
use crate::Result;

/// Search options for series lookup.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Maximum number of results to return.
    pub limit: usize,

    /// Filter by frequency.
    pub frequency: Option<Frequency>,

    /// Filter by country id.
    pub country: Option<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 50,
            frequency: None,
            country: None,
        }
    }
}

impl SearchOptions {
    /// Create new search options with limit.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    /// Filter by frequency.
    #[must_use]
    pub const fn with_frequency(mut self, frequency: Frequency) -> Self {
        self.frequency = Some(frequency);
        self
    }

    /// Filter by country.
    #[must_use]
    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }
}

/// Recreate the search index from the current series names.
///
/// # Errors
///
/// Returns an error if the FTS table cannot be created or rebuilt.
pub fn rebuild_search_index(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS series_fts
             USING fts5(name, content='series', content_rowid='id');
         INSERT INTO series_fts(series_fts) VALUES('rebuild');",
    )
    .map_err(|e| StorageError::Database(format!("failed to rebuild search index: {e}")))?;

    tracing::debug!("Search index rebuilt");
    Ok(())
}

/// Search series by name.
///
/// Tries an FTS prefix-phrase match first, then falls back to a substring
/// `LIKE` scan when the index yields nothing (e.g. mid-token fragments).
/// Results are ordered by data point count, largest first.
///
/// # Errors
///
/// Returns an error if the fallback query fails.
pub fn search_series(
    conn: &Connection,
    query: &str,
    options: &SearchOptions,
) -> Result<Vec<SeriesRecord>> {
    let cleaned: String = query.chars().filter(|c| *c != '"' && *c != '\'').collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return Ok(Vec::new());
    }

    match run_search(conn, SearchMode::FullText, cleaned, options) {
        Ok(results) if !results.is_empty() => return Ok(results),
        Ok(_) => {}
        Err(e) => tracing::debug!(error = %e, "FTS search failed, falling back to LIKE"),
    }

    run_search(conn, SearchMode::Substring, cleaned, options)
}

#[derive(Clone, Copy)]
enum SearchMode {
    FullText,
    Substring,
}

fn run_search(
    conn: &Connection,
    mode: SearchMode,
    query: &str,
    options: &SearchOptions,
) -> Result<Vec<SeriesRecord>> {
    let (mut sql, pattern) = match mode {
        SearchMode::FullText => (
            "SELECT s.id, s.name, s.country, s.frequency, s.source_file, s.min_date, s.max_date, s.count
             FROM series s JOIN series_fts fts ON s.id = fts.rowid
             WHERE series_fts MATCH ?"
                .to_string(),
            format!("\"{query}\"*"),
        ),
        SearchMode::Substring => (
            "SELECT s.id, s.name, s.country, s.frequency, s.source_file, s.min_date, s.max_date, s.count
             FROM series s
             WHERE s.name LIKE ?"
                .to_string(),
            format!("%{query}%"),
        ),
    };

    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(pattern)];

    if let Some(freq) = options.frequency {
        sql.push_str(" AND s.frequency = ?");
        params.push(Box::new(freq));
    }
    if let Some(ref country) = options.country {
        sql.push_str(" AND s.country = ?");
        params.push(Box::new(country.clone()));
    }

    sql.push_str(" ORDER BY s.count DESC, s.name LIMIT ?");
    params.push(Box::new(i64::try_from(options.limit).unwrap_or(i64::MAX)));

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| StorageError::Database(format!("failed to prepare search: {e}")))?;

    let rows = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), |row| {
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
        })
        .map_err(|e| StorageError::Database(format!("failed to execute search: {e}")))?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row.map_err(|e| StorageError::Database(format!("failed to read result: {e}")))?);
    }

    tracing::debug!(count = results.len(), limit = options.limit, "Series search completed");
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{create_schema, upsert_series, Database, SeriesOrigin, SeriesSummary};
    use chrono::NaiveDate;

    fn seeded_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            create_schema(conn)?;
            let day = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
            let rows: Vec<_> = [("jp_gdp_nominal", 40), ("jp_gdp_real", 30), ("jp_cpi_core", 100)]
                .iter()
                .map(|(name, count)| SeriesSummary {
                    name: (*name).to_string(),
                    min_date: day,
                    max_date: day,
                    count: *count,
                })
                .collect();
            upsert_series(
                conn,
                SeriesOrigin {
                    country: "jp",
                    frequency: Frequency::Quarterly,
                    source_file: "/jp/macro_q.parquet",
                },
                &rows,
            )?;
            rebuild_search_index(conn)
        })
        .unwrap();
        db
    }

    #[test]
    fn test_search_options_builder() {
        let opts = SearchOptions::new(20)
            .with_frequency(Frequency::Monthly)
            .with_country("cn");

        assert_eq!(opts.limit, 20);
        assert_eq!(opts.frequency, Some(Frequency::Monthly));
        assert_eq!(opts.country, Some("cn".to_string()));
    }

    #[test]
    fn test_full_text_prefix_match() {
        let db = seeded_db();
        let results = db
            .with_conn(|conn| search_series(conn, "gdp", &SearchOptions::default()))
            .unwrap();

        let names: Vec<_> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["jp_gdp_nominal", "jp_gdp_real"]);
    }

    #[test]
    fn test_substring_fallback() {
        let db = seeded_db();
        let results = db
            .with_conn(|conn| search_series(conn, "ore", &SearchOptions::default()))
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "jp_cpi_core");
    }

    #[test]
    fn test_filters_and_empty_query() {
        let db = seeded_db();
        db.with_conn(|conn| {
            let none = search_series(
                conn,
                "gdp",
                &SearchOptions::default().with_frequency(Frequency::Monthly),
            )?;
            assert!(none.is_empty());

            let other_country =
                search_series(conn, "gdp", &SearchOptions::default().with_country("kr"))?;
            assert!(other_country.is_empty());

            assert!(search_series(conn, "  \"' ", &SearchOptions::default())?.is_empty());

            let limited = search_series(conn, "jp", &SearchOptions::new(1))?;
            assert_eq!(limited.len(), 1);
            assert_eq!(limited[0].name, "jp_cpi_core");
            Ok(())
        })
        .unwrap();
    }
}
