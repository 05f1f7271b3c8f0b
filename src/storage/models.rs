//! Data models for storage operations.
//!
//! This module defines the core data structures used for:
//! - Series metadata and their data points
//! - The processed-file ledger driving change detection
//! - Precomputed aggregate statistics

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Sampling frequency of a series, encoded in the source file suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Frequency {
    #[serde(rename = "m")]
    Monthly,
    #[serde(rename = "q")]
    Quarterly,
    #[serde(rename = "a")]
    Annual,
}

impl Frequency {
    /// All recognized frequencies.
    pub const ALL: [Self; 3] = [Self::Monthly, Self::Quarterly, Self::Annual];

    /// One-letter code stored in the database.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Monthly => "m",
            Self::Quarterly => "q",
            Self::Annual => "a",
        }
    }

    /// File-name suffix identifying this frequency.
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Monthly => "_m.parquet",
            Self::Quarterly => "_q.parquet",
            Self::Annual => "_a.parquet",
        }
    }

    /// Detect the frequency from a file name (case-insensitive).
    #[must_use]
    pub fn from_file_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        Self::ALL.into_iter().find(|f| lower.ends_with(f.suffix()))
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "m" => Ok(Self::Monthly),
            "q" => Ok(Self::Quarterly),
            "a" => Ok(Self::Annual),
            other => Err(format!("unknown frequency '{other}'")),
        }
    }
}

impl rusqlite::ToSql for Frequency {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        Ok(self.code().into())
    }
}

impl rusqlite::types::FromSql for Frequency {
    fn column_result(value: rusqlite::types::ValueRef<'_>) -> rusqlite::types::FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| rusqlite::types::FromSqlError::Other(e.into()))
    }
}

/// One named series at one frequency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesRecord {
    /// Database primary key.
    pub id: i64,
    /// Series name (column name in the source file).
    pub name: String,
    /// Owning country id.
    pub country: String,
    pub frequency: Frequency,
    /// Path of the file the current rows came from.
    pub source_file: String,
    /// First date with a value (ISO `YYYY-MM-DD`).
    pub min_date: String,
    /// Last date with a value (ISO `YYYY-MM-DD`).
    pub max_date: String,
    /// Number of stored data points.
    pub count: i64,
}

/// A single dated observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub date: String,
    pub value: f64,
}

/// Ledger entry for a successfully ingested source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedFile {
    /// Source file path (ledger key).
    pub filepath: String,
    pub country: String,
    pub frequency: Frequency,
    /// Modification time at ingestion, nanoseconds since the Unix epoch.
    pub mtime: i64,
    /// Series produced by the last ingestion.
    pub series_count: i64,
    /// Wall-clock time of the last ingestion (RFC 3339).
    pub last_processed: String,
}

impl ProcessedFile {
    /// Create a ledger entry stamped with the current time.
    #[must_use]
    pub fn new(
        filepath: impl Into<String>,
        country: impl Into<String>,
        frequency: Frequency,
        mtime: i64,
        series_count: i64,
    ) -> Self {
        Self {
            filepath: filepath.into(),
            country: country.into(),
            frequency,
            mtime,
            series_count,
            last_processed: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Precomputed counts served by the stats endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateStats {
    /// Distinct series names.
    pub total_series: i64,
    /// Series rows, one per (name, frequency).
    pub total_series_freq: i64,
    /// Sum of data points over all series.
    pub total_data_points: i64,
    /// Distinct series names per country.
    pub by_country: BTreeMap<String, i64>,
    /// Series rows per frequency code.
    pub by_frequency: BTreeMap<String, i64>,
}
