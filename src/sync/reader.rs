//! Parquet decoding and wide-to-long reshaping.
//!
//! Source files are wide: one `Date` column and one numeric column per
//! series. The loader wants long form grouped by series, with absent values
//! already filtered out.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Date32Type, Float64Type};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::error::SourceError;
use crate::storage::SeriesSummary;
use crate::Result;

/// Name of the column carrying observation dates.
pub const DATE_COLUMN: &str = "Date";

const PANDAS_INDEX_PREFIX: &str = "__index_level_";

/// One series in long form: dates ascending, unique, values never NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct MeltedSeries {
    pub name: String,
    pub points: Vec<(NaiveDate, f64)>,
}

/// A file's content reshaped to long form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LongFrame {
    /// Series with at least one value, in column order.
    pub series: Vec<MeltedSeries>,
}

impl LongFrame {
    /// Whether the file contributes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Total long-form rows across all series.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.series.iter().map(|s| s.points.len()).sum()
    }

    /// Per-series min date, max date and row count.
    #[must_use]
    pub fn summaries(&self) -> Vec<SeriesSummary> {
        self.series
            .iter()
            .filter_map(|s| {
                let (first, _) = s.points.first()?;
                let (last, _) = s.points.last()?;
                Some(SeriesSummary {
                    name: s.name.clone(),
                    min_date: *first,
                    max_date: *last,
                    count: i64::try_from(s.points.len()).unwrap_or(i64::MAX),
                })
            })
            .collect()
    }
}

/// Read a Parquet file and melt it into long form.
///
/// A file without a `Date` column yields an empty frame, not an error.
///
/// # Errors
///
/// Returns [`SourceError::Read`] if the file cannot be opened or decoded.
pub fn read_long_frame(path: &Path) -> Result<LongFrame> {
    let shown = path.display().to_string();

    let file = File::open(path).map_err(|e| SourceError::read(&shown, e))?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| SourceError::read(&shown, e))?;

    let schema = builder.schema().clone();
    let Ok(date_idx) = schema.index_of(DATE_COLUMN) else {
        tracing::warn!(path = %shown, "No Date column, treating as zero series");
        return Ok(LongFrame::default());
    };

    let value_columns: Vec<(usize, String)> = schema
        .fields()
        .iter()
        .enumerate()
        .filter(|(idx, field)| {
            if *idx == date_idx || field.name().starts_with(PANDAS_INDEX_PREFIX) {
                return false;
            }
            if field.data_type().is_numeric() {
                return true;
            }
            tracing::warn!(
                path = %shown,
                column = %field.name(),
                data_type = %field.data_type(),
                "Skipping non-numeric column"
            );
            false
        })
        .map(|(idx, field)| (idx, field.name().clone()))
        .collect();

    let reader = builder.build().map_err(|e| SourceError::read(&shown, e))?;

    let mut columns: Vec<BTreeMap<NaiveDate, f64>> = vec![BTreeMap::new(); value_columns.len()];
    for batch in reader {
        let batch = batch.map_err(|e| SourceError::read(&shown, e))?;
        melt_batch(&batch, date_idx, &value_columns, &mut columns)
            .map_err(|e| SourceError::read(&shown, e))?;
    }

    let series = value_columns
        .into_iter()
        .zip(columns)
        .filter(|(_, points)| !points.is_empty())
        .map(|((_, name), points)| MeltedSeries {
            name,
            points: points.into_iter().collect(),
        })
        .collect();

    let frame = LongFrame { series };
    tracing::debug!(
        path = %shown,
        series = frame.series.len(),
        rows = frame.row_count(),
        "Parquet file melted"
    );
    Ok(frame)
}

fn melt_batch(
    batch: &RecordBatch,
    date_idx: usize,
    value_columns: &[(usize, String)],
    out: &mut [BTreeMap<NaiveDate, f64>],
) -> std::result::Result<(), String> {
    let dates = decode_dates(batch.column(date_idx))?;

    for ((idx, name), points) in value_columns.iter().zip(out.iter_mut()) {
        let values = cast(batch.column(*idx), &DataType::Float64)
            .map_err(|e| format!("column '{name}': {e}"))?;
        let values = values.as_primitive::<Float64Type>();

        for (row, date) in dates.iter().enumerate() {
            let Some(date) = date else { continue };
            if values.is_null(row) {
                continue;
            }
            let value = values.value(row);
            if value.is_nan() {
                continue;
            }
            // Duplicate dates: last one read wins.
            points.insert(*date, value);
        }
    }

    Ok(())
}

fn decode_dates(column: &ArrayRef) -> std::result::Result<Vec<Option<NaiveDate>>, String> {
    match column.data_type() {
        DataType::Date32 | DataType::Date64 | DataType::Timestamp(_, _) => {
            let days = cast(column, &DataType::Date32).map_err(|e| format!("Date column: {e}"))?;
            let days = days.as_primitive::<Date32Type>();
            Ok((0..days.len())
                .map(|i| {
                    if days.is_null(i) {
                        None
                    } else {
                        days.value_as_date(i)
                    }
                })
                .collect())
        }
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => {
            let text = cast(column, &DataType::Utf8).map_err(|e| format!("Date column: {e}"))?;
            let text = text.as_string::<i32>();
            Ok(text.iter().map(|v| v.and_then(parse_date)).collect())
        }
        other => Err(format!("unsupported Date column type {other}")),
    }
}

/// Parse a calendar day from the textual forms pandas tends to write.
fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
        .or_else(|| DateTime::parse_from_rfc3339(text).ok().map(|dt| dt.date_naive()))
}
