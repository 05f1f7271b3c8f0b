//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use arrow::array::{ArrayRef, Float64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use tempfile::TempDir;

use seriesync::config::DEFAULT_EXCLUDED_PATTERNS;
use seriesync::storage::Database;
use seriesync::sync::{SourceFilter, Synchronizer};

/// Temp directory holding one root per country and the store file.
pub struct Workspace {
    pub tmp: TempDir,
    pub roots: BTreeMap<String, PathBuf>,
}

impl Workspace {
    pub fn new(countries: &[&str]) -> Self {
        let tmp = TempDir::new().unwrap();
        let roots = countries
            .iter()
            .map(|c| {
                let dir = tmp.path().join("sources").join(format!("{c}_input"));
                fs::create_dir_all(&dir).unwrap();
                ((*c).to_string(), dir)
            })
            .collect();
        Self { tmp, roots }
    }

    pub fn db_path(&self) -> PathBuf {
        self.tmp.path().join("db").join("series.db")
    }

    pub fn file(&self, country: &str, name: &str) -> PathBuf {
        self.roots[country].join(name)
    }

    pub fn filter(&self) -> SourceFilter {
        SourceFilter::new(&self.roots, DEFAULT_EXCLUDED_PATTERNS)
    }

    /// A synchronizer over a fresh handle to the workspace store.
    pub fn synchronizer(&self) -> Synchronizer {
        Synchronizer::new(Database::open(self.db_path()).unwrap(), self.filter())
    }
}

/// Write a wide file with a string `Date` column and one column per series.
pub fn write_wide(path: &Path, dates: &[String], series: &[(&str, Vec<Option<f64>>)]) {
    let mut fields = vec![Field::new("Date", DataType::Utf8, false)];
    let mut columns: Vec<ArrayRef> = vec![Arc::new(StringArray::from(
        dates.iter().map(String::as_str).collect::<Vec<_>>(),
    ))];
    for (name, values) in series {
        fields.push(Field::new(*name, DataType::Float64, true));
        columns.push(Arc::new(Float64Array::from(values.clone())));
    }

    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(schema.clone(), columns).unwrap();
    let mut writer = ArrowWriter::try_new(File::create(path).unwrap(), schema, None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
}

/// First-of-month dates for `n` consecutive months starting January 2020.
pub fn months(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| format!("{}-{:02}-01", 2020 + i / 12, i % 12 + 1))
        .collect()
}

/// Pin a file's modification time to `secs` after the epoch.
pub fn set_mtime(path: &Path, secs: u64) {
    let file = File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
        .unwrap();
}
