//! Parquet fixture helpers shared by the sync unit tests.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

/// Write a wide source file: a string `Date` column plus one column per series.
pub fn write_wide(path: &Path, dates: &[&str], series: &[(&str, Vec<Option<f64>>)]) {
    let mut fields = vec![Field::new("Date", DataType::Utf8, false)];
    let mut columns: Vec<ArrayRef> = vec![Arc::new(StringArray::from(dates.to_vec()))];
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
