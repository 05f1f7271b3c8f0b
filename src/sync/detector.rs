//! Change detection against the processed-file ledger.

use std::collections::HashSet;
use std::path::Path;
use std::time::UNIX_EPOCH;

use rusqlite::Connection;

use super::inventory::{Inventory, SourceFile};
use crate::storage::mtimes_for_countries;
use crate::Result;

/// A source file that needs (re)ingestion, with the mtime observed now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    pub source: SourceFile,
    pub mtime: i64,
}

/// Classification of an inventory against the ledger.
#[derive(Debug, Default)]
pub struct ChangeSet {
    /// New files and files whose mtime differs from the ledger.
    pub changed: Vec<PendingFile>,
    /// Files whose mtime matches the ledger exactly.
    pub unchanged: usize,
    /// Ledger paths no longer present in the inventory, sorted.
    pub removed: Vec<String>,
}

impl ChangeSet {
    /// Whether the batch has nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Modification time of a file in nanoseconds since the Unix epoch.
///
/// # Errors
///
/// Returns an error if the file cannot be stat'ed.
pub fn file_mtime(path: &Path) -> Result<i64> {
    let modified = std::fs::metadata(path)?.modified()?;
    let nanos = match modified.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_nanos()).unwrap_or(i64::MAX),
        Err(e) => -i64::try_from(e.duration().as_nanos()).unwrap_or(i64::MAX),
    };
    Ok(nanos)
}

/// Compare the inventory with the ledger.
///
/// Only countries in [`Inventory::scanned`] are considered for removal, so
/// an unreachable root never looks like a mass deletion. Any mtime
/// difference counts as a change, not only a newer one.
///
/// # Errors
///
/// Returns an error if the ledger cannot be read.
pub fn detect_changes(conn: &Connection, inventory: &Inventory) -> Result<ChangeSet> {
    let mut known = mtimes_for_countries(conn, &inventory.scanned)?;
    let mut changes = ChangeSet::default();

    for source in &inventory.files {
        let key = source.key();
        let stored = known.remove(&key);

        let mtime = match file_mtime(&source.path) {
            Ok(mtime) => mtime,
            Err(e) => {
                // Vanished between listing and stat; the next run sees the removal.
                tracing::warn!(path = %key, error = %e, "Failed to stat source file, skipping");
                continue;
            }
        };

        match stored {
            Some(previous) if previous == mtime => changes.unchanged += 1,
            Some(previous) => {
                tracing::debug!(path = %key, previous, current = mtime, "Source file modified");
                changes.changed.push(PendingFile {
                    source: source.clone(),
                    mtime,
                });
            }
            None => {
                tracing::debug!(path = %key, "New source file");
                changes.changed.push(PendingFile {
                    source: source.clone(),
                    mtime,
                });
            }
        }
    }

    let present: HashSet<String> = inventory.files.iter().map(SourceFile::key).collect();
    let mut removed: Vec<String> = known
        .into_keys()
        .filter(|path| !present.contains(path))
        .collect();
    removed.sort();
    changes.removed = removed;

    tracing::debug!(
        changed = changes.changed.len(),
        unchanged = changes.unchanged,
        removed = changes.removed.len(),
        "Change detection complete"
    );

    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    use crate::storage::{create_schema, upsert_processed_file, Database, Frequency, ProcessedFile};

    fn source(path: PathBuf, country: &str) -> SourceFile {
        SourceFile {
            path,
            country: country.to_string(),
            frequency: Frequency::Monthly,
        }
    }

    fn record(db: &Database, file: &SourceFile, mtime: i64) {
        db.with_conn(|conn| {
            upsert_processed_file(
                conn,
                &ProcessedFile::new(file.key(), &file.country, file.frequency, mtime, 1),
            )
        })
        .unwrap();
    }

    #[test]
    fn test_file_mtime_is_stable() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a_m.parquet");
        fs::write(&path, b"x").unwrap();

        let first = file_mtime(&path).unwrap();
        assert!(first > 0);
        assert_eq!(first, file_mtime(&path).unwrap());
        assert!(file_mtime(&tmp.path().join("missing")).is_err());
    }

    #[test]
    fn test_classifies_new_changed_unchanged_removed() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        db.with_conn(create_schema).unwrap();

        let same = source(tmp.path().join("same_m.parquet"), "jp");
        let touched = source(tmp.path().join("touched_m.parquet"), "jp");
        let fresh = source(tmp.path().join("fresh_m.parquet"), "jp");
        for f in [&same, &touched, &fresh] {
            fs::write(&f.path, b"x").unwrap();
        }

        record(&db, &same, file_mtime(&same.path).unwrap());
        // Older or newer does not matter, only equality.
        record(&db, &touched, file_mtime(&touched.path).unwrap() + 1);
        let gone = source(tmp.path().join("gone_m.parquet"), "jp");
        record(&db, &gone, 42);

        let inventory = Inventory {
            files: vec![fresh.clone(), same, touched.clone()],
            scanned: vec!["jp".to_string()],
            unavailable: Vec::new(),
        };

        let changes = db.with_conn(|conn| detect_changes(conn, &inventory)).unwrap();
        let changed: Vec<_> = changes.changed.iter().map(|p| p.source.key()).collect();
        assert_eq!(changed, vec![fresh.key(), touched.key()]);
        assert_eq!(changes.unchanged, 1);
        assert_eq!(changes.removed, vec![gone.key()]);
        assert!(!changes.is_empty());
    }

    #[test]
    fn test_unscanned_country_is_never_removed() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(create_schema).unwrap();
        record(&db, &source(PathBuf::from("/kr/a_m.parquet"), "kr"), 1);

        let inventory = Inventory {
            files: Vec::new(),
            scanned: vec!["jp".to_string()],
            unavailable: Vec::new(),
        };

        let changes = db.with_conn(|conn| detect_changes(conn, &inventory)).unwrap();
        assert!(changes.is_empty());
        assert_eq!(changes.unchanged, 0);
    }

    #[test]
    fn test_vanished_file_is_skipped() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(create_schema).unwrap();

        let inventory = Inventory {
            files: vec![source(PathBuf::from("/nonexistent/x_m.parquet"), "jp")],
            scanned: vec!["jp".to_string()],
            unavailable: Vec::new(),
        };

        let changes = db.with_conn(|conn| detect_changes(conn, &inventory)).unwrap();
        assert!(changes.is_empty());
    }
}
