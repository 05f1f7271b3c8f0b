//! File system event batches.

#![allow(clippy::missing_const_for_fn)]

use std::path::PathBuf;

/// Deduplicated paths reported by one debouncer flush.
///
/// Creation, modification and deletion are not distinguished: every kind
/// of change to a source file means its country needs an update.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EventBatch {
    pub paths: Vec<PathBuf>,
}

impl EventBatch {
    /// Create a new empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a path, ignoring duplicates.
    pub fn add(&mut self, path: PathBuf) {
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
    }

    /// Check if batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Get total number of paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }
}

impl FromIterator<PathBuf> for EventBatch {
    fn from_iter<I: IntoIterator<Item = PathBuf>>(iter: I) -> Self {
        let mut batch = Self::new();
        for path in iter {
            batch.add(path);
        }
        batch
    }
}
