//! Incremental synchronization from Parquet sources into the store.
//!
//! Data flows one way: inventory, change detection, per-file load, then the
//! index and stats rebuild. [`Synchronizer`] sequences the steps.

mod detector;
mod filter;
mod index;
mod inventory;
mod loader;
mod orchestrator;
mod reader;

#[cfg(test)]
pub(crate) mod testing;

pub use detector::{detect_changes, file_mtime, ChangeSet, PendingFile};
pub use filter::SourceFilter;
pub use index::rebuild_indexes;
pub use inventory::{scan_sources, Inventory, SourceFile};
pub use loader::{load_file, remove_file, LoadOutcome};
pub use orchestrator::{FileFailure, SyncMode, SyncReport, Synchronizer};
pub use reader::{read_long_frame, LongFrame, MeltedSeries, DATE_COLUMN};
