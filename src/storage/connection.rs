//! `SQLite` database connection management.
//!
//! Provides a connection wrapper with proper configuration for:
//! - WAL mode so query-serving readers see either the pre- or post-file state
//! - Serialized writer access (via `parking_lot::Mutex`)
//! - Bulk-load pragmas for full rebuilds

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::StorageError;
use crate::Result;

/// How long a writer or checkpoint waits on other connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Result row of `PRAGMA wal_checkpoint`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointOutcome {
    /// A reader or writer kept the checkpoint from finishing.
    pub busy: bool,
    /// Frames in the WAL when the checkpoint ran (-1 outside WAL mode).
    pub wal_frames: i64,
    /// Frames copied back into the database file.
    pub checkpointed_frames: i64,
}

impl CheckpointOutcome {
    /// Whether the WAL was fully folded back and truncated.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        !self.busy
    }
}

/// Database connection wrapper.
///
/// Wraps a `SQLite` connection with proper configuration and locking.
/// Clone is cheap - it just clones the Arc.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: String,
}

impl Database {
    /// Open a database at the given path.
    ///
    /// Creates the database file and parent directories if they don't exist.
    /// Configures WAL mode and performance settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or configured.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let path_str = path.to_string_lossy().to_string();

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| StorageError::Database(format!("failed to open database: {e}")))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path_str,
        };

        db.configure()?;

        Ok(db)
    }

    /// Open an in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            StorageError::Database(format!("failed to open in-memory database: {e}"))
        })?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: ":memory:".to_string(),
        };

        db.configure()?;

        Ok(db)
    }

    fn configure(&self) -> Result<()> {
        {
            let conn = self.conn.lock();

            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA cache_size = -64000;  -- 64MB cache
                PRAGMA temp_store = MEMORY;
                PRAGMA foreign_keys = ON;
                ",
            )
            .map_err(|e| StorageError::Database(format!("failed to configure database: {e}")))?;
        }

        self.set_busy_timeout(DEFAULT_BUSY_TIMEOUT)?;

        tracing::debug!(path = %self.path, "Database configured with WAL mode");

        Ok(())
    }

    /// Change how long statements wait on locks held by other connections.
    ///
    /// # Errors
    ///
    /// Returns an error if the timeout cannot be applied.
    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<()> {
        self.with_conn(|conn| {
            conn.busy_timeout(timeout)
                .map_err(|e| StorageError::Database(format!("failed to set busy timeout: {e}")))?;
            Ok(())
        })
    }

    /// Switch between bulk-load pragmas (full rebuild) and normal operation.
    ///
    /// Bulk mode keeps the journal so per-file rollback still works; it only
    /// relaxes fsync and enlarges the page cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the pragmas cannot be applied.
    pub fn set_bulk_load(&self, enabled: bool) -> Result<()> {
        let pragmas = if enabled {
            "PRAGMA synchronous = OFF; PRAGMA cache_size = -512000;"
        } else {
            "PRAGMA synchronous = NORMAL; PRAGMA cache_size = -64000;"
        };

        self.with_conn(|conn| {
            conn.execute_batch(pragmas)
                .map_err(|e| StorageError::Database(format!("failed to set pragmas: {e}")))?;
            Ok(())
        })?;

        tracing::debug!(path = %self.path, enabled, "Bulk load mode toggled");
        Ok(())
    }

    /// Execute a function with exclusive database access.
    ///
    /// # Errors
    ///
    /// Returns an error if the function fails.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Execute a function that may modify the database.
    ///
    /// Wraps the operation in an immediate transaction. Any error returned by
    /// `f` rolls back everything it wrote.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails or if the function fails.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();

        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| StorageError::Database(format!("failed to begin transaction: {e}")))?;

        match f(&conn) {
            Ok(result) => {
                if let Err(e) = conn.execute_batch("COMMIT") {
                    let _ = conn.execute_batch("ROLLBACK");
                    return Err(StorageError::Database(format!("failed to commit: {e}")).into());
                }
                Ok(result)
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Fold the WAL back into the main database file.
    ///
    /// When the outcome is complete the file on disk is self-contained and
    /// can be copied or published by an external step. A reader holding an
    /// open transaction past the busy timeout leaves the WAL in place and
    /// the outcome reports `busy`.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint fails.
    pub fn checkpoint(&self) -> Result<CheckpointOutcome> {
        let outcome = self.with_conn(|conn| {
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| {
                Ok(CheckpointOutcome {
                    busy: row.get::<_, i64>(0)? != 0,
                    wal_frames: row.get(1)?,
                    checkpointed_frames: row.get(2)?,
                })
            })
            .map_err(|e| StorageError::Database(format!("checkpoint failed: {e}")).into())
        })?;

        tracing::debug!(path = %self.path, ?outcome, "WAL checkpoint");
        Ok(outcome)
    }

    /// Reclaim free pages after a full rebuild.
    ///
    /// # Errors
    ///
    /// Returns an error if `VACUUM` fails.
    pub fn vacuum(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch("VACUUM")
                .map_err(|e| StorageError::Database(format!("vacuum failed: {e}")))?;
            Ok(())
        })
    }

    /// Get the database path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Check if the database is healthy.
    ///
    /// # Errors
    ///
    /// Returns an error if the health check fails.
    pub fn health_check(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))
                .map_err(|e| StorageError::Database(format!("health check failed: {e}")).into())
        })
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
