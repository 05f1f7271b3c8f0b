//! File system watcher using notify-rs.

#![allow(clippy::used_underscore_binding)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind, Debouncer};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::events::EventBatch;
use crate::error::WatcherError;
use crate::Result;

/// Coalescing window for raw notify events.
///
/// Events reach the watch trigger this much later than the write, so an
/// update starts about [`Config::debounce`](crate::Config::debounce) plus
/// this window after the last change.
const COALESCE_DURATION: Duration = Duration::from_millis(500);

/// File watcher configuration.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Directories to watch (top level only).
    pub watch_dirs: Vec<PathBuf>,
    /// Coalescing window for raw events.
    pub coalesce: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            watch_dirs: Vec::new(),
            coalesce: COALESCE_DURATION,
        }
    }
}

/// File system watcher.
pub struct FileWatcher {
    _debouncer: Debouncer<RecommendedWatcher>,
    event_rx: mpsc::Receiver<EventBatch>,
    /// Each watched directory as given and in resolved form.
    watched_dirs: Arc<Mutex<Vec<(PathBuf, PathBuf)>>>,
}

impl FileWatcher {
    /// Create a new file watcher.
    ///
    /// Directories that do not exist are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::NoRoots`] if no directory could be watched, or
    /// an error if the underlying watcher cannot be created.
    pub fn new(config: &WatcherConfig) -> Result<Self> {
        let (batch_tx, event_rx) = mpsc::channel(100);
        let watched_dirs = Arc::new(Mutex::new(Vec::new()));
        let watched_dirs_clone = Arc::clone(&watched_dirs);

        let debouncer = new_debouncer(
            config.coalesce,
            move |result: std::result::Result<
                Vec<notify_debouncer_mini::DebouncedEvent>,
                notify::Error,
            >| {
                match result {
                    Ok(events) => {
                        let dirs = watched_dirs_clone.lock();
                        let batch: EventBatch = events
                            .into_iter()
                            .filter(|event| {
                                matches!(
                                    event.kind,
                                    DebouncedEventKind::Any | DebouncedEventKind::AnyContinuous
                                )
                            })
                            .map(|event| event.path)
                            .filter(|path| is_under_watched(&dirs, path))
                            .collect();
                        drop(dirs);

                        if !batch.is_empty() {
                            let _ = batch_tx.blocking_send(batch);
                        }
                    }
                    Err(e) => {
                        tracing::error!("Watch error: {:?}", e);
                    }
                }
            },
        )
        .map_err(|e| WatcherError::WatchFailed {
            path: "init".to_string(),
            reason: e.to_string(),
        })?;

        let mut watcher = Self {
            _debouncer: debouncer,
            event_rx,
            watched_dirs,
        };

        for dir in &config.watch_dirs {
            if let Err(e) = watcher.watch(dir) {
                tracing::warn!(path = %dir.display(), error = %e, "Skipping source directory");
            }
        }

        if watcher.watched_dirs.lock().is_empty() {
            return Err(WatcherError::NoRoots.into());
        }

        Ok(watcher)
    }

    /// Add a directory to watch.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be watched.
    pub fn watch(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_path_buf();

        if !path.is_dir() {
            return Err(WatcherError::WatchFailed {
                path: path.display().to_string(),
                reason: "directory does not exist".to_string(),
            }
            .into());
        }

        self._debouncer
            .watcher()
            .watch(&path, RecursiveMode::NonRecursive)
            .map_err(|e| WatcherError::WatchFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        let canonical = path.canonicalize().unwrap_or_else(|_| path.clone());
        self.watched_dirs.lock().push((path.clone(), canonical));
        tracing::info!(path = %path.display(), "Watching directory");

        Ok(())
    }

    /// Stop watching a directory.
    ///
    /// # Errors
    ///
    /// Returns an error if unwatching fails.
    pub fn unwatch(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        self._debouncer
            .watcher()
            .unwatch(path)
            .map_err(|e| WatcherError::WatchFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        self.watched_dirs.lock().retain(|(p, _)| p != path);

        tracing::info!(path = %path.display(), "Stopped watching directory");
        Ok(())
    }

    /// Receive the next batch of events.
    ///
    /// Returns `None` if the watcher has been dropped.
    pub async fn recv(&mut self) -> Option<EventBatch> {
        self.event_rx.recv().await
    }

    /// Get list of watched directories.
    #[must_use]
    pub fn watched_dirs(&self) -> Vec<PathBuf> {
        self.watched_dirs
            .lock()
            .iter()
            .map(|(path, _)| path.clone())
            .collect()
    }
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("watched_dirs", &self.watched_dirs())
            .finish_non_exhaustive()
    }
}

/// Check if a path is directly inside a watched directory.
fn is_under_watched(watched: &[(PathBuf, PathBuf)], path: &Path) -> bool {
    path.parent().is_some_and(|parent| {
        watched
            .iter()
            .any(|(dir, canonical)| parent == dir || parent == canonical)
    })
}
