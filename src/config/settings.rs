//! Configuration settings and validation.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

/// Quiet period after the last file event before a watch-mode update runs.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(30);

/// File-name fragments marking rolling snapshots rather than full histories.
pub const DEFAULT_EXCLUDED_PATTERNS: &[&str] = &["latest", "recent", "hist", "history"];

/// Main configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the `SQLite` store produced by a sync run.
    pub database_path: PathBuf,

    /// Source root directory per country id.
    pub roots: BTreeMap<String, PathBuf>,

    /// Case-insensitive file-name fragments that exclude a source file.
    pub excluded_patterns: Vec<String>,

    /// Watch-mode debounce window.
    ///
    /// Measured from the last event the watcher delivers. The watcher first
    /// coalesces raw filesystem events for about 500 ms, so an update starts
    /// roughly `debounce + 0.5s` after the last file write.
    pub debounce: Duration,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./data/series.db"),
            roots: BTreeMap::new(),
            excluded_patterns: DEFAULT_EXCLUDED_PATTERNS
                .iter()
                .map(|p| (*p).to_string())
                .collect(),
            debounce: DEFAULT_DEBOUNCE,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Create a new configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a country root.
    #[must_use]
    pub fn with_root(mut self, country: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        self.roots
            .insert(country.into().to_lowercase(), root.into());
        self
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.roots.is_empty() {
            return Err(Error::config(
                "at least one country root is required (--root <country>=<dir>)",
            ));
        }

        for country in self.roots.keys() {
            if !is_valid_country(country) {
                return Err(Error::config(format!(
                    "invalid country id '{country}', expected lowercase letters, digits or '_'"
                )));
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(Error::config(format!(
                "invalid log level '{}', must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.debounce.is_zero() {
            return Err(Error::config("debounce cannot be 0"));
        }

        if self.database_path.as_os_str().is_empty() {
            return Err(Error::config("database path cannot be empty"));
        }

        if self.excluded_patterns.iter().any(String::is_empty) {
            return Err(Error::config("excluded patterns cannot be empty strings"));
        }

        Ok(())
    }

    /// Country ids in deterministic order.
    #[must_use]
    pub fn countries(&self) -> Vec<String> {
        self.roots.keys().cloned().collect()
    }
}

/// Parse a `country=path` root argument.
///
/// Used as a clap value parser for `--root` and `SERIESYNC_ROOTS`.
///
/// # Errors
///
/// Returns a message when the value has no `=`, an empty side, or an invalid
/// country id.
pub fn parse_root(value: &str) -> std::result::Result<(String, PathBuf), String> {
    let (country, path) = value
        .split_once('=')
        .ok_or_else(|| format!("expected <country>=<dir>, got '{value}'"))?;

    let country = country.trim().to_lowercase();
    let path = path.trim();

    if country.is_empty() || path.is_empty() {
        return Err(format!("expected <country>=<dir>, got '{value}'"));
    }
    if !is_valid_country(&country) {
        return Err(format!("invalid country id '{country}'"));
    }

    Ok((country, PathBuf::from(path)))
}

fn is_valid_country(country: &str) -> bool {
    !country.is_empty()
        && country
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
