//! Configuration management for seriesync.
//!
//! Supports configuration from:
//! - Command-line arguments (highest priority)
//! - Environment variables
//! - Built-in defaults (lowest priority)

mod settings;

pub use settings::{parse_root, Config, DEFAULT_DEBOUNCE, DEFAULT_EXCLUDED_PATTERNS};
