//! Seriesync Library
//!
//! Incremental Parquet-to-SQLite synchronization for economic time series,
//! with a debounced watch mode.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod observability;
pub mod storage;
pub mod sync;
pub mod watcher;

pub use config::Config;
pub use error::{Error, Result};
