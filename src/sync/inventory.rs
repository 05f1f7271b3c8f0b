//! Source inventory: enumerate candidate files under each country root.

use std::path::PathBuf;

use walkdir::WalkDir;

use super::filter::SourceFilter;
use crate::error::SourceError;
use crate::storage::Frequency;

/// One candidate source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub country: String,
    pub frequency: Frequency,
}

impl SourceFile {
    /// Ledger key and provenance value for this file.
    #[must_use]
    pub fn key(&self) -> String {
        self.path.to_string_lossy().to_string()
    }
}

/// Result of scanning a set of country roots.
#[derive(Debug, Default)]
pub struct Inventory {
    /// Source files, grouped by country in request order, lexical within a country.
    pub files: Vec<SourceFile>,
    /// Countries whose root was listed successfully (possibly with no files).
    pub scanned: Vec<String>,
    /// Countries skipped because their root is unknown or unreadable.
    pub unavailable: Vec<SourceError>,
}

impl Inventory {
    /// Ids of the countries that could not be scanned.
    #[must_use]
    pub fn unavailable_countries(&self) -> Vec<String> {
        self.unavailable
            .iter()
            .filter_map(|e| match e {
                SourceError::Unavailable { country, .. } => Some(country.clone()),
                SourceError::Read { .. } => None,
            })
            .collect()
    }
}

/// List every source file for the given countries.
///
/// Only the top level of each root is scanned. Missing or unreadable roots
/// are logged and reported in [`Inventory::unavailable`]; they never abort
/// the scan of other countries.
#[must_use]
pub fn scan_sources(filter: &SourceFilter, countries: &[String]) -> Inventory {
    let mut inventory = Inventory::default();

    for country in countries {
        let Some(root) = filter.root(country) else {
            tracing::warn!(country = %country, "Unknown country, skipping");
            inventory.unavailable.push(SourceError::Unavailable {
                country: country.clone(),
                path: String::new(),
            });
            continue;
        };

        if !root.is_dir() {
            tracing::warn!(country = %country, path = %root.display(), "Source root not found, skipping");
            inventory.unavailable.push(SourceError::Unavailable {
                country: country.clone(),
                path: root.display().to_string(),
            });
            continue;
        }

        let mut found = Vec::new();
        let mut failed = false;

        let walker = WalkDir::new(root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name();

        for entry in walker {
            match entry {
                Ok(entry) => {
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    if let Some(frequency) = filter.classify(entry.path()) {
                        found.push(SourceFile {
                            path: entry.into_path(),
                            country: country.clone(),
                            frequency,
                        });
                    }
                }
                Err(e) => {
                    // A failed listing would look like mass deletion to the
                    // change detector, so the whole country is skipped.
                    tracing::warn!(country = %country, error = %e, "Error listing source root");
                    failed = true;
                    break;
                }
            }
        }

        if failed {
            inventory.unavailable.push(SourceError::Unavailable {
                country: country.clone(),
                path: root.display().to_string(),
            });
            continue;
        }

        tracing::debug!(country = %country, files = found.len(), "Scanned source root");
        inventory.files.extend(found);
        inventory.scanned.push(country.clone());
    }

    inventory
}
