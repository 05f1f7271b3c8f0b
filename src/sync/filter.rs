//! Source file filtering and path-to-country routing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::storage::Frequency;
use crate::Config;

#[derive(Debug, Clone)]
struct Root {
    country: String,
    path: PathBuf,
    /// Resolved form of `path`, used to match watcher events on symlinked roots.
    canonical: Option<PathBuf>,
}

/// Decides which files are sources and which country owns a path.
#[derive(Debug, Clone)]
pub struct SourceFilter {
    roots: Vec<Root>,
    excluded: Vec<String>,
}

impl SourceFilter {
    /// Create a filter from country roots and exclusion fragments.
    pub fn new<S: AsRef<str>>(roots: &BTreeMap<String, PathBuf>, excluded: &[S]) -> Self {
        let roots = roots
            .iter()
            .map(|(country, path)| Root {
                country: country.clone(),
                path: path.clone(),
                canonical: path.canonicalize().ok().filter(|c| c != path),
            })
            .collect();

        Self {
            roots,
            excluded: excluded
                .iter()
                .map(|p| p.as_ref().to_lowercase())
                .collect(),
        }
    }

    /// Build the filter described by a configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.roots, &config.excluded_patterns)
    }

    /// Configured country ids in lexical order.
    #[must_use]
    pub fn countries(&self) -> Vec<String> {
        self.roots.iter().map(|r| r.country.clone()).collect()
    }

    /// Root directory for a country.
    #[must_use]
    pub fn root(&self, country: &str) -> Option<&Path> {
        self.roots
            .iter()
            .find(|r| r.country == country)
            .map(|r| r.path.as_path())
    }

    /// Check whether a file name matches an exclusion fragment.
    #[must_use]
    pub fn is_excluded(&self, file_name: &str) -> bool {
        let lower = file_name.to_lowercase();
        self.excluded.iter().any(|p| lower.contains(p.as_str()))
    }

    /// Frequency of a source file, or `None` if the file is not a source.
    #[must_use]
    pub fn classify(&self, path: &Path) -> Option<Frequency> {
        let name = path.file_name()?.to_str()?;
        if self.is_excluded(name) {
            return None;
        }
        Frequency::from_file_name(name)
    }

    /// Country owning a path, by longest matching root prefix.
    #[must_use]
    pub fn country_for(&self, path: &Path) -> Option<&str> {
        self.roots
            .iter()
            .flat_map(|root| {
                std::iter::once(&root.path)
                    .chain(root.canonical.as_ref())
                    .filter(move |prefix| path.starts_with(prefix))
                    .map(move |prefix| (prefix.components().count(), root.country.as_str()))
            })
            .max_by_key(|(depth, _)| *depth)
            .map(|(_, country)| country)
    }

    /// Route a watcher event path to its country if it names a source file.
    #[must_use]
    pub fn route(&self, path: &Path) -> Option<&str> {
        self.classify(path)?;
        self.country_for(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_EXCLUDED_PATTERNS;

    fn filter() -> SourceFilter {
        let mut roots = BTreeMap::new();
        roots.insert("region".to_string(), PathBuf::from("/data/region"));
        roots.insert("jp".to_string(), PathBuf::from("/data/jp/jp_input"));
        roots.insert("asia".to_string(), PathBuf::from("/data"));
        SourceFilter::new(&roots, DEFAULT_EXCLUDED_PATTERNS)
    }

    #[test]
    fn test_classify_suffixes() {
        let f = filter();
        assert_eq!(
            f.classify(Path::new("/data/jp/jp_input/cpi_m.parquet")),
            Some(Frequency::Monthly)
        );
        assert_eq!(
            f.classify(Path::new("/data/jp/jp_input/gdp_q.parquet")),
            Some(Frequency::Quarterly)
        );
        assert_eq!(f.classify(Path::new("/x/trade_a.parquet")), Some(Frequency::Annual));
        assert_eq!(f.classify(Path::new("/x/trade.parquet")), None);
        assert_eq!(f.classify(Path::new("/x/trade_m.csv")), None);
    }

    #[test]
    fn test_exclusion_is_case_insensitive_substring() {
        let f = filter();
        assert!(f.is_excluded("cpi_LATEST_m.parquet"));
        assert!(f.is_excluded("Recent_gdp_q.parquet"));
        assert!(f.is_excluded("prices_history_m.parquet"));
        assert!(!f.is_excluded("prices_m.parquet"));
        assert_eq!(f.classify(Path::new("/x/cpi_latest_m.parquet")), None);
    }

    #[test]
    fn test_country_longest_prefix() {
        let f = filter();
        assert_eq!(
            f.country_for(Path::new("/data/jp/jp_input/cpi_m.parquet")),
            Some("jp")
        );
        assert_eq!(
            f.country_for(Path::new("/data/region/flows_a.parquet")),
            Some("region")
        );
        assert_eq!(f.country_for(Path::new("/data/kr/x_m.parquet")), Some("asia"));
        assert_eq!(f.country_for(Path::new("/elsewhere/x_m.parquet")), None);
    }

    #[test]
    fn test_prefix_matches_whole_components() {
        let f = filter();
        assert_eq!(
            f.country_for(Path::new("/data/jp/jp_input_old/cpi_m.parquet")),
            Some("asia")
        );
    }

    #[test]
    fn test_route() {
        let f = filter();
        assert_eq!(f.route(Path::new("/data/jp/jp_input/cpi_m.parquet")), Some("jp"));
        assert_eq!(f.route(Path::new("/data/jp/jp_input/cpi_recent_m.parquet")), None);
        assert_eq!(f.route(Path::new("/data/jp/jp_input/notes.txt")), None);
        assert_eq!(f.route(Path::new("/tmp/cpi_m.parquet")), None);
    }

    #[test]
    fn test_countries_and_root() {
        let f = filter();
        assert_eq!(f.countries(), vec!["asia", "jp", "region"]);
        assert_eq!(f.root("jp"), Some(Path::new("/data/jp/jp_input")));
        assert_eq!(f.root("kr"), None);
    }
}
