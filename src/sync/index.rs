//! Search index and aggregate statistics rebuild.

use crate::storage::{
    compute_stats, rebuild_search_index, write_stats, AggregateStats, Database, StatsCache,
};
use crate::Result;

/// Rebuild the derived tables from the current series rows.
///
/// Runs in one transaction so readers see either the old or the new index
/// and stats together. The in-process cache is replaced only after commit.
///
/// # Errors
///
/// Returns an error if the rebuild fails; the previous index, stats and
/// cached copy stay in place.
pub fn rebuild_indexes(db: &Database, cache: &StatsCache) -> Result<AggregateStats> {
    let stats = db.with_transaction(|conn| {
        rebuild_search_index(conn)?;
        let stats = compute_stats(conn)?;
        write_stats(conn, &stats)?;
        Ok(stats)
    })?;

    cache.replace(stats.clone());

    tracing::info!(
        series = stats.total_series,
        series_freq = stats.total_series_freq,
        points = stats.total_data_points,
        "Rebuilt search index and stats"
    );
    Ok(stats)
}
