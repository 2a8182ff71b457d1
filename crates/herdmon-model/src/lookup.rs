//! Read access to collected series data.

use std::sync::Arc;

use herdmon_common::series::Series;

use crate::buffer::SeriesBuffer;

/// Consistent read access to the series store, as consumed by the watch
/// evaluation engine and by dashboards.
///
/// A single call returns buffers drawn from one snapshot; separate calls may
/// observe different collection ticks, so callers needing a consistent
/// multi-series view must request all series in one call.
pub trait SeriesLookup: Send + Sync {
    /// Names of all instances data has been seen from, the local one first.
    fn instances(&self) -> Vec<String>;

    /// All buffers for a concrete series or a pattern, filtered to the given
    /// instances; an empty filter means all known instances.
    fn select_series(&self, series: &Series, instances: &[String]) -> Vec<Arc<SeriesBuffer>>;
}
