//! Metric collection framework and the in-memory series repository.
//!
//! Hosts register [`MetricSource`] implementations; once per second the
//! repository polls every due source through a [`MetricSink`] and either
//! stores the values locally (on the receiver instance) or ships them to the
//! receiver as a compact snapshot (on sender instances).

pub mod repository;


/// Collection hints a source declares about itself.
#[derive(Debug, Clone, Default)]
pub struct SourceInfo {
    /// Optional namespace; series emitted by the source are prefixed with
    /// `ns:<namespace> `.
    pub namespace: Option<String>,
    /// Collect only every `interval_secs`th second. Zero or one means every
    /// tick.
    pub interval_secs: u64,
}

/// A polled producer of metric values.
///
/// Implementations are registered with the repository and called at each
/// collection tick they are due. A failing source is isolated: the error is
/// logged once per failure streak, counted in the collection statistics, and
/// collection of the remaining sources proceeds.
pub trait MetricSource: Send + Sync {
    /// Identifies the source in logs and in the failure dedup set.
    fn name(&self) -> &str;

    fn info(&self) -> SourceInfo {
        SourceInfo::default()
    }

    /// Pushes the source's current values into the sink.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying probe fails; values already
    /// pushed into the sink this tick are kept.
    fn collect(&self, sink: &mut dyn MetricSink) -> anyhow::Result<()>;
}

/// Receiver side of a collection pass.
pub trait MetricSink {
    /// Records one `(series, value)` observation for the current tick.
    fn point(&mut self, series: &str, value: i64);

    /// Records a point-in-time event for a series. `keyed` annotations
    /// replace an earlier annotation with the same first attribute value.
    fn annotation(&mut self, series: &str, value: i64, keyed: bool, attrs: Vec<(String, String)>);
}

/// Prefixes all series pushed through it with `ns:<namespace> `.
pub(crate) struct NamespacedSink<'a> {
    pub inner: &'a mut dyn MetricSink,
    pub namespace: String,
}

impl MetricSink for NamespacedSink<'_> {
    fn point(&mut self, series: &str, value: i64) {
        self.inner.point(&format!("ns:{} {series}", self.namespace), value);
    }

    fn annotation(&mut self, series: &str, value: i64, keyed: bool, attrs: Vec<(String, String)>) {
        self.inner
            .annotation(&format!("ns:{} {series}", self.namespace), value, keyed, attrs);
    }
}
