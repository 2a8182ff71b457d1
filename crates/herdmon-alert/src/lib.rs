//! Watch evaluation and alerting for the monitoring console.
//!
//! A [`watch::Watch`] is a named threshold rule over one metric series with
//! per-severity start/stop conditions. The [`engine::AlertEngine`] evaluates
//! all registered watches against the series repository once per tick on the
//! receiver instance, maintains a bounded alert history per series, and
//! keeps watch definitions synchronized across the cluster.

pub mod alert;
pub mod engine;
pub mod watch;

#[cfg(test)]
mod tests;

use herdmon_common::wire::WatchDef;

/// A polled producer of candidate watch definitions.
///
/// Sources are collected on every evaluation tick; the engine reconciles the
/// reported definitions against its registry, registering new or changed
/// watches and retiring watches no source reports anymore.
pub trait WatchSource: Send + Sync {
    /// Identifies the source in logs.
    fn name(&self) -> &str;

    /// Pushes the source's current candidate definitions into the sink.
    ///
    /// # Errors
    ///
    /// Returns an error when the source cannot produce its definitions this
    /// tick; previously collected watches stay registered.
    fn collect(&self, sink: &mut dyn WatchSink) -> anyhow::Result<()>;
}

/// Receiver side of a watch collection pass.
pub trait WatchSink {
    fn watch(&mut self, def: WatchDef);
}
