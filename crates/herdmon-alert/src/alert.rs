//! Raised alerts and the per-tick statistics snapshot.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use herdmon_common::series::Series;
use herdmon_common::types::Level;

/// One alerting episode of a watch on one series and instance.
///
/// An alert is raised when a watch escalates out of the normal state and
/// stays in the per-series history after it ends. Its level tracks the
/// episode: `Red` or `Amber` while ongoing (escalation raises it in place),
/// `Green` once the watch observed the de-escalation condition. Apart from
/// the level transitions driven by the owning watch, the only mutation is
/// acknowledgement.
#[derive(Debug)]
pub struct Alert {
    serial: u64,
    watch: String,
    series: Series,
    instance: String,
    since: i64,
    level: AtomicU8,
    acknowledged: AtomicBool,
}

impl Alert {
    pub fn new(
        serial: u64,
        watch: &str,
        series: Series,
        instance: &str,
        level: Level,
        since: i64,
    ) -> Self {
        Self {
            serial,
            watch: watch.to_string(),
            series,
            instance: instance.to_string(),
            since,
            level: AtomicU8::new(encode(level)),
            acknowledged: AtomicBool::new(false),
        }
    }

    /// Monotonically increasing identifier, unique per engine.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn watch_name(&self) -> &str {
        &self.watch
    }

    pub fn series(&self) -> &Series {
        &self.series
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Millis timestamp of the sample that raised the alert.
    pub fn since(&self) -> i64 {
        self.since
    }

    pub fn level(&self) -> Level {
        decode(self.level.load(Ordering::Relaxed))
    }

    /// True until the watch de-escalates back to normal.
    pub fn is_ongoing(&self) -> bool {
        self.level() != Level::Green
    }

    pub(crate) fn set_level(&self, level: Level) {
        self.level.store(encode(level), Ordering::Relaxed);
    }

    /// Ends the episode; the alert stays in the history as cleared.
    pub(crate) fn clear(&self) {
        self.set_level(Level::Green);
    }

    pub fn acknowledge(&self) {
        self.acknowledged.store(true, Ordering::Relaxed);
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged.load(Ordering::Relaxed)
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {} on {} (watch '{}')",
            self.serial,
            self.level(),
            self.series,
            self.instance,
            self.watch
        )
    }
}

fn encode(level: Level) -> u8 {
    match level {
        Level::Green => 0,
        Level::Amber => 1,
        Level::Red => 2,
    }
}

fn decode(value: u8) -> Level {
    match value {
        0 => Level::Green,
        1 => Level::Amber,
        _ => Level::Red,
    }
}

/// Immutable statistics snapshot computed once per evaluation tick.
#[derive(Debug, Clone, Default)]
pub struct AlertStatistics {
    pub time: i64,
    pub watches: usize,
    /// Total alerts raised since the engine started.
    pub raised_total: u64,
    pub acknowledged_red: usize,
    pub unacknowledged_red: usize,
    pub acknowledged_amber: usize,
    pub unacknowledged_amber: usize,
    /// Serials of alerts currently ongoing per severity.
    pub ongoing_red_serials: Vec<u64>,
    pub ongoing_amber_serials: Vec<u64>,
}
