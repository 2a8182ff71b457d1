//! Watch definitions and their per-series evaluation state machine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use herdmon_common::series::{Series, SeriesError};
use herdmon_common::types::{CompareOp, Level, Metric};
use herdmon_common::wire::{CircumstanceDef, ConditionDef, WatchDef};
use herdmon_model::buffer::SeriesBuffer;
use herdmon_model::lookup::SeriesLookup;
use parking_lot::Mutex;

use crate::alert::Alert;

/// Failure to reconstruct a watch from its serialized definition.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("watch definition is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("watch definition names an invalid series: {0}")]
    Series(#[from] SeriesError),
}

/// One threshold condition: an operator, a threshold value, and how many
/// qualifying samples are required before the condition holds.
///
/// With `on_average` the condition compares the mean of the newest
/// `for_count` samples instead of requiring `for_count` consecutive
/// qualifying samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Condition {
    pub op: CompareOp,
    pub threshold: i64,
    pub for_count: u32,
    pub on_average: bool,
}

impl Condition {
    pub fn new(op: CompareOp, threshold: i64) -> Self {
        Self {
            op,
            threshold,
            for_count: 1,
            on_average: false,
        }
    }

    pub fn greater_than(threshold: i64) -> Self {
        Self::new(CompareOp::GreaterThan, threshold)
    }

    pub fn less_than(threshold: i64) -> Self {
        Self::new(CompareOp::LessThan, threshold)
    }

    pub fn greater_equal(threshold: i64) -> Self {
        Self::new(CompareOp::GreaterEqual, threshold)
    }

    pub fn less_equal(threshold: i64) -> Self {
        Self::new(CompareOp::LessEqual, threshold)
    }

    /// Requires the condition to hold for the newest `count` samples.
    #[must_use]
    pub fn for_last(mut self, count: u32) -> Self {
        self.for_count = count.max(1);
        self
    }

    /// Compares the average of the last `for_count` samples instead of each
    /// sample individually.
    #[must_use]
    pub fn averaged(mut self) -> Self {
        self.on_average = true;
        self
    }

    /// Feeds the newest sample into the streak counter and reports whether
    /// the condition currently holds.
    fn observe(&self, set: &SeriesBuffer, streak: &mut u32) -> bool {
        if self.on_average {
            return match set.average_of_last(self.for_count as usize) {
                Some(avg) => self.op.check_avg(avg, self.threshold),
                None => false,
            };
        }
        if self.op.check(set.last_value(), self.threshold) {
            *streak += 1;
        } else {
            *streak = 0;
        }
        *streak >= self.for_count
    }

    fn to_def(self) -> ConditionDef {
        ConditionDef {
            op: self.op,
            threshold: self.threshold,
            for_count: self.for_count,
            on_average: self.on_average,
        }
    }

    fn from_def(def: &ConditionDef) -> Self {
        Self {
            op: def.op,
            threshold: def.threshold,
            for_count: def.for_count.max(1),
            on_average: def.on_average,
        }
    }
}

/// Start/stop condition pair guarding one severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Circumstance {
    pub start: Condition,
    pub stop: Option<Condition>,
}

impl Circumstance {
    fn to_def(self) -> CircumstanceDef {
        CircumstanceDef {
            start: self.start.to_def(),
            stop: self.stop.map(Condition::to_def),
        }
    }

    fn from_def(def: &CircumstanceDef) -> Self {
        Self {
            start: Condition::from_def(&def.start),
            stop: def.stop.as_ref().map(Condition::from_def),
        }
    }
}

/// Per-(series, instance) evaluation state of one watch.
#[derive(Debug)]
struct WatchState {
    level: Option<Level>,
    last_time: i64,
    start_red: u32,
    stop_red: u32,
    start_amber: u32,
    stop_amber: u32,
    start_green: u32,
    ongoing: Option<Arc<Alert>>,
}

impl Default for WatchState {
    fn default() -> Self {
        Self {
            level: None,
            last_time: -1,
            start_red: 0,
            stop_red: 0,
            start_amber: 0,
            stop_amber: 0,
            start_green: 0,
            ongoing: None,
        }
    }
}

impl WatchState {
    fn level(&self) -> Level {
        self.level.unwrap_or(Level::Green)
    }

    fn reset_streaks(&mut self) {
        self.start_red = 0;
        self.stop_red = 0;
        self.start_amber = 0;
        self.stop_amber = 0;
        self.start_green = 0;
    }
}

/// A named threshold rule over one metric series.
///
/// The definition is immutable after construction; `disabled` and `stopped`
/// are runtime flags observed by the next evaluation tick. Evaluation state
/// lives inside the watch, keyed by (series, instance), so pattern watches
/// track every matching dataset independently.
pub struct Watch {
    name: String,
    metric: Metric,
    programmatic: bool,
    red: Option<Circumstance>,
    amber: Option<Circumstance>,
    green: Option<Circumstance>,
    disabled: AtomicBool,
    stopped: AtomicBool,
    states: Mutex<HashMap<(Series, String), WatchState>>,
}

impl Watch {
    pub fn builder(name: &str, metric: Metric) -> WatchBuilder {
        WatchBuilder {
            name: name.to_string(),
            metric,
            programmatic: false,
            red: None,
            amber: None,
            green: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metric(&self) -> &Metric {
        &self.metric
    }

    pub fn series(&self) -> &Series {
        &self.metric.series
    }

    /// System-defined watches are never persisted to the watch config store.
    pub fn is_programmatic(&self) -> bool {
        self.programmatic
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }

    pub fn disable(&self) {
        self.disabled.store(true, Ordering::Relaxed);
    }

    pub fn enable(&self) {
        self.disabled.store(false, Ordering::Relaxed);
    }

    /// A stopped watch is lazily removed the next time its group is
    /// iterated by the engine.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    pub fn to_def(&self) -> WatchDef {
        WatchDef {
            name: self.name.clone(),
            series: self.metric.series.as_str().to_string(),
            unit: self.metric.unit,
            red: self.red.map(Circumstance::to_def),
            amber: self.amber.map(Circumstance::to_def),
            green: self.green.map(Circumstance::to_def),
        }
    }

    /// Reconstructs a watch from its serialized definition.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Series`] when the definition names a series
    /// failing the name grammar.
    pub fn from_def(def: &WatchDef, programmatic: bool) -> Result<Self, WatchError> {
        let series = Series::new(&def.series)?;
        let mut builder = Watch::builder(&def.name, Metric::new(series, def.unit));
        if programmatic {
            builder = builder.programmatic();
        }
        if let Some(red) = &def.red {
            let c = Circumstance::from_def(red);
            builder = builder.red(c.start, c.stop);
        }
        if let Some(amber) = &def.amber {
            let c = Circumstance::from_def(amber);
            builder = builder.amber(c.start, c.stop);
        }
        if let Some(green) = &def.green {
            let c = Circumstance::from_def(green);
            builder = builder.green(c.start);
        }
        Ok(builder.build())
    }

    pub fn to_json(&self) -> Result<String, WatchError> {
        Ok(serde_json::to_string(&self.to_def())?)
    }

    pub fn from_json(json: &str) -> Result<Self, WatchError> {
        let def: WatchDef = serde_json::from_str(json)?;
        Self::from_def(&def, false)
    }

    /// True when the serialized definitions agree; runtime state and the
    /// programmatic flag are ignored.
    pub fn equals_functionally(&self, other: &Watch) -> bool {
        self.to_def() == other.to_def()
    }

    pub fn equals_def(&self, def: &WatchDef) -> bool {
        self.to_def() == *def
    }

    /// Evaluates the watch against all datasets of its series and returns
    /// the newly raised alerts. Serial numbers are drawn from `serials`.
    pub fn check(&self, lookup: &dyn SeriesLookup, serials: &AtomicU64) -> Vec<Arc<Alert>> {
        let mut raised = Vec::new();
        let sets = lookup.select_series(&self.metric.series, &[]);
        let mut states = self.states.lock();
        for set in sets {
            if set.is_empty() {
                continue;
            }
            let key = (set.series().clone(), set.instance().to_string());
            let state = states.entry(key).or_default();
            if state.last_time == set.last_time() {
                continue; // no new sample since the last tick
            }
            state.last_time = set.last_time();
            if let Some(alert) = self.transition(state, &set, serials) {
                raised.push(alert);
            }
        }
        raised
    }

    /// Advances the per-dataset state machine by one sample. Returns an
    /// alert only for episodes newly entering the history; escalation and
    /// de-escalation mutate the ongoing alert in place.
    fn transition(
        &self,
        state: &mut WatchState,
        set: &SeriesBuffer,
        serials: &AtomicU64,
    ) -> Option<Arc<Alert>> {
        let red_start = self
            .red
            .as_ref()
            .is_some_and(|c| c.start.observe(set, &mut state.start_red));
        let red_stop = self
            .red
            .as_ref()
            .and_then(|c| c.stop.as_ref())
            .is_some_and(|c| c.observe(set, &mut state.stop_red));
        let amber_start = self
            .amber
            .as_ref()
            .is_some_and(|c| c.start.observe(set, &mut state.start_amber));
        let amber_stop = self
            .amber
            .as_ref()
            .and_then(|c| c.stop.as_ref())
            .is_some_and(|c| c.observe(set, &mut state.stop_amber));
        let green_start = self
            .green
            .as_ref()
            .is_some_and(|c| c.start.observe(set, &mut state.start_green));

        match state.level() {
            level if level < Level::Red && red_start => {
                state.reset_streaks();
                match state.ongoing.as_ref() {
                    Some(alert) => {
                        // escalate the ongoing amber episode in place
                        alert.set_level(Level::Red);
                        state.level = Some(Level::Red);
                        None
                    }
                    None => Some(self.raise(state, set, Level::Red, serials)),
                }
            }
            Level::Green if amber_start => {
                state.reset_streaks();
                Some(self.raise(state, set, Level::Amber, serials))
            }
            Level::Red if red_stop || green_start => {
                state.reset_streaks();
                if amber_start {
                    // still worth an amber: de-escalate the episode
                    if let Some(alert) = state.ongoing.as_ref() {
                        alert.set_level(Level::Amber);
                    }
                    state.level = Some(Level::Amber);
                } else {
                    self.clear(state);
                }
                None
            }
            Level::Amber if amber_stop || green_start => {
                state.reset_streaks();
                self.clear(state);
                None
            }
            _ => None,
        }
    }

    fn raise(
        &self,
        state: &mut WatchState,
        set: &SeriesBuffer,
        level: Level,
        serials: &AtomicU64,
    ) -> Arc<Alert> {
        let alert = Arc::new(Alert::new(
            serials.fetch_add(1, Ordering::Relaxed) + 1,
            &self.name,
            set.series().clone(),
            set.instance(),
            level,
            set.last_time(),
        ));
        tracing::info!(alert = %alert, "alert raised");
        state.level = Some(level);
        state.ongoing = Some(Arc::clone(&alert));
        alert
    }

    fn clear(&self, state: &mut WatchState) {
        if let Some(alert) = state.ongoing.take() {
            alert.clear();
            tracing::info!(alert = %alert, "alert cleared");
        }
        state.level = Some(Level::Green);
    }
}

impl std::fmt::Debug for Watch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watch")
            .field("name", &self.name)
            .field("series", &self.metric.series)
            .field("programmatic", &self.programmatic)
            .field("disabled", &self.is_disabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Builder for [`Watch`]es.
pub struct WatchBuilder {
    name: String,
    metric: Metric,
    programmatic: bool,
    red: Option<Circumstance>,
    amber: Option<Circumstance>,
    green: Option<Circumstance>,
}

impl WatchBuilder {
    /// Marks the watch as system-defined.
    #[must_use]
    pub fn programmatic(mut self) -> Self {
        self.programmatic = true;
        self
    }

    #[must_use]
    pub fn red(mut self, start: Condition, stop: Option<Condition>) -> Self {
        self.red = Some(Circumstance { start, stop });
        self
    }

    #[must_use]
    pub fn amber(mut self, start: Condition, stop: Option<Condition>) -> Self {
        self.amber = Some(Circumstance { start, stop });
        self
    }

    /// The recovery condition: while raised, satisfying it returns the
    /// watch to normal.
    #[must_use]
    pub fn green(mut self, start: Condition) -> Self {
        self.green = Some(Circumstance { start, stop: None });
        self
    }

    pub fn build(self) -> Watch {
        Watch {
            name: self.name,
            metric: self.metric,
            programmatic: self.programmatic,
            red: self.red,
            amber: self.amber,
            green: self.green,
            disabled: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            states: Mutex::new(HashMap::new()),
        }
    }
}
