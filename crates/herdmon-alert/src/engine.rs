//! The periodic watch checker.
//!
//! Only the receiver instance evaluates watches; sender instances collect
//! watch definitions from their local sources and forward them, so the
//! receiver always holds the cluster-wide registry.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use chrono::Utc;
use dashmap::DashMap;
use herdmon_common::runtime::{Transport, WatchConfigStore};
use herdmon_common::series::Series;
use herdmon_common::types::{Level, Metric, Unit};
use herdmon_common::wire::{Message, WatchDef, WatchesSnapshot};
use herdmon_model::lookup::SeriesLookup;
use parking_lot::Mutex;

use crate::alert::{Alert, AlertStatistics};
use crate::watch::{Condition, Watch};
use crate::{WatchSink, WatchSource};

const MAX_ALERTS_PER_SERIES: usize = 10;

type WatchGroup = DashMap<Series, HashMap<String, Arc<Watch>>>;

/// Watch registry, alert history and the evaluation tick.
pub struct AlertEngine {
    instance: String,
    receiver: bool,
    transport: Arc<dyn Transport>,
    watch_config: Arc<dyn WatchConfigStore>,
    lookup: Arc<dyn SeriesLookup>,
    watches_by_name: DashMap<String, Arc<Watch>>,
    simple_watches: WatchGroup,
    pattern_watches: WatchGroup,
    alerts: DashMap<Series, VecDeque<Arc<Alert>>>,
    watch_sources: Mutex<Vec<Arc<dyn WatchSource>>>,
    /// Watches collected per instance, used to diff what sources report.
    collected_by_instance: DashMap<String, HashMap<String, Arc<Watch>>>,
    statistics: ArcSwap<AlertStatistics>,
    next_serial: AtomicU64,
    raised_total: AtomicU64,
    eval_loop_millis: AtomicI64,
}

impl AlertEngine {
    pub fn new(
        instance: &str,
        receiver: bool,
        transport: Arc<dyn Transport>,
        watch_config: Arc<dyn WatchConfigStore>,
        lookup: Arc<dyn SeriesLookup>,
    ) -> Self {
        let engine = Self {
            instance: instance.to_string(),
            receiver,
            transport,
            watch_config,
            lookup,
            watches_by_name: DashMap::new(),
            simple_watches: DashMap::new(),
            pattern_watches: DashMap::new(),
            alerts: DashMap::new(),
            watch_sources: Mutex::new(Vec::new()),
            collected_by_instance: DashMap::new(),
            statistics: ArcSwap::from_pointee(AlertStatistics::default()),
            next_serial: AtomicU64::new(0),
            raised_total: AtomicU64::new(0),
            eval_loop_millis: AtomicI64::new(0),
        };
        if receiver {
            engine.add_builtin_watches();
            engine.load_persisted_watches();
        }
        engine
    }

    /// The self-monitoring watches every receiver carries.
    fn add_builtin_watches(&self) {
        let collection = Series::new("ns:monitoring CollectionDuration").expect("valid series");
        self.add_watch(Arc::new(
            Watch::builder(
                "Metric Collection Duration",
                Metric::new(collection, Unit::Millis),
            )
            .programmatic()
            .red(
                Condition::greater_than(800).for_last(2).averaged(),
                Some(Condition::less_equal(800).for_last(3)),
            )
            .amber(
                Condition::greater_than(600).for_last(2).averaged(),
                Some(Condition::less_equal(600).for_last(3)),
            )
            .green(Condition::less_than(400))
            .build(),
        ));
        let eval = Series::new("ns:monitoring WatchLoopDuration").expect("valid series");
        self.add_watch(Arc::new(
            Watch::builder("Watch Loop Duration", Metric::new(eval, Unit::Millis))
                .programmatic()
                .red(
                    Condition::greater_than(800).for_last(2).averaged(),
                    Some(Condition::less_equal(800).for_last(3)),
                )
                .amber(
                    Condition::greater_than(600).for_last(3).averaged(),
                    Some(Condition::less_equal(600).for_last(3)),
                )
                .green(Condition::less_than(400))
                .build(),
        ));
    }

    fn load_persisted_watches(&self) {
        for json in self.watch_config.list() {
            match Watch::from_json(&json) {
                Ok(watch) => self.add_watch(Arc::new(watch)),
                Err(error) => {
                    tracing::warn!(error = %error, "skipping malformed persisted watch");
                }
            }
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn is_receiver(&self) -> bool {
        self.receiver
    }

    pub fn register_watch_source(&self, source: Arc<dyn WatchSource>) {
        self.watch_sources.lock().push(source);
    }

    /// Milliseconds the most recent evaluation tick took.
    pub fn evaluation_loop_millis(&self) -> i64 {
        self.eval_loop_millis.load(Ordering::Relaxed)
    }

    pub fn statistics(&self) -> Arc<AlertStatistics> {
        self.statistics.load_full()
    }

    /// Registers a watch, displacing (stopping and removing) any previous
    /// watch of the same name. Non-programmatic watches are persisted.
    pub fn add_watch(&self, watch: Arc<Watch>) {
        if self.watch_config.is_disabled(watch.name()) {
            watch.disable();
        }
        let existing = self
            .watches_by_name
            .insert(watch.name().to_string(), Arc::clone(&watch));
        if let Some(existing) = existing {
            self.remove_watch(&existing);
        }
        let series = watch.series().clone();
        let group = if series.is_pattern() {
            &self.pattern_watches
        } else {
            &self.simple_watches
        };
        group
            .entry(series)
            .or_default()
            .insert(watch.name().to_string(), Arc::clone(&watch));
        if !watch.is_programmatic() {
            match watch.to_json() {
                Ok(json) => self.watch_config.add(watch.name(), &json),
                Err(error) => tracing::warn!(error = %error, "failed to persist watch"),
            }
        }
    }

    /// Stops the watch and drops it from the series buckets. The name map
    /// and the persisted config entry are only touched while the watch is
    /// still the registered one of its name — a displaced watch was already
    /// superseded there, and its config slot now belongs to the successor.
    pub fn remove_watch(&self, watch: &Arc<Watch>) {
        watch.stop();
        remove_from_group(&self.simple_watches, watch);
        remove_from_group(&self.pattern_watches, watch);
        let name = watch.name().to_string();
        let still_registered = self
            .watches_by_name
            .get(&name)
            .is_some_and(|current| Arc::ptr_eq(&current, watch));
        if !still_registered {
            return;
        }
        self.watches_by_name.remove(&name);
        if let Some(mut collected) = self.collected_by_instance.get_mut(&self.instance) {
            collected.remove(&name);
        }
        if !watch.is_programmatic() {
            self.watch_config.remove(&name);
        }
    }

    /// Enables or disables a watch, persisting the choice. Returns false
    /// for unknown names.
    pub fn toggle_watch(&self, name: &str, disabled: bool) -> bool {
        let Some(watch) = self.watch_by_name(name) else {
            return false;
        };
        if disabled {
            watch.disable();
            self.watch_config.disable(watch.name());
        } else {
            watch.enable();
            self.watch_config.enable(watch.name());
        }
        true
    }

    pub fn watch_by_name(&self, name: &str) -> Option<Arc<Watch>> {
        self.watches_by_name.get(name).map(|w| Arc::clone(&w))
    }

    pub fn watches(&self) -> Vec<Arc<Watch>> {
        let mut all = Vec::new();
        for group in [&self.simple_watches, &self.pattern_watches] {
            for entry in group.iter() {
                all.extend(entry.value().values().cloned());
            }
        }
        all
    }

    /// Watches relevant for a series: for a concrete series its direct
    /// watches, for a pattern the watches stored under that pattern plus
    /// all simple watches whose series the pattern matches.
    pub fn watches_for(&self, series: &Series) -> Vec<Arc<Watch>> {
        if !series.is_pattern() {
            return match self.simple_watches.get(series) {
                Some(watches) => watches.values().cloned().collect(),
                None => Vec::new(),
            };
        }
        if series.is_any() {
            return self.watches();
        }
        let mut watches: Vec<Arc<Watch>> = match self.pattern_watches.get(series) {
            Some(group) => group.values().cloned().collect(),
            None => Vec::new(),
        };
        for entry in self.simple_watches.iter() {
            if series.matches(entry.key()) {
                watches.extend(entry.value().values().cloned());
            }
        }
        watches
    }

    pub fn alerts(&self) -> Vec<Arc<Alert>> {
        let mut all = Vec::new();
        for entry in self.alerts.iter() {
            all.extend(entry.value().iter().cloned());
        }
        all
    }

    pub fn alerts_for(&self, series: &Series) -> Vec<Arc<Alert>> {
        if !series.is_pattern() {
            return match self.alerts.get(series) {
                Some(queue) => queue.iter().cloned().collect(),
                None => Vec::new(),
            };
        }
        if series.is_any() {
            return self.alerts();
        }
        let mut matches = Vec::new();
        for entry in self.alerts.iter() {
            if series.matches(entry.key()) {
                matches.extend(entry.value().iter().cloned());
            }
        }
        matches
    }

    pub fn alerts_matching(&self, filter: impl Fn(&Alert) -> bool) -> Vec<Arc<Alert>> {
        let mut matches = Vec::new();
        for entry in self.alerts.iter() {
            matches.extend(
                entry
                    .value()
                    .iter()
                    .filter(|alert| filter(alert.as_ref()))
                    .cloned(),
            );
        }
        matches
    }

    /// Acknowledges the alert with the given serial. Returns false when no
    /// such alert is retained.
    pub fn acknowledge(&self, serial: u64) -> bool {
        for entry in self.alerts.iter() {
            if let Some(alert) = entry.value().iter().find(|a| a.serial() == serial) {
                alert.acknowledge();
                return true;
            }
        }
        false
    }

    /// One evaluation tick: reconcile watch sources, then either evaluate
    /// (receiver) or forward the collected definitions (sender).
    pub fn check_tick(&self) {
        let started = Instant::now();
        self.collect_watches();
        if self.receiver {
            self.check_group(&self.simple_watches);
            self.check_group(&self.pattern_watches);
            self.statistics.store(Arc::new(self.compute_statistics()));
        } else {
            self.send_watches_snapshot();
        }
        self.eval_loop_millis
            .store(started.elapsed().as_millis() as i64, Ordering::Relaxed);
    }

    /// Polls the local watch sources and reconciles the reported
    /// definitions: new or functionally changed watches are re-registered,
    /// watches no longer reported are retired.
    fn collect_watches(&self) {
        let sources: Vec<Arc<dyn WatchSource>> = self.watch_sources.lock().clone();
        let mut defs: Vec<WatchDef> = Vec::new();
        let mut sink = DefSink { defs: &mut defs };
        for source in sources {
            if let Err(error) = source.collect(&mut sink) {
                tracing::warn!(source = source.name(), error = %error, "watch source failed");
            }
        }
        let collected_before: HashMap<String, Arc<Watch>> = self
            .collected_by_instance
            .get(&self.instance)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        if defs.is_empty() && collected_before.is_empty() {
            return;
        }
        let instance = self.instance.clone();
        self.reconcile(&instance, defs, &collected_before);
    }

    /// Merges the watch definitions one sender instance reports. A watch
    /// stays registered while at least one instance still collects it.
    pub fn add_remote_watches(&self, snapshot: WatchesSnapshot) {
        if !self.receiver {
            // not meant for this instance; ignore rather than escalate
            return;
        }
        let collected_before: HashMap<String, Arc<Watch>> = self
            .collected_by_instance
            .get(&snapshot.instance)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        self.reconcile(&snapshot.instance, snapshot.watches, &collected_before);
    }

    fn reconcile(
        &self,
        instance: &str,
        defs: Vec<WatchDef>,
        collected_before: &HashMap<String, Arc<Watch>>,
    ) {
        let mut not_seen: HashSet<String> = collected_before.keys().cloned().collect();
        for def in defs {
            not_seen.remove(&def.name);
            let changed = !collected_before
                .get(&def.name)
                .is_some_and(|watch| watch.equals_def(&def));
            if !changed {
                continue;
            }
            match Watch::from_def(&def, true) {
                Ok(watch) => {
                    let watch = Arc::new(watch);
                    self.add_watch(Arc::clone(&watch));
                    self.collected_by_instance
                        .entry(instance.to_string())
                        .or_default()
                        .insert(watch.name().to_string(), watch);
                }
                Err(error) => {
                    tracing::debug!(watch = %def.name, error = %error, "rejected collected watch");
                }
            }
        }
        for name in not_seen {
            if let Some(mut collected) = self.collected_by_instance.get_mut(instance) {
                collected.remove(&name);
            }
            if !self.collected_by_any_instance(&name) {
                if let Some(watch) = collected_before.get(&name) {
                    self.remove_watch(watch);
                }
            }
        }
    }

    fn collected_by_any_instance(&self, name: &str) -> bool {
        self.collected_by_instance
            .iter()
            .any(|entry| entry.value().contains_key(name))
    }

    fn send_watches_snapshot(&self) {
        let watches: Vec<WatchDef> = self
            .collected_by_instance
            .get(&self.instance)
            .map(|m| m.values().map(|w| w.to_def()).collect())
            .unwrap_or_default();
        let message = Message::Watches(WatchesSnapshot {
            instance: self.instance.clone(),
            watches,
        });
        match message.encode() {
            Ok(payload) => {
                if !self.transport.send(&payload) {
                    tracing::debug!(instance = %self.instance, "failed to send watches snapshot");
                }
            }
            Err(error) => {
                tracing::debug!(error = %error, "failed to encode watches snapshot");
            }
        }
    }

    fn check_group(&self, group: &WatchGroup) {
        // snapshot the group first: stopped-watch removal mutates the maps
        let watches: Vec<Arc<Watch>> = group
            .iter()
            .flat_map(|entry| entry.value().values().cloned().collect::<Vec<_>>())
            .collect();
        for watch in watches {
            if watch.is_stopped() {
                self.remove_watch(&watch);
                continue;
            }
            if watch.is_disabled() {
                continue;
            }
            for alert in watch.check(self.lookup.as_ref(), &self.next_serial) {
                self.raised_total.fetch_add(1, Ordering::Relaxed);
                let mut queue = self.alerts.entry(alert.series().clone()).or_default();
                queue.push_back(alert);
                limit_queue_size(&mut queue);
            }
        }
    }

    fn compute_statistics(&self) -> AlertStatistics {
        let mut stats = AlertStatistics {
            time: Utc::now().timestamp_millis(),
            watches: self.watches_by_name.len(),
            raised_total: self.raised_total.load(Ordering::Relaxed),
            ..AlertStatistics::default()
        };
        for entry in self.alerts.iter() {
            for alert in entry.value() {
                match alert.level() {
                    Level::Red => {
                        if alert.is_acknowledged() {
                            stats.acknowledged_red += 1;
                        } else {
                            stats.unacknowledged_red += 1;
                        }
                        stats.ongoing_red_serials.push(alert.serial());
                    }
                    Level::Amber => {
                        if alert.is_acknowledged() {
                            stats.acknowledged_amber += 1;
                        } else {
                            stats.unacknowledged_amber += 1;
                        }
                        stats.ongoing_amber_serials.push(alert.serial());
                    }
                    Level::Green => {}
                }
            }
        }
        stats
    }
}

fn remove_from_group(group: &WatchGroup, watch: &Arc<Watch>) {
    let mut emptied = None;
    for mut entry in group.iter_mut() {
        let held = entry
            .value()
            .get(watch.name())
            .is_some_and(|w| Arc::ptr_eq(w, watch));
        if held {
            entry.value_mut().remove(watch.name());
            if entry.value().is_empty() {
                emptied = Some(entry.key().clone());
            }
            break;
        }
    }
    if let Some(series) = emptied {
        group.remove_if(&series, |_, watches| watches.is_empty());
    }
}

/// Evicts one alert from an over-full queue, preferring to drop cleared
/// alerts, then acknowledged ones, then ambers, and only as a last resort
/// the chronologically oldest entry. Unacknowledged high-severity alerts
/// outlive everything else.
pub(crate) fn limit_queue_size(queue: &mut VecDeque<Arc<Alert>>) {
    if queue.len() <= MAX_ALERTS_PER_SERIES {
        return;
    }
    if !remove_first(queue, |alert| alert.level().is_less_severe_than(Level::Amber)) {
        if !remove_first(queue, |alert| alert.is_acknowledged()) {
            if !remove_first(queue, |alert| alert.level() == Level::Amber) {
                queue.pop_front();
            }
        }
    }
}

fn remove_first(queue: &mut VecDeque<Arc<Alert>>, test: impl Fn(&Alert) -> bool) -> bool {
    match queue.iter().position(|alert| test(alert)) {
        Some(index) => {
            queue.remove(index);
            true
        }
        None => false,
    }
}

struct DefSink<'a> {
    defs: &'a mut Vec<WatchDef>,
}

impl WatchSink for DefSink<'_> {
    fn watch(&mut self, def: WatchDef) {
        self.defs.push(def);
    }
}
