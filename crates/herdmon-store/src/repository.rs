//! The in-memory series store with double-buffered snapshot reads.
//!
//! Two maps work like a double-buffered image: collection writes into the
//! write buffer while reads are served from the read buffer, and at the end
//! of the tick a single atomic pointer swap publishes the freshly written
//! map. A single repository call therefore always observes one tick;
//! separate calls may straddle a swap, so multi-series consumers request
//! everything they need in one call.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use chrono::Utc;
use dashmap::DashMap;
use herdmon_common::runtime::Transport;
use herdmon_common::series::Series;
use herdmon_common::wire::{AnnotationRecord, Message, PointRecord, SeriesSnapshot};
use herdmon_model::annotations::{SeriesAnnotation, SeriesAnnotations};
use herdmon_model::buffer::SeriesBuffer;
use herdmon_model::lookup::SeriesLookup;
use parking_lot::Mutex;

use crate::{MetricSink, MetricSource, NamespacedSink};

const SECONDS_CAPACITY: usize = 60;
const MAX_ANNOTATIONS_PER_SERIES: usize = 20;

/// Outcome of the most recent collection tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectionStats {
    pub time: i64,
    pub duration_millis: i64,
    pub sources_collected: u32,
    pub sources_failed: u32,
    pub series_count: usize,
}

type SeriesMap = HashMap<Series, Arc<SeriesBuffer>>;

/// In-memory store of one [`SeriesBuffer`] per series and instance.
///
/// On the receiver instance the repository holds local data plus the merged
/// snapshots of all sender instances; on a sender it only packages each
/// tick's values for transport.
pub struct SeriesRepository {
    instance: String,
    receiver: bool,
    transport: Arc<dyn Transport>,
    read: ArcSwap<SeriesMap>,
    write: Mutex<SeriesMap>,
    remote: DashMap<Series, Vec<Arc<SeriesBuffer>>>,
    annotations: DashMap<Series, Arc<SeriesAnnotations>>,
    instances: Mutex<Vec<String>>,
    sources: Mutex<Vec<Arc<dyn MetricSource>>>,
    failing_sources: Mutex<HashSet<String>>,
    collected_second: AtomicI64,
    stats: ArcSwap<CollectionStats>,
}

impl SeriesRepository {
    pub fn new(instance: &str, receiver: bool, transport: Arc<dyn Transport>) -> Self {
        Self {
            instance: instance.to_string(),
            receiver,
            transport,
            read: ArcSwap::from_pointee(SeriesMap::new()),
            write: Mutex::new(SeriesMap::new()),
            remote: DashMap::new(),
            annotations: DashMap::new(),
            instances: Mutex::new(vec![instance.to_string()]),
            sources: Mutex::new(Vec::new()),
            failing_sources: Mutex::new(HashSet::new()),
            collected_second: AtomicI64::new(0),
            stats: ArcSwap::from_pointee(CollectionStats::default()),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn is_receiver(&self) -> bool {
        self.receiver
    }

    pub fn register_source(&self, source: Arc<dyn MetricSource>) {
        self.sources.lock().push(source);
    }

    pub fn collection_stats(&self) -> CollectionStats {
        **self.stats.load()
    }

    /// Second-aligned epoch millis of the most recent collection tick.
    pub fn collected_second(&self) -> i64 {
        self.collected_second.load(Ordering::Relaxed)
    }

    /// Runs one collection pass at the current wall-clock second.
    pub fn collect_tick(&self) {
        let now = Utc::now().timestamp_millis() / 1000 * 1000;
        self.collect_tick_at(now);
    }

    /// Runs one collection pass for the given second (millis are expected to
    /// be stripped already).
    pub fn collect_tick_at(&self, now: i64) {
        self.collected_second.store(now, Ordering::Relaxed);
        if self.receiver {
            self.collect_to_memory(now);
        } else {
            self.collect_to_publish(now);
        }
    }

    /// Receiver path: carry the previous snapshot forward, collect into the
    /// write buffer, then publish it with one atomic swap.
    fn collect_to_memory(&self, now: i64) {
        let started = Instant::now();
        let mut write = self.write.lock();
        write.clear();
        for (series, buffer) in self.read.load().iter() {
            write.insert(series.clone(), Arc::clone(buffer));
        }
        let (collected, failed) = {
            let mut sink = MapSink {
                repository: self,
                map: &mut write,
                time: now,
            };
            self.collect_all(&mut sink, now)
        };
        let duration_millis = started.elapsed().as_millis() as i64;
        let series_count = write.len();
        let mut sink = MapSink {
            repository: self,
            map: &mut write,
            time: now,
        };
        monitoring_points(&mut sink, duration_millis, collected, failed, Some(series_count));
        self.read.store(Arc::new(std::mem::take(&mut *write)));
        self.stats.store(Arc::new(CollectionStats {
            time: now,
            duration_millis,
            sources_collected: collected,
            sources_failed: failed,
            series_count,
        }));
    }

    /// Sender path: package the tick into a snapshot and hand it to the
    /// transport. A failed send is logged and dropped — the next tick ships
    /// fresh data anyway.
    fn collect_to_publish(&self, now: i64) {
        let started = Instant::now();
        let mut sink = SnapshotSink {
            snapshot: SeriesSnapshot {
                instance: self.instance.clone(),
                time: now,
                points: Vec::new(),
                annotations: Vec::new(),
            },
        };
        let (collected, failed) = self.collect_all(&mut sink, now);
        let duration_millis = started.elapsed().as_millis() as i64;
        monitoring_points(&mut sink, duration_millis, collected, failed, None);
        match Message::Series(sink.snapshot).encode() {
            Ok(payload) => {
                if !self.transport.send(&payload) {
                    tracing::debug!(instance = %self.instance, "failed to send data snapshot");
                }
            }
            Err(error) => {
                tracing::debug!(error = %error, "failed to encode data snapshot");
            }
        }
        self.stats.store(Arc::new(CollectionStats {
            time: now,
            duration_millis,
            sources_collected: collected,
            sources_failed: failed,
            series_count: 0,
        }));
    }

    /// Polls every due source in isolation. Returns (collected, failed)
    /// counts for this tick.
    fn collect_all(&self, sink: &mut dyn MetricSink, now: i64) -> (u32, u32) {
        let second = now / 1000;
        let sources: Vec<Arc<dyn MetricSource>> = self.sources.lock().clone();
        let mut collected = 0;
        let mut failed = 0;
        for source in sources {
            let info = source.info();
            if info.interval_secs > 1 && second % info.interval_secs as i64 != 0 {
                continue;
            }
            let result = match info.namespace {
                Some(namespace) => source.collect(&mut NamespacedSink {
                    inner: &mut *sink,
                    namespace,
                }),
                None => source.collect(&mut *sink),
            };
            match result {
                Ok(()) => {
                    collected += 1;
                    self.failing_sources.lock().remove(source.name());
                }
                Err(error) => {
                    failed += 1;
                    // log once per failure streak
                    if self.failing_sources.lock().insert(source.name().to_string()) {
                        tracing::warn!(source = source.name(), error = %error, "metric source failed");
                    }
                }
            }
        }
        (collected, failed)
    }

    /// Merges one sender instance's snapshot into the remote datasets.
    pub fn apply_snapshot(&self, snapshot: SeriesSnapshot) {
        if !self.receiver {
            return;
        }
        self.register_instance(&snapshot.instance);
        for record in snapshot.annotations {
            self.apply_remote_annotation(&snapshot.instance, snapshot.time, record);
        }
        for record in snapshot.points {
            let series = match Series::new(&record.series) {
                Ok(series) if !series.is_pattern() => series,
                Ok(_) | Err(_) => {
                    tracing::trace!(series = %record.series, "rejected remote series name");
                    continue;
                }
            };
            let mut datasets = self.remote.entry(series.clone()).or_default();
            match datasets
                .iter_mut()
                .find(|buffer| buffer.instance() == snapshot.instance)
            {
                Some(existing) => {
                    *existing = Arc::new(existing.add(snapshot.time, record.value));
                }
                None => {
                    let seeded = SeriesBuffer::new(&snapshot.instance, series, SECONDS_CAPACITY)
                        .add(snapshot.time, record.value);
                    datasets.push(Arc::new(seeded));
                }
            }
        }
    }

    fn apply_remote_annotation(&self, instance: &str, time: i64, record: AnnotationRecord) {
        let series = match Series::new(&record.series) {
            Ok(series) if !series.is_pattern() => series,
            Ok(_) | Err(_) => {
                tracing::trace!(series = %record.series, "rejected remote annotation series");
                return;
            }
        };
        let known = self
            .remote
            .get(&series)
            .is_some_and(|datasets| datasets.iter().any(|b| b.instance() == instance));
        let mut annotation =
            SeriesAnnotation::new(time, series, instance, record.value, record.keyed, record.attrs);
        if record.value == 0 && !known {
            annotation = annotation.permanent();
        }
        self.add_annotation(annotation);
    }

    fn add_annotation(&self, annotation: SeriesAnnotation) {
        self.annotations
            .entry(annotation.series().clone())
            .or_insert_with(|| Arc::new(SeriesAnnotations::new(MAX_ANNOTATIONS_PER_SERIES)))
            .add(annotation);
    }

    fn register_instance(&self, instance: &str) {
        let mut instances = self.instances.lock();
        if !instances.iter().any(|known| known == instance) {
            instances.push(instance.to_string());
        }
    }

    fn instance_filter(&self, instances: &[String]) -> HashSet<String> {
        if instances.is_empty() {
            self.instances.lock().iter().cloned().collect()
        } else {
            instances.iter().cloned().collect()
        }
    }

    /// Annotations for a concrete series or a pattern, filtered by instance.
    /// Sender instances hold no queryable data and return nothing.
    pub fn select_annotations(
        &self,
        series: &Series,
        instances: &[String],
    ) -> Vec<SeriesAnnotation> {
        if !self.receiver {
            return Vec::new();
        }
        let filter = self.instance_filter(instances);
        if !series.is_pattern() {
            return match self.annotations.get(series) {
                Some(annotations) => annotations
                    .to_vec()
                    .into_iter()
                    .filter(|a| filter.contains(a.instance()))
                    .collect(),
                None => Vec::new(),
            };
        }
        let mut matches = Vec::new();
        for entry in self.annotations.iter() {
            if series.matches(entry.key()) {
                matches.extend(
                    entry
                        .value()
                        .to_vec()
                        .into_iter()
                        .filter(|a| filter.contains(a.instance())),
                );
            }
        }
        matches
    }

    /// All local buffers of the current read snapshot.
    pub fn select_all_series(&self) -> Vec<Arc<SeriesBuffer>> {
        self.read.load().values().cloned().collect()
    }
}

impl SeriesLookup for SeriesRepository {
    fn instances(&self) -> Vec<String> {
        self.instances.lock().clone()
    }

    fn select_series(&self, series: &Series, instances: &[String]) -> Vec<Arc<SeriesBuffer>> {
        if !self.receiver {
            return Vec::new();
        }
        let filter = self.instance_filter(instances);
        // one read guard for the whole call keeps the result on one tick
        let read = self.read.load();
        let mut result = Vec::new();
        if series.is_pattern() {
            for (candidate, buffer) in read.iter() {
                if series.matches(candidate) && filter.contains(buffer.instance()) {
                    result.push(Arc::clone(buffer));
                }
            }
            for entry in self.remote.iter() {
                if series.matches(entry.key()) {
                    for buffer in entry.value() {
                        if filter.contains(buffer.instance()) {
                            result.push(Arc::clone(buffer));
                        }
                    }
                }
            }
        } else {
            if let Some(buffer) = read.get(series) {
                if filter.contains(buffer.instance()) {
                    result.push(Arc::clone(buffer));
                }
            }
            if let Some(datasets) = self.remote.get(series) {
                for buffer in datasets.iter() {
                    if filter.contains(buffer.instance()) {
                        result.push(Arc::clone(buffer));
                    }
                }
            }
        }
        result
    }
}

/// Writes collected values straight into the write buffer.
struct MapSink<'a> {
    repository: &'a SeriesRepository,
    map: &'a mut SeriesMap,
    time: i64,
}

impl MetricSink for MapSink<'_> {
    fn point(&mut self, series: &str, value: i64) {
        let series = match Series::new(series) {
            Ok(parsed) if !parsed.is_pattern() => parsed,
            Ok(_) | Err(_) => {
                tracing::trace!(series, "rejected local series name");
                return;
            }
        };
        let instance = &self.repository.instance;
        let entry = self.map.entry(series.clone()).or_insert_with(|| {
            Arc::new(SeriesBuffer::new(instance, series, SECONDS_CAPACITY))
        });
        *entry = Arc::new(entry.add(self.time, value));
    }

    fn annotation(&mut self, series: &str, value: i64, keyed: bool, attrs: Vec<(String, String)>) {
        let series = match Series::new(series) {
            Ok(parsed) if !parsed.is_pattern() => parsed,
            Ok(_) | Err(_) => {
                tracing::trace!(series, "rejected local annotation series");
                return;
            }
        };
        let known = self.map.contains_key(&series);
        let mut annotation = SeriesAnnotation::new(
            self.time,
            series,
            &self.repository.instance,
            value,
            keyed,
            attrs,
        );
        if value == 0 && !known {
            annotation = annotation.permanent();
        }
        self.repository.add_annotation(annotation);
    }
}

/// Packages collected values into the snapshot shipped to the receiver.
struct SnapshotSink {
    snapshot: SeriesSnapshot,
}

impl MetricSink for SnapshotSink {
    fn point(&mut self, series: &str, value: i64) {
        self.snapshot.points.push(PointRecord {
            series: series.to_string(),
            value,
        });
    }

    fn annotation(&mut self, series: &str, value: i64, keyed: bool, attrs: Vec<(String, String)>) {
        self.snapshot.annotations.push(AnnotationRecord {
            series: series.to_string(),
            value,
            keyed,
            attrs,
        });
    }
}

/// The repository's own health metrics, collected through the same pipeline
/// as everything else.
fn monitoring_points(
    sink: &mut dyn MetricSink,
    duration_millis: i64,
    collected: u32,
    failed: u32,
    series_count: Option<usize>,
) {
    sink.point("ns:monitoring CollectionDuration", duration_millis);
    sink.point("ns:monitoring CollectedSourcesCount", i64::from(collected));
    sink.point("ns:monitoring CollectedSourcesErrorCount", i64::from(failed));
    if let Some(count) = series_count {
        sink.point("ns:monitoring SeriesCount", count as i64);
    }
}
