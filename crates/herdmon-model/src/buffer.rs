//! Raw per-second sample buffers.

use std::collections::VecDeque;
use std::sync::Arc;

use herdmon_common::series::Series;

use crate::aggregate::{MinutesWindow, MILLIS_PER_MINUTE};

/// One raw sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataPoint {
    pub time: i64,
    pub value: i64,
}

/// Fixed-capacity buffer of raw `(time, value)` samples for one series on
/// one instance, plus the minute/hour/day rollups fed from it.
///
/// `add` has immutable value semantics: it returns the successor buffer and
/// never fails; at capacity the oldest sample is evicted. When the newest
/// sample lands on the last second of a UTC minute, the successor's minutes
/// window has consumed that minute.
#[derive(Debug, Clone)]
pub struct SeriesBuffer {
    series: Series,
    instance: Arc<str>,
    capacity: usize,
    points: VecDeque<DataPoint>,
    observed: u64,
    minutes: MinutesWindow,
}

impl SeriesBuffer {
    pub fn new(instance: &str, series: Series, capacity: usize) -> Self {
        Self {
            series,
            instance: Arc::from(instance),
            capacity,
            points: VecDeque::with_capacity(capacity),
            observed: 0,
            minutes: MinutesWindow::empty(),
        }
    }

    /// Appends a sample, evicting the oldest when full, and rolls the
    /// completed minute into the aggregate tiers when one just ended.
    #[must_use]
    pub fn add(&self, time: i64, value: i64) -> Self {
        let mut next = self.clone();
        if next.points.len() == next.capacity {
            next.points.pop_front();
        }
        next.points.push_back(DataPoint { time, value });
        next.observed += 1;
        if next.ends_with_last_second_of_minute() {
            let minutes = next.minutes.add(&next);
            next.minutes = minutes;
        }
        next
    }

    pub fn series(&self) -> &Series {
        &self.series
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Total number of samples ever added, including evicted ones.
    pub fn observed(&self) -> u64 {
        self.observed
    }

    /// Timestamp of the oldest retained sample, -1 when empty.
    pub fn first_time(&self) -> i64 {
        self.points.front().map_or(-1, |p| p.time)
    }

    /// Timestamp of the newest sample, -1 when empty.
    pub fn last_time(&self) -> i64 {
        self.points.back().map_or(-1, |p| p.time)
    }

    /// Value of the newest sample, 0 when empty.
    pub fn last_value(&self) -> i64 {
        self.points.back().map_or(0, |p| p.value)
    }

    /// Retained samples, oldest to newest.
    pub fn points(&self) -> impl Iterator<Item = DataPoint> + '_ {
        self.points.iter().copied()
    }

    /// Mean of the newest `count` samples, or `None` when fewer are retained.
    pub fn average_of_last(&self, count: usize) -> Option<f64> {
        if count == 0 || self.points.len() < count {
            return None;
        }
        let sum: i128 = self
            .points
            .iter()
            .rev()
            .take(count)
            .map(|p| i128::from(p.value))
            .sum();
        Some(sum as f64 / count as f64)
    }

    /// True when the newest sample falls on second 59 of its UTC minute,
    /// which is the trigger for the minutes rollup.
    pub fn ends_with_last_second_of_minute(&self) -> bool {
        match self.points.back() {
            Some(point) => point.time.rem_euclid(MILLIS_PER_MINUTE) / 1000 == 59,
            None => false,
        }
    }

    /// The minute-resolution history recorded from this buffer.
    pub fn recent_minutes(&self) -> &MinutesWindow {
        &self.minutes
    }
}
