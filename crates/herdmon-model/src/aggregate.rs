//! Multi-resolution statistic windows.
//!
//! An [`AggregateWindow`] is a fixed-capacity ring of write-once slots, each
//! holding min/max/average/point-count for one aggregation period. Appending
//! produces a new window value, but successive values share the same backing
//! slot array: a slot, once written, never changes, so a successor differs
//! from its predecessor only in `offset`, `size` and `first_time`. When the
//! base capacity fills, the storage grows once to double capacity and the
//! window slides through it; when the doubled array is exhausted, the most
//! recent slots are copied into a fresh double-capacity array and the slide
//! restarts. Storage therefore never exceeds twice the base capacity.
//!
//! The three tiers — [`MinutesWindow`] (60), [`HoursWindow`] (24),
//! [`DaysWindow`] (31) — wrap the same core and chain upwards: a completed
//! minute feeds the hours tier, a completed hour feeds the days tier, on UTC
//! calendar boundaries.

use std::sync::{Arc, OnceLock};

use chrono::{Datelike, Timelike};

use crate::buffer::SeriesBuffer;

pub const MILLIS_PER_MINUTE: i64 = 60 * 1000;
pub const MILLIS_PER_HOUR: i64 = 60 * MILLIS_PER_MINUTE;
pub const MILLIS_PER_DAY: i64 = 24 * MILLIS_PER_HOUR;

/// Aggregated statistics of one period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slot {
    pub point_count: u32,
    pub min: i64,
    pub max: i64,
    pub avg: f64,
}

/// Capacity and period length of one aggregation tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierSpec {
    pub base_capacity: usize,
    pub interval_millis: i64,
}

impl TierSpec {
    pub const MINUTES: TierSpec = TierSpec {
        base_capacity: 60,
        interval_millis: MILLIS_PER_MINUTE,
    };
    pub const HOURS: TierSpec = TierSpec {
        base_capacity: 24,
        interval_millis: MILLIS_PER_HOUR,
    };
    pub const DAYS: TierSpec = TierSpec {
        base_capacity: 31,
        interval_millis: MILLIS_PER_DAY,
    };
}

/// Fixed-capacity ring of write-once slots with structural sharing.
///
/// Values are cheap to clone; the slot storage is shared between all window
/// values derived from the same array. Slots are published through
/// [`OnceLock`] cells: a reader only ever touches indices covered by the
/// `offset`/`size` of the window value it holds, all of which were fully
/// written before that value existed.
#[derive(Debug, Clone)]
pub struct AggregateWindow {
    spec: TierSpec,
    slots: Arc<[OnceLock<Slot>]>,
    offset: usize,
    size: usize,
    first_time: i64,
}

impl AggregateWindow {
    pub fn empty(spec: TierSpec) -> Self {
        Self {
            spec,
            slots: Vec::new().into(),
            offset: 0,
            size: 0,
            first_time: -1,
        }
    }

    pub fn spec(&self) -> TierSpec {
        self.spec
    }

    /// Total slots in the shared backing array; zero for the empty window,
    /// the base capacity for the first window, twice that afterwards.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// UTC start of the chronologically first period in this window.
    pub fn first_time(&self) -> i64 {
        self.first_time
    }

    /// UTC start of the chronologically last period in this window.
    pub fn last_time(&self) -> i64 {
        self.first_time + (self.size as i64 - 1) * self.spec.interval_millis
    }

    /// Physical index of the chronologically first slot.
    pub fn first_index(&self) -> usize {
        self.offset
    }

    /// Physical index of the chronologically last slot. May be numerically
    /// smaller than [`Self::first_index`] when the ring has wrapped.
    pub fn last_index(&self) -> usize {
        assert!(self.size > 0, "empty window has no last index");
        (self.offset + self.size - 1) % self.capacity()
    }

    pub fn is_wrapped(&self) -> bool {
        self.offset + self.size >= self.capacity()
    }

    /// The slot at a physical index between first and last index.
    pub fn slot(&self, index: usize) -> Slot {
        self.slots[index]
            .get()
            .copied()
            .expect("read of unwritten aggregate slot")
    }

    /// UTC start of the period stored at a physical index.
    pub fn time_at(&self, index: usize) -> i64 {
        let position = (index + self.capacity() - self.offset) % self.capacity();
        self.first_time + position as i64 * self.spec.interval_millis
    }

    /// Slots in chronological order together with their period start times.
    pub fn iter(&self) -> impl Iterator<Item = (i64, Slot)> + '_ {
        (0..self.size).map(move |position| {
            let index = (self.offset + position) % self.capacity().max(1);
            (
                self.first_time + position as i64 * self.spec.interval_millis,
                self.slot(index),
            )
        })
    }

    /// Minimum values in chronological order.
    pub fn mins(&self) -> Vec<i64> {
        self.iter().map(|(_, s)| s.min).collect()
    }

    /// Maximum values in chronological order.
    pub fn maxs(&self) -> Vec<i64> {
        self.iter().map(|(_, s)| s.max).collect()
    }

    /// Average values in chronological order.
    pub fn avgs(&self) -> Vec<f64> {
        self.iter().map(|(_, s)| s.avg).collect()
    }

    /// Number of raw points behind each slot, in chronological order.
    pub fn point_counts(&self) -> Vec<u32> {
        self.iter().map(|(_, s)| s.point_count).collect()
    }

    /// True when both windows are views into the same backing slot array.
    pub fn shares_storage(&self, other: &AggregateWindow) -> bool {
        Arc::ptr_eq(&self.slots, &other.slots)
    }

    /// Appends the slot for the period starting at `period_start`.
    ///
    /// `calendar_index` places the very first slot of a recording at its
    /// calendar position (minute of hour, hour of day, day of month); all
    /// later slots follow contiguously from there.
    ///
    /// # Panics
    ///
    /// Panics when the period does not directly continue the window's last
    /// period — aggregation assumes strictly increasing contiguous calendar
    /// periods, and a gap indicates a scheduling bug in the caller.
    pub(crate) fn push(&self, period_start: i64, calendar_index: usize, slot: Slot) -> Self {
        if self.capacity() == 0 {
            let slots = allocate(self.spec.base_capacity);
            write(&slots, calendar_index, slot);
            return Self {
                spec: self.spec,
                slots,
                offset: calendar_index,
                size: 1,
                first_time: period_start,
            };
        }
        let expected = self.first_time + self.size as i64 * self.spec.interval_millis;
        assert!(
            period_start == expected,
            "aggregate period starting at {period_start} does not continue window expecting {expected}"
        );
        let base = self.spec.base_capacity;
        if self.capacity() == base {
            if self.size == base {
                return self.fresh_copy(period_start, slot);
            }
            write(&self.slots, (self.offset + self.size) % base, slot);
            return Self {
                size: self.size + 1,
                ..self.clone()
            };
        }
        // doubled capacity: slide until the array is exhausted
        if self.offset + self.size == self.capacity() {
            return self.fresh_copy(period_start, slot);
        }
        write(&self.slots, self.offset + self.size, slot);
        Self {
            offset: self.offset + 1,
            first_time: self.first_time + self.spec.interval_millis,
            ..self.clone()
        }
    }

    /// Copies the most recent `base_capacity - 1` slots into a fresh
    /// double-capacity array and appends the new slot, restarting the slide.
    fn fresh_copy(&self, period_start: i64, slot: Slot) -> Self {
        let keep = self.size.min(self.spec.base_capacity - 1);
        let slots = allocate(2 * self.spec.base_capacity);
        for position in 0..keep {
            let source = (self.offset + self.size - keep + position) % self.capacity();
            write(&slots, position, self.slot(source));
        }
        write(&slots, keep, slot);
        Self {
            spec: self.spec,
            slots,
            offset: 0,
            size: keep + 1,
            first_time: period_start - keep as i64 * self.spec.interval_millis,
        }
    }
}

fn allocate(capacity: usize) -> Arc<[OnceLock<Slot>]> {
    (0..capacity).map(|_| OnceLock::new()).collect()
}

fn write(slots: &Arc<[OnceLock<Slot>]>, index: usize, slot: Slot) {
    slots[index]
        .set(slot)
        .expect("aggregate slot written twice");
}

/// Folds the slots of a finer-tier window whose period start is at or after
/// `period_start` into one slot of the coarser tier.
///
/// The average is the unweighted mean of the child averages: a partial child
/// period (e.g. the first minute after startup) counts as much as a full
/// one. This matches the long-standing behaviour of the aggregation and is
/// kept for compatibility.
fn fold_children(child: &AggregateWindow, period_start: i64) -> Slot {
    let mut point_count = 0u32;
    let mut min = i64::MAX;
    let mut max = i64::MIN;
    let mut avg_sum = 0.0;
    let mut children = 0u32;
    for (time, slot) in child.iter() {
        if time < period_start {
            continue;
        }
        point_count += slot.point_count;
        min = min.min(slot.min);
        max = max.max(slot.max);
        avg_sum += slot.avg;
        children += 1;
    }
    Slot {
        point_count,
        min,
        max,
        avg: avg_sum / children as f64,
    }
}

fn utc(millis: i64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

/// Up to 60 minutes of statistics, one slot per minute of the hour.
#[derive(Debug, Clone)]
pub struct MinutesWindow {
    window: AggregateWindow,
    recent_hours: HoursWindow,
}

impl MinutesWindow {
    pub fn empty() -> Self {
        Self {
            window: AggregateWindow::empty(TierSpec::MINUTES),
            recent_hours: HoursWindow::empty(),
        }
    }

    pub fn window(&self) -> &AggregateWindow {
        &self.window
    }

    /// The hours rollup recorded up to this minute, which in turn carries
    /// the days rollup.
    pub fn recent_hours(&self) -> &HoursWindow {
        &self.recent_hours
    }

    /// Consumes a raw buffer that just completed a minute; a buffer not
    /// ending on the last second of a minute leaves the window unchanged.
    pub fn add(&self, seconds: &SeriesBuffer) -> Self {
        if !seconds.ends_with_last_second_of_minute() {
            return self.clone();
        }
        let minute_start = seconds.last_time() - seconds.last_time().rem_euclid(MILLIS_PER_MINUTE);
        let slot = fold_seconds(seconds, minute_start);
        let calendar_index = utc(minute_start).minute() as usize;
        let next = MinutesWindow {
            window: self.window.push(minute_start, calendar_index, slot),
            recent_hours: self.recent_hours.clone(),
        };
        let recent_hours = next.recent_hours.add(&next);
        MinutesWindow {
            window: next.window,
            recent_hours,
        }
    }

    /// True when the newest slot is the last minute of its hour.
    pub fn is_end_of_hour(&self) -> bool {
        !self.window.is_empty() && utc(self.window.last_time()).minute() == 59
    }
}

fn fold_seconds(seconds: &SeriesBuffer, minute_start: i64) -> Slot {
    let mut point_count = 0u32;
    let mut min = i64::MAX;
    let mut max = i64::MIN;
    let mut sum = 0i128;
    for point in seconds.points() {
        if point.time < minute_start || point.time >= minute_start + MILLIS_PER_MINUTE {
            continue;
        }
        point_count += 1;
        min = min.min(point.value);
        max = max.max(point.value);
        sum += i128::from(point.value);
    }
    Slot {
        point_count,
        min,
        max,
        avg: sum as f64 / f64::from(point_count),
    }
}

/// Up to 24 hours of statistics, one slot per hour of the day.
#[derive(Debug, Clone)]
pub struct HoursWindow {
    window: AggregateWindow,
    recent_days: DaysWindow,
}

impl HoursWindow {
    pub fn empty() -> Self {
        Self {
            window: AggregateWindow::empty(TierSpec::HOURS),
            recent_days: DaysWindow::empty(),
        }
    }

    pub fn window(&self) -> &AggregateWindow {
        &self.window
    }

    pub fn recent_days(&self) -> &DaysWindow {
        &self.recent_days
    }

    /// Consumes a minutes window that just completed its hour; otherwise a
    /// no-op returning an unchanged clone.
    pub fn add(&self, minutes: &MinutesWindow) -> Self {
        if !minutes.is_end_of_hour() {
            return self.clone();
        }
        let last = minutes.window().last_time();
        let hour_start = last - last.rem_euclid(MILLIS_PER_HOUR);
        let slot = fold_children(minutes.window(), hour_start);
        let calendar_index = utc(hour_start).hour() as usize;
        let next = HoursWindow {
            window: self.window.push(hour_start, calendar_index, slot),
            recent_days: self.recent_days.clone(),
        };
        let recent_days = next.recent_days.add(&next);
        HoursWindow {
            window: next.window,
            recent_days,
        }
    }

    /// True when the newest slot is the last hour of its day.
    pub fn is_end_of_day(&self) -> bool {
        !self.window.is_empty() && utc(self.window.last_time()).hour() == 23
    }
}

/// Up to 31 days of statistics, one slot per day of the month.
#[derive(Debug, Clone)]
pub struct DaysWindow {
    window: AggregateWindow,
}

impl DaysWindow {
    pub fn empty() -> Self {
        Self {
            window: AggregateWindow::empty(TierSpec::DAYS),
        }
    }

    pub fn window(&self) -> &AggregateWindow {
        &self.window
    }

    /// Consumes an hours window that just completed its day; otherwise a
    /// no-op returning an unchanged clone.
    pub fn add(&self, hours: &HoursWindow) -> Self {
        if !hours.is_end_of_day() {
            return self.clone();
        }
        let last = hours.window().last_time();
        let day_start = last - last.rem_euclid(MILLIS_PER_DAY);
        let slot = fold_children(hours.window(), day_start);
        let calendar_index = utc(day_start).day0() as usize;
        DaysWindow {
            window: self.window.push(day_start, calendar_index, slot),
        }
    }
}
