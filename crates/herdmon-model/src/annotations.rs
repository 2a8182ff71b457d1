//! Bounded point-in-time event collections per series.

use std::collections::VecDeque;

use herdmon_common::series::Series;
use parking_lot::Mutex;

/// A point-in-time event attached to one series, e.g. a deployment marker
/// or a configuration change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesAnnotation {
    time: i64,
    series: Series,
    instance: String,
    value: i64,
    keyed: bool,
    permanent: bool,
    attrs: Vec<(String, String)>,
}

impl SeriesAnnotation {
    pub fn new(
        time: i64,
        series: Series,
        instance: &str,
        value: i64,
        keyed: bool,
        attrs: Vec<(String, String)>,
    ) -> Self {
        Self {
            time,
            series,
            instance: instance.to_string(),
            value,
            keyed,
            permanent: false,
            attrs,
        }
    }

    /// Marks the annotation as resistant to eviction.
    #[must_use]
    pub fn permanent(mut self) -> Self {
        self.permanent = true;
        self
    }

    pub fn time(&self) -> i64 {
        self.time
    }

    pub fn series(&self) -> &Series {
        &self.series
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    pub fn is_keyed(&self) -> bool {
        self.keyed
    }

    pub fn is_permanent(&self) -> bool {
        self.permanent
    }

    /// The value of the first attribute, which keyed annotations dedupe on.
    pub fn key_attribute(&self) -> Option<&str> {
        self.attrs.first().map(|(_, value)| value.as_str())
    }

    pub fn attrs(&self) -> &[(String, String)] {
        &self.attrs
    }
}

/// Concurrent, size-limited collection of [`SeriesAnnotation`]s.
///
/// A keyed annotation replaces any prior entry sharing its key attribute.
/// When adding exceeds the capacity the oldest non-permanent annotation is
/// removed; permanent annotations are rotated to the tail and only evicted
/// once every entry is permanent.
#[derive(Debug)]
pub struct SeriesAnnotations {
    capacity: usize,
    entries: Mutex<VecDeque<SeriesAnnotation>>,
}

impl SeriesAnnotations {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn add(&self, annotation: SeriesAnnotation) {
        let mut entries = self.entries.lock();
        if annotation.is_keyed() {
            if let Some(key) = annotation.key_attribute() {
                entries.retain(|existing| existing.key_attribute() != Some(key));
            }
        }
        entries.push_back(annotation);
        if entries.len() > self.capacity {
            let mut removed = entries.pop_front();
            let mut attempts = 1;
            while attempts < self.capacity
                && removed.as_ref().is_some_and(SeriesAnnotation::is_permanent)
            {
                // rotate the permanent entry to the tail so another one goes
                if let Some(kept) = removed.take() {
                    entries.push_back(kept);
                }
                removed = entries.pop_front();
                attempts += 1;
            }
        }
    }

    pub fn to_vec(&self) -> Vec<SeriesAnnotation> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
