//! Host runtime abstractions.
//!
//! The console core never schedules threads, opens sockets or touches disk
//! itself. A hosting application supplies implementations of these traits
//! when constructing the console; everything here is deliberately minimal so
//! that embedding into an existing server runtime stays a thin shim.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// Handle to one recurring task scheduled via [`Scheduler`].
pub trait ScheduledTask: Send + Sync {
    /// Stops the recurring task. Must be safe to call more than once; an
    /// execution already in flight is not interrupted.
    fn cancel(&self);
}

/// Recurring task execution supplied by the host.
///
/// The scheduler must guarantee at most one execution in flight per
/// scheduled task; overlapping periods are skipped or queued, never run
/// concurrently.
pub trait Scheduler: Send + Sync {
    fn schedule_at_fixed_rate(
        &self,
        initial_delay: Duration,
        period: Duration,
        task: Arc<dyn Fn() + Send + Sync>,
    ) -> Box<dyn ScheduledTask>;
}

/// Instance-to-instance messaging supplied by the host.
///
/// Payloads are engine-internal binary snapshots; the transport moves opaque
/// bytes from sender instances to the single receiver instance. Failures are
/// reported through the boolean results and never retried by the core — the
/// next tick produces a fresh snapshot anyway.
pub trait Transport: Send + Sync {
    /// Sends one snapshot payload towards the receiver instance.
    fn send(&self, payload: &[u8]) -> bool;

    /// Installs the callback invoked for every payload received from other
    /// instances. Returns false when the transport cannot deliver inbound
    /// messages (e.g. on a sender-only endpoint).
    fn receive(&self, callback: Arc<dyn Fn(&[u8]) + Send + Sync>) -> bool;
}

/// Persistent watch configuration supplied by the host.
///
/// User-defined watches are stored as JSON documents keyed by watch name;
/// the disabled set survives restarts independently of the definitions.
pub trait WatchConfigStore: Send + Sync {
    /// All persisted watch definitions as JSON documents.
    fn list(&self) -> Vec<String>;

    fn add(&self, name: &str, watch_json: &str);

    fn remove(&self, name: &str);

    fn is_disabled(&self, name: &str) -> bool;

    fn disable(&self, name: &str);

    fn enable(&self, name: &str);
}

/// Start/stop wrapper around one recurring job.
///
/// Keeps the [`ScheduledTask`] handle of a running job so that enabling is
/// idempotent and disabling cancels exactly the job that was started.
pub struct JobHandle {
    name: &'static str,
    task: Mutex<Option<Box<dyn ScheduledTask>>>,
}

impl JobHandle {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            task: Mutex::new(None),
        }
    }

    /// Schedules the job unless it is already running.
    pub fn start(
        &self,
        scheduler: &dyn Scheduler,
        period: Duration,
        job: Arc<dyn Fn() + Send + Sync>,
    ) {
        let mut task = self.task.lock();
        if task.is_some() {
            tracing::debug!(job = self.name, "already scheduled");
            return;
        }
        tracing::info!(job = self.name, period_ms = period.as_millis() as u64, "starting job");
        *task = Some(scheduler.schedule_at_fixed_rate(Duration::ZERO, period, job));
    }

    /// Cancels the job if it is running.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            tracing::info!(job = self.name, "stopping job");
            task.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }
}
