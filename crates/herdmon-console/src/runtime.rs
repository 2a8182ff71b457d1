//! Default [`herdmon_common::runtime`] implementations for hosts that do not
//! bring their own: a Tokio-backed scheduler, an in-process loopback
//! transport, and an in-memory watch config store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use herdmon_common::runtime::{ScheduledTask, Scheduler, Transport, WatchConfigStore};
use parking_lot::{Mutex, RwLock};
use tokio::time::MissedTickBehavior;

/// Runs recurring jobs on a Tokio runtime.
///
/// Each job is an interval loop on its own task; a slow execution skips
/// missed ticks instead of piling up, so at most one execution per job is
/// ever in flight.
pub struct TokioScheduler {
    handle: tokio::runtime::Handle,
}

impl TokioScheduler {
    /// Binds to the current runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime context.
    pub fn new() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }

    pub fn with_handle(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_at_fixed_rate(
        &self,
        initial_delay: Duration,
        period: Duration,
        task: Arc<dyn Fn() + Send + Sync>,
    ) -> Box<dyn ScheduledTask> {
        let join = self.handle.spawn(async move {
            if !initial_delay.is_zero() {
                tokio::time::sleep(initial_delay).await;
            }
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                task();
            }
        });
        Box::new(AbortOnCancel {
            handle: join.abort_handle(),
        })
    }
}

struct AbortOnCancel {
    handle: tokio::task::AbortHandle,
}

impl ScheduledTask for AbortOnCancel {
    fn cancel(&self) {
        self.handle.abort();
    }
}

/// In-process message hub connecting instances living in one process:
/// every endpoint's `send` delivers straight to the callback the receiver
/// endpoint registered. Useful for tests and single-process embeddings.
#[derive(Default)]
pub struct LoopbackNetwork {
    receiver: RwLock<Option<Arc<dyn Fn(&[u8]) + Send + Sync>>>,
}

impl LoopbackNetwork {
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    /// A transport endpoint attached to this network.
    pub fn endpoint(self: &Arc<Self>) -> Arc<dyn Transport> {
        Arc::new(LoopbackEndpoint {
            network: Arc::clone(self),
        })
    }
}

struct LoopbackEndpoint {
    network: Arc<LoopbackNetwork>,
}

impl Transport for LoopbackEndpoint {
    fn send(&self, payload: &[u8]) -> bool {
        match self.network.receiver.read().as_ref() {
            Some(callback) => {
                callback(payload);
                true
            }
            None => false,
        }
    }

    fn receive(&self, callback: Arc<dyn Fn(&[u8]) + Send + Sync>) -> bool {
        *self.network.receiver.write() = Some(callback);
        true
    }
}

/// Watch config store without persistence, for tests and hosts that accept
/// losing user watches on restart.
#[derive(Default)]
pub struct MemoryWatchConfig {
    watches: Mutex<HashMap<String, String>>,
    disabled: Mutex<HashSet<String>>,
}

impl WatchConfigStore for MemoryWatchConfig {
    fn list(&self) -> Vec<String> {
        self.watches.lock().values().cloned().collect()
    }

    fn add(&self, name: &str, watch_json: &str) {
        self.watches
            .lock()
            .insert(name.to_string(), watch_json.to_string());
    }

    fn remove(&self, name: &str) {
        self.watches.lock().remove(name);
    }

    fn is_disabled(&self, name: &str) -> bool {
        self.disabled.lock().contains(name)
    }

    fn disable(&self, name: &str) {
        self.disabled.lock().insert(name.to_string());
    }

    fn enable(&self, name: &str) {
        self.disabled.lock().remove(name);
    }
}
