//! The monitoring console facade.
//!
//! [`MonitorConsole`] wires the series repository and the alert engine to a
//! host-supplied [`ConsoleRuntime`] and drives both periodic ticks. A host
//! constructs exactly one console per process instance; components are
//! reached through the explicit accessors, there is no service lookup.

pub mod config;
pub mod runtime;

use std::sync::Arc;
use std::time::Duration;

use herdmon_alert::alert::{Alert, AlertStatistics};
use herdmon_alert::engine::AlertEngine;
use herdmon_alert::watch::Watch;
use herdmon_alert::WatchSource;
use herdmon_common::runtime::{JobHandle, Scheduler, Transport, WatchConfigStore};
use herdmon_common::series::Series;
use herdmon_common::wire::Message;
use herdmon_model::annotations::SeriesAnnotation;
use herdmon_model::buffer::SeriesBuffer;
use herdmon_model::lookup::SeriesLookup;
use herdmon_store::repository::SeriesRepository;
use herdmon_store::{MetricSink, MetricSource, SourceInfo};

pub use config::ConsoleConfig;

/// The resolved collaborators a host hands to the console at construction.
pub struct ConsoleRuntime {
    pub scheduler: Arc<dyn Scheduler>,
    pub transport: Arc<dyn Transport>,
    pub watch_config: Arc<dyn WatchConfigStore>,
}

/// One instance of the in-process monitoring console core.
pub struct MonitorConsole {
    config: ConsoleConfig,
    runtime: ConsoleRuntime,
    repository: Arc<SeriesRepository>,
    alerts: Arc<AlertEngine>,
    collection_job: JobHandle,
    evaluation_job: JobHandle,
}

impl MonitorConsole {
    /// Builds and wires a console. Call exactly once per process instance;
    /// the host owns the returned handle for the lifetime of the process.
    pub fn new(config: ConsoleConfig, runtime: ConsoleRuntime) -> Arc<Self> {
        let repository = Arc::new(SeriesRepository::new(
            &config.instance,
            config.receiver,
            Arc::clone(&runtime.transport),
        ));
        let alerts = Arc::new(AlertEngine::new(
            &config.instance,
            config.receiver,
            Arc::clone(&runtime.transport),
            Arc::clone(&runtime.watch_config),
            Arc::clone(&repository) as Arc<dyn SeriesLookup>,
        ));
        if config.receiver {
            let inbound_repository = Arc::clone(&repository);
            let inbound_alerts = Arc::clone(&alerts);
            let installed = runtime.transport.receive(Arc::new(move |payload: &[u8]| {
                match Message::decode(payload) {
                    Ok(Message::Series(snapshot)) => inbound_repository.apply_snapshot(snapshot),
                    Ok(Message::Watches(snapshot)) => inbound_alerts.add_remote_watches(snapshot),
                    Err(error) => {
                        tracing::debug!(error = %error, "dropping malformed snapshot message");
                    }
                }
            }));
            if !installed {
                tracing::warn!("transport does not deliver inbound messages to this receiver");
            }
        }
        repository.register_source(Arc::new(ConsoleSource {
            alerts: Arc::clone(&alerts),
            receiver: config.receiver,
        }));
        Arc::new(Self {
            config,
            runtime,
            repository,
            alerts,
            collection_job: JobHandle::new("metric collection"),
            evaluation_job: JobHandle::new("watch evaluation"),
        })
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    /// Starts or stops both the collection and the evaluation tick. A tick
    /// already in flight finishes; the flag is observed by the next one.
    pub fn set_enabled(&self, enabled: bool) {
        if enabled {
            tracing::info!(instance = %self.config.instance, "starting monitoring console");
            let repository = Arc::clone(&self.repository);
            self.collection_job.start(
                self.runtime.scheduler.as_ref(),
                Duration::from_secs(self.config.collection_interval_secs.max(1)),
                Arc::new(move || repository.collect_tick()),
            );
            let alerts = Arc::clone(&self.alerts);
            self.evaluation_job.start(
                self.runtime.scheduler.as_ref(),
                Duration::from_secs(self.config.evaluation_interval_secs.max(1)),
                Arc::new(move || alerts.check_tick()),
            );
        } else {
            self.collection_job.stop();
            self.evaluation_job.stop();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.collection_job.is_running() || self.evaluation_job.is_running()
    }

    pub fn repository(&self) -> &Arc<SeriesRepository> {
        &self.repository
    }

    pub fn alerts(&self) -> &Arc<AlertEngine> {
        &self.alerts
    }

    pub fn register_source(&self, source: Arc<dyn MetricSource>) {
        self.repository.register_source(source);
    }

    pub fn register_watch_source(&self, source: Arc<dyn WatchSource>) {
        self.alerts.register_watch_source(source);
    }

    pub fn select_series(&self, series: &Series, instances: &[String]) -> Vec<Arc<SeriesBuffer>> {
        self.repository.select_series(series, instances)
    }

    pub fn select_annotations(
        &self,
        series: &Series,
        instances: &[String],
    ) -> Vec<SeriesAnnotation> {
        self.repository.select_annotations(series, instances)
    }

    pub fn add_watch(&self, watch: Arc<Watch>) {
        self.alerts.add_watch(watch);
    }

    pub fn remove_watch(&self, watch: &Arc<Watch>) {
        self.alerts.remove_watch(watch);
    }

    pub fn watch_by_name(&self, name: &str) -> Option<Arc<Watch>> {
        self.alerts.watch_by_name(name)
    }

    pub fn watches(&self) -> Vec<Arc<Watch>> {
        self.alerts.watches()
    }

    pub fn watches_for(&self, series: &Series) -> Vec<Arc<Watch>> {
        self.alerts.watches_for(series)
    }

    pub fn alerts_for(&self, series: &Series) -> Vec<Arc<Alert>> {
        self.alerts.alerts_for(series)
    }

    pub fn statistics(&self) -> Arc<AlertStatistics> {
        self.alerts.statistics()
    }
}

/// The console's own metric source: evaluation loop duration and alert
/// counts flow through the same collection pipeline as everything else, so
/// the built-in watches can observe them.
struct ConsoleSource {
    alerts: Arc<AlertEngine>,
    receiver: bool,
}

impl MetricSource for ConsoleSource {
    fn name(&self) -> &str {
        "console"
    }

    fn info(&self) -> SourceInfo {
        SourceInfo {
            namespace: Some("monitoring".to_string()),
            interval_secs: 1,
        }
    }

    fn collect(&self, sink: &mut dyn MetricSink) -> anyhow::Result<()> {
        if !self.receiver {
            return Ok(());
        }
        sink.point("WatchLoopDuration", self.alerts.evaluation_loop_millis());
        let stats = self.alerts.statistics();
        sink.point("RedAlertCount", stats.unacknowledged_red as i64);
        sink.point("RedAckAlertCount", stats.acknowledged_red as i64);
        sink.point("AmberAlertCount", stats.unacknowledged_amber as i64);
        sink.point("AmberAckAlertCount", stats.acknowledged_amber as i64);
        Ok(())
    }
}
