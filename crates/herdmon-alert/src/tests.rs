use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use herdmon_common::runtime::{Transport, WatchConfigStore};
use herdmon_common::series::Series;
use herdmon_common::types::{CompareOp, Level, Metric, Unit};
use herdmon_common::wire::{CircumstanceDef, ConditionDef, Message, WatchDef, WatchesSnapshot};
use herdmon_model::buffer::SeriesBuffer;
use herdmon_model::lookup::SeriesLookup;
use parking_lot::Mutex;

use crate::alert::Alert;
use crate::engine::{limit_queue_size, AlertEngine};
use crate::watch::{Condition, Watch};
use crate::{WatchSink, WatchSource};

struct NullTransport;

impl Transport for NullTransport {
    fn send(&self, _payload: &[u8]) -> bool {
        true
    }

    fn receive(&self, _callback: Arc<dyn Fn(&[u8]) + Send + Sync>) -> bool {
        true
    }
}

#[derive(Default)]
struct CapturingTransport {
    sent: Mutex<Vec<Vec<u8>>>,
}

impl Transport for CapturingTransport {
    fn send(&self, payload: &[u8]) -> bool {
        self.sent.lock().push(payload.to_vec());
        true
    }

    fn receive(&self, _callback: Arc<dyn Fn(&[u8]) + Send + Sync>) -> bool {
        false
    }
}

#[derive(Default)]
struct MemoryConfig {
    watches: Mutex<HashMap<String, String>>,
    disabled: Mutex<HashSet<String>>,
}

impl WatchConfigStore for MemoryConfig {
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

/// Lookup over hand-fed buffers, standing in for the series repository.
#[derive(Default)]
struct TestLookup {
    buffers: Mutex<HashMap<Series, Arc<SeriesBuffer>>>,
}

impl TestLookup {
    fn push(&self, series: &str, time: i64, value: i64) {
        let series = Series::new(series).unwrap();
        let mut buffers = self.buffers.lock();
        let entry = buffers
            .entry(series.clone())
            .or_insert_with(|| Arc::new(SeriesBuffer::new("server", series, 60)));
        *entry = Arc::new(entry.add(time, value));
    }
}

impl SeriesLookup for TestLookup {
    fn instances(&self) -> Vec<String> {
        vec!["server".to_string()]
    }

    fn select_series(&self, series: &Series, _instances: &[String]) -> Vec<Arc<SeriesBuffer>> {
        let buffers = self.buffers.lock();
        if series.is_pattern() {
            buffers
                .iter()
                .filter(|(candidate, _)| series.matches(candidate))
                .map(|(_, buffer)| Arc::clone(buffer))
                .collect()
        } else {
            buffers.get(series).cloned().into_iter().collect()
        }
    }
}

fn receiver_engine() -> (AlertEngine, Arc<TestLookup>, Arc<MemoryConfig>) {
    let lookup = Arc::new(TestLookup::default());
    let config = Arc::new(MemoryConfig::default());
    let engine = AlertEngine::new(
        "server",
        true,
        Arc::new(NullTransport),
        config.clone(),
        lookup.clone(),
    );
    (engine, lookup, config)
}

fn latency_metric() -> Metric {
    Metric::new(Series::new("ns:web LatencyMillis").unwrap(), Unit::Millis)
}

fn latency_def(threshold: i64) -> WatchDef {
    WatchDef {
        name: "High Request Latency".to_string(),
        series: "ns:web LatencyMillis".to_string(),
        unit: Unit::Millis,
        red: Some(CircumstanceDef {
            start: ConditionDef {
                op: CompareOp::GreaterThan,
                threshold,
                for_count: 2,
                on_average: false,
            },
            stop: None,
        }),
        amber: None,
        green: None,
    }
}

#[test]
fn red_watch_raises_after_consecutive_qualifying_samples() {
    let (engine, lookup, _) = receiver_engine();
    engine.add_watch(Arc::new(
        Watch::builder("High Request Latency", latency_metric())
            .red(Condition::greater_than(800).for_last(2), None)
            .build(),
    ));

    lookup.push("ns:web LatencyMillis", 1000, 700);
    engine.check_tick();
    assert!(engine.alerts().is_empty());

    lookup.push("ns:web LatencyMillis", 2000, 900);
    engine.check_tick();
    assert!(engine.alerts().is_empty(), "one qualifying sample is not enough");

    lookup.push("ns:web LatencyMillis", 3000, 950);
    engine.check_tick();
    let alerts = engine.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].level(), Level::Red);
    assert_eq!(alerts[0].watch_name(), "High Request Latency");
    assert_eq!(alerts[0].since(), 3000);
    assert!(alerts[0].is_ongoing());
}

#[test]
fn no_duplicate_evaluation_without_new_sample() {
    let (engine, lookup, _) = receiver_engine();
    engine.add_watch(Arc::new(
        Watch::builder("High Request Latency", latency_metric())
            .red(Condition::greater_than(800), None)
            .build(),
    ));
    lookup.push("ns:web LatencyMillis", 1000, 900);
    engine.check_tick();
    engine.check_tick();
    engine.check_tick();
    assert_eq!(engine.alerts().len(), 1);
}

#[test]
fn averaged_condition_compares_window_mean() {
    let (engine, lookup, _) = receiver_engine();
    engine.add_watch(Arc::new(
        Watch::builder("High Request Latency", latency_metric())
            .red(Condition::greater_than(800).for_last(2).averaged(), None)
            .build(),
    ));

    // 900 then 800: not two consecutive samples above 800, but the mean of
    // the last two is 850
    lookup.push("ns:web LatencyMillis", 1000, 100);
    engine.check_tick();
    lookup.push("ns:web LatencyMillis", 2000, 900);
    engine.check_tick();
    assert!(engine.alerts().is_empty(), "mean of (100, 900) is not above 800");
    lookup.push("ns:web LatencyMillis", 3000, 800);
    engine.check_tick();
    assert_eq!(engine.alerts().len(), 1);
}

#[test]
fn red_watch_clears_after_stop_condition() {
    let (engine, lookup, _) = receiver_engine();
    engine.add_watch(Arc::new(
        Watch::builder("High Request Latency", latency_metric())
            .red(
                Condition::greater_than(800),
                Some(Condition::less_equal(800).for_last(2)),
            )
            .build(),
    ));

    lookup.push("ns:web LatencyMillis", 1000, 900);
    engine.check_tick();
    assert_eq!(engine.statistics().ongoing_red_serials.len(), 1);

    lookup.push("ns:web LatencyMillis", 2000, 700);
    engine.check_tick();
    assert_eq!(
        engine.statistics().ongoing_red_serials.len(),
        1,
        "one calm sample must not clear yet"
    );

    lookup.push("ns:web LatencyMillis", 3000, 650);
    engine.check_tick();
    let alerts = engine.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].level(), Level::Green);
    assert!(!alerts[0].is_ongoing());
    assert!(engine.statistics().ongoing_red_serials.is_empty());
}

#[test]
fn amber_escalates_to_red_in_place() {
    let (engine, lookup, _) = receiver_engine();
    engine.add_watch(Arc::new(
        Watch::builder("High Request Latency", latency_metric())
            .red(Condition::greater_than(800).for_last(2), None)
            .amber(Condition::greater_than(500), None)
            .build(),
    ));

    lookup.push("ns:web LatencyMillis", 1000, 600);
    engine.check_tick();
    let alerts = engine.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].level(), Level::Amber);

    lookup.push("ns:web LatencyMillis", 2000, 900);
    engine.check_tick();
    lookup.push("ns:web LatencyMillis", 3000, 950);
    engine.check_tick();
    let alerts = engine.alerts();
    assert_eq!(alerts.len(), 1, "escalation must not raise a second alert");
    assert_eq!(alerts[0].level(), Level::Red);
}

#[test]
fn green_condition_recovers_watch() {
    let (engine, lookup, _) = receiver_engine();
    engine.add_watch(Arc::new(
        Watch::builder("High Request Latency", latency_metric())
            .red(Condition::greater_than(800), None)
            .green(Condition::less_than(400))
            .build(),
    ));

    lookup.push("ns:web LatencyMillis", 1000, 900);
    engine.check_tick();
    assert!(engine.alerts()[0].is_ongoing());

    lookup.push("ns:web LatencyMillis", 2000, 300);
    engine.check_tick();
    assert!(!engine.alerts()[0].is_ongoing());
}

#[test]
fn disabled_watch_is_skipped_but_stays_registered() {
    let (engine, lookup, config) = receiver_engine();
    engine.add_watch(Arc::new(
        Watch::builder("High Request Latency", latency_metric())
            .red(Condition::greater_than(800), None)
            .build(),
    ));
    assert!(engine.toggle_watch("High Request Latency", true));
    assert!(config.is_disabled("High Request Latency"));

    lookup.push("ns:web LatencyMillis", 1000, 900);
    engine.check_tick();
    assert!(engine.alerts().is_empty());
    assert!(engine.watch_by_name("High Request Latency").is_some());

    assert!(engine.toggle_watch("High Request Latency", false));
    lookup.push("ns:web LatencyMillis", 2000, 950);
    engine.check_tick();
    assert_eq!(engine.alerts().len(), 1);

    assert!(!engine.toggle_watch("no such watch", true));
}

#[test]
fn adding_same_name_displaces_previous_watch() {
    let (engine, _, _) = receiver_engine();
    let first = Arc::new(
        Watch::builder("High Request Latency", latency_metric())
            .red(Condition::greater_than(800), None)
            .build(),
    );
    engine.add_watch(Arc::clone(&first));
    let second = Arc::new(
        Watch::builder("High Request Latency", latency_metric())
            .red(Condition::greater_than(900), None)
            .build(),
    );
    engine.add_watch(Arc::clone(&second));

    assert!(first.is_stopped());
    assert!(!second.is_stopped());
    let registered = engine.watch_by_name("High Request Latency").unwrap();
    assert!(Arc::ptr_eq(&registered, &second));
}

#[test]
fn stopped_watch_is_lazily_removed_on_next_tick() {
    let (engine, _, _) = receiver_engine();
    let watch = Arc::new(
        Watch::builder("High Request Latency", latency_metric())
            .red(Condition::greater_than(800), None)
            .build(),
    );
    engine.add_watch(Arc::clone(&watch));
    watch.stop();
    engine.check_tick();
    assert!(engine.watch_by_name("High Request Latency").is_none());
}

#[test]
fn pattern_watch_tracks_each_matching_series() {
    let (engine, lookup, _) = receiver_engine();
    engine.add_watch(Arc::new(
        Watch::builder(
            "Any Web Latency",
            Metric::new(Series::new("ns:web *").unwrap(), Unit::Millis),
        )
        .red(Condition::greater_than(800).for_last(2), None)
        .build(),
    ));

    for tick in 1..=2i64 {
        lookup.push("ns:web CheckoutMillis", tick * 1000, 900);
        lookup.push("ns:web SearchMillis", tick * 1000, 950);
        engine.check_tick();
    }
    let alerts = engine.alerts();
    assert_eq!(alerts.len(), 2);
    let series: HashSet<&str> = alerts.iter().map(|a| a.series().as_str()).collect();
    assert!(series.contains("ns:web CheckoutMillis"));
    assert!(series.contains("ns:web SearchMillis"));
}

#[test]
fn watches_for_matches_simple_and_pattern() {
    let (engine, _, _) = receiver_engine();
    engine.add_watch(Arc::new(
        Watch::builder("High Request Latency", latency_metric())
            .red(Condition::greater_than(800), None)
            .build(),
    ));
    let concrete = engine.watches_for(&Series::new("ns:web LatencyMillis").unwrap());
    assert_eq!(concrete.len(), 1);
    let pattern = engine.watches_for(&Series::new("ns:web *").unwrap());
    assert_eq!(pattern.len(), 1);
    let any = engine.watches_for(&Series::any());
    // the two programmatic built-ins plus ours
    assert_eq!(any.len(), 3);
}

#[test]
fn watch_json_round_trip() {
    let watch = Watch::builder("High Request Latency", latency_metric())
        .red(
            Condition::greater_than(800).for_last(2).averaged(),
            Some(Condition::less_equal(800).for_last(3)),
        )
        .amber(Condition::greater_than(600), None)
        .green(Condition::less_than(400))
        .build();
    let json = watch.to_json().unwrap();
    let restored = Watch::from_json(&json).unwrap();
    assert!(watch.equals_functionally(&restored));
    assert!(!restored.is_programmatic());
}

#[test]
fn user_watches_are_persisted_programmatic_ones_are_not() {
    let (engine, _, config) = receiver_engine();
    // the two built-ins are programmatic and must not be stored
    assert!(config.watches.lock().is_empty());

    let user = Arc::new(
        Watch::builder("High Request Latency", latency_metric())
            .red(Condition::greater_than(800), None)
            .build(),
    );
    engine.add_watch(Arc::clone(&user));
    assert!(config.watches.lock().contains_key("High Request Latency"));

    engine.remove_watch(&user);
    assert!(!config.watches.lock().contains_key("High Request Latency"));
    assert!(engine.watch_by_name("High Request Latency").is_none());
}

#[test]
fn persisted_watches_are_loaded_on_startup() {
    let lookup = Arc::new(TestLookup::default());
    let config = Arc::new(MemoryConfig::default());
    let json = serde_json::to_string(&latency_def(800)).unwrap();
    config.add("High Request Latency", &json);
    config.disable("High Request Latency");
    config.add("broken entry", "{not json");

    let engine = AlertEngine::new(
        "server",
        true,
        Arc::new(NullTransport),
        config.clone(),
        lookup,
    );
    let watch = engine.watch_by_name("High Request Latency").unwrap();
    assert!(watch.is_disabled());
    assert!(engine.watch_by_name("broken entry").is_none());
}

#[test]
fn remote_watches_register_and_retire() {
    let (engine, _, _) = receiver_engine();
    let def = latency_def(800);

    engine.add_remote_watches(WatchesSnapshot {
        instance: "web-01".to_string(),
        watches: vec![def.clone()],
    });
    engine.add_remote_watches(WatchesSnapshot {
        instance: "web-02".to_string(),
        watches: vec![def.clone()],
    });
    assert!(engine.watch_by_name("High Request Latency").is_some());

    // one instance stops reporting: still collected by the other
    engine.add_remote_watches(WatchesSnapshot {
        instance: "web-01".to_string(),
        watches: Vec::new(),
    });
    assert!(engine.watch_by_name("High Request Latency").is_some());

    // no instance reports it anymore: retired
    engine.add_remote_watches(WatchesSnapshot {
        instance: "web-02".to_string(),
        watches: Vec::new(),
    });
    assert!(engine.watch_by_name("High Request Latency").is_none());
}

#[test]
fn changed_remote_definition_is_reregistered() {
    let (engine, _, _) = receiver_engine();
    engine.add_remote_watches(WatchesSnapshot {
        instance: "web-01".to_string(),
        watches: vec![latency_def(800)],
    });
    let before = engine.watch_by_name("High Request Latency").unwrap();
    // unchanged definition: not re-registered
    engine.add_remote_watches(WatchesSnapshot {
        instance: "web-01".to_string(),
        watches: vec![latency_def(800)],
    });
    let unchanged = engine.watch_by_name("High Request Latency").unwrap();
    assert!(Arc::ptr_eq(&before, &unchanged));
    // changed threshold: displaced by the new definition
    engine.add_remote_watches(WatchesSnapshot {
        instance: "web-01".to_string(),
        watches: vec![latency_def(900)],
    });
    let changed = engine.watch_by_name("High Request Latency").unwrap();
    assert!(!Arc::ptr_eq(&before, &changed));
    assert!(before.is_stopped());
}

#[test]
fn sender_forwards_collected_watches() {
    struct StaticSource(WatchDef);
    impl WatchSource for StaticSource {
        fn name(&self) -> &str {
            "static"
        }
        fn collect(&self, sink: &mut dyn WatchSink) -> anyhow::Result<()> {
            sink.watch(self.0.clone());
            Ok(())
        }
    }

    let lookup = Arc::new(TestLookup::default());
    let transport = Arc::new(CapturingTransport::default());
    let config = Arc::new(MemoryConfig::default());
    let engine = AlertEngine::new("web-01", false, transport.clone(), config, lookup);
    engine.register_watch_source(Arc::new(StaticSource(latency_def(800))));

    engine.check_tick();
    let sent = transport.sent.lock();
    assert_eq!(sent.len(), 1);
    let Message::Watches(snapshot) = Message::decode(&sent[0]).unwrap() else {
        panic!("expected a watches snapshot");
    };
    assert_eq!(snapshot.instance, "web-01");
    assert_eq!(snapshot.watches.len(), 1);
    assert_eq!(snapshot.watches[0].name, "High Request Latency");
}

#[test]
fn local_watch_source_reconciliation() {
    struct ToggleSource(Mutex<Option<WatchDef>>);
    impl WatchSource for ToggleSource {
        fn name(&self) -> &str {
            "toggle"
        }
        fn collect(&self, sink: &mut dyn WatchSink) -> anyhow::Result<()> {
            if let Some(def) = self.0.lock().clone() {
                sink.watch(def);
            }
            Ok(())
        }
    }

    let (engine, _, _) = receiver_engine();
    let source = Arc::new(ToggleSource(Mutex::new(Some(latency_def(800)))));
    engine.register_watch_source(source.clone());

    engine.check_tick();
    assert!(engine.watch_by_name("High Request Latency").is_some());

    *source.0.lock() = None;
    engine.check_tick();
    assert!(engine.watch_by_name("High Request Latency").is_none());
}

#[test]
fn statistics_count_levels_and_acknowledgement() {
    let (engine, lookup, _) = receiver_engine();
    engine.add_watch(Arc::new(
        Watch::builder("High Checkout Latency", Metric::new(
            Series::new("ns:web CheckoutMillis").unwrap(),
            Unit::Millis,
        ))
        .red(Condition::greater_than(800), None)
        .build(),
    ));
    engine.add_watch(Arc::new(
        Watch::builder("Slow Search", Metric::new(
            Series::new("ns:web SearchMillis").unwrap(),
            Unit::Millis,
        ))
        .amber(Condition::greater_than(500), None)
        .build(),
    ));

    lookup.push("ns:web CheckoutMillis", 1000, 900);
    lookup.push("ns:web SearchMillis", 1000, 600);
    engine.check_tick();

    let stats = engine.statistics();
    assert_eq!(stats.unacknowledged_red, 1);
    assert_eq!(stats.unacknowledged_amber, 1);
    assert_eq!(stats.ongoing_red_serials.len(), 1);
    assert_eq!(stats.ongoing_amber_serials.len(), 1);
    assert_eq!(stats.raised_total, 2);

    assert!(engine.acknowledge(stats.ongoing_red_serials[0]));
    lookup.push("ns:web CheckoutMillis", 2000, 950);
    engine.check_tick();
    let stats = engine.statistics();
    assert_eq!(stats.acknowledged_red, 1);
    assert_eq!(stats.unacknowledged_red, 0);
}

mod eviction {
    use super::*;

    fn alert(serial: u64, level: Level) -> Arc<Alert> {
        Arc::new(Alert::new(
            serial,
            "watch",
            Series::new("ns:web LatencyMillis").unwrap(),
            "server",
            level,
            serial as i64 * 1000,
        ))
    }

    fn serials(queue: &VecDeque<Arc<Alert>>) -> Vec<u64> {
        queue.iter().map(|a| a.serial()).collect()
    }

    #[test]
    fn cleared_alerts_are_evicted_first() {
        let mut queue: VecDeque<Arc<Alert>> = (1..=11).map(|s| alert(s, Level::Red)).collect();
        queue[3].clear();
        limit_queue_size(&mut queue);
        assert_eq!(queue.len(), 10);
        assert!(!serials(&queue).contains(&4));
    }

    #[test]
    fn acknowledged_alerts_go_before_ambers() {
        let mut queue: VecDeque<Arc<Alert>> = (1..=11).map(|s| alert(s, Level::Red)).collect();
        queue[2].acknowledge();
        queue[5].acknowledge();
        queue[1].set_level(Level::Amber);
        limit_queue_size(&mut queue);
        assert!(!serials(&queue).contains(&3), "oldest acknowledged goes first");
        assert!(serials(&queue).contains(&2), "the amber survives");
        assert!(serials(&queue).contains(&6));
    }

    #[test]
    fn oldest_amber_goes_when_nothing_cheaper_exists() {
        let mut queue: VecDeque<Arc<Alert>> = (1..=11).map(|s| alert(s, Level::Red)).collect();
        queue[4].set_level(Level::Amber);
        queue[7].set_level(Level::Amber);
        limit_queue_size(&mut queue);
        assert!(!serials(&queue).contains(&5));
        assert!(serials(&queue).contains(&8));
    }

    #[test]
    fn oldest_alert_goes_as_last_resort() {
        let mut queue: VecDeque<Arc<Alert>> = (1..=11).map(|s| alert(s, Level::Red)).collect();
        limit_queue_size(&mut queue);
        assert_eq!(serials(&queue), (2..=11).collect::<Vec<u64>>());
    }

    #[test]
    fn queue_at_capacity_is_left_alone() {
        let mut queue: VecDeque<Arc<Alert>> = (1..=10).map(|s| alert(s, Level::Red)).collect();
        limit_queue_size(&mut queue);
        assert_eq!(queue.len(), 10);
    }
}
