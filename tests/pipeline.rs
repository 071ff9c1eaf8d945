//! End-to-end runs of small graphs on the real executor.

use latency_rig::{
    graph::{Graph, GraphConfig, LatencyConfig, RunningGraph, StageSpec},
    stages::{LatencyModel, StageContext},
    utils::trace::EventRecorder,
};
use std::{
    fs,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

fn context(latency: LatencyModel) -> StageContext {
    StageContext::new(Arc::new(latency), Arc::new(EventRecorder::disabled()))
}

fn no_delay() -> StageContext {
    context(LatencyModel::disabled().unwrap())
}

fn graph(workers: usize, stages: Vec<StageSpec>) -> GraphConfig {
    GraphConfig {
        workers: Some(workers),
        latency: LatencyConfig::default(),
        stages,
    }
}

fn received(running: &RunningGraph, stage: &str) -> u64 {
    running.stage(stage).map(|s| s.stats().received()).unwrap_or(0)
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    done()
}

#[test]
fn filter_chain_delivers_every_message() {
    let config = graph(
        4,
        vec![
            StageSpec::sensor("sensor_dummy_node", "/topic1", 50).with_limit(20),
            StageSpec::filter("filter_node", "/topic1", "/topic2"),
            StageSpec::actuator("actuator_dummy_node", "/topic2"),
        ],
    );
    let ctx = context(LatencyModel::seeded(42).unwrap());
    let running = Graph::build(&config, ctx).unwrap().start().unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        received(&running, "actuator_dummy_node") == 20
    }));
    let report = running.shutdown();

    assert_eq!(report.stage("sensor_dummy_node").unwrap().snapshot.published, 20);
    let filter = &report.stage("filter_node").unwrap().snapshot;
    assert_eq!((filter.received, filter.published), (20, 20));
    let injected = filter.injected_ms.as_ref().unwrap();
    assert_eq!(injected.count, 20);
    assert!(injected.max <= 150.0);

    let sink = &report.stage("actuator_dummy_node").unwrap().snapshot;
    assert_eq!(sink.received, 20);
    assert_eq!(sink.age_ms.as_ref().unwrap().count, 20);
    assert_eq!(report.channel("/topic2").unwrap().dropped, 0);
}

#[test]
fn timer_relay_never_outpaces_its_timer() {
    let mut config = graph(
        4,
        vec![
            StageSpec::sensor("fast_sensor", "/in", 10),
            StageSpec::timer_relay("timer_driven_node", "/in", "/out", 100),
            StageSpec::actuator("sink", "/out"),
        ],
    );
    config.latency.seed = Some(11);
    let latency = config.latency.build().unwrap();
    let running = Graph::build(&config, context(latency)).unwrap().start().unwrap();
    thread::sleep(Duration::from_millis(1_500));
    let report = running.shutdown();

    let upstream = report.stage("fast_sensor").unwrap().snapshot.published;
    let relay = &report.stage("timer_driven_node").unwrap().snapshot;
    let node = report.executor.node("timer_driven_node").unwrap();
    assert!(relay.published > 0);
    assert!(relay.published <= relay.taken);
    assert!(relay.taken <= node.ticks_fired, "taken={} ticks={}", relay.taken, node.ticks_fired);

    // Every stored message is overwritten, taken, or still in the slot.
    assert!(relay.stored >= relay.overwritten + relay.taken);
    let leftover = relay.stored - relay.overwritten - relay.taken;
    assert!(leftover <= 1, "leftover={}", leftover);

    // Drops are bounded by what upstream sent beyond what the ticks consumed.
    assert!(relay.overwritten > 0);
    assert!(
        relay.overwritten + node.ticks_fired <= upstream + relay.empty_takes + node.discarded,
        "overwritten={} ticks={} upstream={} empty={} discarded={}",
        relay.overwritten,
        node.ticks_fired,
        upstream,
        relay.empty_takes,
        node.discarded
    );
    assert!(report.stage("sink").unwrap().snapshot.received <= relay.published);
}

#[test]
fn message_driven_relay_releases_only_on_trigger() {
    let config = graph(
        3,
        vec![
            StageSpec::sensor("sensor", "/data", 10),
            StageSpec::sensor("drive_node", "/drive", 100),
            StageSpec::message_driven("message_driven_node", "/data", "/drive", "/out"),
            StageSpec::actuator("sink", "/out"),
        ],
    );
    let running = Graph::build(&config, no_delay()).unwrap().start().unwrap();
    thread::sleep(Duration::from_millis(800));
    let report = running.shutdown();

    let relay = &report.stage("message_driven_node").unwrap().snapshot;
    let triggers = report.stage("drive_node").unwrap().snapshot.published;
    assert!(relay.published > 0);
    assert!(relay.published <= relay.taken);
    assert!(relay.taken <= triggers);
    assert_eq!(relay.received, relay.stored);

    assert!(relay.stored >= relay.overwritten + relay.taken);
    assert!(relay.stored - relay.overwritten - relay.taken <= 1);
}

#[test]
fn default_graph_runs_and_stops_cleanly() {
    let mut config = GraphConfig::default();
    config.workers = Some(4);
    config.latency.seed = Some(7);
    let latency = config.latency.build().unwrap();
    let running = Graph::build(&config, context(latency)).unwrap().start().unwrap();
    thread::sleep(Duration::from_millis(1_200));
    let report = running.shutdown();

    assert_eq!(report.stages.len(), 6);
    assert_eq!(report.channels.len(), 5);
    for node in &report.executor.nodes {
        assert_eq!(node.faults, 0, "{} faulted", node.name);
        assert_eq!(node.dispatched, node.completed, "{} half-run", node.name);
    }
    for stage in &report.stages {
        let s = &stage.snapshot;
        assert!(s.overwritten <= s.stored, "{}", stage.name);
    }
    let sensor = &report.stage("sensor_dummy_node").unwrap().snapshot;
    assert!(sensor.published >= 10);
    let timer = &report.stage("timer_driven_node").unwrap().snapshot;
    let sink = &report.stage("actuator_dummy_node").unwrap().snapshot;
    assert!(sink.received <= timer.published);
}

#[test]
fn graph_loads_from_toml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.toml");
    fs::write(
        &path,
        r#"
        workers = 2

        [latency]
        cap_ms = 0.0

        [[stages]]
        name = "src"
        kind = "sensor_source"
        output = "/a"
        period_ms = 20
        limit = 4
        payload_bytes = 64

        [[stages]]
        name = "sink"
        kind = "actuator_sink"
        input = "/a"
        "#,
    )
    .unwrap();

    let config = GraphConfig::load(&path).unwrap();
    let latency = config.latency.build().unwrap();
    assert!(latency.is_disabled());

    let running = Graph::build(&config, context(latency)).unwrap().start().unwrap();
    assert!(wait_until(Duration::from_secs(3), || received(&running, "sink") == 4));
    let report = running.shutdown();
    assert_eq!(report.stage("sink").unwrap().snapshot.received, 4);
}

#[test]
fn missing_config_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let err = GraphConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(err.to_string().contains("absent.toml"));
}

#[test]
fn trace_export_captures_the_message_path() {
    let dir = tempfile::tempdir().unwrap();
    let trace_path = dir.path().join("trace.csv");

    let recorder = Arc::new(EventRecorder::new());
    recorder.start_exporter(trace_path.clone()).unwrap();
    let ctx = StageContext::new(Arc::new(LatencyModel::disabled().unwrap()), recorder.clone());

    let config = graph(
        2,
        vec![
            StageSpec::sensor("src", "/a", 20).with_limit(3),
            StageSpec::filter("relay", "/a", "/b"),
            StageSpec::actuator("sink", "/b"),
        ],
    );
    let running = Graph::build(&config, ctx).unwrap().start().unwrap();
    assert!(wait_until(Duration::from_secs(3), || received(&running, "sink") == 3));
    running.shutdown();
    recorder.stop_exporter();

    let text = fs::read_to_string(&trace_path).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("ts_ns,stage,event,source,seq,age_us"));
    let rows: Vec<&str> = lines.collect();
    let count = |stage: &str, event: &str| {
        rows.iter()
            .filter(|r| r.split(',').nth(1) == Some(stage) && r.split(',').nth(2) == Some(event))
            .count()
    };
    assert_eq!(count("src", "published"), 3);
    assert_eq!(count("relay", "received"), 3);
    assert_eq!(count("relay", "published"), 3);
    assert_eq!(count("sink", "sunk"), 3);
    assert_eq!(recorder.dropped(), 0);
}

#[test]
fn rejected_config_writes_no_trace_file() {
    let dir = tempfile::tempdir().unwrap();
    let trace_path = dir.path().join("trace.csv");

    let config = graph(
        1,
        vec![
            StageSpec::sensor("src", "/a", 20),
            StageSpec::actuator("sink", "/missing"),
        ],
    );
    assert!(Graph::prepare(&config, Some(trace_path.clone())).is_err());
    assert!(!trace_path.exists());

    let config = graph(
        1,
        vec![
            StageSpec::sensor("src", "/a", 20).with_limit(1),
            StageSpec::actuator("sink", "/a"),
        ],
    );
    let (graph, recorder) = Graph::prepare(&config, Some(trace_path.clone())).unwrap();
    assert!(recorder.is_enabled());
    assert!(trace_path.exists());
    assert!(graph.stage("sink").is_some());
    recorder.stop_exporter();
}
