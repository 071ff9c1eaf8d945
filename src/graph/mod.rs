//! Graph assembly: turns a `GraphConfig` into a wired executor of stages.
//!
//! - Validates the whole description before creating anything.
//! - Creates every named channel once, then one stage per entry.
//! - Subscribes stage inputs and registers timers for timed stages.
//! - `RunningGraph::shutdown` returns executor counters plus per-stage snapshots.

pub mod config;

use log::info;
use std::{path::PathBuf, sync::Arc, time::Duration};

use crate::{
    error::{GraphError, Result},
    stages::{
        ActuatorSink, FilterRelay, MessageDrivenRelay, SensorSource, Stage, StageContext,
        StageKind, TimerRelay,
    },
    substrate::{Channel, Executor, ExecutorBuilder, ExecutorHandle, ExecutorReport, Node},
    utils::{metrics::StageSnapshot, trace::EventRecorder},
};

pub use config::{GraphConfig, LatencyConfig, StageSpec};

/// A validated, fully wired graph that has not started yet.
pub struct Graph {
    executor: Executor<Stage>,
    channels: Vec<Channel>,
}

impl Graph {
    pub fn build(config: &GraphConfig, ctx: StageContext) -> Result<Self> {
        config.validate()?;

        let mut builder = ExecutorBuilder::new(config.worker_count())?;
        let mut channels = Vec::new();
        for name in config.channel_names() {
            channels.push(builder.create_channel(name)?);
        }

        for spec in &config.stages {
            let stage = make_stage(&builder, spec, ctx.clone())?;
            let id = builder.add_node(stage)?;

            for (port, name) in spec.inputs() {
                let channel = lookup(&builder, &spec.name, name)?;
                builder.subscribe(&channel, id, port)?;
            }
            if let Some(period) = spec.period() {
                builder.create_timer(id, period)?;
            }
        }

        info!(
            "[graph] built {} stages on {} channels",
            config.stages.len(),
            channels.len()
        );
        Ok(Self {
            executor: builder.build(),
            channels,
        })
    }

    /// Builds the graph with its configured latency model, then starts the
    /// trace exporter if `trace` is set. Nothing is written for a rejected config.
    pub fn prepare(
        config: &GraphConfig,
        trace: Option<PathBuf>,
    ) -> Result<(Self, Arc<EventRecorder>)> {
        let recorder = Arc::new(match trace {
            Some(_) => EventRecorder::new(),
            None => EventRecorder::disabled(),
        });
        let latency = Arc::new(config.latency.build()?);
        let graph = Self::build(config, StageContext::new(latency, recorder.clone()))?;
        if let Some(path) = trace {
            recorder.start_exporter(path.clone())?;
            info!("[graph] tracing events to {}", path.display());
        }
        Ok((graph, recorder))
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        find_stage(self.executor.nodes(), name)
    }

    pub fn workers(&self) -> usize {
        self.executor.workers()
    }

    pub fn start(self) -> Result<RunningGraph> {
        Ok(RunningGraph {
            handle: self.executor.start()?,
            channels: self.channels,
        })
    }
}

fn lookup(builder: &ExecutorBuilder<Stage>, stage: &str, channel: &str) -> Result<Channel> {
    builder
        .channel(channel)
        .cloned()
        .ok_or_else(|| GraphError::DanglingSubscription {
            stage: stage.to_string(),
            channel: channel.to_string(),
        })
}

fn output(builder: &ExecutorBuilder<Stage>, spec: &StageSpec) -> Result<Channel> {
    match spec.output.as_deref() {
        Some(name) => lookup(builder, &spec.name, name),
        None => Err(GraphError::MissingBinding {
            stage: spec.name.clone(),
            binding: "output",
        }),
    }
}

fn make_stage(builder: &ExecutorBuilder<Stage>, spec: &StageSpec, ctx: StageContext) -> Result<Stage> {
    let name = spec.name.as_str();
    let stage = match spec.kind {
        StageKind::SensorSource => Stage::Sensor(
            SensorSource::new(name, output(builder, spec)?.publisher(), ctx)
                .with_limit(spec.limit)
                .with_payload_bytes(spec.payload_bytes),
        ),
        StageKind::FilterRelay => {
            Stage::Filter(FilterRelay::new(name, output(builder, spec)?.publisher(), ctx))
        }
        StageKind::TimerRelay => Stage::Timer(
            TimerRelay::new(name, output(builder, spec)?.publisher(), ctx)
                .with_hold_last(spec.hold_last),
        ),
        StageKind::MessageDrivenRelay => Stage::MessageDriven(MessageDrivenRelay::new(
            name,
            output(builder, spec)?.publisher(),
            ctx,
        )),
        StageKind::ActuatorSink => Stage::Actuator(ActuatorSink::new(name, ctx)),
    };
    Ok(stage)
}

fn find_stage<'a>(stages: &'a [Stage], name: &str) -> Option<&'a Stage> {
    stages.iter().find(|s| s.name() == name)
}

/// A started graph. Dropping it stops the executor without a report.
pub struct RunningGraph {
    handle: ExecutorHandle<Stage>,
    channels: Vec<Channel>,
}

impl RunningGraph {
    pub fn stage(&self, name: &str) -> Option<&Stage> {
        find_stage(self.handle.nodes(), name)
    }

    /// Live executor counters.
    pub fn executor_report(&self) -> ExecutorReport {
        self.handle.report()
    }

    pub fn shutdown(self) -> GraphReport {
        let tracked: Vec<_> = self
            .handle
            .nodes()
            .iter()
            .map(|s| (s.name().to_string(), s.kind(), s.stats().clone()))
            .collect();

        let executor = self.handle.shutdown();
        // No callback runs after shutdown returns, so the snapshots are final.
        let stages = tracked
            .into_iter()
            .map(|(name, kind, stats)| StageSummary {
                name,
                kind,
                snapshot: stats.snapshot(),
            })
            .collect();
        let channels = self
            .channels
            .iter()
            .map(|c| ChannelSummary {
                name: c.name().to_string(),
                subscribers: c.subscriber_count(),
                published: c.published(),
                dropped: c.dropped(),
            })
            .collect();

        GraphReport {
            executor,
            stages,
            channels,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StageSummary {
    pub name: String,
    pub kind: StageKind,
    pub snapshot: StageSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSummary {
    pub name: String,
    pub subscribers: usize,
    pub published: u64,
    pub dropped: u64,
}

/// Everything known about a run once it has stopped.
#[derive(Debug, Clone)]
pub struct GraphReport {
    pub executor: ExecutorReport,
    pub stages: Vec<StageSummary>,
    pub channels: Vec<ChannelSummary>,
}

impl GraphReport {
    pub fn stage(&self, name: &str) -> Option<&StageSummary> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelSummary> {
        self.channels.iter().find(|c| c.name == name)
    }

    pub fn elapsed(&self) -> Duration {
        self.executor.elapsed
    }

    pub fn log_summary(&self) {
        info!("[summary] run time {:.2}s", self.elapsed().as_secs_f64());
        for stage in &self.stages {
            let s = &stage.snapshot;
            info!(
                "[summary] {} ({}): received={} published={} stored={} overwritten={} taken={} empty_takes={}",
                stage.name,
                stage.kind,
                s.received,
                s.published,
                s.stored,
                s.overwritten,
                s.taken,
                s.empty_takes
            );
            if let Some(age) = &s.age_ms {
                info!(
                    "[summary] {} end-to-end age ms: mean={:.2} p50={:.2} p99={:.2} max={:.2} (n={})",
                    stage.name, age.mean, age.p50, age.p99, age.max, age.count
                );
            }
            if let Some(node) = self.executor.node(&stage.name) {
                if node.faults > 0 || node.ticks_skipped > 0 || node.discarded > 0 {
                    info!(
                        "[summary] {} faults={} ticks_skipped={} discarded={}",
                        stage.name, node.faults, node.ticks_skipped, node.discarded
                    );
                }
            }
        }
        for ch in &self.channels {
            if ch.dropped > 0 {
                info!("[summary] channel {} dropped {} of {} publishes", ch.name, ch.dropped, ch.published);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        stages::LatencyModel,
        utils::trace::EventRecorder,
    };
    use std::{sync::Arc, thread};

    fn ctx() -> StageContext {
        StageContext::new(
            Arc::new(LatencyModel::disabled().unwrap()),
            Arc::new(EventRecorder::disabled()),
        )
    }

    #[test]
    fn default_graph_wires_every_stage() {
        let config = GraphConfig {
            workers: Some(2),
            ..GraphConfig::default()
        };
        let graph = Graph::build(&config, ctx()).unwrap();
        assert_eq!(graph.workers(), 2);
        for spec in &config.stages {
            let stage = graph.stage(&spec.name).unwrap();
            assert_eq!(stage.kind(), spec.kind);
        }
        assert!(graph.stage("nope").is_none());
    }

    #[test]
    fn build_rejects_invalid_config_before_starting() {
        let mut config = GraphConfig::default();
        config.stages.push(StageSpec::actuator("orphan", "/unpublished"));
        assert!(matches!(
            Graph::build(&config, ctx()),
            Err(GraphError::DanglingSubscription { .. })
        ));
    }

    #[test]
    fn shutdown_reports_every_stage_and_channel() {
        let config = GraphConfig {
            workers: Some(2),
            latency: LatencyConfig::default(),
            stages: vec![
                StageSpec::sensor("src", "/a", 10).with_limit(5),
                StageSpec::actuator("sink", "/a"),
            ],
        };
        let running = Graph::build(&config, ctx()).unwrap().start().unwrap();
        thread::sleep(Duration::from_millis(300));
        let report = running.shutdown();

        assert_eq!(report.stage("src").unwrap().snapshot.published, 5);
        assert_eq!(report.stage("sink").unwrap().snapshot.received, 5);
        let ch = report.channel("/a").unwrap();
        assert_eq!((ch.subscribers, ch.published, ch.dropped), (1, 5, 0));
        for node in &report.executor.nodes {
            assert_eq!(node.dispatched, node.completed + node.faults);
        }
        report.log_summary();
    }
}
