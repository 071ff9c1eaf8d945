//! Declarative graph description.
//!
//! A graph is a list of stages, each with a kind, a unique name, its channel
//! bindings and (for timed stages) a period. It is read from TOML or built in
//! code; `GraphConfig::default()` is the six-stage benchmark topology:
//!
//! ```text
//! sensor_dummy_node --/topic1--> filter_node --/topic2--> message_driven_node --/topic3-->
//!     timer_driven_node --/topic4--> actuator_dummy_node
//! drive_node --/drive--> message_driven_node (trigger)
//! ```

use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeSet, HashSet},
    fs,
    path::Path,
    time::Duration,
};

use crate::{
    error::{GraphError, Result},
    stages::{
        LatencyModel, StageKind,
        latency::{DEFAULT_LOCATION, DEFAULT_SCALE, MAX_LATENCY_MS},
    },
    substrate::Port,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyConfig {
    pub location: f64,
    pub scale: f64,
    pub cap_ms: f64,
    /// Fixed generator seed; absent means seeded from the OS.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            location: DEFAULT_LOCATION,
            scale: DEFAULT_SCALE,
            cap_ms: MAX_LATENCY_MS,
            seed: None,
        }
    }
}

impl LatencyConfig {
    pub fn build(&self) -> Result<LatencyModel> {
        LatencyModel::with_params(self.location, self.scale, self.cap_ms, self.seed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    pub kind: StageKind,
    /// Data input channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    /// Trigger input channel (message-driven relay only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_ms: Option<u64>,
    /// Sensor only: stop after this many messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Sensor only: payload size of each message.
    #[serde(default)]
    pub payload_bytes: usize,
    /// Timer relay only: republish the latest message on every tick.
    #[serde(default)]
    pub hold_last: bool,
}

impl StageSpec {
    fn bare(name: &str, kind: StageKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            input: None,
            trigger: None,
            output: None,
            period_ms: None,
            limit: None,
            payload_bytes: 0,
            hold_last: false,
        }
    }

    pub fn sensor(name: &str, output: &str, period_ms: u64) -> Self {
        Self {
            output: Some(output.to_string()),
            period_ms: Some(period_ms),
            ..Self::bare(name, StageKind::SensorSource)
        }
    }

    pub fn filter(name: &str, input: &str, output: &str) -> Self {
        Self {
            input: Some(input.to_string()),
            output: Some(output.to_string()),
            ..Self::bare(name, StageKind::FilterRelay)
        }
    }

    pub fn timer_relay(name: &str, input: &str, output: &str, period_ms: u64) -> Self {
        Self {
            input: Some(input.to_string()),
            output: Some(output.to_string()),
            period_ms: Some(period_ms),
            ..Self::bare(name, StageKind::TimerRelay)
        }
    }

    pub fn message_driven(name: &str, input: &str, trigger: &str, output: &str) -> Self {
        Self {
            input: Some(input.to_string()),
            trigger: Some(trigger.to_string()),
            output: Some(output.to_string()),
            ..Self::bare(name, StageKind::MessageDrivenRelay)
        }
    }

    pub fn actuator(name: &str, input: &str) -> Self {
        Self {
            input: Some(input.to_string()),
            ..Self::bare(name, StageKind::ActuatorSink)
        }
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn period(&self) -> Option<Duration> {
        self.period_ms.map(Duration::from_millis)
    }

    /// Subscriptions this stage needs, as (port, channel).
    pub fn inputs(&self) -> Vec<(Port, &str)> {
        let mut inputs = Vec::new();
        if let Some(input) = &self.input {
            inputs.push((Port::Data, input.as_str()));
        }
        if let Some(trigger) = &self.trigger {
            inputs.push((Port::Trigger, trigger.as_str()));
        }
        inputs
    }

    fn require(&self, value: &Option<String>, binding: &'static str) -> Result<()> {
        match value {
            Some(v) if !v.is_empty() => Ok(()),
            _ => Err(GraphError::MissingBinding {
                stage: self.name.clone(),
                binding,
            }),
        }
    }

    fn require_period(&self) -> Result<()> {
        match self.period_ms {
            Some(ms) if ms > 0 => Ok(()),
            other => Err(GraphError::InvalidPeriod {
                stage: self.name.clone(),
                period: Duration::from_millis(other.unwrap_or(0)),
            }),
        }
    }

    fn forbid(&self, present: bool, binding: &'static str) -> Result<()> {
        if present {
            return Err(GraphError::UnsupportedBinding {
                stage: self.name.clone(),
                kind: self.kind.as_str(),
                binding,
            });
        }
        Ok(())
    }

    /// Checks that this stage has exactly the bindings its kind supports.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(GraphError::EmptyStageName);
        }
        let timed = matches!(self.kind, StageKind::SensorSource | StageKind::TimerRelay);
        self.forbid(!timed && self.period_ms.is_some(), "period_ms")?;
        self.forbid(
            self.kind != StageKind::MessageDrivenRelay && self.trigger.is_some(),
            "trigger",
        )?;
        self.forbid(self.kind == StageKind::SensorSource && self.input.is_some(), "input")?;
        self.forbid(self.kind == StageKind::ActuatorSink && self.output.is_some(), "output")?;
        self.forbid(self.kind != StageKind::SensorSource && self.limit.is_some(), "limit")?;
        self.forbid(
            self.kind != StageKind::SensorSource && self.payload_bytes > 0,
            "payload_bytes",
        )?;
        self.forbid(self.kind != StageKind::TimerRelay && self.hold_last, "hold_last")?;

        match self.kind {
            StageKind::SensorSource => {
                self.require(&self.output, "output")?;
                self.require_period()
            }
            StageKind::FilterRelay => {
                self.require(&self.input, "input")?;
                self.require(&self.output, "output")
            }
            StageKind::TimerRelay => {
                self.require(&self.input, "input")?;
                self.require(&self.output, "output")?;
                self.require_period()
            }
            StageKind::MessageDrivenRelay => {
                self.require(&self.input, "input")?;
                self.require(&self.trigger, "trigger")?;
                self.require(&self.output, "output")
            }
            StageKind::ActuatorSink => self.require(&self.input, "input"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Worker threads; defaults to the number of CPUs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(default)]
    pub latency: LatencyConfig,
    pub stages: Vec<StageSpec>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            workers: None,
            latency: LatencyConfig::default(),
            stages: vec![
                StageSpec::actuator("actuator_dummy_node", "/topic4"),
                StageSpec::filter("filter_node", "/topic1", "/topic2"),
                StageSpec::message_driven("message_driven_node", "/topic2", "/drive", "/topic3"),
                StageSpec::timer_relay("timer_driven_node", "/topic3", "/topic4", 100),
                StageSpec::sensor("sensor_dummy_node", "/topic1", 50),
                StageSpec::sensor("drive_node", "/drive", 100),
            ],
        }
    }
}

impl GraphConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| GraphError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get)
    }

    /// Every channel named by any stage, sorted.
    pub fn channel_names(&self) -> BTreeSet<&str> {
        self.stages
            .iter()
            .flat_map(|s| {
                s.inputs()
                    .into_iter()
                    .map(|(_, ch)| ch)
                    .chain(s.output.as_deref())
            })
            .collect()
    }

    /// Whole-graph checks: per-stage bindings, unique names, no dangling subscriptions.
    pub fn validate(&self) -> Result<()> {
        if self.workers == Some(0) {
            return Err(GraphError::NoWorkers);
        }

        let mut names = HashSet::new();
        for stage in &self.stages {
            stage.validate()?;
            if !names.insert(stage.name.as_str()) {
                return Err(GraphError::DuplicateStage(stage.name.clone()));
            }
        }

        let published: HashSet<&str> = self
            .stages
            .iter()
            .filter_map(|s| s.output.as_deref())
            .collect();
        for stage in &self.stages {
            for (_, channel) in stage.inputs() {
                if !published.contains(channel) {
                    return Err(GraphError::DanglingSubscription {
                        stage: stage.name.clone(),
                        channel: channel.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}
