//! Stage variants of the pipeline and the pieces they share.
//!
//! A stage is one of five variants, chosen by the set of capabilities it needs:
//!
//! | variant              | subscriptions     | publishes | timer |
//! |----------------------|-------------------|-----------|-------|
//! | `SensorSource`       | -                 | yes       | yes   |
//! | `FilterRelay`        | data              | yes       | -     |
//! | `TimerRelay`         | data              | yes       | yes   |
//! | `MessageDrivenRelay` | data + trigger    | yes       | -     |
//! | `ActuatorSink`       | data              | -         | -     |
//!
//! The executor holds stages by value inside its shared state; every callback
//! reaches its stage through that owned handle.

pub mod actuator;
pub mod latency;
pub mod mailbox;
pub mod relay;
pub mod sensor;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

use crate::{
    substrate::{Message, Node, Port, Publisher},
    utils::{
        metrics::StageStats,
        trace::{EventKind, EventRecorder},
    },
};

pub use actuator::ActuatorSink;
pub use latency::LatencyModel;
pub use mailbox::Mailbox;
pub use relay::{FilterRelay, MessageDrivenRelay, TimerRelay};
pub use sensor::SensorSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    SensorSource,
    FilterRelay,
    TimerRelay,
    MessageDrivenRelay,
    ActuatorSink,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::SensorSource => "sensor_source",
            StageKind::FilterRelay => "filter_relay",
            StageKind::TimerRelay => "timer_relay",
            StageKind::MessageDrivenRelay => "message_driven_relay",
            StageKind::ActuatorSink => "actuator_sink",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resources shared by every stage of a graph.
#[derive(Clone)]
pub struct StageContext {
    pub latency: Arc<LatencyModel>,
    pub recorder: Arc<EventRecorder>,
}

impl StageContext {
    pub fn new(latency: Arc<LatencyModel>, recorder: Arc<EventRecorder>) -> Self {
        Self { latency, recorder }
    }
}

/// Identity, shared resources and counters common to all variants.
pub struct StageCore {
    name: Arc<str>,
    ctx: StageContext,
    stats: Arc<StageStats>,
}

impl StageCore {
    pub fn new(name: &str, ctx: StageContext) -> Self {
        Self {
            name: Arc::from(name),
            ctx,
            stats: Arc::new(StageStats::new()),
        }
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn stats(&self) -> &Arc<StageStats> {
        &self.stats
    }

    #[inline]
    fn trace(&self, kind: EventKind, msg: Option<&Message>) {
        self.ctx.recorder.record(&self.name, kind, msg);
    }

    fn receive(&self, msg: &Message) {
        self.stats.record_received();
        self.trace(EventKind::Received, Some(msg));
    }

    /// Blocks the worker for one sampled processing delay.
    fn process(&self) {
        let delay = self.ctx.latency.spend();
        if !self.ctx.latency.is_disabled() {
            self.stats.record_injected(delay);
        }
    }

    /// Publishes `msg`; counted and traced only if at least one subscriber got it.
    fn forward(&self, publisher: &Publisher, msg: Message) {
        let traced = self.ctx.recorder.is_enabled().then(|| msg.clone());
        let seq = msg.seq();
        if publisher.publish(msg) == 0 {
            debug!("[{}] seq {} not delivered on {}", self.name, seq, publisher.channel());
            return;
        }
        self.stats.record_published();
        self.trace(EventKind::Published, traced.as_ref());
    }

    fn trigger(&self, msg: &Message) {
        self.trace(EventKind::Triggered, Some(msg));
    }

    fn store(&self, mailbox: &Mailbox, msg: Message) {
        self.trace(EventKind::Stored, Some(&msg));
        let displaced = mailbox.store(msg);
        if let Some(old) = &displaced {
            self.trace(EventKind::Overwritten, Some(old));
            debug!("[{}] seq {} overwritten before release", self.name, old.seq());
        }
        self.stats.record_store(displaced.is_some());
    }

    /// Takes the mailbox content, or records an empty take.
    fn release(&self, mailbox: &Mailbox) -> Option<Message> {
        match mailbox.take() {
            Some(msg) => {
                self.stats.record_take();
                self.trace(EventKind::Taken, Some(&msg));
                Some(msg)
            }
            None => {
                self.empty_take();
                None
            }
        }
    }

    /// Copies the mailbox content without clearing it, or records an empty take.
    fn latest(&self, mailbox: &Mailbox) -> Option<Message> {
        match mailbox.peek() {
            Some(msg) => {
                self.trace(EventKind::Taken, Some(&msg));
                Some(msg)
            }
            None => {
                self.empty_take();
                None
            }
        }
    }

    fn empty_take(&self) {
        self.stats.record_empty_take();
        self.trace(EventKind::EmptyTake, None);
    }

    fn unexpected_input(&self, port: Port, msg: &Message) {
        warn!(
            "[{}] no {:?} subscription, dropping seq {} from {}",
            self.name,
            port,
            msg.seq(),
            msg.source()
        );
    }

    fn unexpected_tick(&self) {
        warn!("[{}] tick delivered to a stage without a timer", self.name);
    }
}

pub enum Stage {
    Sensor(SensorSource),
    Filter(FilterRelay),
    Timer(TimerRelay),
    MessageDriven(MessageDrivenRelay),
    Actuator(ActuatorSink),
}

impl Stage {
    fn core(&self) -> &StageCore {
        match self {
            Stage::Sensor(s) => &s.core,
            Stage::Filter(s) => &s.core,
            Stage::Timer(s) => &s.core,
            Stage::MessageDriven(s) => &s.core,
            Stage::Actuator(s) => &s.core,
        }
    }

    pub fn kind(&self) -> StageKind {
        match self {
            Stage::Sensor(_) => StageKind::SensorSource,
            Stage::Filter(_) => StageKind::FilterRelay,
            Stage::Timer(_) => StageKind::TimerRelay,
            Stage::MessageDriven(_) => StageKind::MessageDrivenRelay,
            Stage::Actuator(_) => StageKind::ActuatorSink,
        }
    }

    pub fn stats(&self) -> &Arc<StageStats> {
        self.core().stats()
    }
}

impl Node for Stage {
    fn name(&self) -> &str {
        self.core().name()
    }

    fn on_message(&self, port: Port, msg: Message) {
        match (self, port) {
            (Stage::Filter(s), Port::Data) => s.on_input(msg),
            (Stage::Timer(s), Port::Data) => s.on_input(msg),
            (Stage::MessageDriven(s), Port::Data) => s.on_primary(msg),
            (Stage::MessageDriven(s), Port::Trigger) => s.on_trigger(msg),
            (Stage::Actuator(s), Port::Data) => s.on_input(msg),
            (stage, port) => stage.core().unexpected_input(port, &msg),
        }
    }

    fn on_tick(&self) {
        match self {
            Stage::Sensor(s) => s.on_tick(),
            Stage::Timer(s) => s.on_tick(),
            stage => stage.core().unexpected_tick(),
        }
    }
}
