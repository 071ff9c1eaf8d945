//! actuator.rs
//! End of the pipeline: consumes and discards. The only thing kept is the
//! message's end-to-end age, the figure the whole rig exists to measure.

use crate::{
    stages::{StageContext, StageCore},
    substrate::Message,
    utils::trace::EventKind,
};

pub struct ActuatorSink {
    pub(crate) core: StageCore,
}

impl ActuatorSink {
    pub fn new(name: &str, ctx: StageContext) -> Self {
        Self {
            core: StageCore::new(name, ctx),
        }
    }

    pub fn on_input(&self, msg: Message) {
        self.core.stats().record_received();
        self.core.stats().record_age(msg.age());
        self.core.trace(EventKind::Sunk, Some(&msg));
    }
}
