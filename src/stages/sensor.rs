//! sensor.rs
//! Free-running source: every timer tick publishes a fresh, time-stamped message.
//! No subscriptions and no injected delay. With a `limit` the source goes quiet
//! after that many messages so a run can be drained and counted.

use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{
    stages::{StageContext, StageCore},
    substrate::{Message, Publisher},
};

pub struct SensorSource {
    pub(crate) core: StageCore,
    publisher: Publisher,
    // Messages emitted so far; also the last sequence number handed out.
    emitted: AtomicU64,
    limit: Option<u64>,
    payload_bytes: usize,
}

impl SensorSource {
    pub fn new(name: &str, publisher: Publisher, ctx: StageContext) -> Self {
        Self {
            core: StageCore::new(name, ctx),
            publisher,
            emitted: AtomicU64::new(0),
            limit: None,
            payload_bytes: 0,
        }
    }

    /// Stop publishing after `limit` messages.
    pub fn with_limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_payload_bytes(mut self, payload_bytes: usize) -> Self {
        self.payload_bytes = payload_bytes;
        self
    }

    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Acquire)
    }

    pub fn on_tick(&self) {
        let limit = self.limit;
        // Two ticks of the same timer may overlap; the CAS keeps sequence numbers unique.
        let claimed = self
            .emitted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| match limit {
                Some(max) if n >= max => None,
                _ => Some(n + 1),
            });
        let seq = match claimed {
            Ok(prev) => prev + 1,
            Err(_) => {
                debug!("[{}] limit reached, tick ignored", self.core.name());
                return;
            }
        };

        let msg = Message::new(self.core.name().clone(), seq, vec![0u8; self.payload_bytes]);
        self.core.forward(&self.publisher, msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{stages::testing::quiet_context, substrate::channel::tap};
    use std::time::Duration;

    #[test]
    fn each_tick_publishes_a_new_stamped_message() {
        let (publisher, tap) = tap::publisher("/topic1");
        let sensor = SensorSource::new("sensor_dummy_node", publisher, quiet_context())
            .with_payload_bytes(4);

        sensor.on_tick();
        std::thread::sleep(Duration::from_millis(2));
        sensor.on_tick();

        let out = tap.drain();
        assert_eq!(out.len(), 2);
        assert_eq!((out[0].seq(), out[1].seq()), (1, 2));
        assert_eq!(&**out[0].source(), "sensor_dummy_node");
        assert_eq!(out[0].payload().len(), 4);
        assert!(out[1].stamp() > out[0].stamp());
        assert_eq!(sensor.core.stats().published(), 2);
    }

    #[test]
    fn limit_stops_publishing() {
        let (publisher, tap) = tap::publisher("/topic1");
        let sensor = SensorSource::new("sensor", publisher, quiet_context()).with_limit(Some(3));

        for _ in 0..10 {
            sensor.on_tick();
        }
        assert_eq!(tap.drain().len(), 3);
        assert_eq!(sensor.emitted(), 3);
    }
}
