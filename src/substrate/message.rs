//! message.rs
//! The unit of data moving through the graph: an opaque payload plus the
//! instant it was created. Fields are read-only once built.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

#[derive(Debug, Clone)]
pub struct Message {
    source: Arc<str>,
    seq: u64,
    stamp: Instant,
    payload: Vec<u8>,
}

impl Message {
    /// Creates a message stamped with the current instant.
    pub fn new(source: Arc<str>, seq: u64, payload: Vec<u8>) -> Self {
        Self {
            source,
            seq,
            stamp: Instant::now(),
            payload,
        }
    }

    /// Name of the stage that created this message.
    pub fn source(&self) -> &Arc<str> {
        &self.source
    }

    /// Per-source sequence number, starting at 1.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn stamp(&self) -> Instant {
        self.stamp
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Time elapsed since the message was created.
    pub fn age(&self) -> Duration {
        self.stamp.elapsed()
    }
}
