//! Per-stage counters and latency buffers.
//!
//! Counters are atomics so any worker can bump them without coordination.
//! Latency samples go into bounded FIFO buffers (last 1000 points), enough for
//! mean/percentile summaries at the end of a run without unbounded growth.

use parking_lot::Mutex;
use statrs::statistics::{Data, OrderStatistics, Statistics};
use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

pub const MAX_POINTS: usize = 1_000;

/// Appends value to a bounded buffer; removes the oldest if at capacity (FIFO).
#[inline]
pub fn push_capped(buf: &mut VecDeque<f64>, val: f64) {
    if buf.len() >= MAX_POINTS {
        buf.pop_front();
    }
    buf.push_back(val);
}

#[derive(Debug, Default)]
pub struct StageStats {
    received: AtomicU64,
    published: AtomicU64,
    stored: AtomicU64,
    overwritten: AtomicU64,
    taken: AtomicU64,
    empty_takes: AtomicU64,
    injected_ms: Mutex<VecDeque<f64>>,
    age_ms: Mutex<VecDeque<f64>>,
}

impl StageStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// A message went into the mailbox; `displaced` when it overwrote an unconsumed one.
    #[inline]
    pub fn record_store(&self, displaced: bool) {
        self.stored.fetch_add(1, Ordering::Relaxed);
        if displaced {
            self.overwritten.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A message was removed from the mailbox.
    #[inline]
    pub fn record_take(&self) {
        self.taken.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_empty_take(&self) {
        self.empty_takes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_injected(&self, delay: Duration) {
        push_capped(&mut self.injected_ms.lock(), delay.as_secs_f64() * 1_000.0);
    }

    /// End-to-end age of a message at the point it was consumed.
    pub fn record_age(&self, age: Duration) {
        push_capped(&mut self.age_ms.lock(), age.as_secs_f64() * 1_000.0);
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn stored(&self) -> u64 {
        self.stored.load(Ordering::Relaxed)
    }

    pub fn overwritten(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }

    pub fn taken(&self) -> u64 {
        self.taken.load(Ordering::Relaxed)
    }

    pub fn empty_takes(&self) -> u64 {
        self.empty_takes.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StageSnapshot {
        let injected: Vec<f64> = self.injected_ms.lock().iter().copied().collect();
        let age: Vec<f64> = self.age_ms.lock().iter().copied().collect();
        StageSnapshot {
            received: self.received(),
            published: self.published(),
            stored: self.stored(),
            overwritten: self.overwritten(),
            taken: self.taken(),
            empty_takes: self.empty_takes(),
            injected_ms: calculate_stats(injected),
            age_ms: calculate_stats(age),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageSnapshot {
    pub received: u64,
    pub published: u64,
    pub stored: u64,
    pub overwritten: u64,
    pub taken: u64,
    pub empty_takes: u64,
    pub injected_ms: Option<Stats>,
    pub age_ms: Option<Stats>,
}

/// Statistics summary for a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub count: usize,
    pub mean: f64,
    pub p50: f64,
    pub p99: f64,
    pub max: f64,
}

/// Mean, median, p99 and max; `None` for an empty buffer.
pub fn calculate_stats(values: Vec<f64>) -> Option<Stats> {
    if values.is_empty() {
        return None;
    }
    let count = values.len();
    let mean = values.iter().mean();
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mut data = Data::new(values);
    Some(Stats {
        count,
        mean,
        p50: data.percentile(50),
        p99: data.percentile(99),
        max,
    })
}
