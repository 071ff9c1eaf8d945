//! Per-message event trace.
//!
//! Stages push events into a bounded lock-free queue (16K, drop when full) and
//! return immediately. An optional exporter thread drains the queue to CSV in
//! batches and does a final drain on stop.
//!
//! Trace captures: source publish → stage receive → mailbox store/take → sink.

use crossbeam_queue::ArrayQueue;
use csv::Writer;
use log::{debug, error};
use parking_lot::Mutex;
use serde::Serialize;
use std::{
    fs::File,
    io::BufWriter,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::{
    error::{GraphError, Result},
    substrate::Message,
};

const EVENT_QUEUE_CAPACITY: usize = 16_384;
const EXPORTER_POLL_MS: u64 = 5;
const DRAIN_BATCH: usize = 256;
const FLUSH_BATCHES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Message left a stage on its output channel.
    Published,
    /// Message arrived at a stage.
    Received,
    /// Trigger arrived at a message-driven stage.
    Triggered,
    /// Message went into a mailbox.
    Stored,
    /// Message came out of a mailbox.
    Taken,
    /// Trigger or tick found the mailbox empty.
    EmptyTake,
    /// Message overwritten in a mailbox before anyone took it.
    Overwritten,
    /// Message consumed by a sink.
    Sunk,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Published => "published",
            EventKind::Received => "received",
            EventKind::Triggered => "triggered",
            EventKind::Stored => "stored",
            EventKind::Taken => "taken",
            EventKind::EmptyTake => "empty_take",
            EventKind::Overwritten => "overwritten",
            EventKind::Sunk => "sunk",
        }
    }
}

/// One traced event. `source`/`seq` identify the message, absent for empty takes.
#[derive(Debug, Clone)]
pub struct Event {
    pub ts_ns: u64,
    pub stage: Arc<str>,
    pub kind: EventKind,
    pub source: Option<Arc<str>>,
    pub seq: Option<u64>,
    pub age_us: Option<u64>,
}

#[derive(Debug, Serialize)]
struct TraceRow<'a> {
    ts_ns: u64,
    stage: &'a str,
    event: &'static str,
    source: Option<&'a str>,
    seq: Option<u64>,
    age_us: Option<u64>,
}

impl<'a> From<&'a Event> for TraceRow<'a> {
    fn from(e: &'a Event) -> Self {
        TraceRow {
            ts_ns: e.ts_ns,
            stage: &e.stage,
            event: e.kind.as_str(),
            source: e.source.as_deref(),
            seq: e.seq,
            age_us: e.age_us,
        }
    }
}

/// Non-blocking event recorder with optional background CSV export.
pub struct EventRecorder {
    enabled: bool,
    queue: Arc<ArrayQueue<Event>>,
    dropped: Arc<AtomicU64>,
    run_start: Instant,
    exporter_running: Arc<AtomicBool>,
    exporter: Mutex<Option<JoinHandle<()>>>,
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::with_enabled(true)
    }

    /// Recorder that ignores every event.
    pub fn disabled() -> Self {
        Self::with_enabled(false)
    }

    fn with_enabled(enabled: bool) -> Self {
        Self {
            enabled,
            queue: Arc::new(ArrayQueue::new(EVENT_QUEUE_CAPACITY)),
            dropped: Arc::new(AtomicU64::new(0)),
            run_start: Instant::now(),
            exporter_running: Arc::new(AtomicBool::new(false)),
            exporter: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Nanoseconds since the recorder was created.
    #[inline]
    pub fn now_ns(&self) -> u64 {
        self.run_start.elapsed().as_nanos() as u64
    }

    #[inline]
    pub fn record(
        &self,
        stage: &Arc<str>,
        kind: EventKind,
        msg: Option<&Message>,
    ) {
        if !self.enabled {
            return;
        }
        let event = Event {
            ts_ns: self.now_ns(),
            stage: stage.clone(),
            kind,
            source: msg.map(|m| m.source().clone()),
            seq: msg.map(|m| m.seq()),
            age_us: msg.map(|m| m.age().as_micros() as u64),
        };
        if self.queue.push(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Events lost because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Pops everything currently queued.
    pub fn drain(&self) -> Vec<Event> {
        let mut out = Vec::with_capacity(self.queue.len());
        while let Some(e) = self.queue.pop() {
            out.push(e);
        }
        out
    }

    /// Spawns a thread draining the queue into `output_csv`.
    pub fn start_exporter(&self, output_csv: PathBuf) -> Result<()> {
        let mut guard = self.exporter.lock();
        if guard.is_some() {
            return Ok(());
        }

        let file = File::create(&output_csv).map_err(|source| GraphError::OutputIo {
            path: output_csv.clone(),
            source,
        })?;

        let queue = self.queue.clone();
        let running = self.exporter_running.clone();
        let dropped = self.dropped.clone();
        running.store(true, Ordering::SeqCst);

        let name = "trace_exporter".to_string();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let mut wtr = Writer::from_writer(BufWriter::new(file));
                let mut flush_counter = 0usize;

                while running.load(Ordering::SeqCst) {
                    let mut any = false;
                    for _ in 0..DRAIN_BATCH {
                        match queue.pop() {
                            Some(event) => {
                                any = true;
                                if let Err(e) = wtr.serialize(TraceRow::from(&event)) {
                                    error!("[trace] failed to write row: {}", e);
                                }
                            }
                            None => break,
                        }
                    }
                    if any {
                        flush_counter += 1;
                        if flush_counter >= FLUSH_BATCHES {
                            wtr.flush().ok();
                            flush_counter = 0;
                        }
                    } else {
                        thread::sleep(Duration::from_millis(EXPORTER_POLL_MS));
                    }
                }

                while let Some(event) = queue.pop() {
                    wtr.serialize(TraceRow::from(&event)).ok();
                }
                wtr.flush().ok();
                debug!(
                    "[trace] exporter exiting, dropped_events={}",
                    dropped.load(Ordering::Relaxed)
                );
            })
            .map_err(|source| GraphError::Spawn { name, source })?;

        *guard = Some(handle);
        Ok(())
    }

    /// Stops the exporter after a final drain. No-op if none is running.
    pub fn stop_exporter(&self) {
        self.exporter_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.exporter.lock().take() {
            if handle.join().is_err() {
                error!("[trace] exporter join failed");
            }
        }
    }
}

impl Drop for EventRecorder {
    fn drop(&mut self) {
        self.stop_exporter();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage() -> Arc<str> {
        Arc::from("filter_node")
    }

    #[test]
    fn disabled_recorder_keeps_nothing() {
        let rec = EventRecorder::disabled();
        let msg = Message::new(Arc::from("sensor"), 1, Vec::new());
        rec.record(&stage(), EventKind::Received, Some(&msg));
        assert!(rec.drain().is_empty());
    }

    #[test]
    fn records_message_identity() {
        let rec = EventRecorder::new();
        let msg = Message::new(Arc::from("sensor"), 42, Vec::new());
        rec.record(&stage(), EventKind::Published, Some(&msg));
        rec.record(&stage(), EventKind::EmptyTake, None);

        let events = rec.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::Published);
        assert_eq!(events[0].seq, Some(42));
        assert_eq!(events[0].source.as_deref(), Some("sensor"));
        assert_eq!(events[1].kind, EventKind::EmptyTake);
        assert!(events[1].seq.is_none());
    }

    #[test]
    fn full_queue_drops_silently() {
        let rec = EventRecorder::new();
        for _ in 0..(EVENT_QUEUE_CAPACITY + 10) {
            rec.record(&stage(), EventKind::EmptyTake, None);
        }
        assert_eq!(rec.dropped(), 10);
        assert_eq!(rec.drain().len(), EVENT_QUEUE_CAPACITY);
    }

    #[test]
    fn exporter_writes_csv_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.csv");

        let rec = EventRecorder::new();
        rec.start_exporter(path.clone()).unwrap();
        let msg = Message::new(Arc::from("sensor"), 3, Vec::new());
        rec.record(&stage(), EventKind::Sunk, Some(&msg));
        rec.record(&stage(), EventKind::EmptyTake, None);
        rec.stop_exporter();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "ts_ns,stage,event,source,seq,age_us");
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains(",filter_node,sunk,sensor,3,"));
        assert!(lines[2].contains(",filter_node,empty_take,,,"));
    }
}
