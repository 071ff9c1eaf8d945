//! executor.rs
//! Multi-threaded callback executor.
//!
//! - Work items (message delivered, timer due) go through one unbounded crossbeam queue.
//! - A fixed pool of workers pulls items and runs them to completion; any worker may run any
//!   item, so two callbacks of the same stage can run at the same time.
//! - One timer thread turns `crossbeam::channel::tick` receivers into `Tick` items. A tick whose
//!   predecessor has not started yet is skipped, never queued behind it.
//! - A panic inside a callback is caught on the worker, logged as a stage fault and counted.
//! - Shutdown: stop admitting work, stop the timer thread, let every worker finish its
//!   current callback, then discard whatever is still queued.

use crossbeam::channel::{Receiver, Select, Sender, bounded, select, tick, unbounded};
use log::{debug, error, info};
use std::{
    any::Any,
    collections::{HashMap, HashSet},
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::{
    error::{GraphError, Result},
    substrate::{
        channel::{Channel, Dispatch, Port},
        message::Message,
    },
};

/// Callbacks the executor knows how to run.
pub trait Node: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// A message arrived on one of the node's subscriptions.
    fn on_message(&self, port: Port, msg: Message);

    /// The node's timer fired.
    fn on_tick(&self);
}

/// Index of a node inside its executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

pub(crate) enum WorkItem {
    Deliver { node: NodeId, port: Port, msg: Message },
    Tick { timer: usize },
}

#[derive(Default)]
struct NodeCounters {
    dispatched: AtomicU64,
    completed: AtomicU64,
    faults: AtomicU64,
    ticks_fired: AtomicU64,
    ticks_skipped: AtomicU64,
    discarded: AtomicU64,
}

struct TimerSlot {
    node: NodeId,
    period: Duration,
    // Set while a Tick item for this timer is queued but not yet started.
    pending: AtomicBool,
}

struct Shared<N> {
    nodes: Vec<N>,
    counters: Vec<NodeCounters>,
    timers: Vec<TimerSlot>,
    admitting: Arc<AtomicBool>,
}

impl<N: Node> Shared<N> {
    fn run(&self, item: WorkItem) {
        match item {
            WorkItem::Deliver { node, port, msg } => {
                self.invoke(node, move |n| n.on_message(port, msg));
            }
            WorkItem::Tick { timer } => {
                if let Some(slot) = self.timers.get(timer) {
                    slot.pending.store(false, Ordering::Release);
                    self.invoke(slot.node, |n| n.on_tick());
                }
            }
        }
    }

    fn invoke(&self, id: NodeId, callback: impl FnOnce(&N)) {
        let (Some(node), Some(counters)) = (self.nodes.get(id.0), self.counters.get(id.0)) else {
            error!("[executor] work item for unknown node {}", id.0);
            return;
        };
        counters.dispatched.fetch_add(1, Ordering::Relaxed);

        match panic::catch_unwind(AssertUnwindSafe(|| callback(node))) {
            Ok(()) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(payload) => {
                counters.faults.fetch_add(1, Ordering::Relaxed);
                error!("[{}] callback fault: {}", node.name(), panic_message(payload.as_ref()));
            }
        }
    }

    fn discard(&self, item: WorkItem) {
        let node = match item {
            WorkItem::Deliver { node, .. } => Some(node),
            WorkItem::Tick { timer } => self.timers.get(timer).map(|t| t.node),
        };
        if let Some(counters) = node.and_then(|n| self.counters.get(n.0)) {
            counters.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn report(&self, elapsed: Duration) -> ExecutorReport {
        let nodes = self
            .nodes
            .iter()
            .zip(&self.counters)
            .map(|(node, c)| NodeReport {
                name: node.name().to_string(),
                dispatched: c.dispatched.load(Ordering::Relaxed),
                completed: c.completed.load(Ordering::Relaxed),
                faults: c.faults.load(Ordering::Relaxed),
                ticks_fired: c.ticks_fired.load(Ordering::Relaxed),
                ticks_skipped: c.ticks_skipped.load(Ordering::Relaxed),
                discarded: c.discarded.load(Ordering::Relaxed),
            })
            .collect();
        ExecutorReport { nodes, elapsed }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Per-node counters at the time of the report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeReport {
    pub name: String,
    pub dispatched: u64,
    pub completed: u64,
    pub faults: u64,
    pub ticks_fired: u64,
    pub ticks_skipped: u64,
    pub discarded: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutorReport {
    pub nodes: Vec<NodeReport>,
    pub elapsed: Duration,
}

impl ExecutorReport {
    pub fn node(&self, name: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.name == name)
    }
}

/// Collects channels, nodes, subscriptions and timers before anything runs.
pub struct ExecutorBuilder<N> {
    workers: usize,
    nodes: Vec<N>,
    names: HashSet<String>,
    channels: HashMap<String, Channel>,
    timers: Vec<(NodeId, Duration)>,
    work_tx: Sender<WorkItem>,
    work_rx: Receiver<WorkItem>,
    admitting: Arc<AtomicBool>,
}

impl<N: Node> ExecutorBuilder<N> {
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(GraphError::NoWorkers);
        }
        let (work_tx, work_rx) = unbounded();
        Ok(Self {
            workers,
            nodes: Vec::new(),
            names: HashSet::new(),
            channels: HashMap::new(),
            timers: Vec::new(),
            work_tx,
            work_rx,
            admitting: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn create_channel(&mut self, name: &str) -> Result<Channel> {
        if self.channels.contains_key(name) {
            return Err(GraphError::DuplicateChannel(name.to_string()));
        }
        let dispatch = Dispatch::new(self.work_tx.clone(), self.admitting.clone());
        let channel = Channel::new(name, dispatch);
        self.channels.insert(name.to_string(), channel.clone());
        Ok(channel)
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(name)
    }

    pub fn add_node(&mut self, node: N) -> Result<NodeId> {
        let name = node.name().to_string();
        if name.is_empty() {
            return Err(GraphError::EmptyStageName);
        }
        if !self.names.insert(name.clone()) {
            return Err(GraphError::DuplicateStage(name));
        }
        self.nodes.push(node);
        Ok(NodeId(self.nodes.len() - 1))
    }

    fn node(&self, id: NodeId) -> Result<&N> {
        self.nodes.get(id.0).ok_or(GraphError::UnknownNode(id.0))
    }

    pub fn subscribe(&mut self, channel: &Channel, node: NodeId, port: Port) -> Result<()> {
        self.node(node)?;
        channel.add_subscriber(node, port);
        Ok(())
    }

    pub fn create_timer(&mut self, node: NodeId, period: Duration) -> Result<()> {
        let name = self.node(node)?.name().to_string();
        if period.is_zero() {
            return Err(GraphError::InvalidPeriod { stage: name, period });
        }
        if self.timers.iter().any(|(id, _)| *id == node) {
            return Err(GraphError::DuplicateTimer(name));
        }
        self.timers.push((node, period));
        Ok(())
    }

    pub fn build(self) -> Executor<N> {
        let counters = self.nodes.iter().map(|_| NodeCounters::default()).collect();
        let timers = self
            .timers
            .into_iter()
            .map(|(node, period)| TimerSlot {
                node,
                period,
                pending: AtomicBool::new(false),
            })
            .collect();

        Executor {
            shared: Arc::new(Shared {
                nodes: self.nodes,
                counters,
                timers,
                admitting: self.admitting,
            }),
            workers: self.workers,
            work_tx: self.work_tx,
            work_rx: self.work_rx,
        }
    }
}

/// A fully wired, not yet running executor.
pub struct Executor<N> {
    shared: Arc<Shared<N>>,
    workers: usize,
    work_tx: Sender<WorkItem>,
    work_rx: Receiver<WorkItem>,
}

impl<N: Node> Executor<N> {
    pub fn nodes(&self) -> &[N] {
        &self.shared.nodes
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Spawns the timer thread and the worker pool.
    pub fn start(self) -> Result<ExecutorHandle<N>> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        self.shared.admitting.store(true, Ordering::Release);

        let mut handle = ExecutorHandle {
            shared: self.shared.clone(),
            work_rx: self.work_rx.clone(),
            shutdown_tx: Some(shutdown_tx),
            workers: Vec::with_capacity(self.workers),
            timer: None,
            started: Instant::now(),
        };

        for id in 0..self.workers {
            let shared = self.shared.clone();
            let work_rx = self.work_rx.clone();
            let shutdown_rx = shutdown_rx.clone();
            let name = format!("executor_worker_{}", id);
            let worker = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(id, shared, work_rx, shutdown_rx))
                .map_err(|source| GraphError::Spawn { name, source })?;
            handle.workers.push(worker);
        }

        let shared = self.shared.clone();
        let work_tx = self.work_tx.clone();
        let name = "executor_timers".to_string();
        let timer = thread::Builder::new()
            .name(name.clone())
            .spawn(move || timer_loop(shared, work_tx, shutdown_rx))
            .map_err(|source| GraphError::Spawn { name, source })?;
        handle.timer = Some(timer);

        info!(
            "[executor] started: {} workers, {} nodes, {} timers",
            self.workers,
            self.shared.nodes.len(),
            self.shared.timers.len()
        );
        Ok(handle)
    }
}

fn worker_loop<N: Node>(
    id: usize,
    shared: Arc<Shared<N>>,
    work_rx: Receiver<WorkItem>,
    shutdown_rx: Receiver<()>,
) {
    loop {
        select! {
            recv(work_rx) -> item => match item {
                Ok(item) if shared.admitting.load(Ordering::Acquire) => shared.run(item),
                Ok(item) => shared.discard(item),
                Err(_) => break,
            },
            recv(shutdown_rx) -> _ => break,
        }
    }
    debug!("[executor] worker {} stopped", id);
}

fn timer_loop<N: Node>(shared: Arc<Shared<N>>, work_tx: Sender<WorkItem>, shutdown_rx: Receiver<()>) {
    let ticks: Vec<Receiver<Instant>> = shared.timers.iter().map(|t| tick(t.period)).collect();

    let mut sel = Select::new();
    let stop = sel.recv(&shutdown_rx);
    for rx in &ticks {
        sel.recv(rx);
    }

    loop {
        let op = sel.select();
        let index = op.index();
        if index == stop {
            let _ = op.recv(&shutdown_rx);
            break;
        }

        let timer = index - 1;
        if op.recv(&ticks[timer]).is_err() || !shared.admitting.load(Ordering::Acquire) {
            break;
        }

        let Some((slot, counters, node)) = shared.timers.get(timer).and_then(|slot| {
            let id = slot.node.0;
            Some((slot, shared.counters.get(id)?, shared.nodes.get(id)?))
        }) else {
            error!("[executor] tick for unknown timer {}", timer);
            continue;
        };
        if slot.pending.swap(true, Ordering::AcqRel) {
            counters.ticks_skipped.fetch_add(1, Ordering::Relaxed);
            debug!("[{}] tick skipped, previous tick still queued", node.name());
            continue;
        }

        counters.ticks_fired.fetch_add(1, Ordering::Relaxed);
        if work_tx.send(WorkItem::Tick { timer }).is_err() {
            break;
        }
    }
    debug!("[executor] timer thread stopped");
}

/// A running executor. Dropping it shuts it down.
pub struct ExecutorHandle<N: Node> {
    shared: Arc<Shared<N>>,
    work_rx: Receiver<WorkItem>,
    shutdown_tx: Option<Sender<()>>,
    workers: Vec<JoinHandle<()>>,
    timer: Option<JoinHandle<()>>,
    started: Instant,
}

impl<N: Node> ExecutorHandle<N> {
    pub fn nodes(&self) -> &[N] {
        &self.shared.nodes
    }

    /// Live counters; values keep moving while the executor runs.
    pub fn report(&self) -> ExecutorReport {
        self.shared.report(self.started.elapsed())
    }

    /// Stops admitting work and waits for every in-flight callback to finish.
    pub fn shutdown(mut self) -> ExecutorReport {
        self.stop();
        self.shared.report(self.started.elapsed())
    }

    fn stop(&mut self) {
        if self.shutdown_tx.is_none() {
            return;
        }
        info!("[executor] shutdown requested");
        self.shared.admitting.store(false, Ordering::Release);
        // Disconnecting wakes the timer thread and every idle worker.
        drop(self.shutdown_tx.take());

        if let Some(timer) = self.timer.take() {
            if timer.join().is_err() {
                error!("[executor] timer thread join failed");
            }
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("[executor] worker join failed");
            }
        }

        let mut discarded = 0usize;
        while let Ok(item) = self.work_rx.try_recv() {
            self.shared.discard(item);
            discarded += 1;
        }
        info!("[executor] stopped, {} queued items discarded", discarded);
    }
}

impl<N: Node> Drop for ExecutorHandle<N> {
    fn drop(&mut self) {
        self.stop();
    }
}
