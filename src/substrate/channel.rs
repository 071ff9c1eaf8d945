//! channel.rs
//! Named pub/sub routes.
//!
//! A channel keeps the list of (stage, port) pairs subscribed to it. Publishing
//! turns one message into one work item per subscriber and hands them to the
//! executor's work queue: the last subscriber gets the original message, the
//! others get copies. Publishing never blocks and never fails; without a
//! subscriber, or once the executor stops admitting work, the message is dropped.

use crossbeam::channel::Sender;
use log::debug;
use parking_lot::RwLock;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use crate::substrate::{
    executor::{NodeId, WorkItem},
    message::Message,
};

/// Which input of a stage a subscription feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    /// Primary data input.
    Data,
    /// Secondary input whose arrival releases buffered data.
    Trigger,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Subscriber {
    pub node: NodeId,
    pub port: Port,
}

/// Entry point into the executor's work queue, shared by every channel.
#[derive(Clone)]
pub(crate) struct Dispatch {
    tx: Sender<WorkItem>,
    admitting: Arc<AtomicBool>,
}

impl Dispatch {
    pub(crate) fn new(tx: Sender<WorkItem>, admitting: Arc<AtomicBool>) -> Self {
        Self { tx, admitting }
    }

    #[inline]
    fn admitting(&self) -> bool {
        self.admitting.load(Ordering::Acquire)
    }

    #[inline]
    fn send(&self, item: WorkItem) -> bool {
        self.tx.send(item).is_ok()
    }
}

struct Topic {
    name: Arc<str>,
    subscribers: RwLock<Vec<Subscriber>>,
    dispatch: Dispatch,
    published: AtomicU64,
    dropped: AtomicU64,
}

/// Handle returned by `create_channel`. Cheap to clone.
#[derive(Clone)]
pub struct Channel {
    topic: Arc<Topic>,
}

impl Channel {
    pub(crate) fn new(name: &str, dispatch: Dispatch) -> Self {
        Self {
            topic: Arc::new(Topic {
                name: Arc::from(name),
                subscribers: RwLock::new(Vec::new()),
                dispatch,
                published: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.topic.name
    }

    pub fn publisher(&self) -> Publisher {
        Publisher {
            topic: self.topic.clone(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.topic.subscribers.read().len()
    }

    /// Messages accepted for delivery so far.
    pub fn published(&self) -> u64 {
        self.topic.published.load(Ordering::Relaxed)
    }

    /// Messages dropped for lack of a subscriber or after shutdown.
    pub fn dropped(&self) -> u64 {
        self.topic.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn add_subscriber(&self, node: NodeId, port: Port) {
        self.topic.subscribers.write().push(Subscriber { node, port });
    }
}

/// Publication endpoint held by a stage.
#[derive(Clone)]
pub struct Publisher {
    topic: Arc<Topic>,
}

impl Publisher {
    pub fn channel(&self) -> &str {
        &self.topic.name
    }

    /// Fire-and-forget publish. Returns how many deliveries were queued.
    pub fn publish(&self, msg: Message) -> usize {
        let topic = &self.topic;
        if !topic.dispatch.admitting() {
            topic.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("[{}] not admitting work, dropping seq {}", topic.name, msg.seq());
            return 0;
        }

        let subscribers = topic.subscribers.read();
        let Some((last, rest)) = subscribers.split_last() else {
            topic.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("[{}] no subscriber, dropping seq {}", topic.name, msg.seq());
            return 0;
        };

        let mut queued = 0;
        for sub in rest {
            let item = WorkItem::Deliver {
                node: sub.node,
                port: sub.port,
                msg: msg.clone(),
            };
            if topic.dispatch.send(item) {
                queued += 1;
            }
        }
        let item = WorkItem::Deliver {
            node: last.node,
            port: last.port,
            msg,
        };
        if topic.dispatch.send(item) {
            queued += 1;
        }

        if queued > 0 {
            topic.published.fetch_add(1, Ordering::Relaxed);
        } else {
            topic.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queued
    }
}
