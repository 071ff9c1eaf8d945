//! relay.rs
//! The three forwarding stages.
//!
//! - `FilterRelay`: delay, then forward every message unchanged.
//! - `TimerRelay`: delay, then buffer; its own timer releases the latest buffered message.
//! - `MessageDrivenRelay`: delay, then buffer; arrivals on a trigger channel release it.
//!
//! Buffering stages keep one slot (`Mailbox`): a message arriving before the
//! previous one was released replaces it and is counted as overwritten.

use crate::{
    stages::{Mailbox, StageContext, StageCore},
    substrate::{Message, Publisher},
};

pub struct FilterRelay {
    pub(crate) core: StageCore,
    publisher: Publisher,
}

impl FilterRelay {
    pub fn new(name: &str, publisher: Publisher, ctx: StageContext) -> Self {
        Self {
            core: StageCore::new(name, ctx),
            publisher,
        }
    }

    pub fn on_input(&self, msg: Message) {
        self.core.receive(&msg);
        self.core.process();
        self.core.forward(&self.publisher, msg);
    }
}

pub struct TimerRelay {
    pub(crate) core: StageCore,
    publisher: Publisher,
    mailbox: Mailbox,
    hold_last: bool,
}

impl TimerRelay {
    pub fn new(name: &str, publisher: Publisher, ctx: StageContext) -> Self {
        Self {
            core: StageCore::new(name, ctx),
            publisher,
            mailbox: Mailbox::new(),
            hold_last: false,
        }
    }

    /// Keep the latest message after a tick and publish it again on the next one.
    pub fn with_hold_last(mut self, hold_last: bool) -> Self {
        self.hold_last = hold_last;
        self
    }

    pub fn on_input(&self, msg: Message) {
        self.core.receive(&msg);
        self.core.process();
        self.core.store(&self.mailbox, msg);
    }

    pub fn on_tick(&self) {
        self.core.process();
        let latest = if self.hold_last {
            self.core.latest(&self.mailbox)
        } else {
            self.core.release(&self.mailbox)
        };
        if let Some(msg) = latest {
            self.core.forward(&self.publisher, msg);
        }
    }
}

pub struct MessageDrivenRelay {
    pub(crate) core: StageCore,
    publisher: Publisher,
    mailbox: Mailbox,
}

impl MessageDrivenRelay {
    pub fn new(name: &str, publisher: Publisher, ctx: StageContext) -> Self {
        Self {
            core: StageCore::new(name, ctx),
            publisher,
            mailbox: Mailbox::new(),
        }
    }

    pub fn on_primary(&self, msg: Message) {
        self.core.receive(&msg);
        self.core.process();
        self.core.store(&self.mailbox, msg);
    }

    /// The trigger's own payload is dropped; only its arrival matters.
    pub fn on_trigger(&self, trigger: Message) {
        self.core.trigger(&trigger);
        self.core.process();
        if let Some(msg) = self.core.release(&self.mailbox) {
            self.core.forward(&self.publisher, msg);
        }
    }
}
