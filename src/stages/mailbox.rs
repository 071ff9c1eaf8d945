//! mailbox.rs
//! Single-slot, last-write-wins buffer shared by a stage's data callback and its
//! trigger/timer callback.
//!
//! Both callbacks can run at the same time on different workers, so `store` and
//! `take` go through one mutex: a store never interleaves with a take, a message
//! is handed out at most once, and a displaced message is returned to the
//! caller instead of vanishing.

use parking_lot::Mutex;

use crate::substrate::Message;

#[derive(Debug)]
pub struct Mailbox<T = Message> {
    slot: Mutex<Option<T>>,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Puts `msg` in the slot and returns whatever unconsumed message it replaced.
    pub fn store(&self, msg: T) -> Option<T> {
        self.slot.lock().replace(msg)
    }

    /// Removes and returns the held message.
    pub fn take(&self) -> Option<T> {
        self.slot.lock().take()
    }

    pub fn is_empty(&self) -> bool {
        self.slot.lock().is_none()
    }
}

impl<T: Clone> Mailbox<T> {
    /// Copy of the held message; the slot keeps it.
    pub fn peek(&self) -> Option<T> {
        self.slot.lock().clone()
    }
}
