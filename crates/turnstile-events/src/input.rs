//! Producer/consumer channel for injecting input into the scheduler
//!
//! Any thread may hold an [`InputSender`]; the scheduler owns the single
//! [`InputReceiver`] and drains it once per tick.

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};

use crate::keyboard_events::KeyboardEvent;

/// Cloneable handle for injecting keyboard events
#[derive(Debug, Clone)]
pub struct InputSender {
    tx: UnboundedSender<KeyboardEvent>,
}

/// Receiving end, drained by the scheduler
#[derive(Debug)]
pub struct InputReceiver {
    rx: UnboundedReceiver<KeyboardEvent>,
}

/// Create a connected sender/receiver pair
pub fn input_channel() -> (InputSender, InputReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (InputSender { tx }, InputReceiver { rx })
}

impl InputSender {
    /// Queue an event for the next tick. Returns false if the scheduler is gone.
    pub fn send(&self, event: KeyboardEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl InputReceiver {
    /// Take every event queued so far without blocking
    pub fn drain(&mut self) -> Vec<KeyboardEvent> {
        let mut events = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        events
    }
}
