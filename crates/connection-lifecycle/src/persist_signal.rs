//! Coalesced persistence requests.

use crate::event::{Event, EventSender};
use adbauth_ledger::PersistRequester;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

/// Turns any number of persist requests into one queued
/// [`Event::PersistLedger`] until the coordinator drains it.
#[derive(Debug)]
pub struct PersistSignal {
    pending: AtomicBool,
    events: EventSender,
}

impl PersistSignal {
    pub fn new(events: EventSender) -> Self {
        Self {
            pending: AtomicBool::new(false),
            events,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Called by the coordinator right before it persists.
    pub fn acknowledge(&self) {
        self.pending.store(false, Ordering::SeqCst);
    }
}

impl PersistRequester for PersistSignal {
    fn request_persist(&self) {
        if self.pending.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.events.send(Event::PersistLedger).is_err() {
            warn!("Event queue closed, dropping persist request");
            self.pending.store(false, Ordering::SeqCst);
        }
    }
}
