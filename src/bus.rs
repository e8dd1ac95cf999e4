//! Fan-out channel for the retry core's lifecycle announcements.
//!
//! A single [`Bus`] serves both halves of the core: retriers publish their
//! scheduling decisions and the registry publishes tracking transitions, so
//! one subscription observes the whole life of a command. Publishing never
//! waits on consumers; a subscriber that falls behind loses the oldest
//! events rather than stalling a retry or a shutdown drain.

use tokio::sync::broadcast;

use crate::event::Event;

/// Fan-out channel for [`Event`]s, shared by retriers and the registry.
#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a bus retaining up to `capacity` undelivered events per
    /// subscription. `capacity` must be non-zero.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Fire-and-forget announcement of a lifecycle transition.
    ///
    /// With no open subscriptions the event is discarded; the retry and
    /// shutdown paths never block on observers.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    /// Opens a subscription that observes events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Number of open subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
