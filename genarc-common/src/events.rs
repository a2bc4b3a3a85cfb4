//! Event types for the genarc work queue
//!
//! Progress is reported through a broadcast [`EventBus`] so any number of
//! observers (CLI progress logging, tests) can follow the queue without
//! coupling to it.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Work queue progress events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QueueEvent {
    /// Items are about to be enqueued
    Added {
        /// Number of items being added
        adding: usize,
        /// Items waiting before this addition
        remain: usize,
        /// Items waiting once this addition is complete
        new_remain: usize,
    },

    /// A job left the queue and started processing
    Started {
        job_id: Uuid,
        /// Provider-native id of the payload, when it has one
        item_id: Option<String>,
    },

    /// A job finished (successfully or not)
    Finished {
        job_id: Uuid,
        item_id: Option<String>,
        /// Items still waiting
        remain: usize,
    },

    /// The queue drained and no job is running
    Idle,
}

/// Broadcast bus for [`QueueEvent`]s
pub struct EventBus {
    tx: broadcast::Sender<QueueEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use genarc_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: QueueEvent,
    ) -> Result<usize, broadcast::error::SendError<QueueEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: QueueEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
