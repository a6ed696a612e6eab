//! The consumer-facing delivery seam.
//!
//! The hub and broadcast loop push [`ServerEvent`]s through a
//! [`ConsumerTransport`] without knowing how consumers are connected. The
//! WebSocket server provides the production implementation;
//! [`MemoryTransport`] records events in memory for tests and headless runs.

use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};

use habitat_types::{ConsumerId, ServerEvent};

/// Why an event could not be handed to one consumer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The consumer's connection is gone.
    #[error("consumer {0} is disconnected")]
    Disconnected(ConsumerId),

    /// The consumer is not draining its outbound queue.
    #[error("consumer {0} outbound queue is full")]
    Backpressure(ConsumerId),
}

/// Pushes named events to individual consumers.
///
/// `emit` must not block: implementations enqueue and return. A failure
/// concerns only the one consumer named in the error.
pub trait ConsumerTransport: Send + Sync {
    /// Deliver one event to one consumer.
    fn emit(&self, consumer: ConsumerId, event: &ServerEvent) -> Result<(), TransportError>;
}

/// In-memory transport that records every delivered event.
///
/// Consumers marked with [`fail_for`](Self::fail_for) reject every event
/// with [`TransportError::Disconnected`].
#[derive(Debug, Default)]
pub struct MemoryTransport {
    delivered: Mutex<Vec<(ConsumerId, ServerEvent)>>,
    failing: Mutex<BTreeSet<ConsumerId>>,
}

impl MemoryTransport {
    /// Create an empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future emit to `consumer` fail.
    pub fn fail_for(&self, consumer: ConsumerId) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(consumer);
    }

    /// All delivered events in delivery order.
    pub fn delivered(&self) -> Vec<(ConsumerId, ServerEvent)> {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Events delivered to one consumer, in order.
    pub fn events_for(&self, consumer: ConsumerId) -> Vec<ServerEvent> {
        self.delivered()
            .into_iter()
            .filter(|(id, _)| *id == consumer)
            .map(|(_, event)| event)
            .collect()
    }

    /// Number of successful emits so far.
    pub fn emit_count(&self) -> usize {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Forget every recorded event.
    pub fn clear(&self) {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl ConsumerTransport for MemoryTransport {
    fn emit(&self, consumer: ConsumerId, event: &ServerEvent) -> Result<(), TransportError> {
        if self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&consumer)
        {
            return Err(TransportError::Disconnected(consumer));
        }
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((consumer, event.clone()));
        Ok(())
    }
}
