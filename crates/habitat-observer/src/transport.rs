//! Per-connection outbound queues behind the [`ConsumerTransport`] seam.
//!
//! Every `WebSocket` session attaches a bounded [`mpsc`] queue under its
//! [`ConsumerId`]. [`WsTransport::emit`] only ever `try_send`s, so the hub
//! and the broadcast loop never wait on a socket.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::debug;

use habitat_core::{ConsumerTransport, TransportError};
use habitat_types::{ConsumerId, ServerEvent};

/// Default depth of each consumer's outbound queue.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Routes events to the outbound queue of each attached consumer.
#[derive(Debug)]
pub struct WsTransport {
    queues: RwLock<HashMap<ConsumerId, mpsc::Sender<ServerEvent>>>,
    depth: usize,
}

impl WsTransport {
    /// Create a transport whose queues hold `depth` events (at least one).
    pub fn new(depth: usize) -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            depth: depth.max(1),
        }
    }

    /// Attach a new consumer and return the receiving end of its queue.
    ///
    /// Attaching an ID twice replaces the earlier queue.
    pub fn attach(&self, consumer: ConsumerId) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel(self.depth);
        self.queues
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(consumer, tx);
        rx
    }

    /// Drop a consumer's queue. Returns `false` if it was not attached.
    pub fn detach(&self, consumer: ConsumerId) -> bool {
        self.queues
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&consumer)
            .is_some()
    }

    /// Number of attached consumers.
    pub fn attached(&self) -> usize {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_DEPTH)
    }
}

impl ConsumerTransport for WsTransport {
    fn emit(&self, consumer: ConsumerId, event: &ServerEvent) -> Result<(), TransportError> {
        let queues = self.queues.read().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = queues.get(&consumer) else {
            return Err(TransportError::Disconnected(consumer));
        };
        match tx.try_send(event.clone()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(%consumer, event = event.name(), "Outbound queue full, event dropped");
                Err(TransportError::Backpressure(consumer))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(TransportError::Disconnected(consumer))
            }
        }
    }
}
