//! The periodic broadcast loop.
//!
//! Every period the loop asks the hub for one bundle holding the latest
//! reading of each producer and fans it out, wrapped in a `step-batch`
//! event, to every subscribed consumer. A tick with no producers, no
//! subscribers, or no readings is skipped without consuming a sequence
//! number, so consumers never see an empty bundle and bundle numbers stay
//! gap-free.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use habitat_types::ServerEvent;

use crate::hub::SensorHub;

/// Why a tick emitted nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No producer is registered.
    NoProducers,
    /// No consumer is subscribed.
    NoSubscribers,
    /// Producers exist but none has produced a reading yet.
    NoReadings,
}

/// Result of one broadcast tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing was sent.
    Skipped(SkipReason),
    /// A bundle was sent to every subscriber.
    Emitted {
        /// Sequence number of the emitted bundle.
        n: u64,
        /// Consumers that accepted the bundle.
        delivered: usize,
        /// Consumers whose delivery failed.
        failed: usize,
    },
}

/// Periodic fan-out of the latest bundle.
#[derive(Debug)]
pub struct BroadcastLoop {
    hub: Arc<SensorHub>,
    period: Duration,
    sequence: u64,
}

impl BroadcastLoop {
    /// Create a loop that ticks every `period`, starting at sequence 0.
    pub const fn new(hub: Arc<SensorHub>, period: Duration) -> Self {
        Self {
            hub,
            period,
            sequence: 0,
        }
    }

    /// Sequence number the next emitted bundle will carry.
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Run one tick immediately.
    pub fn tick(&mut self) -> TickOutcome {
        let (bundle, subscribers) = match self.hub.prepare_tick(self.sequence) {
            Ok(prepared) => prepared,
            Err(reason) => {
                debug!(?reason, "Broadcast tick skipped");
                return TickOutcome::Skipped(reason);
            }
        };

        let n = bundle.n;
        let producers = bundle.readings.len();
        let report = self.hub.deliver(&ServerEvent::step(bundle), &subscribers);
        self.sequence = self.sequence.wrapping_add(1);

        debug!(
            n,
            producers,
            subscribers = subscribers.len(),
            delivered = report.delivered,
            failed = report.failed,
            "Bundle broadcast"
        );
        TickOutcome::Emitted {
            n,
            delivered: report.delivered,
            failed: report.failed,
        }
    }

    /// Tick every period until `cancel` fires. Returns the number of bundles emitted.
    pub async fn run(mut self, cancel: CancellationToken) -> u64 {
        info!(period = ?self.period, "Broadcast loop started");
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut emitted: u64 = 0;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if matches!(self.tick(), TickOutcome::Emitted { .. }) {
                        emitted = emitted.saturating_add(1);
                    }
                }
            }
        }

        info!(emitted, "Broadcast loop stopped");
        emitted
    }
}
