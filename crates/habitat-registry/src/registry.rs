//! The in-memory registry of producers, their history, and consumers.
//!
//! # Lifecycle
//!
//! - A producer entry is created by [`Registry::register_producer`] and
//!   removed only by [`Registry::deregister_producer`]. Quiet producers
//!   stay registered and keep their last reading in every bundle.
//! - A producer registered on behalf of a consumer records that consumer
//!   as its owner. [`Registry::deregister_owned_producer`] only removes
//!   the entry while the same owner still holds it, so a stale connection
//!   cannot tear down a sensor that has since re-registered elsewhere.
//! - A consumer is either merely connected or connected and subscribed.
//!   Only subscribed consumers receive bundles and producer updates. A
//!   connected consumer may also announce itself as a sensor manager.
//!
//! Operations on unknown IDs are no-ops that report `false`; adapters and
//! transports race each other and the registry treats that as normal.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Local;
use tracing::{debug, info, warn};

use habitat_types::{
    Bundle, ConsumerId, HabInfo, ProducerMap, Reading, SensorDescriptor, ServerEvent,
    bundle_timestamp,
};

use crate::ring::HistoryRing;

/// Readings kept per producer unless configured otherwise.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// One-shot state sent to a consumer when it subscribes.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Static habitat metadata.
    pub hab_info: HabInfo,
    /// Full producer map at the moment of subscription.
    pub sensor_info: ProducerMap,
}

impl Snapshot {
    /// The snapshot as events, in delivery order: `hab-info` then `sensor-info`.
    pub fn into_events(self) -> [ServerEvent; 2] {
        [
            ServerEvent::HabInfo(self.hab_info),
            ServerEvent::SensorInfo(self.sensor_info),
        ]
    }
}

/// Producer descriptors, per-producer history rings, and consumer sets.
#[derive(Debug)]
pub struct Registry {
    capacity: usize,
    hab_info: HabInfo,
    producers: ProducerMap,
    history: BTreeMap<String, HistoryRing>,
    owners: BTreeMap<String, ConsumerId>,
    consumers: BTreeSet<ConsumerId>,
    subscribed: BTreeSet<ConsumerId>,
    managers: BTreeSet<ConsumerId>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(HabInfo::default(), DEFAULT_HISTORY_CAPACITY)
    }
}

impl Registry {
    /// Create an empty registry.
    ///
    /// `history_capacity` is clamped to at least one reading.
    pub fn new(hab_info: HabInfo, history_capacity: usize) -> Self {
        Self {
            capacity: history_capacity.max(1),
            hab_info,
            producers: ProducerMap::new(),
            history: BTreeMap::new(),
            owners: BTreeMap::new(),
            consumers: BTreeSet::new(),
            subscribed: BTreeSet::new(),
            managers: BTreeSet::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Producers
    // -----------------------------------------------------------------------

    /// Insert or replace a producer descriptor.
    ///
    /// Returns `true` when the ID was not previously known. Replacing a
    /// descriptor keeps the producer's history.
    pub fn register_producer(&mut self, descriptor: SensorDescriptor) -> bool {
        self.register_producer_for(descriptor, None)
    }

    /// Insert or replace a producer descriptor and set its owner.
    ///
    /// `None` clears any previous owner. The most recent registration
    /// always wins ownership.
    pub fn register_producer_for(
        &mut self,
        descriptor: SensorDescriptor,
        owner: Option<ConsumerId>,
    ) -> bool {
        let sensor_id = descriptor.sensor_id.clone();
        match owner {
            Some(owner) => {
                self.owners.insert(sensor_id.clone(), owner);
            }
            None => {
                self.owners.remove(&sensor_id);
            }
        }
        let is_new = self.producers.insert(sensor_id.clone(), descriptor).is_none();
        if is_new {
            self.history
                .insert(sensor_id.clone(), HistoryRing::new(self.capacity));
            info!(sensor_id = %sensor_id, producers = self.producers.len(), "Producer registered");
        } else {
            debug!(sensor_id = %sensor_id, "Producer descriptor replaced");
        }
        is_new
    }

    /// Remove a producer and its history. Returns `false` if unknown.
    pub fn deregister_producer(&mut self, sensor_id: &str) -> bool {
        let removed = self.producers.remove(sensor_id).is_some();
        self.history.remove(sensor_id);
        self.owners.remove(sensor_id);
        if removed {
            info!(sensor_id, producers = self.producers.len(), "Producer deregistered");
        }
        removed
    }

    /// Remove a producer only if `owner` registered it last.
    ///
    /// Returns `false` when the producer is unknown or owned by someone
    /// else, in which case nothing changes.
    pub fn deregister_owned_producer(&mut self, sensor_id: &str, owner: ConsumerId) -> bool {
        if self.owners.get(sensor_id) != Some(&owner) {
            debug!(sensor_id, consumer = %owner, "Producer not owned by consumer; kept");
            return false;
        }
        self.deregister_producer(sensor_id)
    }

    /// The consumer that registered a producer, if any.
    pub fn producer_owner(&self, sensor_id: &str) -> Option<ConsumerId> {
        self.owners.get(sensor_id).copied()
    }

    /// Append a reading to a producer's history.
    ///
    /// Unknown producers are logged and ignored. A sequence number that
    /// does not advance past the previous reading is accepted; producers
    /// reset `n` when they restart.
    pub fn record_reading(&mut self, sensor_id: &str, reading: Reading) -> bool {
        let Some(ring) = self.history.get_mut(sensor_id) else {
            warn!(sensor_id, n = reading.n, "Reading for unknown producer dropped");
            return false;
        };
        if let Some(prev) = ring.latest().filter(|prev| reading.n <= prev.n) {
            debug!(sensor_id, prev = prev.n, n = reading.n, "Producer sequence rewound");
        }
        ring.push(reading);
        true
    }

    /// Descriptor for one producer.
    pub fn producer(&self, sensor_id: &str) -> Option<&SensorDescriptor> {
        self.producers.get(sensor_id)
    }

    /// Whether a producer is registered.
    pub fn has_producer(&self, sensor_id: &str) -> bool {
        self.producers.contains_key(sensor_id)
    }

    /// All registered producers keyed by ID.
    pub const fn producers(&self) -> &ProducerMap {
        &self.producers
    }

    /// A producer's history, oldest-first. `None` if unknown.
    pub fn history(&self, sensor_id: &str) -> Option<Vec<Reading>> {
        self.history.get(sensor_id).map(HistoryRing::to_vec)
    }

    /// Number of registered producers.
    pub fn producer_count(&self) -> usize {
        self.producers.len()
    }

    // -----------------------------------------------------------------------
    // Consumers
    // -----------------------------------------------------------------------

    /// Record a connection that has not subscribed yet.
    pub fn connect_consumer(&mut self, consumer: ConsumerId) -> bool {
        let is_new = self.consumers.insert(consumer);
        if is_new {
            debug!(consumer = %consumer, "Consumer connected");
        }
        is_new
    }

    /// Connect and subscribe a consumer, returning its initial snapshot.
    pub fn register_consumer(&mut self, consumer: ConsumerId) -> Snapshot {
        self.consumers.insert(consumer);
        if self.subscribed.insert(consumer) {
            info!(consumer = %consumer, subscribers = self.subscribed.len(), "Consumer subscribed");
        }
        Snapshot {
            hab_info: self.hab_info.clone(),
            sensor_info: self.producers.clone(),
        }
    }

    /// Connect a consumer and mark it as a sensor manager.
    ///
    /// Returns `true` if it was not a manager before.
    pub fn register_sensor_manager(&mut self, consumer: ConsumerId) -> bool {
        self.consumers.insert(consumer);
        let is_new = self.managers.insert(consumer);
        if is_new {
            info!(consumer = %consumer, managers = self.managers.len(), "Sensor manager registered");
        }
        is_new
    }

    /// Point-in-time copy of the registered sensor managers.
    pub fn sensor_managers(&self) -> Vec<ConsumerId> {
        self.managers.iter().copied().collect()
    }

    /// Remove a consumer from every set. Returns `false` if unknown.
    pub fn deregister_consumer(&mut self, consumer: ConsumerId) -> bool {
        let was_subscribed = self.subscribed.remove(&consumer);
        let was_manager = self.managers.remove(&consumer);
        let was_connected = self.consumers.remove(&consumer);
        if was_connected || was_subscribed || was_manager {
            info!(consumer = %consumer, subscribers = self.subscribed.len(), "Consumer disconnected");
        }
        was_connected || was_subscribed || was_manager
    }

    /// Whether a consumer receives bundles.
    pub fn is_subscribed(&self, consumer: ConsumerId) -> bool {
        self.subscribed.contains(&consumer)
    }

    /// Point-in-time copy of the subscribed consumers.
    pub fn subscribers(&self) -> Vec<ConsumerId> {
        self.subscribed.iter().copied().collect()
    }

    /// Number of connected consumers, subscribed or not.
    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    /// Number of subscribed consumers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribed.len()
    }

    // -----------------------------------------------------------------------
    // Bundles
    // -----------------------------------------------------------------------

    /// Static habitat metadata.
    pub const fn hab_info(&self) -> &HabInfo {
        &self.hab_info
    }

    /// Build a bundle from the latest reading of every producer, stamped now.
    pub fn latest_bundle(&self, sequence: u64) -> Bundle {
        self.latest_bundle_at(sequence, bundle_timestamp(Local::now()))
    }

    /// Build a bundle with an explicit timestamp.
    ///
    /// Producers with an empty history are omitted.
    pub fn latest_bundle_at(&self, sequence: u64, timestamp: String) -> Bundle {
        let readings = self
            .history
            .iter()
            .filter_map(|(id, ring)| ring.latest().map(|r| (id.clone(), r.clone())))
            .collect();
        Bundle {
            n: sequence,
            timestamp,
            readings,
        }
    }
}
