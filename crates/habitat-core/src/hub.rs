//! The shared sensor hub: one registry, one lock, one transport.
//!
//! Every adapter, the broadcast loop, and the consumer transport share a
//! single [`SensorHub`] behind an `Arc`. Registry mutations are serialized
//! by a [`Mutex`], and every notification a mutation causes is handed to
//! the transport before the lock is released. Consumers therefore see
//! `sensor-info` maps in the order the mutations happened, and a new
//! subscriber's snapshot is queued before its first bundle.
//!
//! [`ConsumerTransport::emit`] must not block or call back into the hub.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use habitat_registry::Registry;
use habitat_types::{
    Bundle, ConsumerId, HabInfo, ProducerMap, Reading, SensorDescriptor, ServerEvent,
};

use crate::broadcast::SkipReason;
use crate::transport::ConsumerTransport;

/// Outcome of fanning one event out to a set of consumers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Consumers the transport accepted the event for.
    pub delivered: usize,
    /// Consumers the transport rejected.
    pub failed: usize,
}

/// Registry plus consumer notification, safe to share across tasks.
pub struct SensorHub {
    registry: Mutex<Registry>,
    transport: Arc<dyn ConsumerTransport>,
}

impl std::fmt::Debug for SensorHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorHub")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl SensorHub {
    /// Wrap a registry and the transport used to reach its consumers.
    pub fn new(registry: Registry, transport: Arc<dyn ConsumerTransport>) -> Self {
        Self {
            registry: Mutex::new(registry),
            transport,
        }
    }

    /// A poisoned lock still guards a consistent registry: every mutation
    /// completes before any code that could panic runs.
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a read-only closure against the registry.
    pub fn with_registry<R>(&self, f: impl FnOnce(&Registry) -> R) -> R {
        f(&self.lock())
    }

    // -----------------------------------------------------------------------
    // Producers
    // -----------------------------------------------------------------------

    /// Upsert a producer and push the new producer map to subscribers.
    ///
    /// Returns `true` if the producer was not known before.
    pub fn register_producer(&self, descriptor: SensorDescriptor) -> bool {
        let mut registry = self.lock();
        let is_new = registry.register_producer(descriptor);
        self.notify_producers(&registry);
        is_new
    }

    /// Upsert a producer on behalf of a connected consumer.
    ///
    /// The consumer becomes the producer's owner, replacing any earlier
    /// owner. See [`SensorHub::deregister_owned_producer`].
    pub fn register_owned_producer(&self, descriptor: SensorDescriptor, owner: ConsumerId) -> bool {
        let mut registry = self.lock();
        let is_new = registry.register_producer_for(descriptor, Some(owner));
        self.notify_producers(&registry);
        is_new
    }

    /// Register a producer only if its ID is unknown.
    ///
    /// The check and the insert happen under one lock, so concurrent
    /// callers racing on the same ID register it exactly once. Returns
    /// `true` if this call registered it.
    pub fn ensure_producer(&self, descriptor: SensorDescriptor) -> bool {
        let mut registry = self.lock();
        if registry.has_producer(&descriptor.sensor_id) {
            return false;
        }
        registry.register_producer(descriptor);
        self.notify_producers(&registry);
        true
    }

    /// Remove a producer and push the shrunken producer map to subscribers.
    pub fn deregister_producer(&self, sensor_id: &str) -> bool {
        let mut registry = self.lock();
        let removed = registry.deregister_producer(sensor_id);
        if removed {
            self.notify_producers(&registry);
        }
        removed
    }

    /// Remove a producer only while `owner` still owns it.
    ///
    /// A producer re-registered by another connection, or by an adapter,
    /// is left alone and `false` is returned.
    pub fn deregister_owned_producer(&self, sensor_id: &str, owner: ConsumerId) -> bool {
        let mut registry = self.lock();
        let removed = registry.deregister_owned_producer(sensor_id, owner);
        if removed {
            self.notify_producers(&registry);
        }
        removed
    }

    /// The consumer that registered a producer, if any.
    pub fn producer_owner(&self, sensor_id: &str) -> Option<ConsumerId> {
        self.lock().producer_owner(sensor_id)
    }

    /// Push the current producer map to every subscriber. Caller holds the lock.
    fn notify_producers(&self, registry: &Registry) {
        let subscribers = registry.subscribers();
        if subscribers.is_empty() {
            return;
        }
        self.deliver(
            &ServerEvent::SensorInfo(registry.producers().clone()),
            &subscribers,
        );
    }

    /// Append a reading to a producer's history. Unknown IDs are ignored.
    pub fn record_reading(&self, sensor_id: &str, reading: Reading) -> bool {
        self.lock().record_reading(sensor_id, reading)
    }

    /// Append several readings for one producer in order.
    ///
    /// Returns the number recorded, which is zero for unknown producers.
    pub fn record_readings(&self, sensor_id: &str, readings: Vec<Reading>) -> usize {
        let mut registry = self.lock();
        if !registry.has_producer(sensor_id) {
            warn!(sensor_id, count = readings.len(), "Batch for unknown producer dropped");
            return 0;
        }
        let mut recorded: usize = 0;
        for reading in readings {
            if registry.record_reading(sensor_id, reading) {
                recorded = recorded.saturating_add(1);
            }
        }
        recorded
    }

    /// Copy of the producer map.
    pub fn producers(&self) -> ProducerMap {
        self.lock().producers().clone()
    }

    /// Descriptor of one producer.
    pub fn producer(&self, sensor_id: &str) -> Option<SensorDescriptor> {
        self.lock().producer(sensor_id).cloned()
    }

    /// Whether a producer is registered.
    pub fn has_producer(&self, sensor_id: &str) -> bool {
        self.lock().has_producer(sensor_id)
    }

    /// A producer's history, oldest-first.
    pub fn history(&self, sensor_id: &str) -> Option<Vec<Reading>> {
        self.lock().history(sensor_id)
    }

    /// Static habitat metadata.
    pub fn hab_info(&self) -> HabInfo {
        self.lock().hab_info().clone()
    }

    // -----------------------------------------------------------------------
    // Consumers
    // -----------------------------------------------------------------------

    /// Track a connected consumer that has not subscribed.
    pub fn connect_consumer(&self, consumer: ConsumerId) -> bool {
        self.lock().connect_consumer(consumer)
    }

    /// Subscribe a consumer and send it `hab-info` then `sensor-info`.
    pub fn register_consumer(&self, consumer: ConsumerId) -> DeliveryReport {
        let mut registry = self.lock();
        let snapshot = registry.register_consumer(consumer);
        let mut report = DeliveryReport::default();
        for event in snapshot.into_events() {
            report.record(consumer, self.transport.emit(consumer, &event));
        }
        report
    }

    /// Mark a connected consumer as a sensor manager.
    pub fn register_sensor_manager(&self, consumer: ConsumerId) -> bool {
        self.lock().register_sensor_manager(consumer)
    }

    /// Ask sensor managers to re-announce their sensors.
    ///
    /// With a target only that manager is asked; an unknown target reaches
    /// nobody.
    pub fn refresh_sensors(&self, target: Option<ConsumerId>) -> DeliveryReport {
        let registry = self.lock();
        let managers: Vec<ConsumerId> = registry
            .sensor_managers()
            .into_iter()
            .filter(|manager| target.is_none_or(|t| t == *manager))
            .collect();
        if managers.is_empty() {
            debug!(requested = ?target, "No sensor manager to refresh");
        }
        self.deliver(&ServerEvent::RefreshSensors, &managers)
    }

    /// Forget a consumer. Idempotent.
    pub fn deregister_consumer(&self, consumer: ConsumerId) -> bool {
        self.lock().deregister_consumer(consumer)
    }

    /// Connected and subscribed consumer counts.
    pub fn consumer_counts(&self) -> (usize, usize) {
        let registry = self.lock();
        (registry.consumer_count(), registry.subscriber_count())
    }

    // -----------------------------------------------------------------------
    // Broadcast support
    // -----------------------------------------------------------------------

    /// Build the bundle for one broadcast tick, or say why the tick is skipped.
    ///
    /// The bundle and the subscriber list are one consistent snapshot.
    pub fn prepare_tick(&self, sequence: u64) -> Result<(Bundle, Vec<ConsumerId>), SkipReason> {
        let registry = self.lock();
        if registry.producer_count() == 0 {
            return Err(SkipReason::NoProducers);
        }
        if registry.subscriber_count() == 0 {
            return Err(SkipReason::NoSubscribers);
        }
        let bundle = registry.latest_bundle(sequence);
        if bundle.is_empty() {
            return Err(SkipReason::NoReadings);
        }
        Ok((bundle, registry.subscribers()))
    }

    /// Emit one event to each listed consumer.
    ///
    /// A failing consumer is logged and skipped; the rest still receive it.
    pub fn deliver(&self, event: &ServerEvent, consumers: &[ConsumerId]) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for &consumer in consumers {
            report.record(consumer, self.transport.emit(consumer, event));
        }
        if !consumers.is_empty() {
            debug!(
                event = event.name(),
                delivered = report.delivered,
                failed = report.failed,
                "Event fanned out"
            );
        }
        report
    }
}

impl DeliveryReport {
    fn record(
        &mut self,
        consumer: ConsumerId,
        result: Result<(), crate::transport::TransportError>,
    ) {
        match result {
            Ok(()) => self.delivered = self.delivered.saturating_add(1),
            Err(e) => {
                warn!(consumer = %consumer, error = %e, "Delivery to consumer failed");
                self.failed = self.failed.saturating_add(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    fn hub() -> (Arc<MemoryTransport>, SensorHub) {
        let transport = Arc::new(MemoryTransport::new());
        let hub = SensorHub::new(Registry::default(), transport.clone());
        (transport, hub)
    }

    #[test]
    fn snapshot_is_sent_to_new_consumer_only() {
        let (transport, hub) = hub();
        let first = ConsumerId::new();
        hub.register_consumer(first);
        transport.clear();

        let second = ConsumerId::new();
        let report = hub.register_consumer(second);
        assert_eq!(report.delivered, 2);
        assert!(transport.events_for(first).is_empty());

        let names: Vec<&str> = transport
            .events_for(second)
            .iter()
            .map(ServerEvent::name)
            .collect();
        assert_eq!(names, vec!["hab-info", "sensor-info"]);
    }

    #[test]
    fn producer_registration_notifies_subscribers() {
        let (transport, hub) = hub();
        let subscribed = ConsumerId::new();
        let connected = ConsumerId::new();
        hub.register_consumer(subscribed);
        hub.connect_consumer(connected);
        transport.clear();

        hub.register_producer(SensorDescriptor::synthesized("host1", "bme688"));

        let events = transport.events_for(subscribed);
        assert_eq!(events.len(), 1);
        assert!(
            matches!(events.first(), Some(ServerEvent::SensorInfo(map)) if map.contains_key("host1.bme688"))
        );
        assert!(transport.events_for(connected).is_empty());
    }

    #[test]
    fn producer_registration_without_subscribers_emits_nothing() {
        let (transport, hub) = hub();
        hub.register_producer(SensorDescriptor::synthesized("host1", "bme688"));
        assert_eq!(transport.emit_count(), 0);
    }

    #[test]
    fn ensure_producer_registers_once() {
        let (transport, hub) = hub();
        hub.register_consumer(ConsumerId::new());
        transport.clear();

        assert!(hub.ensure_producer(SensorDescriptor::synthesized("h", "scd30")));
        assert!(!hub.ensure_producer(SensorDescriptor::synthesized("h", "scd30")));
        assert_eq!(transport.emit_count(), 1);
    }

    #[test]
    fn producer_maps_reach_subscribers_in_mutation_order() {
        let (transport, hub) = hub();
        let hub = Arc::new(hub);
        let consumer = ConsumerId::new();
        hub.register_consumer(consumer);

        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let hub = Arc::clone(&hub);
                std::thread::spawn(move || {
                    let host = format!("host{worker}");
                    for _ in 0..50 {
                        hub.register_producer(SensorDescriptor::synthesized(&host, "mock"));
                        hub.deregister_producer(&format!("{host}.mock"));
                        hub.register_producer(SensorDescriptor::synthesized(&host, "mock"));
                    }
                })
            })
            .collect();
        for worker in workers {
            assert!(worker.join().is_ok());
        }

        let last = transport
            .events_for(consumer)
            .into_iter()
            .rev()
            .find_map(|event| match event {
                ServerEvent::SensorInfo(map) => Some(map),
                _ => None,
            });
        assert_eq!(last, Some(hub.producers()));
        assert_eq!(hub.producers().len(), 4);
    }

    #[test]
    fn owned_producer_survives_stale_owner() {
        let (transport, hub) = hub();
        let subscriber = ConsumerId::new();
        hub.register_consumer(subscriber);
        let stale = ConsumerId::new();
        let fresh = ConsumerId::new();

        hub.register_owned_producer(SensorDescriptor::synthesized("h", "mock"), stale);
        hub.register_owned_producer(SensorDescriptor::synthesized("h", "mock"), fresh);
        transport.clear();

        assert!(!hub.deregister_owned_producer("h.mock", stale));
        assert!(hub.has_producer("h.mock"));
        assert!(transport.events_for(subscriber).is_empty());

        assert!(hub.deregister_owned_producer("h.mock", fresh));
        assert!(!hub.has_producer("h.mock"));
        assert_eq!(transport.events_for(subscriber).len(), 1);
    }

    #[test]
    fn refresh_reaches_all_or_one_manager() {
        let (transport, hub) = hub();
        let first = ConsumerId::new();
        let second = ConsumerId::new();
        let dashboard = ConsumerId::new();
        hub.register_sensor_manager(first);
        hub.register_sensor_manager(second);
        hub.register_consumer(dashboard);
        transport.clear();

        assert_eq!(hub.refresh_sensors(None).delivered, 2);
        assert!(transport.events_for(dashboard).is_empty());

        transport.clear();
        assert_eq!(hub.refresh_sensors(Some(second)).delivered, 1);
        assert!(transport.events_for(first).is_empty());
        assert_eq!(transport.events_for(second), vec![ServerEvent::RefreshSensors]);

        assert_eq!(hub.refresh_sensors(Some(ConsumerId::new())).delivered, 0);

        hub.deregister_consumer(first);
        transport.clear();
        assert_eq!(hub.refresh_sensors(None).delivered, 1);
    }

    #[test]
    fn batch_for_unknown_producer_records_nothing() {
        let (_, hub) = hub();
        let readings = vec![Reading::new(0, "2024-01-01 00:00:00")];
        assert_eq!(hub.record_readings("ghost", readings), 0);
    }

    #[test]
    fn prepare_tick_reports_skip_reasons() {
        let (_, hub) = hub();
        assert_eq!(hub.prepare_tick(0).err(), Some(SkipReason::NoProducers));

        hub.register_producer(SensorDescriptor::synthesized("h", "mock"));
        assert_eq!(hub.prepare_tick(0).err(), Some(SkipReason::NoSubscribers));

        hub.register_consumer(ConsumerId::new());
        assert_eq!(hub.prepare_tick(0).err(), Some(SkipReason::NoReadings));

        hub.record_reading("h.mock", Reading::new(0, "2024-01-01 00:00:00"));
        assert!(hub.prepare_tick(0).is_ok());
    }

    #[test]
    fn deregistered_consumer_is_skipped() {
        let (_, hub) = hub();
        let consumer = ConsumerId::new();
        hub.register_consumer(consumer);
        assert!(hub.deregister_consumer(consumer));
        assert!(!hub.deregister_consumer(consumer));
        assert_eq!(hub.consumer_counts(), (0, 0));
    }
}
