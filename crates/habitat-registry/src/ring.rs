//! Fixed-capacity reading history.

use std::collections::VecDeque;

use habitat_types::Reading;

/// Bounded buffer of recent readings for one producer.
///
/// Newest reading is always at the tail. Pushing onto a full ring evicts
/// the oldest reading first. Capacity is clamped to at least one.
#[derive(Debug, Clone)]
pub struct HistoryRing {
    capacity: usize,
    readings: VecDeque<Reading>,
}

impl HistoryRing {
    /// Create an empty ring holding at most `capacity` readings.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            readings: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a reading, returning the evicted one if the ring was full.
    pub fn push(&mut self, reading: Reading) -> Option<Reading> {
        let evicted = if self.readings.len() >= self.capacity {
            self.readings.pop_front()
        } else {
            None
        };
        self.readings.push_back(reading);
        evicted
    }

    /// Most recently pushed reading.
    pub fn latest(&self) -> Option<&Reading> {
        self.readings.back()
    }

    /// Iterate oldest-first.
    pub fn iter(&self) -> impl Iterator<Item = &Reading> {
        self.readings.iter()
    }

    /// Copy of the contents, oldest-first.
    pub fn to_vec(&self) -> Vec<Reading> {
        self.readings.iter().cloned().collect()
    }

    /// Maximum number of readings kept.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of readings currently held.
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    /// Whether the ring holds no readings.
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}
