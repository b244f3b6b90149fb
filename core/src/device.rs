//! Simulator-side view of a phone: where it is, whether it is on a call,
//! and who it usually talks to. Owned and mutated only by the driving loop.

use crate::{
    contacts::PopularNumbers,
    types::{DeviceId, LocationId, Timestamp, MS_PER_MINUTE, MS_PER_SECOND},
};

#[derive(Debug, Clone)]
pub struct Device {
    pub id: DeviceId,
    pub location: LocationId,
    pub first_seen: Timestamp,
    busy_until: Timestamp,
    last_move: Timestamp,
    pub popular: PopularNumbers,
}

impl Device {
    pub fn new(id: DeviceId, location: LocationId, first_seen: Timestamp, now: Timestamp, popular_capacity: usize) -> Self {
        Self {
            id,
            location,
            first_seen,
            busy_until: Timestamp::MIN,
            last_move: now,
            popular: PopularNumbers::new(popular_capacity),
        }
    }

    /// On a call until `busy_until`, inclusive.
    pub fn is_busy(&self, now: Timestamp) -> bool {
        self.busy_until >= now
    }

    pub fn busy_until(&self) -> Timestamp {
        self.busy_until
    }

    /// Overwrites any earlier busy time; calls do not queue.
    pub fn busy_for(&mut self, now: Timestamp, duration_secs: i64) {
        self.busy_until = now + duration_secs * MS_PER_SECOND;
    }

    pub fn record_being_called(&mut self, caller: DeviceId, now: Timestamp, duration_secs: i64) {
        self.busy_for(now, duration_secs);
        self.popular.offer(self.id, caller);
    }

    pub fn move_to(&mut self, location: LocationId, now: Timestamp) {
        self.location = location;
        self.last_move = now;
    }

    pub fn last_move(&self) -> Timestamp {
        self.last_move
    }

    /// Strictly more than `minutes` in the current location.
    pub fn dwelt_at_least(&self, now: Timestamp, minutes: i64) -> bool {
        self.last_move + minutes * MS_PER_MINUTE < now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_device_is_idle() {
        let d = Device::new(1, 0, 0, 1_000, 10);
        assert!(!d.is_busy(1_000));
    }

    #[test]
    fn busy_until_end_of_call() {
        let mut d = Device::new(1, 0, 0, 0, 10);
        d.busy_for(1_000, 30);
        assert!(d.is_busy(31_000));
        assert!(!d.is_busy(31_001));
        // A shorter call overwrites rather than extends.
        d.busy_for(2_000, 1);
        assert!(!d.is_busy(4_000));
    }

    #[test]
    fn callee_remembers_caller() {
        let mut d = Device::new(1, 0, 0, 0, 2);
        d.record_being_called(7, 0, 5);
        d.record_being_called(1, 0, 5);
        d.record_being_called(8, 0, 5);
        d.record_being_called(9, 0, 5);
        assert_eq!(d.popular.entries(), &[7, 8]);
        assert!(d.is_busy(5_000));
    }

    #[test]
    fn dwell_is_strict() {
        let mut d = Device::new(1, 0, 0, 0, 2);
        d.move_to(3, 10_000);
        assert!(!d.dwelt_at_least(10_000 + 2 * MS_PER_MINUTE, 2));
        assert!(d.dwelt_at_least(10_001 + 2 * MS_PER_MINUTE, 2));
    }
}
