//! The fraud ring: a fixed-capacity rack of SIMs that terminates
//! international calls as if they were local ones.
//!
//! The box only decides. It never touches devices or the store; the
//! simulator applies the routing it returns.

use crate::{
    probe::RandomProbe,
    rng::SubsystemRng,
    types::{DeviceId, LocationId, Timestamp, MS_PER_MINUTE},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What the box did with an offered call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxRouting {
    /// An owned SIM places the call to the external target.
    Routed { sim: DeviceId, duration_secs: i64 },
    /// Two owned SIMs call each other to look ordinary.
    Camouflage {
        caller: DeviceId,
        callee: DeviceId,
        duration_secs: i64,
    },
    /// Every probed SIM was busy.
    Blocked,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxCounters {
    pub fraud_calls: u64,
    pub camouflage_calls: u64,
    pub blocked: u64,
    pub fraud_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct SimBox {
    capacity: usize,
    members: Vec<DeviceId>,
    member_set: BTreeSet<DeviceId>,
    pub location: LocationId,
    pub self_calls: bool,
    camouflage_pct: u32,
    camouflage_secs: i64,
    move_every_minutes: i64,
    last_move: Timestamp,
    profit_per_minute: f64,
    pub counters: BoxCounters,
}

impl SimBox {
    pub fn new(
        capacity: usize,
        location: LocationId,
        camouflage_pct: u32,
        camouflage_secs: i64,
        move_every_minutes: i64,
        profit_per_minute: f64,
        now: Timestamp,
    ) -> Self {
        Self {
            capacity,
            members: Vec::with_capacity(capacity),
            member_set: BTreeSet::new(),
            location,
            self_calls: false,
            camouflage_pct,
            camouflage_secs,
            move_every_minutes,
            last_move: now,
            profit_per_minute,
            counters: BoxCounters::default(),
        }
    }

    pub fn has_room(&self) -> bool {
        self.members.len() < self.capacity
    }

    /// Adds `sim` if there is room. Returns true when added.
    pub fn add_sim(&mut self, sim: DeviceId) -> bool {
        if !self.has_room() || self.member_set.contains(&sim) {
            return false;
        }
        self.members.push(sim);
        self.member_set.insert(sim);
        true
    }

    pub fn contains(&self, device_id: DeviceId) -> bool {
        self.member_set.contains(&device_id)
    }

    pub fn members(&self) -> &[DeviceId] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// A free owned SIM, or None once twice the box size in draws missed.
    fn unused_sim(&self, rng: &mut SubsystemRng, is_busy: &impl Fn(DeviceId) -> bool) -> Option<DeviceId> {
        RandomProbe::population_proportional(self.members.len())
            .probe(&self.members, rng, |&sim| !is_busy(sim))
            .copied()
    }

    /// Offer an incoming international call of `duration_secs`.
    pub fn route_call(
        &mut self,
        duration_secs: i64,
        rng: &mut SubsystemRng,
        is_busy: impl Fn(DeviceId) -> bool,
    ) -> BoxRouting {
        if self.self_calls && rng.percent(self.camouflage_pct) {
            return self.camouflage_call(rng, &is_busy);
        }
        match self.unused_sim(rng, &is_busy) {
            Some(sim) => {
                self.counters.fraud_calls += 1;
                self.counters.fraud_seconds += duration_secs;
                BoxRouting::Routed { sim, duration_secs }
            }
            None => {
                self.counters.blocked += 1;
                BoxRouting::Blocked
            }
        }
    }

    fn camouflage_call(&mut self, rng: &mut SubsystemRng, is_busy: &impl Fn(DeviceId) -> bool) -> BoxRouting {
        let callee = self.unused_sim(rng, is_busy);
        let caller = self.unused_sim(rng, is_busy);
        match (caller, callee) {
            (Some(caller), Some(callee)) if caller != callee => {
                self.counters.camouflage_calls += 1;
                BoxRouting::Camouflage {
                    caller,
                    callee,
                    duration_secs: self.camouflage_secs,
                }
            }
            _ => {
                self.counters.blocked += 1;
                BoxRouting::Blocked
            }
        }
    }

    /// The box has sat still for longer than its move interval.
    pub fn due_to_move(&self, now: Timestamp) -> bool {
        self.last_move + self.move_every_minutes * MS_PER_MINUTE < now
    }

    /// Relocate the rack. Returns the SIMs that must each report the move.
    pub fn move_to(&mut self, location: LocationId, now: Timestamp) -> &[DeviceId] {
        self.location = location;
        self.last_move = now;
        &self.members
    }

    /// Fraud revenue so far, in currency units.
    pub fn projected_profit(&self) -> f64 {
        self.counters.fraud_seconds as f64 * self.profit_per_minute / 60.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_box(capacity: usize) -> SimBox {
        SimBox::new(capacity, 0, 15, 10, 2, 0.16, 0)
    }

    #[test]
    fn capacity_is_never_exceeded() {
        let mut b = test_box(3);
        let added = (0..10).filter(|&id| b.add_sim(id)).count();
        assert_eq!(added, 3);
        assert_eq!(b.len(), 3);
        assert!(!b.has_room());
    }

    #[test]
    fn duplicate_sim_is_ignored() {
        let mut b = test_box(3);
        assert!(b.add_sim(4));
        assert!(!b.add_sim(4));
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn all_busy_means_blocked() {
        let mut b = test_box(4);
        for id in 0..4 {
            b.add_sim(id);
        }
        let mut rng = SubsystemRng::new(5, 2);
        assert_eq!(b.route_call(30, &mut rng, |_| true), BoxRouting::Blocked);
        assert_eq!(b.counters.blocked, 1);
        assert_eq!(b.counters.fraud_calls, 0);
    }

    #[test]
    fn free_sim_routes_and_accrues_seconds() {
        let mut b = test_box(4);
        for id in 0..4 {
            b.add_sim(id);
        }
        let mut rng = SubsystemRng::new(5, 2);
        match b.route_call(30, &mut rng, |_| false) {
            BoxRouting::Routed { sim, duration_secs } => {
                assert!(b.contains(sim));
                assert_eq!(duration_secs, 30);
            }
            other => panic!("expected a routed call, got {other:?}"),
        }
        assert_eq!(b.counters.fraud_seconds, 30);
        assert!((b.projected_profit() - 0.08).abs() < 1e-9);
    }

    #[test]
    fn single_free_sim_cannot_call_itself() {
        let mut b = test_box(2);
        b.add_sim(0);
        b.add_sim(1);
        b.self_calls = true;
        b.camouflage_pct = 100;
        let mut rng = SubsystemRng::new(5, 2);
        assert_eq!(b.route_call(30, &mut rng, |id| id != 0), BoxRouting::Blocked);
    }

    #[test]
    fn moves_after_interval() {
        let mut b = test_box(2);
        assert!(!b.due_to_move(2 * MS_PER_MINUTE));
        assert!(b.due_to_move(2 * MS_PER_MINUTE + 1));
        b.move_to(1, 2 * MS_PER_MINUTE + 1);
        assert!(!b.due_to_move(3 * MS_PER_MINUTE));
    }
}
