//! Call-target selection for legitimate devices.
//!
//! Each device remembers a short list of numbers it talks to. Picking a
//! target walks that list front to back, taking each entry with a fixed
//! chance; falling off the end means calling someone new.

use crate::{probe::RandomProbe, rng::SubsystemRng, types::DeviceId};
use serde::{Deserialize, Serialize};

/// Fixed-capacity, insertion-ordered list. Entries are appended while
/// there is room and never evicted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopularNumbers {
    capacity: usize,
    entries: Vec<DeviceId>,
}

impl PopularNumbers {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Remember `number` for `owner` if there is room and it is not the
    /// owner itself. Returns true when added.
    pub fn offer(&mut self, owner: DeviceId, number: DeviceId) -> bool {
        if number == owner || self.entries.len() >= self.capacity {
            return false;
        }
        self.entries.push(number);
        true
    }

    /// Walk the list, taking each entry with probability `pick_pct`%.
    pub fn pick(&self, pick_pct: u32, rng: &mut SubsystemRng) -> Option<DeviceId> {
        self.entries.iter().copied().find(|_| rng.percent(pick_pct))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn entries(&self) -> &[DeviceId] {
        &self.entries
    }
}

/// Chooses who a legitimate device calls next.
#[derive(Debug, Clone, Copy)]
pub struct ContactRouter {
    pick_pct: u32,
    fresh_probe: RandomProbe,
}

impl ContactRouter {
    pub fn new(pick_pct: u32, population: usize) -> Self {
        Self {
            pick_pct,
            fresh_probe: RandomProbe::population_proportional(population),
        }
    }

    /// A popular number if the walk lands on one, otherwise a random
    /// device that is neither `caller` nor excluded, remembered in the
    /// caller's list if it has room.
    pub fn next_target(
        &self,
        caller: DeviceId,
        popular: &mut PopularNumbers,
        population: usize,
        excluded: impl Fn(DeviceId) -> bool,
        rng: &mut SubsystemRng,
    ) -> Option<DeviceId> {
        if let Some(known) = popular.pick(self.pick_pct, rng) {
            return Some(known);
        }
        let fresh = self
            .fresh_probe
            .probe_index(population, rng, |i| {
                let id = i as DeviceId;
                id != caller && !excluded(id)
            })
            .map(|i| i as DeviceId)?;
        popular.offer(caller, fresh);
        Some(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_never_exceeds_capacity() {
        let mut list = PopularNumbers::new(3);
        for n in 10..20 {
            list.offer(1, n);
        }
        assert_eq!(list.len(), 3);
        assert_eq!(list.entries(), &[10, 11, 12]);
    }

    #[test]
    fn owner_is_never_remembered() {
        let mut list = PopularNumbers::new(3);
        assert!(!list.offer(5, 5));
        assert!(list.is_empty());
    }

    #[test]
    fn router_never_picks_caller_or_excluded() {
        let router = ContactRouter::new(30, 20);
        let mut rng = SubsystemRng::new(3, 1);
        let mut popular = PopularNumbers::new(10);
        for _ in 0..200 {
            let target = router
                .next_target(4, &mut popular, 20, |id| id % 2 == 1, &mut rng)
                .unwrap();
            assert_ne!(target, 4);
            assert_eq!(target % 2, 0);
        }
        assert!(popular.len() <= popular.capacity());
    }

    #[test]
    fn full_list_is_mostly_reused() {
        let router = ContactRouter::new(30, 1_000);
        let mut rng = SubsystemRng::new(11, 1);
        let mut popular = PopularNumbers::new(10);
        for n in 0..10 {
            popular.offer(999, n);
        }
        let hits = (0..1_000)
            .filter_map(|_| router.next_target(999, &mut popular, 1_000, |_| false, &mut rng))
            .filter(|t| *t < 10)
            .count();
        // 1 - 0.7^10 of walks land on the list.
        assert!(hits > 900, "only {hits} picks came from the list");
        assert_eq!(popular.len(), 10);
    }
}
