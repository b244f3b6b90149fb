//! Simulation clock and operation throttle.
//!
//! Simulated time only moves forward, one slice at a time. The driver
//! spends an operation budget per slice; once the budget is exceeded it
//! "sleeps" by advancing to the start of the next slice.

use crate::types::{RunId, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimClock {
    pub run_id: RunId,
    pub now: Timestamp,
    pub slice_ms: i64,
}

impl SimClock {
    pub fn new(run_id: RunId, start: Timestamp, slice_ms: i64) -> Self {
        Self {
            run_id,
            now: start,
            slice_ms: slice_ms.max(1),
        }
    }

    /// Jump to the first millisecond of the next slice.
    pub fn advance_slice(&mut self) -> Timestamp {
        self.now = (self.now / self.slice_ms + 1) * self.slice_ms;
        self.now
    }

    pub fn elapsed_since(&self, then: Timestamp) -> i64 {
        self.now - then
    }
}

/// Per-slice operation budget.
#[derive(Debug, Clone)]
pub struct OpThrottle {
    per_slice: u32,
    spent: u32,
    pub slices_slept: u64,
}

impl OpThrottle {
    pub fn new(per_slice: u32) -> Self {
        Self {
            per_slice: per_slice.max(1),
            spent: 0,
            slices_slept: 0,
        }
    }

    pub fn spend(&mut self, cost: u32) {
        self.spent = self.spent.saturating_add(cost);
    }

    /// If the budget is blown, advance the clock to the next slice and
    /// reset. Returns true when the clock moved.
    pub fn settle(&mut self, clock: &mut SimClock) -> bool {
        if self.spent <= self.per_slice {
            return false;
        }
        clock.advance_slice();
        self.spent = 0;
        self.slices_slept += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_sleeps_only_when_budget_exceeded() {
        let mut clock = SimClock::new("t".into(), 1_000, 10);
        let mut throttle = OpThrottle::new(4);
        throttle.spend(2);
        throttle.spend(2);
        assert!(!throttle.settle(&mut clock));
        assert_eq!(clock.now, 1_000);
        throttle.spend(1);
        assert!(throttle.settle(&mut clock));
        assert_eq!(clock.now, 1_010);
    }

    #[test]
    fn advance_slice_aligns_to_boundary() {
        let mut clock = SimClock::new("t".into(), 1_003, 10);
        assert_eq!(clock.advance_slice(), 1_010);
        assert_eq!(clock.advance_slice(), 1_020);
    }
}
