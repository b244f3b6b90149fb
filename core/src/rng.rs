//! Deterministic random number generation.
//!
//! RULE: Nothing in the simulation may call any platform RNG.
//! All randomness flows through SubsystemRng instances derived
//! from the single master seed of the run.
//!
//! Each concern (population setup, call routing, the box, movement,
//! call lengths) gets its own stream, seeded from
//! (master_seed XOR slot). Adding a stream never shifts the others.

use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

/// A named, deterministic RNG for a single concern.
pub struct SubsystemRng {
    pub name: &'static str,
    inner: Pcg64Mcg,
}

impl SubsystemRng {
    /// Create a stream from the master seed and a stable slot index.
    /// The index must never change once assigned.
    pub fn new(master_seed: u64, slot_index: u64) -> Self {
        let derived_seed = master_seed ^ (slot_index.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        Self {
            name: "unnamed",
            inner: Pcg64Mcg::seed_from_u64(derived_seed),
        }
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Roll a u64 in [0, n).
    pub fn next_u64_below(&mut self, n: u64) -> u64 {
        use rand::RngCore;
        assert!(n > 0, "n must be > 0");
        self.inner.next_u64() % n
    }

    /// Roll an i64 in [0, n).
    pub fn next_i64_below(&mut self, n: i64) -> i64 {
        self.next_u64_below(n.max(1) as u64) as i64
    }

    /// Uniform index into a slice of length `len`. An empty slice yields 0.
    pub fn pick_index(&mut self, len: usize) -> usize {
        self.next_u64_below(len.max(1) as u64) as usize
    }

    /// Percentage roll: true with probability pct/100.
    pub fn percent(&mut self, pct: u32) -> bool {
        self.next_u64_below(100) < u64::from(pct)
    }
}

/// All streams for a single run, indexed by stable slot.
pub struct RngBank {
    master_seed: u64,
}

impl RngBank {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    pub fn for_slot(&self, slot: StreamSlot) -> SubsystemRng {
        SubsystemRng::new(self.master_seed, slot as u64).with_name(slot.name())
    }
}

/// Stable stream slot assignments.
/// NEVER reorder or remove entries, only append.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum StreamSlot {
    Population = 0,
    Routing = 1,
    SimBox = 2,
    Movement = 3,
    CallLength = 4,
}

impl StreamSlot {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Population => "population",
            Self::Routing => "routing",
            Self::SimBox => "simbox",
            Self::Movement => "movement",
            Self::CallLength => "call_length",
        }
    }
}
