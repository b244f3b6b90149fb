//! Run events: the append-only record of what each barrier observed.
//!
//! Per-call and per-move activity lives in the store tables; the event
//! log only carries run-level facts so two runs can be diffed cheaply.

use crate::types::{DeviceId, LocationId, RunId, Timestamp};
use serde::{Deserialize, Serialize};

/// Variants are appended over time, never removed or reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimEvent {
    RunInitialized {
        run_id: RunId,
        seed: u64,
    },
    PopulationCreated {
        at: Timestamp,
        devices: usize,
        box_devices: usize,
        locations: i64,
    },
    BoxMoved {
        at: Timestamp,
        from: LocationId,
        to: LocationId,
        devices: usize,
    },
    CohortNoted {
        at: Timestamp,
        signature: String,
        location_id: LocationId,
        members: usize,
    },
    BarrierCompleted {
        at: Timestamp,
        stats: IntervalStats,
        largest_cohort: i64,
    },
    SuspicionSummary {
        at: Timestamp,
        reasons: Vec<(String, i64)>,
        box_status: Vec<(String, i64)>,
    },
    RunFinished {
        at: Timestamp,
        box_fraud_calls: u64,
        box_blocked: u64,
        known_bad_device: Option<DeviceId>,
    },
}

impl SimEvent {
    /// Stable name for the event_type column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::RunInitialized { .. } => "run_initialized",
            Self::PopulationCreated { .. } => "population_created",
            Self::BoxMoved { .. } => "box_moved",
            Self::CohortNoted { .. } => "cohort_noted",
            Self::BarrierCompleted { .. } => "barrier_completed",
            Self::SuspicionSummary { .. } => "suspicion_summary",
            Self::RunFinished { .. } => "run_finished",
        }
    }
}

/// Counters accumulated between two barriers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalStats {
    pub busy_misses: u64,
    pub fraud_calls: u64,
    pub camouflage_calls: u64,
    pub good_calls: u64,
    pub good_moves: u64,
    pub box_moves: u64,
    pub ops_applied: u64,
    pub ops_failed: u64,
}

impl IntervalStats {
    pub fn absorb(&mut self, other: &IntervalStats) {
        self.busy_misses += other.busy_misses;
        self.fraud_calls += other.fraud_calls;
        self.camouflage_calls += other.camouflage_calls;
        self.good_calls += other.good_calls;
        self.good_moves += other.good_moves;
        self.box_moves += other.box_moves;
        self.ops_applied += other.ops_applied;
        self.ops_failed += other.ops_failed;
    }
}

/// Persisted form of a SimEvent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub run_id: RunId,
    pub at_ms: Timestamp,
    pub source: String,
    pub event_type: String,
    pub payload: String, // JSON-serialized SimEvent
}
