//! Row types returned by the store.

use crate::types::{DeviceId, Direction, LocationId, Timestamp};
use serde::{Deserialize, Serialize};

/// Upper bound of an open dwell interval.
pub const OPEN_INTERVAL_END: Timestamp = i64::MAX;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: DeviceId,
    pub current_location_id: LocationId,
    pub first_seen: Timestamp,
    pub last_seen: Timestamp,
    pub history: String,
    pub history_last3: String,
    pub history_last6: String,
    pub suspicious_because: Option<String>,
    pub suspicious_value: Option<i64>,
}

impl DeviceRecord {
    pub fn is_flagged(&self) -> bool {
        self.suspicious_because.is_some()
    }
}

/// An interval during which a device's location was fixed, with the
/// call activity seen while it was open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DwellRecord {
    pub device_id: DeviceId,
    pub location_id: LocationId,
    pub from_ts: Timestamp,
    pub to_ts: Timestamp,
    pub incoming_call_count: i64,
    pub outgoing_call_count: i64,
    pub incoming_call_duration: i64,
    pub outgoing_call_duration: i64,
}

impl DwellRecord {
    pub fn is_open(&self) -> bool {
        self.to_ts == OPEN_INTERVAL_END
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub device_id: DeviceId,
    pub counterparty_id: DeviceId,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub duration_secs: i64,
    pub direction: Direction,
    pub location_id: LocationId,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterpartyCount {
    pub counterparty_id: DeviceId,
    pub calls: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortMember {
    pub signature: String,
    pub device_id: DeviceId,
    pub joined_at: Timestamp,
    pub location_id: LocationId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortRecord {
    pub signature: String,
    pub location_id: LocationId,
    pub created_at: Timestamp,
    pub members: Vec<CohortMember>,
}

/// A device plus its full recorded history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceView {
    pub device: DeviceRecord,
    pub dwells: Vec<DwellRecord>,
    pub contacts: Vec<ContactRecord>,
    pub top_counterparties: Vec<CounterpartyCount>,
}

/// Call activity summed over dwell records inside a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DwellActivity {
    pub incoming_call_count: i64,
    pub outgoing_call_count: i64,
    pub incoming_call_duration: i64,
    pub outgoing_call_duration: i64,
}

/// Bounds and totals of a set of contact records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallWindow {
    pub first_start: Timestamp,
    pub last_end: Timestamp,
    pub total_duration_secs: i64,
    pub count: i64,
}
