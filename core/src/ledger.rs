//! Read side of the activity store, as seen by the suspicion scorer.

use crate::{
    error::SimResult,
    records::{CallWindow, CounterpartyCount, DeviceRecord, DwellActivity},
    types::{DeviceId, Direction, Timestamp},
};

pub trait ActivityLedger {
    fn device(&self, device_id: DeviceId) -> SimResult<Option<DeviceRecord>>;

    /// In/out counts and durations over dwell records opened at or after `since`.
    fn dwell_activity(&self, device_id: DeviceId, since: Timestamp) -> SimResult<DwellActivity>;

    /// First start, last end, summed duration and count of this device's
    /// calls in one direction starting at or after `since`.
    fn call_window(
        &self,
        device_id: DeviceId,
        direction: Direction,
        since: Timestamp,
    ) -> SimResult<Option<CallWindow>>;

    /// Like `call_window(.., In, ..)` but only counting calls from
    /// counterparties that are already suspicious.
    fn suspicious_incoming_window(
        &self,
        device_id: DeviceId,
        since: Timestamp,
    ) -> SimResult<Option<CallWindow>>;

    /// Outgoing call counts per counterparty, busiest first.
    fn outgoing_counterparty_counts(
        &self,
        device_id: DeviceId,
        since: Timestamp,
    ) -> SimResult<Vec<CounterpartyCount>>;

    /// Member of any noted cohort. The device's own label is not counted.
    fn in_noted_cohort(&self, device_id: DeviceId) -> SimResult<bool>;

    /// A named tunable, or `default` when unset.
    fn parameter(&self, name: &str, default: i64) -> SimResult<i64>;
}
