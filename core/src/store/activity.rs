//! Contact records, dwell counters and the windowed reads behind scoring.

use super::SimStore;
use crate::{
    error::SimResult,
    ledger::ActivityLedger,
    records::{CallWindow, ContactRecord, CounterpartyCount, DeviceRecord, DwellActivity, OPEN_INTERVAL_END},
    types::{DeviceId, Direction, Timestamp},
};
use rusqlite::{params, OptionalExtension, Row};

fn window_from_row(r: &Row<'_>) -> rusqlite::Result<Option<CallWindow>> {
    let count: i64 = r.get(3)?;
    if count == 0 {
        return Ok(None);
    }
    Ok(Some(CallWindow {
        first_start: r.get(0)?,
        last_end: r.get(1)?,
        total_duration_secs: r.get(2)?,
        count,
    }))
}

impl SimStore {
    /// Insert or overwrite a contact keyed by (device, counterparty, start).
    /// Returns true when the key was new.
    pub fn upsert_contact(&self, c: &ContactRecord) -> SimResult<bool> {
        let existed: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM contact_record
                 WHERE device_id = ?1 AND counterparty_id = ?2 AND start_time = ?3",
                params![c.device_id, c.counterparty_id, c.start_time],
                |r| r.get(0),
            )
            .optional()?;
        self.conn.execute(
            "INSERT INTO contact_record (
                device_id, counterparty_id, start_time, end_time,
                duration_secs, direction, location_id, status
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (device_id, counterparty_id, start_time) DO UPDATE SET
                end_time = excluded.end_time,
                duration_secs = excluded.duration_secs,
                direction = excluded.direction,
                location_id = excluded.location_id,
                status = excluded.status",
            params![
                c.device_id,
                c.counterparty_id,
                c.start_time,
                c.end_time,
                c.duration_secs,
                c.direction.as_str(),
                c.location_id,
                c.status,
            ],
        )?;
        Ok(existed.is_none())
    }

    /// Add one call to the device's open dwell counters.
    pub fn increment_open_dwell(
        &self,
        device_id: DeviceId,
        direction: Direction,
        duration_secs: i64,
    ) -> SimResult<()> {
        let (in_count, out_count, in_dur, out_dur) = match direction {
            Direction::In => (1, 0, duration_secs, 0),
            Direction::Out => (0, 1, 0, duration_secs),
        };
        self.conn.execute(
            "UPDATE dwell
             SET incoming_call_count = incoming_call_count + ?1,
                 outgoing_call_count = outgoing_call_count + ?2,
                 incoming_call_duration = incoming_call_duration + ?3,
                 outgoing_call_duration = outgoing_call_duration + ?4
             WHERE device_id = ?5 AND to_ts = ?6",
            params![in_count, out_count, in_dur, out_dur, device_id, OPEN_INTERVAL_END],
        )?;
        Ok(())
    }

    pub fn contacts_for_device(&self, device_id: DeviceId) -> SimResult<Vec<ContactRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT device_id, counterparty_id, start_time, end_time,
                    duration_secs, direction, location_id, status
             FROM contact_record WHERE device_id = ?1
             ORDER BY start_time, counterparty_id",
        )?;
        let rows = stmt
            .query_map(params![device_id], |r| {
                let direction: String = r.get(5)?;
                Ok(ContactRecord {
                    device_id: r.get(0)?,
                    counterparty_id: r.get(1)?,
                    start_time: r.get(2)?,
                    end_time: r.get(3)?,
                    duration_secs: r.get(4)?,
                    direction: Direction::parse(&direction).unwrap_or(Direction::Out),
                    location_id: r.get(6)?,
                    status: r.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn contact_count(&self, device_id: DeviceId) -> SimResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM contact_record WHERE device_id = ?1",
            params![device_id],
            |r| r.get(0),
        )?)
    }

    pub fn total_contact_count(&self) -> SimResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM contact_record", [], |r| r.get(0))?)
    }
}

impl ActivityLedger for SimStore {
    fn device(&self, device_id: DeviceId) -> SimResult<Option<DeviceRecord>> {
        self.get_device(device_id)
    }

    fn dwell_activity(&self, device_id: DeviceId, since: Timestamp) -> SimResult<DwellActivity> {
        Ok(self.conn.query_row(
            "SELECT COALESCE(SUM(incoming_call_count), 0),
                    COALESCE(SUM(outgoing_call_count), 0),
                    COALESCE(SUM(incoming_call_duration), 0),
                    COALESCE(SUM(outgoing_call_duration), 0)
             FROM dwell WHERE device_id = ?1 AND from_ts >= ?2",
            params![device_id, since],
            |r| {
                Ok(DwellActivity {
                    incoming_call_count: r.get(0)?,
                    outgoing_call_count: r.get(1)?,
                    incoming_call_duration: r.get(2)?,
                    outgoing_call_duration: r.get(3)?,
                })
            },
        )?)
    }

    fn call_window(
        &self,
        device_id: DeviceId,
        direction: Direction,
        since: Timestamp,
    ) -> SimResult<Option<CallWindow>> {
        Ok(self.conn.query_row(
            "SELECT MIN(start_time), MAX(end_time), COALESCE(SUM(duration_secs), 0), COUNT(*)
             FROM contact_record
             WHERE device_id = ?1 AND direction = ?2 AND start_time >= ?3",
            params![device_id, direction.as_str(), since],
            window_from_row,
        )?)
    }

    fn suspicious_incoming_window(
        &self,
        device_id: DeviceId,
        since: Timestamp,
    ) -> SimResult<Option<CallWindow>> {
        Ok(self.conn.query_row(
            "SELECT MIN(c.start_time), MAX(c.end_time), COALESCE(SUM(c.duration_secs), 0), COUNT(*)
             FROM contact_record c
             WHERE c.device_id = ?1 AND c.direction = 'in' AND c.start_time >= ?2
               AND c.counterparty_id IN (SELECT device_id FROM suspicious_device)",
            params![device_id, since],
            window_from_row,
        )?)
    }

    fn outgoing_counterparty_counts(
        &self,
        device_id: DeviceId,
        since: Timestamp,
    ) -> SimResult<Vec<CounterpartyCount>> {
        let mut stmt = self.conn.prepare(
            "SELECT counterparty_id, COUNT(*) AS how_many
             FROM contact_record
             WHERE device_id = ?1 AND direction = 'out' AND start_time >= ?2
             GROUP BY counterparty_id
             ORDER BY how_many DESC, counterparty_id ASC",
        )?;
        let rows = stmt
            .query_map(params![device_id, since], |r| {
                Ok(CounterpartyCount {
                    counterparty_id: r.get(0)?,
                    calls: r.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn in_noted_cohort(&self, device_id: DeviceId) -> SimResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT device_id FROM cohort_member WHERE device_id = ?1 LIMIT 1",
                params![device_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn parameter(&self, name: &str, default: i64) -> SimResult<i64> {
        self.parameter_or(name, default)
    }
}
