//! Device, location and dwell queries.

use super::SimStore;
use crate::{
    error::SimResult,
    records::{DeviceRecord, DwellRecord, OPEN_INTERVAL_END},
    types::{DeviceId, LocationId, Timestamp},
};
use rusqlite::{params, OptionalExtension, Row};

const DEVICE_COLUMNS: &str = "device_id, current_location_id, first_seen, last_seen,
     history, history_last3, history_last6, suspicious_because, suspicious_value";

fn device_from_row(r: &Row<'_>) -> rusqlite::Result<DeviceRecord> {
    Ok(DeviceRecord {
        device_id: r.get(0)?,
        current_location_id: r.get(1)?,
        first_seen: r.get(2)?,
        last_seen: r.get(3)?,
        history: r.get(4)?,
        history_last3: r.get(5)?,
        history_last6: r.get(6)?,
        suspicious_because: r.get(7)?,
        suspicious_value: r.get(8)?,
    })
}

impl SimStore {
    // ── Location ───────────────────────────────────────────────

    pub fn insert_location(&self, location_id: LocationId) -> SimResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO location (location_id) VALUES (?1)",
            params![location_id],
        )?;
        Ok(())
    }

    pub fn location_exists(&self, location_id: LocationId) -> SimResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT location_id FROM location WHERE location_id = ?1",
                params![location_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn location_count(&self) -> SimResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM location", [], |r| r.get(0))?)
    }

    // ── Device ─────────────────────────────────────────────────

    pub fn get_device(&self, device_id: DeviceId) -> SimResult<Option<DeviceRecord>> {
        let sql = format!("SELECT {DEVICE_COLUMNS} FROM device WHERE device_id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![device_id], device_from_row)
            .optional()?)
    }

    pub fn device_count(&self) -> SimResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM device", [], |r| r.get(0))?)
    }

    /// Remove a device and everything recorded against it.
    pub fn delete_device_everywhere(&self, device_id: DeviceId) -> SimResult<()> {
        self.conn
            .execute("DELETE FROM device WHERE device_id = ?1", params![device_id])?;
        self.conn
            .execute("DELETE FROM dwell WHERE device_id = ?1", params![device_id])?;
        self.conn.execute(
            "DELETE FROM contact_record WHERE device_id = ?1",
            params![device_id],
        )?;
        self.conn.execute(
            "DELETE FROM cohort_member WHERE device_id = ?1",
            params![device_id],
        )?;
        Ok(())
    }

    pub fn insert_device(&self, d: &DeviceRecord) -> SimResult<()> {
        self.conn.execute(
            "INSERT INTO device (
                device_id, current_location_id, first_seen, last_seen,
                history, history_last3, history_last6, suspicious_because, suspicious_value
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                d.device_id,
                d.current_location_id,
                d.first_seen,
                d.last_seen,
                d.history,
                d.history_last3,
                d.history_last6,
                d.suspicious_because,
                d.suspicious_value,
            ],
        )?;
        Ok(())
    }

    pub fn update_device_location(
        &self,
        device_id: DeviceId,
        location_id: LocationId,
        history: &str,
        last3: &str,
        last6: &str,
        now: Timestamp,
    ) -> SimResult<()> {
        self.conn.execute(
            "UPDATE device
             SET current_location_id = ?1, history = ?2, history_last3 = ?3,
                 history_last6 = ?4, last_seen = ?5
             WHERE device_id = ?6",
            params![location_id, history, last3, last6, now, device_id],
        )?;
        Ok(())
    }

    pub fn touch_device(&self, device_id: DeviceId, now: Timestamp) -> SimResult<()> {
        self.conn.execute(
            "UPDATE device SET last_seen = ?1 WHERE device_id = ?2",
            params![now, device_id],
        )?;
        Ok(())
    }

    pub fn flag_device(&self, device_id: DeviceId, reason: &str, value: i64) -> SimResult<()> {
        self.conn.execute(
            "UPDATE device SET suspicious_because = ?1, suspicious_value = ?2 WHERE device_id = ?3",
            params![reason, value, device_id],
        )?;
        Ok(())
    }

    pub fn clear_device_flag(&self, device_id: DeviceId) -> SimResult<()> {
        self.conn.execute(
            "UPDATE device SET suspicious_because = NULL, suspicious_value = NULL
             WHERE device_id = ?1",
            params![device_id],
        )?;
        Ok(())
    }

    // ── Dwell ──────────────────────────────────────────────────

    pub fn open_dwell(&self, device_id: DeviceId, location_id: LocationId, now: Timestamp) -> SimResult<()> {
        self.conn.execute(
            "INSERT INTO dwell (device_id, location_id, from_ts, to_ts) VALUES (?1, ?2, ?3, ?4)",
            params![device_id, location_id, now, OPEN_INTERVAL_END],
        )?;
        Ok(())
    }

    /// Close the open dwell one millisecond before `now`.
    pub fn close_open_dwell(&self, device_id: DeviceId, now: Timestamp) -> SimResult<usize> {
        Ok(self.conn.execute(
            "UPDATE dwell SET to_ts = ?1 WHERE device_id = ?2 AND to_ts = ?3",
            params![now - 1, device_id, OPEN_INTERVAL_END],
        )?)
    }

    pub fn dwells_for_device(&self, device_id: DeviceId) -> SimResult<Vec<DwellRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT device_id, location_id, from_ts, to_ts,
                    incoming_call_count, outgoing_call_count,
                    incoming_call_duration, outgoing_call_duration
             FROM dwell WHERE device_id = ?1
             ORDER BY from_ts, dwell_id",
        )?;
        let rows = stmt
            .query_map(params![device_id], |r| {
                Ok(DwellRecord {
                    device_id: r.get(0)?,
                    location_id: r.get(1)?,
                    from_ts: r.get(2)?,
                    to_ts: r.get(3)?,
                    incoming_call_count: r.get(4)?,
                    outgoing_call_count: r.get(5)?,
                    incoming_call_duration: r.get(6)?,
                    outgoing_call_duration: r.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn open_dwell_count(&self, device_id: DeviceId) -> SimResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM dwell WHERE device_id = ?1 AND to_ts = ?2",
            params![device_id, OPEN_INTERVAL_END],
            |r| r.get(0),
        )?)
    }

    // ── Suspicion summaries ────────────────────────────────────

    /// Flagged device counts per reason.
    pub fn suspicion_summary(&self) -> SimResult<Vec<(String, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT suspicious_because, COUNT(*) FROM device
             WHERE suspicious_because IS NOT NULL
             GROUP BY suspicious_because
             ORDER BY suspicious_because",
        )?;
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Reason counts over the given devices; unflagged devices count as
    /// `not_suspected`.
    pub fn device_status_summary(&self, device_ids: &[DeviceId]) -> SimResult<Vec<(String, i64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT suspicious_because FROM device WHERE device_id = ?1")?;
        let mut counts = std::collections::BTreeMap::<String, i64>::new();
        for id in device_ids {
            let reason: Option<Option<String>> = stmt
                .query_row(params![id], |r| r.get(0))
                .optional()?;
            if let Some(reason) = reason {
                let key = reason.unwrap_or_else(|| "not_suspected".to_string());
                *counts.entry(key).or_insert(0) += 1;
            }
        }
        Ok(counts.into_iter().collect())
    }
}
