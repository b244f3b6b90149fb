//! Signature counts and cohort persistence.

use super::SimStore;
use crate::{
    error::SimResult,
    records::{CohortMember, CohortRecord},
    types::{DeviceId, LocationId, Timestamp},
};
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;

impl SimStore {
    /// Last-6 signature counts for one partition (`device_id mod partitions`).
    pub fn signature_counts(&self, partition: u32, partitions: u32) -> SimResult<HashMap<String, i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT history_last6, COUNT(*) FROM device
             WHERE (device_id % ?1) = ?2 AND history_last6 <> ''
             GROUP BY history_last6",
        )?;
        let rows = stmt
            .query_map(params![partitions as i64, partition as i64], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(rows)
    }

    /// Devices currently holding `signature`, lowest id first.
    pub fn devices_with_signature(&self, signature: &str) -> SimResult<Vec<(DeviceId, LocationId)>> {
        let mut stmt = self.conn.prepare(
            "SELECT device_id, current_location_id FROM device
             WHERE history_last6 = ?1
             ORDER BY device_id",
        )?;
        let rows = stmt
            .query_map(params![signature], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn insert_cohort(&self, signature: &str, location_id: LocationId, now: Timestamp) -> SimResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO cohort (signature, location_id, created_at) VALUES (?1, ?2, ?3)",
            params![signature, location_id, now],
        )?;
        Ok(())
    }

    /// Returns true when the device was not already a member.
    pub fn insert_cohort_member(&self, m: &CohortMember) -> SimResult<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO cohort_member (signature, device_id, joined_at, location_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![m.signature, m.device_id, m.joined_at, m.location_id],
        )?;
        Ok(changed > 0)
    }

    pub fn get_cohort(&self, signature: &str) -> SimResult<Option<CohortRecord>> {
        let head: Option<(LocationId, Timestamp)> = self
            .conn
            .query_row(
                "SELECT location_id, created_at FROM cohort WHERE signature = ?1",
                params![signature],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        let Some((location_id, created_at)) = head else {
            return Ok(None);
        };
        let mut stmt = self.conn.prepare(
            "SELECT signature, device_id, joined_at, location_id FROM cohort_member
             WHERE signature = ?1 ORDER BY device_id",
        )?;
        let members = stmt
            .query_map(params![signature], |r| {
                Ok(CohortMember {
                    signature: r.get(0)?,
                    device_id: r.get(1)?,
                    joined_at: r.get(2)?,
                    location_id: r.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(CohortRecord {
            signature: signature.to_string(),
            location_id,
            created_at,
            members,
        }))
    }

    pub fn cohort_count(&self) -> SimResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM cohort", [], |r| r.get(0))?)
    }

    pub fn clear_cohorts(&self) -> SimResult<()> {
        self.conn.execute("DELETE FROM cohort_member", [])?;
        self.conn.execute("DELETE FROM cohort", [])?;
        Ok(())
    }
}
