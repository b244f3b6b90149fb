//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Everything else calls store methods and never executes SQL directly.

use crate::{error::SimResult, event::EventLogEntry, types::Timestamp};
use rusqlite::{params, Connection, Transaction};

mod activity;
mod cohort;
mod device;
mod tunables;

pub struct SimStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl SimStore {
    pub fn open(path: &str) -> SimResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        if let Err(e) = conn.execute_batch("PRAGMA journal_mode=WAL;") {
            log::warn!("store: could not enable WAL for {path}: {e}");
        }
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> SimResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> SimResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        Ok(())
    }

    /// Start a transaction on the shared connection. Every store call made
    /// before `commit()` joins it; dropping it rolls everything back.
    pub fn begin(&self) -> SimResult<Transaction<'_>> {
        Ok(self.conn.unchecked_transaction()?)
    }

    // ── Run ────────────────────────────────────────────────────

    pub fn insert_run(&self, run_id: &str, seed: u64, version: &str, started_at: Timestamp) -> SimResult<()> {
        self.conn.execute(
            "INSERT INTO run (run_id, seed, version, started_at) VALUES (?1, ?2, ?3, ?4)",
            params![run_id, seed as i64, version, started_at],
        )?;
        Ok(())
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> SimResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (run_id, at_ms, source, event_type, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.run_id,
                entry.at_ms,
                entry.source,
                entry.event_type,
                entry.payload,
            ],
        )?;
        Ok(())
    }

    pub fn events_for_run(&self, run_id: &str) -> SimResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, at_ms, source, event_type, payload
             FROM event_log WHERE run_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![run_id], |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    run_id: row.get(1)?,
                    at_ms: row.get(2)?,
                    source: row.get(3)?,
                    event_type: row.get(4)?,
                    payload: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // ── Stats ──────────────────────────────────────────────────

    pub fn report_stat(&self, run_id: &str, name: &str, value: i64, at: Timestamp) -> SimResult<()> {
        self.conn.execute(
            "INSERT INTO sim_stat (run_id, name, value, at_ms) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (run_id, name) DO UPDATE SET value = excluded.value, at_ms = excluded.at_ms",
            params![run_id, name, value, at],
        )?;
        Ok(())
    }

    pub fn stats_for_run(&self, run_id: &str) -> SimResult<Vec<(String, i64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, value FROM sim_stat WHERE run_id = ?1 ORDER BY name")?;
        let rows = stmt
            .query_map(params![run_id], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Remove every stat of a run; called at the start of each interval.
    pub fn clear_stats(&self, run_id: &str) -> SimResult<()> {
        self.conn
            .execute("DELETE FROM sim_stat WHERE run_id = ?1", params![run_id])?;
        Ok(())
    }
}
