//! Store-boundary operations.
//!
//! RULE: each public operation is one SQLite transaction. An error
//! anywhere inside drops the transaction and nothing it wrote survives.

use crate::{
    error::{SimError, SimResult},
    history::{last_n, HistoryCodec},
    ledger::ActivityLedger,
    records::{CohortMember, ContactRecord, DeviceRecord, DeviceView},
    rules::RuleDefinition,
    scorer::{ActivityEvent, ScoreOutcome, SuspicionScorer},
    store::SimStore,
    types::{DeviceId, LocationId, Timestamp, MS_PER_DAY, MS_PER_SECOND},
};
use std::collections::HashMap;

/// How far back `get_device` looks when ranking counterparties.
const TOP_COUNTERPARTY_WINDOW_MS: i64 = MS_PER_DAY;

pub struct SimboxService {
    store: SimStore,
    scorer: SuspicionScorer,
    codec: HistoryCodec,
}

impl SimboxService {
    pub fn new(store: SimStore, rule_set: &str, rule_ttl_ms: i64, codec: HistoryCodec) -> Self {
        Self {
            store,
            scorer: SuspicionScorer::new(rule_set, rule_ttl_ms),
            codec,
        }
    }

    pub fn store(&self) -> &SimStore {
        &self.store
    }

    pub fn scorer(&self) -> &SuspicionScorer {
        &self.scorer
    }

    fn require_location(&self, location_id: LocationId) -> SimResult<()> {
        if self.store.location_exists(location_id)? {
            Ok(())
        } else {
            Err(SimError::UnknownLocation { location_id })
        }
    }

    fn require_device(&self, device_id: DeviceId) -> SimResult<DeviceRecord> {
        self.store
            .get_device(device_id)?
            .ok_or(SimError::UnknownDevice { device_id })
    }

    // ── Setup ──────────────────────────────────────────────────

    pub fn register_location(&self, location_id: LocationId) -> SimResult<()> {
        let tx = self.store.begin()?;
        self.store.insert_location(location_id)?;
        tx.commit()?;
        Ok(())
    }

    pub fn set_parameter(&self, name: &str, value: i64) -> SimResult<()> {
        let tx = self.store.begin()?;
        self.store.set_parameter(name, value)?;
        tx.commit()?;
        Ok(())
    }

    pub fn parameter(&self, name: &str, default: i64) -> SimResult<i64> {
        self.store.parameter_or(name, default)
    }

    pub fn seed_rule_set(&self, name: &str, rules: &[RuleDefinition]) -> SimResult<()> {
        let tx = self.store.begin()?;
        self.store.seed_rule_set(name, rules)?;
        tx.commit()?;
        self.scorer.cache().invalidate();
        Ok(())
    }

    pub fn clear_cohorts(&self) -> SimResult<()> {
        let tx = self.store.begin()?;
        self.store.clear_cohorts()?;
        tx.commit()?;
        Ok(())
    }

    // ── Device lifecycle ───────────────────────────────────────

    /// Replace any earlier registration of `device_id` with a fresh one
    /// at `location_id`.
    pub fn register_device(
        &self,
        device_id: DeviceId,
        location_id: LocationId,
        created_at: Timestamp,
        now: Timestamp,
    ) -> SimResult<()> {
        let tx = self.store.begin()?;
        self.require_location(location_id)?;
        self.store.delete_device_everywhere(device_id)?;

        let history = self.codec.append(None, location_id, now);
        self.store.insert_device(&DeviceRecord {
            device_id,
            current_location_id: location_id,
            first_seen: created_at,
            last_seen: now,
            history_last3: last_n(&history, 3),
            history_last6: last_n(&history, 6),
            history,
            suspicious_because: None,
            suspicious_value: None,
        })?;
        self.store.open_dwell(device_id, location_id, now)?;
        tx.commit()?;
        Ok(())
    }

    pub fn report_location_change(&self, device_id: DeviceId, location_id: LocationId, now: Timestamp) -> SimResult<()> {
        let tx = self.store.begin()?;
        let device = self.require_device(device_id)?;
        self.require_location(location_id)?;

        let history = self.codec.append(Some(&device.history), location_id, now);
        self.store.update_device_location(
            device_id,
            location_id,
            &history,
            &last_n(&history, 3),
            &last_n(&history, 6),
            now,
        )?;
        self.store.close_open_dwell(device_id, now)?;
        self.store.open_dwell(device_id, location_id, now)?;
        tx.commit()?;
        Ok(())
    }

    /// Record one side of a call and re-score the reporting device.
    pub fn report_activity(&self, event: &ActivityEvent, now: Timestamp) -> SimResult<ScoreOutcome> {
        let tx = self.store.begin()?;
        let device = self.require_device(event.device_id)?;

        let is_new = self.store.upsert_contact(&ContactRecord {
            device_id: event.device_id,
            counterparty_id: event.counterparty_id,
            start_time: event.start_time,
            end_time: event.start_time + event.duration_secs * MS_PER_SECOND,
            duration_secs: event.duration_secs,
            direction: event.direction,
            location_id: device.current_location_id,
            status: event.status.clone(),
        })?;
        if is_new {
            self.store
                .increment_open_dwell(event.device_id, event.direction, event.duration_secs)?;
        }
        self.store.touch_device(event.device_id, now)?;

        let outcome = self.scorer.score(&self.store, &self.store, event, now)?;
        match &outcome {
            ScoreOutcome::Flagged { rule, severity } => {
                self.store.flag_device(event.device_id, rule, *severity)?;
            }
            ScoreOutcome::Cleared => self.store.clear_device_flag(event.device_id)?,
            ScoreOutcome::SkippedYoung => {}
        }
        tx.commit()?;
        Ok(outcome)
    }

    pub fn get_device(&self, device_id: DeviceId, now: Timestamp) -> SimResult<DeviceView> {
        let device = self.require_device(device_id)?;
        Ok(DeviceView {
            dwells: self.store.dwells_for_device(device_id)?,
            contacts: self.store.contacts_for_device(device_id)?,
            top_counterparties: self
                .store
                .outgoing_counterparty_counts(device_id, now - TOP_COUNTERPARTY_WINDOW_MS)?,
            device,
        })
    }

    // ── Cohorts ────────────────────────────────────────────────

    /// Signature counts for one partition of the population.
    pub fn partition_signature_counts(&self, partition: u32, partitions: u32) -> SimResult<HashMap<String, i64>> {
        self.store.signature_counts(partition, partitions.max(1))
    }

    /// Persist a cohort for each signature with every device currently
    /// holding it. Returns the number of new memberships.
    pub fn note_suspicious_cohort(&self, signatures: &[String], now: Timestamp) -> SimResult<usize> {
        let tx = self.store.begin()?;
        let mut added = 0;
        for signature in signatures {
            let holders = self.store.devices_with_signature(signature)?;
            let Some(&(_, representative)) = holders.first() else {
                continue;
            };
            self.store.insert_cohort(signature, representative, now)?;
            for (device_id, location_id) in holders {
                let member = CohortMember {
                    signature: signature.clone(),
                    device_id,
                    joined_at: now,
                    location_id,
                };
                if self.store.insert_cohort_member(&member)? {
                    added += 1;
                }
            }
        }
        tx.commit()?;
        Ok(added)
    }

    // ── Reporting ──────────────────────────────────────────────

    pub fn report_stat(&self, run_id: &str, name: &str, value: i64, now: Timestamp) -> SimResult<()> {
        self.store.report_stat(run_id, name, value, now)
    }

    pub fn clear_stats(&self, run_id: &str) -> SimResult<()> {
        self.store.clear_stats(run_id)
    }

    pub fn suspicion_summary(&self) -> SimResult<Vec<(String, i64)>> {
        self.store.suspicion_summary()
    }

    pub fn device_status_summary(&self, device_ids: &[DeviceId]) -> SimResult<Vec<(String, i64)>> {
        self.store.device_status_summary(device_ids)
    }
}
