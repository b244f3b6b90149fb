//! Windowed suspicion scoring.
//!
//! Every reported call re-scores the reporting device: call statistics
//! over the trailing few hours become a fact set, the fact set goes
//! through the cached rule set, and the first matching rule becomes the
//! device's suspicion label. No match clears the label.

use crate::{
    error::{SimError, SimResult},
    ledger::ActivityLedger,
    records::CallWindow,
    rules::{NumericFacts, RuleEvaluator, RuleSetCache, RuleSource, StringFacts},
    types::{DeviceId, Direction, Timestamp, MS_PER_DAY, MS_PER_HOUR, MS_PER_SECOND},
};
use serde::{Deserialize, Serialize};

/// Ratio reported when there are too few counterparties to rank.
pub const TOP_BOTTOM_SENTINEL: i64 = i32::MAX as i64;

pub const PARAM_OUTGOING_CALL_ONLY_COUNT: &str = "OUTGOING_CALL_ONLY_COUNT";
pub const PARAM_INCOMING_CALL_ONLY_COUNT: &str = "INCOMING_CALL_ONLY_COUNT";
pub const PARAM_OUTGOING_INCOMING_RATIO: &str = "OUTGOING_INCOMING_RATIO";
pub const PARAM_NOT_NEW_ANY_MORE_DAYS: &str = "NOT_NEW_ANY_MORE_DAYS";
pub const PARAM_BUSYNESS_PERCENTAGE: &str = "BUSYNESS_PERCENTAGE";
pub const PARAM_HOURS_BACK_TO_CHECK: &str = "HOURS_BACK_TO_CHECK";
pub const PARAM_TOP_N: &str = "TOP_N";
pub const PARAM_TOP_BOTTOM_N_RATIO: &str = "TOP_BOTTOM_N_RATIO";

/// One side of a call, as reported by the device that saw it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub device_id: DeviceId,
    pub start_time: Timestamp,
    pub duration_secs: i64,
    pub direction: Direction,
    pub counterparty_id: DeviceId,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoreOutcome {
    /// Too new to judge; nothing changed.
    SkippedYoung,
    Flagged { rule: String, severity: i64 },
    Cleared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoringParams {
    pub outgoing_call_only_count: i64,
    pub incoming_call_only_count: i64,
    pub outgoing_incoming_ratio: i64,
    pub not_new_any_more_days: i64,
    pub busyness_percentage: i64,
    pub hours_back_to_check: i64,
    pub top_n: i64,
    pub top_bottom_n_ratio: i64,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            outgoing_call_only_count: 2,
            incoming_call_only_count: 2,
            outgoing_incoming_ratio: 10,
            not_new_any_more_days: 10,
            busyness_percentage: 30,
            hours_back_to_check: 3,
            top_n: 5,
            top_bottom_n_ratio: 10,
        }
    }
}

impl ScoringParams {
    pub fn load<L: ActivityLedger + ?Sized>(ledger: &L) -> SimResult<Self> {
        let d = Self::default();
        Ok(Self {
            outgoing_call_only_count: ledger.parameter(PARAM_OUTGOING_CALL_ONLY_COUNT, d.outgoing_call_only_count)?,
            incoming_call_only_count: ledger.parameter(PARAM_INCOMING_CALL_ONLY_COUNT, d.incoming_call_only_count)?,
            outgoing_incoming_ratio: ledger.parameter(PARAM_OUTGOING_INCOMING_RATIO, d.outgoing_incoming_ratio)?,
            not_new_any_more_days: ledger.parameter(PARAM_NOT_NEW_ANY_MORE_DAYS, d.not_new_any_more_days)?,
            busyness_percentage: ledger.parameter(PARAM_BUSYNESS_PERCENTAGE, d.busyness_percentage)?,
            hours_back_to_check: ledger.parameter(PARAM_HOURS_BACK_TO_CHECK, d.hours_back_to_check)?,
            top_n: ledger.parameter(PARAM_TOP_N, d.top_n)?,
            top_bottom_n_ratio: ledger.parameter(PARAM_TOP_BOTTOM_N_RATIO, d.top_bottom_n_ratio)?,
        })
    }
}

/// Percentage of the window spent on calls: summed call seconds over the
/// seconds between the first call's start and the last call's end.
/// Zero unless more than `min_calls` calls were seen and time elapsed.
pub fn busy_pct(window: Option<&CallWindow>, min_calls: i64) -> i64 {
    let Some(w) = window else {
        return 0;
    };
    if w.count <= min_calls {
        return 0;
    }
    let elapsed_secs = (w.last_end - w.first_start) / MS_PER_SECOND;
    if elapsed_secs <= 0 {
        return 0;
    }
    100 * w.total_duration_secs / elapsed_secs
}

/// Calls to the `n` busiest counterparties over calls to the quietest
/// ones. `counts` must be sorted busiest first.
///
/// The bottom window takes ranks strictly greater than `len - n`, so it
/// holds `n - 1` entries.
pub fn top_bottom_ratio(counts: &[i64], n: usize) -> i64 {
    if n == 0 || n.checked_mul(2).map_or(true, |m| counts.len() < m) {
        return TOP_BOTTOM_SENTINEL;
    }
    let total = counts.len();
    let mut top = 0;
    let mut bottom = 0;
    for (rank, calls) in counts.iter().enumerate() {
        if rank < n {
            top += calls;
        } else if rank > total - n {
            bottom += calls;
        }
    }
    if bottom == 0 {
        return TOP_BOTTOM_SENTINEL;
    }
    top / bottom
}

/// Scores activity against a named rule set held in an expiring cache.
pub struct SuspicionScorer {
    cache: RuleSetCache,
}

impl SuspicionScorer {
    pub fn new(rule_set: &str, ttl_ms: i64) -> Self {
        Self {
            cache: RuleSetCache::new(rule_set, ttl_ms),
        }
    }

    pub fn cache(&self) -> &RuleSetCache {
        &self.cache
    }

    /// Decide what the device's suspicion label should be after `event`.
    /// Reads only; the caller applies the outcome.
    pub fn score<L: ActivityLedger + ?Sized>(
        &self,
        ledger: &L,
        rules: &dyn RuleSource,
        event: &ActivityEvent,
        now: Timestamp,
    ) -> SimResult<ScoreOutcome> {
        let rule_set = self.cache.get(rules, now)?;

        let device = ledger
            .device(event.device_id)?
            .ok_or(SimError::UnknownDevice { device_id: event.device_id })?;
        let params = ScoringParams::load(ledger)?;

        if now - device.first_seen < params.not_new_any_more_days * MS_PER_DAY {
            return Ok(ScoreOutcome::SkippedYoung);
        }

        let (numeric, strings) = self.facts(ledger, event, &params, now)?;
        match rule_set.evaluate(&numeric, &strings)? {
            Some(rule) => {
                let severity = numeric
                    .get("actualBusynessPercentage")
                    .copied()
                    .unwrap_or_default() as i64;
                log::debug!("t={now} scorer: device {} tripped {rule}", event.device_id);
                Ok(ScoreOutcome::Flagged { rule, severity })
            }
            None => Ok(ScoreOutcome::Cleared),
        }
    }

    fn facts<L: ActivityLedger + ?Sized>(
        &self,
        ledger: &L,
        event: &ActivityEvent,
        params: &ScoringParams,
        now: Timestamp,
    ) -> SimResult<(NumericFacts, StringFacts)> {
        let id = event.device_id;
        let since = now - params.hours_back_to_check * MS_PER_HOUR;

        let dwell = ledger.dwell_activity(id, since)?;
        let out_window = ledger.call_window(id, Direction::Out, since)?;
        let in_window = ledger.call_window(id, Direction::In, since)?;
        let bad_in_window = ledger.suspicious_incoming_window(id, since)?;
        let per_counterparty: Vec<i64> = ledger
            .outgoing_counterparty_counts(id, since)?
            .into_iter()
            .map(|c| c.calls)
            .collect();

        let busy_out = busy_pct(out_window.as_ref(), params.outgoing_call_only_count);
        let busy_in = busy_pct(in_window.as_ref(), params.incoming_call_only_count);
        let busy_in_bad = busy_pct(bad_in_window.as_ref(), 0);
        let ratio = top_bottom_ratio(&per_counterparty, params.top_n.max(0) as usize);
        let suspicious = if ledger.in_noted_cohort(id)? { 1.0 } else { 0.0 };

        let mut numeric = NumericFacts::new();
        let mut put = |name: &str, value: f64| {
            numeric.insert(name.to_string(), value);
        };
        put("thisDeviceIsSuspicious", suspicious);
        put("actualBusyInCallPct", busy_in as f64);
        put("actualBusyInCallSuspiciousPct", busy_in_bad as f64);
        put("incomingCallCount", dwell.incoming_call_count as f64);
        put("outgoingCallCount", dwell.outgoing_call_count as f64);
        put("busynessPercentage", params.busyness_percentage as f64);
        put("actualBusynessPercentage", (busy_in + busy_out) as f64);
        put(
            "outgoingIncomingRatioTrip",
            (params.outgoing_incoming_ratio * dwell.incoming_call_count) as f64,
        );
        put("outCallTopBottomNRatio", ratio as f64);
        put("topBottomNRatio", params.top_bottom_n_ratio as f64);

        let mut strings = StringFacts::new();
        strings.insert("direction".into(), event.direction.as_str().into());
        strings.insert("status".into(), event.status.clone());

        Ok((numeric, strings))
    }
}
