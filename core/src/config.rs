//! Simulation configuration.
//!
//! Loaded from `data/simulation.json` plus the rule file under
//! `data/rules/`. Missing fields fall back to the defaults below.

use crate::{
    history::DEFAULT_MAX_LIST_LENGTH,
    rules::{default_rules, RuleDefinition},
    types::Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Parameter names read by the driver at each barrier.
pub const PARAM_ENABLE_COHORT_DETECTION: &str = "ENABLE_SUSPICIOUS_COHORT_DETECTION";
pub const PARAM_SIMBOX_CALLS_ITSELF: &str = "SIMBOX_CALLS_ITSELF";

/// Everything the population simulator needs to know.
/// Field defaults match the reference traffic model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    // ── Population ─────────────────────────────────
    pub population: usize,
    pub location_count: i64,
    pub legit_max_age_days: i64,
    pub setup_moves: usize,
    pub start_time: Timestamp,

    // ── Box ────────────────────────────────────────
    pub box_capacity: usize,
    /// A new device joins the box with probability 1/box_join_one_in.
    pub box_join_one_in: u64,
    pub box_sim_min_age_days: i64,
    pub box_sim_max_age_days: i64,
    pub box_move_minutes: i64,
    pub camouflage_call_pct: u32,
    pub camouflage_call_seconds: i64,
    pub projected_profit_per_minute: f64,

    // ── Calls and movement ─────────────────────────
    pub max_call_seconds: i64,
    pub popular_list_capacity: usize,
    pub popular_pick_pct: u32,
    pub random_search_attempts: usize,
    /// A legitimate device moves instead of calling 1 time in move_one_in.
    pub move_one_in: u64,
    pub min_dwell_minutes: i64,
    pub history_max_length: usize,

    // ── Driving loop ───────────────────────────────
    pub ops_per_slice: u32,
    pub slice_ms: i64,
    pub barrier_interval_secs: i64,
    pub run_duration_secs: i64,
    pub max_outstanding_ops: usize,

    // ── Detection ──────────────────────────────────
    pub cohort_threshold: i64,
    pub cohort_partitions: u32,
    pub rule_set_name: String,
    pub rule_cache_ttl_secs: i64,

    /// Named tunables written to the store at setup.
    pub parameters: BTreeMap<String, i64>,
    #[serde(skip)]
    pub rules: Vec<RuleDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
struct RuleSetFile {
    rules: Vec<RuleDefinition>,
}

impl Default for SimConfig {
    fn default() -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert(PARAM_ENABLE_COHORT_DETECTION.to_string(), 1);
        parameters.insert(PARAM_SIMBOX_CALLS_ITSELF.to_string(), 0);
        Self {
            population: 10_000,
            location_count: 100,
            legit_max_age_days: 365,
            setup_moves: 6,
            start_time: 1_700_000_000_000,

            box_capacity: 128,
            box_join_one_in: 100,
            box_sim_min_age_days: 11,
            box_sim_max_age_days: 30,
            box_move_minutes: 2,
            camouflage_call_pct: 15,
            camouflage_call_seconds: 10,
            projected_profit_per_minute: 0.16,

            max_call_seconds: 60,
            popular_list_capacity: 10,
            popular_pick_pct: 30,
            random_search_attempts: 30,
            move_one_in: 20,
            min_dwell_minutes: 2,
            history_max_length: DEFAULT_MAX_LIST_LENGTH,

            ops_per_slice: 10,
            slice_ms: 1,
            barrier_interval_secs: 60,
            run_duration_secs: 600,
            max_outstanding_ops: 1_000,

            cohort_threshold: 60,
            cohort_partitions: 8,
            rule_set_name: "SIMBOX".into(),
            rule_cache_ttl_secs: 60,

            parameters,
            rules: default_rules(),
        }
    }
}

impl SimConfig {
    /// Load from the data/ directory.
    /// In tests, use SimConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/simulation.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let mut config: SimConfig = serde_json::from_str(&content)?;

        let rules_path = format!("{data_dir}/rules/simbox_rules.json");
        let rules_content = std::fs::read_to_string(&rules_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {rules_path}: {e}"))?;
        let rules_file: RuleSetFile = serde_json::from_str(&rules_content)?;
        if rules_file.rules.is_empty() {
            anyhow::bail!("{rules_path} defines no rules");
        }
        config.rules = rules_file.rules;

        config.validate()?;
        Ok(config)
    }

    /// Small, fast population for tests. Every device is old enough to
    /// be scored and the box is large enough to form a cohort.
    pub fn default_test() -> Self {
        Self {
            population: 400,
            location_count: 12,
            legit_max_age_days: 365,
            box_capacity: 64,
            box_join_one_in: 5,
            run_duration_secs: 300,
            ops_per_slice: 2,
            slice_ms: 250,
            max_outstanding_ops: 200,
            cohort_threshold: 20,
            cohort_partitions: 4,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.population < 2 {
            anyhow::bail!("population must be at least 2, got {}", self.population);
        }
        if self.location_count < 1 {
            anyhow::bail!("location_count must be positive");
        }
        if self.box_capacity >= self.population {
            anyhow::bail!(
                "box_capacity ({}) must be smaller than the population ({})",
                self.box_capacity,
                self.population
            );
        }
        if self.box_sim_min_age_days > self.box_sim_max_age_days {
            anyhow::bail!("box_sim_min_age_days exceeds box_sim_max_age_days");
        }
        if self.max_call_seconds < 1 || self.barrier_interval_secs < 1 {
            anyhow::bail!("max_call_seconds and barrier_interval_secs must be positive");
        }
        Ok(())
    }
}
