//! Population simulator tests.
//!
//! Tests cover: box membership and SIM ages, traffic mix, barrier
//! statistics, cohort formation once the box has moved often enough,
//! and the cohort-detection switch.

use simbox_core::{
    config::{SimConfig, PARAM_ENABLE_COHORT_DETECTION, PARAM_SIMBOX_CALLS_ITSELF},
    simulator::PopulationSimulator,
    types::MS_PER_DAY,
};

fn build(run_id: &str, seed: u64) -> PopulationSimulator {
    PopulationSimulator::build_test(run_id, seed).expect("build test simulator")
}

/// Long enough for the box to make well over six moves.
fn long_run_config() -> SimConfig {
    SimConfig {
        run_duration_secs: 900,
        box_move_minutes: 1,
        ..SimConfig::default_test()
    }
}

#[test]
fn setup_fills_box_within_capacity() {
    let mut sim = build("setup-test", 42);
    sim.setup().unwrap();

    let cfg = SimConfig::default_test();
    assert_eq!(sim.devices().len(), cfg.population);
    assert!(!sim.simbox().is_empty());
    assert!(sim.simbox().len() <= cfg.box_capacity);
    assert_eq!(sim.pending_len(), 0);
    assert_eq!(sim.service().store().device_count().unwrap(), cfg.population as i64);
    assert_eq!(sim.service().store().location_count().unwrap(), cfg.location_count);
}

#[test]
fn box_sims_are_young_but_scoreable() {
    let mut sim = build("box-age-test", 0xB0B);
    sim.setup().unwrap();

    let cfg = SimConfig::default_test();
    for &id in sim.simbox().members() {
        let device = sim.service().store().get_device(id).unwrap().expect("box sim registered");
        let age = cfg.start_time - device.first_seen;
        assert!(
            age >= cfg.box_sim_min_age_days * MS_PER_DAY && age <= cfg.box_sim_max_age_days * MS_PER_DAY,
            "box sim {id} is {} days old",
            age / MS_PER_DAY
        );
    }
}

#[test]
fn run_produces_good_and_fraud_traffic() {
    let run_id = "traffic-test";
    let mut sim = build(run_id, 0xCAFE);
    let summary = sim.run().unwrap();

    assert!(summary.barriers >= 4, "expected a barrier a minute, got {}", summary.barriers);
    assert!(summary.totals.good_calls > 0);
    assert!(summary.totals.fraud_calls > 0);
    assert!(summary.box_counters.fraud_calls > 0);
    assert_eq!(summary.totals.ops_failed, 0);
    assert_eq!(sim.pending_len(), 0);
    assert!(sim.service().store().total_contact_count().unwrap() > 0);
    assert!(summary.finished_at - summary.started_at >= 300_000);

    let types: Vec<String> = sim.events().unwrap().into_iter().map(|e| e.event_type).collect();
    assert_eq!(types.first().map(String::as_str), Some("run_initialized"));
    assert_eq!(types.last().map(String::as_str), Some("run_finished"));
    assert!(types.iter().any(|t| t == "population_created"));
    assert!(types.iter().any(|t| t == "box_moved"));
    assert!(types.iter().any(|t| t == "barrier_completed"));
}

#[test]
fn barrier_publishes_stats() {
    let run_id = "stats-test";
    let mut sim = build(run_id, 11);
    sim.run().unwrap();

    let stats = sim.service().store().stats_for_run(run_id).unwrap();
    let get = |name: &str| stats.iter().find(|(n, _)| n == name).map(|(_, v)| *v);
    assert_eq!(get("sessions"), Some(400));
    assert!(get("largest_cohort").is_some());
    assert!(get("fraud_revenue_cents").unwrap_or(0) >= 0);
    assert!(stats.iter().any(|(n, _)| n.starts_with("box_status_")));
}

#[test]
fn travelling_box_forms_a_cohort_and_gets_flagged() {
    let mut sim = PopulationSimulator::build_test_with("cohort-sim-test", 0xFEED, long_run_config()).unwrap();
    let summary = sim.run().unwrap();

    assert!(summary.totals.box_moves >= 6 * summary.box_devices as u64);
    assert!(summary.cohorts >= 1, "no cohort after {} box moves", summary.totals.box_moves);

    let signature = sim
        .last_cohort()
        .signatures
        .first()
        .cloned()
        .expect("box still shares a signature");
    let cohort = sim.service().store().get_cohort(&signature).unwrap().expect("cohort row");
    assert_eq!(cohort.members.len(), sim.simbox().len());
    assert!(cohort.members.iter().all(|m| sim.simbox().contains(m.device_id)));

    let flagged = sim
        .simbox()
        .members()
        .iter()
        .filter(|&&id| {
            sim.service()
                .store()
                .get_device(id)
                .unwrap()
                .map(|d| d.is_flagged())
                .unwrap_or(false)
        })
        .count();
    assert!(flagged > 0, "no box sim was flagged");

    let types: Vec<String> = sim.events().unwrap().into_iter().map(|e| e.event_type).collect();
    assert!(types.iter().any(|t| t == "cohort_noted"));
}

#[test]
fn cohort_detection_can_be_switched_off() {
    let mut config = long_run_config();
    config.parameters.insert(PARAM_ENABLE_COHORT_DETECTION.to_string(), 0);
    let mut sim = PopulationSimulator::build_test_with("no-cohort-test", 0xFEED, config).unwrap();
    let summary = sim.run().unwrap();

    assert_eq!(summary.cohorts, 0);
    assert!(sim.last_cohort().signatures.is_empty());
}

#[test]
fn box_camouflages_once_self_calls_are_switched_on() {
    let mut config = SimConfig::default_test();
    config.parameters.insert(PARAM_SIMBOX_CALLS_ITSELF.to_string(), 1);
    let mut sim = PopulationSimulator::build_test_with("camouflage-test", 0xC0C0, config).unwrap();
    let summary = sim.run().unwrap();

    assert!(sim.simbox().self_calls);
    assert!(summary.totals.camouflage_calls > 0);
    assert!(summary.box_counters.camouflage_calls >= summary.totals.camouflage_calls);
}

#[test]
fn invalid_config_is_rejected_before_building() {
    let config = SimConfig {
        box_capacity: 500,
        ..SimConfig::default_test()
    };
    let err = PopulationSimulator::build_test_with("bad-config-test", 1, config)
        .err()
        .expect("oversized box rejected");
    assert!(err.to_string().contains("box_capacity"), "{err}");
}
