//! sim-runner: headless simbox fraud simulation.
//!
//! Usage:
//!   sim-runner --seed 12345 --duration 600 --db run.db
//!   sim-runner --seed 12345 --population 2000 --json
//!   sim-runner --seed 7 --inspect-bad

use anyhow::Result;
use simbox_core::{
    config::SimConfig,
    simulator::{PopulationSimulator, RunSummary},
    store::SimStore,
    types::DeviceId,
};
use std::env;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let json = args.iter().any(|a| a == "--json");
    let inspect_bad = args.iter().any(|a| a == "--inspect-bad");
    let db = args
        .windows(2)
        .find(|w| w[0] == "--db")
        .map(|w| w[1].as_str())
        .unwrap_or(":memory:");
    let data_dir = args
        .windows(2)
        .find(|w| w[0] == "--data-dir")
        .map(|w| w[1].as_str())
        .unwrap_or("./data");

    let mut config = SimConfig::load(data_dir)?;
    config.population = parse_arg(&args, "--population", config.population);
    config.location_count = parse_arg(&args, "--locations", config.location_count);
    config.run_duration_secs = parse_arg(&args, "--duration", config.run_duration_secs);
    config.ops_per_slice = parse_arg(&args, "--ops-per-slice", config.ops_per_slice);
    config.max_call_seconds = parse_arg(&args, "--max-call-seconds", config.max_call_seconds);
    config.validate()?;

    if !json {
        println!("simbox sim-runner");
        println!("  seed:        {seed}");
        println!("  population:  {}", config.population);
        println!("  locations:   {}", config.location_count);
        println!("  duration:    {}s", config.run_duration_secs);
        println!("  db:          {db}");
        println!("  data_dir:    {data_dir}");
        println!();
    }

    let store = if db == ":memory:" {
        SimStore::in_memory()?
    } else {
        SimStore::open(db)?
    };
    store.migrate()?;

    let run_id = format!("run-{seed}-{}", uuid::Uuid::new_v4().simple());
    store.insert_run(&run_id, seed, env!("CARGO_PKG_VERSION"), config.start_time)?;

    log::info!("run {run_id}: population={} box_capacity={}", config.population, config.box_capacity);
    let mut sim = PopulationSimulator::new(run_id.clone(), seed, store, config);
    let summary = sim.run()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&sim, &summary)?;
    }

    if inspect_bad {
        if let Some(device_id) = summary.known_bad_device {
            print_device(&sim, device_id, summary.finished_at)?;
        } else {
            println!("(no box device was observed)");
        }
    }
    Ok(())
}

fn print_summary(sim: &PopulationSimulator, summary: &RunSummary) -> Result<()> {
    let t = &summary.totals;
    let elapsed_secs = (summary.finished_at - summary.started_at) / 1_000;

    println!("=== RUN SUMMARY ===");
    println!("  run_id:           {}", summary.run_id);
    println!("  simulated secs:   {elapsed_secs}");
    println!("  barriers:         {}", summary.barriers);
    println!("  devices:          {}", summary.devices);
    println!("  box devices:      {}", summary.box_devices);
    println!("  good calls:       {}", t.good_calls);
    println!("  fraud calls:      {}", t.fraud_calls);
    println!("  camouflage calls: {}", t.camouflage_calls);
    println!("  busy misses:      {}", t.busy_misses);
    println!("  good moves:       {}", t.good_moves);
    println!("  box moves:        {}", t.box_moves);
    println!("  box blocked:      {}", summary.box_counters.blocked);
    println!("  fraud revenue:    ${:.2}", summary.fraud_revenue_cents as f64 / 100.0);
    println!("  cohorts:          {}", summary.cohorts);
    println!("  flag decisions:   {}", summary.flagged);
    println!("  ops applied:      {}", t.ops_applied);
    println!("  ops failed:       {}", t.ops_failed);

    println!();
    println!("=== SUSPICION (all devices) ===");
    let by_reason = sim.service().suspicion_summary()?;
    if by_reason.is_empty() {
        println!("  (nothing flagged)");
    }
    for (reason, count) in by_reason {
        println!("  {reason:<48} {count}");
    }

    println!();
    println!("=== BOX DEVICE STATUS ===");
    for (status, count) in sim.service().device_status_summary(sim.simbox().members())? {
        println!("  {status:<48} {count}");
    }
    Ok(())
}

fn print_device(sim: &PopulationSimulator, device_id: DeviceId, now: i64) -> Result<()> {
    let view = sim.service().get_device(device_id, now)?;
    println!();
    println!("=== DEVICE {device_id} ===");
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
