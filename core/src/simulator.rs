//! The population simulator: the driving loop of a run.
//!
//! LOOP (fixed order, every iteration):
//!   1. Probe for a free legitimate caller, then a free callee.
//!   2. Offer the call to the box. If it declines, the caller either
//!      moves (rarely) or places the call itself.
//!   3. Move the box if it has sat still long enough.
//!   4. Settle the operation budget, advancing simulated time.
//!   5. Run a barrier if the interval has elapsed.
//!
//! RULES:
//!   - Devices are owned and mutated only here.
//!   - Store writes are queued, never issued inline.
//!   - Barriers see a fully drained queue.
//!   - All randomness flows through the run's stream slots.

use crate::{
    clock::{OpThrottle, SimClock},
    cohort::{CohortDetector, CohortReport},
    config::{SimConfig, PARAM_ENABLE_COHORT_DETECTION, PARAM_SIMBOX_CALLS_ITSELF},
    contacts::ContactRouter,
    device::Device,
    error::SimResult,
    event::{EventLogEntry, IntervalStats, SimEvent},
    history::HistoryCodec,
    pending::{DrainReport, PendingOps, StoreOp},
    probe::RandomProbe,
    rng::{RngBank, StreamSlot, SubsystemRng},
    scorer::ActivityEvent,
    service::SimboxService,
    simbox::{BoxCounters, BoxRouting, SimBox},
    store::SimStore,
    types::{DeviceId, Direction, RunId, Timestamp, MS_PER_DAY, MS_PER_SECOND, STATUS_ENDED},
};
use serde::{Deserialize, Serialize};

/// End-of-run numbers for the runner and tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub seed: u64,
    pub devices: usize,
    pub box_devices: usize,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    pub barriers: u64,
    pub totals: IntervalStats,
    pub box_counters: BoxCounters,
    pub fraud_revenue_cents: i64,
    pub cohorts: i64,
    pub flagged: u64,
    pub known_good_device: Option<DeviceId>,
    pub known_bad_device: Option<DeviceId>,
}

struct Streams {
    population: SubsystemRng,
    routing: SubsystemRng,
    simbox: SubsystemRng,
    movement: SubsystemRng,
    call_length: SubsystemRng,
}

impl Streams {
    fn new(seed: u64) -> Self {
        let bank = RngBank::new(seed);
        Self {
            population: bank.for_slot(StreamSlot::Population),
            routing: bank.for_slot(StreamSlot::Routing),
            simbox: bank.for_slot(StreamSlot::SimBox),
            movement: bank.for_slot(StreamSlot::Movement),
            call_length: bank.for_slot(StreamSlot::CallLength),
        }
    }
}

pub struct PopulationSimulator {
    pub run_id: RunId,
    pub config: SimConfig,
    pub clock: SimClock,
    seed: u64,
    service: SimboxService,
    pending: PendingOps,
    devices: Vec<Device>,
    simbox: SimBox,
    router: ContactRouter,
    detector: CohortDetector,
    throttle: OpThrottle,
    streams: Streams,
    interval: IntervalStats,
    totals: IntervalStats,
    drained: DrainReport,
    started_at: Timestamp,
    last_barrier: Timestamp,
    barriers: u64,
    last_cohort: CohortReport,
    known_good: Option<DeviceId>,
    known_bad: Option<DeviceId>,
    set_up: bool,
}

impl PopulationSimulator {
    pub fn new(run_id: RunId, seed: u64, store: SimStore, config: SimConfig) -> Self {
        let service = SimboxService::new(
            store,
            &config.rule_set_name,
            config.rule_cache_ttl_secs * MS_PER_SECOND,
            HistoryCodec::new(config.history_max_length),
        );
        let start = config.start_time;
        Self {
            clock: SimClock::new(run_id.clone(), start, config.slice_ms),
            seed,
            service,
            pending: PendingOps::new(config.max_outstanding_ops, true),
            devices: Vec::with_capacity(config.population),
            simbox: SimBox::new(
                config.box_capacity,
                0,
                config.camouflage_call_pct,
                config.camouflage_call_seconds,
                config.box_move_minutes,
                config.projected_profit_per_minute,
                start,
            ),
            router: ContactRouter::new(config.popular_pick_pct, config.population),
            detector: CohortDetector::new(config.cohort_threshold, config.cohort_partitions),
            throttle: OpThrottle::new(config.ops_per_slice),
            streams: Streams::new(seed),
            interval: IntervalStats::default(),
            totals: IntervalStats::default(),
            drained: DrainReport::default(),
            started_at: start,
            last_barrier: start,
            barriers: 0,
            last_cohort: CohortReport::default(),
            known_good: None,
            known_bad: None,
            set_up: false,
            run_id,
            config,
        }
    }

    /// In-memory store, migrated, with the small test population.
    pub fn build_test(run_id: &str, seed: u64) -> SimResult<Self> {
        Self::build_test_with(run_id, seed, SimConfig::default_test())
    }

    pub fn build_test_with(run_id: &str, seed: u64, config: SimConfig) -> SimResult<Self> {
        config.validate()?;
        let store = SimStore::in_memory()?;
        store.migrate()?;
        store.insert_run(run_id, seed, "0.1.0-test", config.start_time)?;
        Ok(Self::new(run_id.to_string(), seed, store, config))
    }

    pub fn service(&self) -> &SimboxService {
        &self.service
    }

    pub fn simbox(&self) -> &SimBox {
        &self.simbox
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn device(&self, device_id: DeviceId) -> Option<&Device> {
        usize::try_from(device_id).ok().and_then(|i| self.devices.get(i))
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn last_cohort(&self) -> &CohortReport {
        &self.last_cohort
    }

    pub fn events(&self) -> SimResult<Vec<EventLogEntry>> {
        self.service.store().events_for_run(&self.run_id)
    }

    fn emit(&self, source: &str, event: &SimEvent) -> SimResult<()> {
        let entry = EventLogEntry {
            id: None,
            run_id: self.run_id.clone(),
            at_ms: self.clock.now,
            source: source.to_string(),
            event_type: event.type_name().to_string(),
            payload: serde_json::to_string(event)?,
        };
        self.service.store().append_event(&entry)
    }

    fn enqueue(&mut self, op: StoreOp) -> SimResult<()> {
        if self.pending.push(op) {
            self.drain()?;
        }
        Ok(())
    }

    fn drain(&mut self) -> SimResult<()> {
        let report = self.pending.drain(&self.service)?;
        self.interval.ops_applied += report.applied;
        self.interval.ops_failed += report.failed;
        self.drained.absorb(report);
        Ok(())
    }

    // ── Setup ──────────────────────────────────────────────────

    /// Seed rules and tunables, create locations and devices, fill the
    /// box, and shuffle everyone around a few times.
    pub fn setup(&mut self) -> SimResult<()> {
        let cfg = self.config.clone();
        self.emit(
            "simulator",
            &SimEvent::RunInitialized {
                run_id: self.run_id.clone(),
                seed: self.seed,
            },
        )?;

        self.service.seed_rule_set(&cfg.rule_set_name, &cfg.rules)?;
        for (name, value) in &cfg.parameters {
            self.service.set_parameter(name, *value)?;
        }
        self.simbox.self_calls = self.service.parameter(PARAM_SIMBOX_CALLS_ITSELF, 0)? == 1;
        self.service.clear_cohorts()?;
        for location in 0..cfg.location_count {
            self.service.register_location(location)?;
        }

        let now = self.clock.now;
        log::info!("t={now} setup: creating {} devices", cfg.population);
        for i in 0..cfg.population {
            let id = i as DeviceId;
            let rng = &mut self.streams.population;
            let joins_box = self.simbox.has_room() && rng.next_u64_below(cfg.box_join_one_in.max(1)) == 0;
            let (location, age_ms) = if joins_box {
                let min = cfg.box_sim_min_age_days * MS_PER_DAY;
                let spread = (cfg.box_sim_max_age_days - cfg.box_sim_min_age_days) * MS_PER_DAY;
                self.simbox.add_sim(id);
                self.known_bad = Some(id);
                (self.simbox.location, min + rng.next_i64_below(spread + 1))
            } else {
                self.known_good = Some(id);
                (
                    id % cfg.location_count,
                    rng.next_i64_below(cfg.legit_max_age_days * MS_PER_DAY),
                )
            };
            let first_seen = now - age_ms;
            self.devices
                .push(Device::new(id, location, first_seen, now, cfg.popular_list_capacity));
            self.enqueue(StoreOp::RegisterDevice {
                device_id: id,
                location_id: location,
                created_at: first_seen,
                at: now,
            })?;
        }

        for round in 0..cfg.setup_moves {
            log::debug!("t={} setup: move round {}", self.clock.now, round + 1);
            for i in 0..self.devices.len() {
                let location = self.streams.movement.next_i64_below(cfg.location_count);
                self.move_device(i as DeviceId, location)?;
                self.interval.good_moves += 1;
                self.throttle.spend(1);
                self.throttle.settle(&mut self.clock);
            }
        }
        self.drain()?;

        let at = self.clock.now;
        self.emit(
            "simulator",
            &SimEvent::PopulationCreated {
                at,
                devices: self.devices.len(),
                box_devices: self.simbox.len(),
                locations: cfg.location_count,
            },
        )?;
        log::info!(
            "t={at} setup: created {} devices, {} are in the box",
            self.devices.len(),
            self.simbox.len()
        );

        self.started_at = at;
        self.last_barrier = at;
        self.set_up = true;
        Ok(())
    }

    // ── Iteration ──────────────────────────────────────────────

    fn move_device(&mut self, device_id: DeviceId, location: i64) -> SimResult<()> {
        let now = self.clock.now;
        self.devices[device_id as usize].move_to(location, now);
        self.enqueue(StoreOp::ReportLocationChange {
            device_id,
            location_id: location,
            at: now,
        })
    }

    /// `from` calls `to` now; both sides report the call.
    fn place_call(&mut self, from: DeviceId, to: DeviceId, duration_secs: i64) -> SimResult<()> {
        let now = self.clock.now;
        self.devices[from as usize].busy_for(now, duration_secs);
        self.devices[to as usize].record_being_called(from, now, duration_secs);
        self.throttle.spend(2);

        let report = |device_id, counterparty_id, direction| StoreOp::ReportActivity {
            event: ActivityEvent {
                device_id,
                start_time: now,
                duration_secs,
                direction,
                counterparty_id,
                status: STATUS_ENDED.to_string(),
            },
            at: now,
        };
        self.enqueue(report(from, to, Direction::Out))?;
        self.enqueue(report(to, from, Direction::In))
    }

    fn free_caller(&mut self) -> Option<DeviceId> {
        let now = self.clock.now;
        let devices = &self.devices;
        let simbox = &self.simbox;
        RandomProbe::new(self.config.random_search_attempts)
            .probe_index(devices.len(), &mut self.streams.routing, |i| {
                let id = i as DeviceId;
                !simbox.contains(id) && !devices[i].is_busy(now)
            })
            .map(|i| i as DeviceId)
    }

    fn free_callee(&mut self, caller: DeviceId) -> Option<DeviceId> {
        let now = self.clock.now;
        let population = self.devices.len();
        for _ in 0..self.config.random_search_attempts {
            let simbox = &self.simbox;
            let target = self.router.next_target(
                caller,
                &mut self.devices[caller as usize].popular,
                population,
                |id| simbox.contains(id),
                &mut self.streams.routing,
            )?;
            if !self.simbox.contains(target) && !self.devices[target as usize].is_busy(now) {
                return Some(target);
            }
        }
        None
    }

    fn move_box(&mut self) -> SimResult<()> {
        let now = self.clock.now;
        let from = self.simbox.location;
        let to = (from + 1) % self.config.location_count;
        let sims = self.simbox.move_to(to, now).to_vec();
        log::debug!("t={now} simbox: moving {} sims from {from} to {to}", sims.len());
        for &sim in &sims {
            self.move_device(sim, to)?;
        }
        self.throttle.spend(sims.len() as u32);
        self.interval.box_moves += sims.len() as u64;
        self.emit(
            "simbox",
            &SimEvent::BoxMoved {
                at: now,
                from,
                to,
                devices: sims.len(),
            },
        )
    }

    /// One iteration of the driving loop.
    pub fn step(&mut self) -> SimResult<()> {
        let now = self.clock.now;
        let caller = self.free_caller();
        let callee = match caller {
            Some(c) => self.free_callee(c),
            None => None,
        };

        match (caller, callee) {
            (Some(caller), Some(callee)) => {
                let length = self.streams.call_length.next_i64_below(self.config.max_call_seconds);
                let devices = &self.devices;
                let routing = self
                    .simbox
                    .route_call(length, &mut self.streams.simbox, |id| devices[id as usize].is_busy(now));
                match routing {
                    BoxRouting::Routed { sim, duration_secs } => {
                        self.place_call(sim, callee, duration_secs)?;
                        self.interval.fraud_calls += 1;
                    }
                    BoxRouting::Camouflage {
                        caller,
                        callee,
                        duration_secs,
                    } => {
                        self.place_call(caller, callee, duration_secs)?;
                        self.interval.camouflage_calls += 1;
                    }
                    BoxRouting::Blocked => {
                        let moves = self.devices[caller as usize].dwelt_at_least(now, self.config.min_dwell_minutes)
                            && self.streams.movement.next_u64_below(self.config.move_one_in.max(1)) == 0;
                        if moves {
                            let location = self.streams.movement.next_i64_below(self.config.location_count);
                            self.move_device(caller, location)?;
                            self.throttle.spend(1);
                            self.interval.good_moves += 1;
                        } else {
                            self.place_call(caller, callee, length)?;
                            self.interval.good_calls += 1;
                        }
                    }
                }
            }
            _ => {
                self.interval.busy_misses += 1;
                // A failed search still costs time.
                self.throttle.spend(1);
            }
        }

        if !self.simbox.is_empty() && self.simbox.due_to_move(now) {
            self.move_box()?;
        }

        self.throttle.settle(&mut self.clock);

        if self.clock.elapsed_since(self.last_barrier) >= self.config.barrier_interval_secs * MS_PER_SECOND {
            self.barrier()?;
        }
        Ok(())
    }

    // ── Barrier ────────────────────────────────────────────────

    /// Flush the queue, then look for cohorts and publish the interval.
    pub fn barrier(&mut self) -> SimResult<()> {
        self.drain()?;
        let now = self.clock.now;

        self.simbox.self_calls = self.service.parameter(PARAM_SIMBOX_CALLS_ITSELF, 0)? == 1;

        self.last_cohort = if self.service.parameter(PARAM_ENABLE_COHORT_DETECTION, 0)? == 1 {
            self.detector.detect(&self.service, now)?
        } else {
            CohortReport::default()
        };
        for signature in &self.last_cohort.signatures {
            if let Some(cohort) = self.service.store().get_cohort(signature)? {
                self.emit(
                    "cohort",
                    &SimEvent::CohortNoted {
                        at: now,
                        signature: cohort.signature,
                        location_id: cohort.location_id,
                        members: cohort.members.len(),
                    },
                )?;
            }
        }

        let reasons = self.service.suspicion_summary()?;
        let box_status = self.service.device_status_summary(self.simbox.members())?;
        self.publish_stats(&reasons, &box_status, now)?;

        for (label, id) in [("good device", self.known_good), ("bad device", self.known_bad)] {
            if let Some(id) = id {
                let view = self.service.get_device(id, now)?;
                log::debug!(
                    "t={now} barrier: {label} {id} at {} contacts={} flagged={:?}",
                    view.device.current_location_id,
                    view.contacts.len(),
                    view.device.suspicious_because
                );
            }
        }

        let stats = self.interval.clone();
        self.emit(
            "simulator",
            &SimEvent::BarrierCompleted {
                at: now,
                stats: stats.clone(),
                largest_cohort: self.last_cohort.largest,
            },
        )?;
        self.emit(
            "simulator",
            &SimEvent::SuspicionSummary {
                at: now,
                reasons,
                box_status,
            },
        )?;
        log::info!(
            "t={now} barrier: good_calls={} fraud_calls={} camouflage={} busy={} good_moves={} box_moves={} largest_cohort={}",
            stats.good_calls,
            stats.fraud_calls,
            stats.camouflage_calls,
            stats.busy_misses,
            stats.good_moves,
            stats.box_moves,
            self.last_cohort.largest
        );

        self.totals.absorb(&stats);
        self.interval = IntervalStats::default();
        self.last_barrier = now;
        self.barriers += 1;
        Ok(())
    }

    fn publish_stats(&self, reasons: &[(String, i64)], box_status: &[(String, i64)], now: Timestamp) -> SimResult<()> {
        let run = self.run_id.as_str();
        let s = &self.interval;
        let c = &self.simbox.counters;
        self.service.clear_stats(run)?;
        let fixed = [
            ("sessions", self.devices.len() as i64),
            ("good_calls", s.good_calls as i64),
            ("fraud_calls", s.fraud_calls as i64),
            ("camouflage_calls", s.camouflage_calls as i64),
            ("busy_misses", s.busy_misses as i64),
            ("good_moves", s.good_moves as i64),
            ("box_moves", s.box_moves as i64),
            ("box_fraud_calls", c.fraud_calls as i64),
            ("box_camouflage_calls", c.camouflage_calls as i64),
            ("box_blocked", c.blocked as i64),
            ("fraud_revenue_cents", self.fraud_revenue_cents()),
            ("largest_cohort", self.last_cohort.largest),
        ];
        for (name, value) in fixed {
            self.service.report_stat(run, name, value, now)?;
        }
        for (reason, count) in reasons {
            self.service
                .report_stat(run, &format!("suspicious_because_{reason}"), *count, now)?;
        }
        for (status, count) in box_status {
            self.service
                .report_stat(run, &format!("box_status_{status}"), *count, now)?;
        }
        Ok(())
    }

    fn fraud_revenue_cents(&self) -> i64 {
        (self.simbox.projected_profit() * 100.0) as i64
    }

    // ── Run ────────────────────────────────────────────────────

    /// Set up if needed, drive the loop for the configured duration and
    /// flush whatever is still queued.
    pub fn run(&mut self) -> SimResult<RunSummary> {
        if !self.set_up {
            self.setup()?;
        }
        let end = self.started_at + self.config.run_duration_secs * MS_PER_SECOND;
        log::info!("t={} run: started, ends at t={end}", self.clock.now);
        while self.clock.now < end {
            self.step()?;
        }
        self.finish()?;
        self.summary()
    }

    /// Final drain and the closing event.
    pub fn finish(&mut self) -> SimResult<()> {
        self.drain()?;
        self.totals.absorb(&self.interval);
        self.interval = IntervalStats::default();
        self.emit(
            "simulator",
            &SimEvent::RunFinished {
                at: self.clock.now,
                box_fraud_calls: self.simbox.counters.fraud_calls,
                box_blocked: self.simbox.counters.blocked,
                known_bad_device: self.known_bad,
            },
        )?;
        log::info!(
            "t={} run: finished, box routed {} calls and was blocked {} times",
            self.clock.now,
            self.simbox.counters.fraud_calls,
            self.simbox.counters.blocked
        );
        Ok(())
    }

    pub fn summary(&self) -> SimResult<RunSummary> {
        Ok(RunSummary {
            run_id: self.run_id.clone(),
            seed: self.seed,
            devices: self.devices.len(),
            box_devices: self.simbox.len(),
            started_at: self.started_at,
            finished_at: self.clock.now,
            barriers: self.barriers,
            totals: self.totals.clone(),
            box_counters: self.simbox.counters,
            fraud_revenue_cents: self.fraud_revenue_cents(),
            cohorts: self.service.store().cohort_count()?,
            flagged: self.drained.flagged,
            known_good_device: self.known_good,
            known_bad_device: self.known_bad,
        })
    }
}
