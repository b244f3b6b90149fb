//! Device registration, location changes and dwell bookkeeping.

use simbox_core::{
    error::SimError,
    history::{last_n, record_count, HistoryCodec},
    records::OPEN_INTERVAL_END,
    rules::default_rules,
    scorer::ActivityEvent,
    service::SimboxService,
    store::SimStore,
    types::{Direction, Timestamp, MS_PER_DAY, MS_PER_MINUTE, STATUS_ENDED},
};

const T: Timestamp = 1_700_000_000_000;

fn service() -> SimboxService {
    let store = SimStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    let svc = SimboxService::new(store, "SIMBOX", 60_000, HistoryCodec::new(4));
    for loc in 0..10 {
        svc.register_location(loc).unwrap();
    }
    svc.seed_rule_set("SIMBOX", &default_rules()).unwrap();
    svc
}

#[test]
fn registration_opens_one_dwell_and_seeds_history() {
    let svc = service();
    svc.register_device(7, 3, T - 20 * MS_PER_DAY, T).unwrap();

    let device = svc.store().get_device(7).unwrap().expect("device");
    assert_eq!(device.current_location_id, 3);
    assert_eq!(device.first_seen, T - 20 * MS_PER_DAY);
    assert_eq!(record_count(&device.history), 1);
    assert_eq!(device.history_last3, device.history);
    assert_eq!(device.history_last6, device.history);

    let dwells = svc.store().dwells_for_device(7).unwrap();
    assert_eq!(dwells.len(), 1);
    assert!(dwells[0].is_open());
    assert_eq!(dwells[0].from_ts, T);
}

#[test]
fn location_change_closes_previous_dwell() {
    let svc = service();
    svc.register_device(7, 3, T - 20 * MS_PER_DAY, T).unwrap();
    let moved_at = T + 5 * MS_PER_MINUTE;
    svc.report_location_change(7, 6, moved_at).unwrap();

    let dwells = svc.store().dwells_for_device(7).unwrap();
    assert_eq!(dwells.len(), 2);
    assert_eq!(dwells[0].location_id, 3);
    assert_eq!(dwells[0].to_ts, moved_at - 1);
    assert_eq!(dwells[1].location_id, 6);
    assert_eq!(dwells[1].to_ts, OPEN_INTERVAL_END);
    assert_eq!(svc.store().open_dwell_count(7).unwrap(), 1);
}

#[test]
fn history_windows_stay_bounded() {
    let svc = service();
    svc.register_device(1, 0, T - 20 * MS_PER_DAY, T).unwrap();
    for k in 1..=9 {
        svc.report_location_change(1, k % 10, T + k * MS_PER_MINUTE).unwrap();
    }
    let device = svc.store().get_device(1).unwrap().unwrap();
    assert_eq!(record_count(&device.history), 4);
    assert_eq!(record_count(&device.history_last3), 3);
    assert_eq!(device.history_last3, last_n(&device.history, 3));
    assert_eq!(device.history_last6, device.history);
    // T falls at minute 13 of the hour.
    assert!(device.history.ends_with("9,22:"), "{}", device.history);
}

#[test]
fn re_registration_replaces_everything() {
    let svc = service();
    svc.register_device(7, 3, T - 20 * MS_PER_DAY, T).unwrap();
    svc.report_location_change(7, 5, T + MS_PER_MINUTE).unwrap();
    let event = ActivityEvent {
        device_id: 7,
        start_time: T + 2 * MS_PER_MINUTE,
        duration_secs: 20,
        direction: Direction::Out,
        counterparty_id: 8,
        status: STATUS_ENDED.to_string(),
    };
    svc.report_activity(&event, T + 3 * MS_PER_MINUTE).unwrap();

    svc.register_device(7, 9, T - 20 * MS_PER_DAY, T + 10 * MS_PER_MINUTE).unwrap();

    let view = svc.get_device(7, T + 10 * MS_PER_MINUTE).unwrap();
    assert_eq!(view.device.current_location_id, 9);
    assert_eq!(record_count(&view.device.history), 1);
    assert!(view.device.history.starts_with("9,"));
    assert_eq!(view.dwells.len(), 1);
    assert_eq!(view.dwells[0].location_id, 9);
    assert!(view.contacts.is_empty());
    assert!(view.top_counterparties.is_empty());
    assert_eq!(svc.store().device_count().unwrap(), 1);
}

#[test]
fn unknown_location_is_rejected_without_side_effects() {
    let svc = service();
    let err = svc.register_device(7, 42, T, T).unwrap_err();
    assert!(matches!(err, SimError::UnknownLocation { location_id: 42 }));
    assert!(svc.store().get_device(7).unwrap().is_none());

    svc.register_device(7, 3, T - 20 * MS_PER_DAY, T).unwrap();
    let err = svc.report_location_change(7, 42, T + MS_PER_MINUTE).unwrap_err();
    assert!(err.is_validation());
    let device = svc.store().get_device(7).unwrap().unwrap();
    assert_eq!(device.current_location_id, 3);
    assert_eq!(svc.store().dwells_for_device(7).unwrap().len(), 1);
}

#[test]
fn moving_an_unknown_device_is_rejected() {
    let svc = service();
    let err = svc.report_location_change(77, 1, T).unwrap_err();
    assert!(matches!(err, SimError::UnknownDevice { device_id: 77 }));
}

#[test]
fn device_view_ranks_counterparties() {
    let svc = service();
    svc.register_device(1, 2, T - 20 * MS_PER_DAY, T).unwrap();
    let calls = [(5, 0), (5, 1), (5, 2), (6, 3), (4, 4), (4, 5)];
    for (counterparty, k) in calls {
        let event = ActivityEvent {
            device_id: 1,
            start_time: T + k * MS_PER_MINUTE,
            duration_secs: 5,
            direction: Direction::Out,
            counterparty_id: counterparty,
            status: STATUS_ENDED.to_string(),
        };
        svc.report_activity(&event, T + k * MS_PER_MINUTE + 5_000).unwrap();
    }
    let view = svc.get_device(1, T + 10 * MS_PER_MINUTE).unwrap();
    let ranked: Vec<(i64, i64)> = view
        .top_counterparties
        .iter()
        .map(|c| (c.counterparty_id, c.calls))
        .collect();
    assert_eq!(ranked, vec![(5, 3), (4, 2), (6, 1)]);
    assert_eq!(view.dwells[0].outgoing_call_count, 6);
    assert_eq!(view.dwells[0].outgoing_call_duration, 30);
}
