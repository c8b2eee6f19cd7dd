//! Integration tests for counter wrap detection and overflow ratio bookkeeping.

use chrono::{Duration, TimeZone, Utc};
use w5_telemetry::processing::{full_total, is_wrap};
use w5_telemetry::{
    AggregationMode, MemoryStore, Message, OverflowRatios, OverflowTracker, RawRecord,
    WrapCheck,
};

fn message(id: u64, hex: &str, hours: i64) -> Message {
    let ts = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap() + Duration::hours(hours);
    Message::from_record(RawRecord {
        incoming_id: id,
        device_id: "modem-1".to_string(),
        hex_payload: hex.to_string(),
        received_at: ts,
        event_time: ts,
        iterator: 0,
    })
    .unwrap()
}

/// Tests the full-total formula without wraps.
#[test]
fn test_full_total_day_mode() {
    assert_eq!(full_total(100 * 10, 10, 0, AggregationMode::Day), 1000);
}

/// Tests that a smaller counter after a larger one is a wrap.
#[test]
fn test_is_wrap() {
    let earlier = message(1, "E803555555555555", 0); // counter 500
    let later = message(2, "C003555555555555", 24); // counter 480
    assert!(is_wrap(&later, &earlier).unwrap());
    assert!(!is_wrap(&earlier, &later).unwrap());
}

/// Tests that a wrap advances the ratio exactly once, even when the message is checked again.
#[test]
fn test_wrap_is_registered_once() {
    let store = MemoryStore::new();
    let tracker = OverflowTracker::new(&store, &store);

    let earlier = message(1, "E803555555555555", 0);
    let later = message(2, "C003555555555555", 24);
    assert_eq!(tracker.full_total(&earlier, AggregationMode::Day).unwrap(), 5000);
    assert_eq!(tracker.full_total(&later, AggregationMode::Day).unwrap(), 4800);

    assert_eq!(
        tracker.check_wrap(&later, &earlier, AggregationMode::Day).unwrap(),
        WrapCheck::Registered { ratio: 1 }
    );
    assert_eq!(
        tracker.check_wrap(&later, &earlier, AggregationMode::Day).unwrap(),
        WrapCheck::AlreadyRegistered
    );

    let at = later.event_time();
    assert_eq!(tracker.ratio("modem-1", AggregationMode::Day, at).unwrap(), 1);
    assert_eq!(tracker.ratio("modem-1", AggregationMode::Week, at).unwrap(), 0);
    assert_eq!(
        tracker.full_total(&later, AggregationMode::Day).unwrap(),
        (1 << 15) * 10 + 4800
    );
    assert_eq!(store.report().wraps.len(), 1);
}

/// Tests that the earlier message keeps the ratio it was sent under after a wrap.
#[test]
fn test_reference_total_unchanged_by_later_wrap() {
    let store = MemoryStore::new();
    let tracker = OverflowTracker::new(&store, &store);

    let earlier = message(1, "E803555555555555", 0);
    let later = message(2, "C003555555555555", 24);
    tracker.check_wrap(&later, &earlier, AggregationMode::Day).unwrap();

    assert_eq!(tracker.full_total(&earlier, AggregationMode::Day).unwrap(), 5000);
    assert_eq!(
        tracker
            .ratio("modem-1", AggregationMode::Day, earlier.event_time())
            .unwrap(),
        0
    );
    assert_eq!(
        tracker.check_wrap(&later, &earlier, AggregationMode::Day).unwrap(),
        WrapCheck::AlreadyRegistered
    );
    assert_eq!(tracker.full_total(&earlier, AggregationMode::Day).unwrap(), 5000);
}

/// Tests that growing counters never register a wrap.
#[test]
fn test_no_wrap_on_growth() {
    let store = MemoryStore::new();
    let tracker = OverflowTracker::new(&store, &store);

    let earlier = message(1, "C003555555555555", 0);
    let later = message(2, "E803555555555555", 24);
    assert_eq!(
        tracker.check_wrap(&later, &earlier, AggregationMode::Day).unwrap(),
        WrapCheck::NoWrap
    );
    assert_eq!(
        tracker
            .ratio("modem-1", AggregationMode::Day, later.event_time())
            .unwrap(),
        0
    );
}

/// Tests ratios derived from an absolute counter.
#[test]
fn test_ratios_from_absolute_total() {
    assert_eq!(
        OverflowRatios::from_absolute_total(327_679),
        OverflowRatios { day: 0, week: 0 }
    );
    assert_eq!(
        OverflowRatios::from_absolute_total(327_680),
        OverflowRatios { day: 1, week: 0 }
    );
    assert_eq!(
        OverflowRatios::from_absolute_total(2 * 1_342_177_280),
        OverflowRatios { day: 8192, week: 2 }
    );
}

/// Tests that an inconsistent absolute report overwrites both ratios once.
#[test]
fn test_reconcile_absolute_resets_ratios() {
    let store = MemoryStore::new();
    store.set_overflow_ratio("modem-1", AggregationMode::Week, 3);
    let tracker = OverflowTracker::new(&store, &store);
    let manual = message(5, "51E803000021AAAA", 0);

    let reset = tracker.reconcile_absolute(&manual, 400_000).unwrap();
    assert_eq!(reset, Some(OverflowRatios { day: 1, week: 0 }));
    assert_eq!(store.stored_ratio("modem-1", AggregationMode::Day), 1);
    // Overwritten unconditionally, even downwards
    assert_eq!(store.stored_ratio("modem-1", AggregationMode::Week), 0);

    assert_eq!(tracker.reconcile_absolute(&manual, 400_000).unwrap(), None);

    let resets = store.report().resets;
    assert_eq!(resets.len(), 1);
    assert_eq!(resets[0].incoming_id, 5);
    assert_eq!(resets[0].absolute_total, 400_000);
}
