//! Integration tests for proportional consumption reconstruction and series walking.

use chrono::{Duration, TimeZone, Utc};
use w5_telemetry::processing::{reconstruct, round_to_hour, walk_back_totals};
use w5_telemetry::DeviceCalibration;

/// Tests that equal rates split a total evenly.
#[test]
fn test_equal_hourly_rates() {
    let values = reconstruct(&[1; 24], 24.0);
    assert_eq!(values.len(), 24);
    for value in values {
        assert_eq!(value, 1.0);
    }
}

/// Tests that the reconstructed values sum to the target.
#[test]
fn test_uneven_rates_sum_to_total() {
    let values = reconstruct(&[1, 2], 10.0);
    let sum: f64 = values.iter().sum();
    assert!((sum - 10.0).abs() <= 0.01);
    assert!(values[1] > values[0]);
}

/// Tests that all-zero rates produce zero consumption instead of dividing by zero.
#[test]
fn test_zero_rates() {
    assert_eq!(reconstruct(&[0; 24], 50.0), vec![0.0; 24]);
}

/// Tests that zero consumption yields zero everywhere.
#[test]
fn test_zero_total() {
    assert_eq!(reconstruct(&[3, 1, 2, 0, 0, 1, 1], 0.0), vec![0.0; 7]);
}

/// Tests weekly-sized reconstruction.
#[test]
fn test_weekly_rates() {
    let values = reconstruct(&[1, 1, 1, 1, 1, 1, 1], 700.0);
    assert_eq!(values, vec![100.0; 7]);
}

/// Tests hour rounding of event times.
#[test]
fn test_round_to_hour() {
    let ts = Utc.with_ymd_and_hms(2024, 3, 1, 23, 31, 0).unwrap();
    assert_eq!(
        round_to_hour(ts),
        Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap()
    );
}

/// Tests the backward walk over hourly consumption with calibration applied.
#[test]
fn test_walk_back_hourly() {
    let end = Utc.with_ymd_and_hms(2024, 3, 2, 10, 0, 0).unwrap();
    let calibration = DeviceCalibration {
        modem_initial_value: 1000.0,
        units_per_impulse: 10.0,
        meter_initial_value: 5.0,
    };
    let consumption = vec![10.0; 24];
    let points = walk_back_totals(end, Duration::hours(1), 1240.0, &consumption, &calibration);

    assert_eq!(points.len(), 24);
    assert_eq!(points[0].timestamp, end - Duration::hours(24));
    assert_eq!(points[23].timestamp, end - Duration::hours(1));
    // (1230 - 1000) * 10 / 1000 + 5
    assert!((points[23].value - 7.3).abs() < 1e-9);
    // Oldest point sits at the modem's initial value
    assert!((points[0].value - 5.0).abs() < 1e-9);
    assert!(points.windows(2).all(|w| w[0].value <= w[1].value));
}

/// Tests that readings below the modem's initial value clamp to the meter's initial value.
#[test]
fn test_real_value_clamps_below_modem_initial() {
    let calibration = DeviceCalibration {
        modem_initial_value: 500.0,
        units_per_impulse: 1.0,
        meter_initial_value: 12.5,
    };
    assert_eq!(calibration.to_real_value(100.0), 12.5);
    assert_eq!(calibration.to_real_value(1500.0), 13.5);
}
