//! # Consumption Reconstruction
//!
//! Rate codes only say how consumption was distributed over a period. Given
//! the total consumed in that period, [`reconstruct`] splits it across the
//! sub-intervals, and [`walk_back_totals`] turns the split into absolute
//! totals at hour-aligned timestamps.

use crate::constants::RESIDUAL_STEP;
use crate::store::{DeviceCalibration, SeriesPoint};
use chrono::{DateTime, Duration, DurationRound, Utc};

/// Split `total` across intervals in proportion to `rates`.
///
/// The result sums to `total` within [`RESIDUAL_STEP`]. Any leftover from
/// floating point rounding is added in steps of 0.01 starting with the first
/// (oldest) interval. All-zero rates produce all-zero consumption.
pub fn reconstruct(rates: &[u8], total: f64) -> Vec<f64> {
    let rate_sum: u32 = rates.iter().map(|&r| u32::from(r)).sum();
    if rate_sum == 0 {
        return vec![0.0; rates.len()];
    }

    let unit = total / f64::from(rate_sum);
    let mut values: Vec<f64> = rates.iter().map(|&r| unit * f64::from(r)).collect();

    let mut residual = total - values.iter().sum::<f64>();
    if residual > RESIDUAL_STEP {
        'correct: loop {
            for value in values.iter_mut() {
                *value += RESIDUAL_STEP;
                residual -= RESIDUAL_STEP;
                if residual <= RESIDUAL_STEP {
                    break 'correct;
                }
            }
        }
    }

    values
}

/// Event time rounded to the nearest full hour
pub fn round_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_round(Duration::hours(1)).unwrap_or(ts)
}

/// Absolute readings before each interval of a reconstructed period.
///
/// Walks back from `total` at `end`: the point one `step` before `end` holds
/// `total` minus the last interval's consumption, and so on. Values are
/// converted with `calibration`; the result is in chronological order.
pub fn walk_back_totals(
    end: DateTime<Utc>,
    step: Duration,
    total: f64,
    consumption: &[f64],
    calibration: &DeviceCalibration,
) -> Vec<SeriesPoint> {
    let mut remaining = total;
    let mut points: Vec<SeriesPoint> = consumption
        .iter()
        .rev()
        .zip(1i32..)
        .map(|(used, n)| {
            remaining -= used;
            SeriesPoint {
                timestamp: end - step * n,
                value: calibration.to_real_value(remaining),
            }
        })
        .collect();
    points.reverse();
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_equal_rates_split_evenly() {
        let values = reconstruct(&[1; 24], 24.0);
        assert!(values.iter().all(|&v| (v - 1.0).abs() < 1e-9));
    }

    #[test]
    fn test_zero_rates_yield_zeroes() {
        assert_eq!(reconstruct(&[0; 7], 100.0), vec![0.0; 7]);
    }

    #[test]
    fn test_round_to_hour() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 9, 59, 58).unwrap();
        assert_eq!(
            round_to_hour(ts),
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
        );
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 10, 20, 0).unwrap();
        assert_eq!(
            round_to_hour(ts),
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_walk_back_is_chronological() {
        let end = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let calibration = DeviceCalibration {
            modem_initial_value: 0.0,
            units_per_impulse: 1000.0,
            meter_initial_value: 0.0,
        };
        let points = walk_back_totals(end, Duration::hours(1), 10.0, &[1.0, 2.0, 3.0], &calibration);

        assert_eq!(points.len(), 3);
        assert_eq!(points[0].timestamp, end - Duration::hours(3));
        assert_eq!(points[2].timestamp, end - Duration::hours(1));
        assert_eq!(points[0].value, 4.0);
        assert_eq!(points[1].value, 5.0);
        assert_eq!(points[2].value, 7.0);
    }
}
