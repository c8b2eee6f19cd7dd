//! # Processing Configuration
//!
//! Lookback windows and limits used when correlating a message with earlier
//! ones. Every field has a default, so a JSON file only needs the values it
//! overrides:
//!
//! ```json
//! { "previous_search_limit": 20, "calibration_commands": [33] }
//! ```

use crate::error::TelemetryError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::constants::{SECS_PER_DAY, SECS_PER_HOUR, SECS_PER_WEEK};
use crate::store::TimeRange;

/// Window of allowed gaps between a message and its reference, in seconds before the message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookbackWindow {
    pub min_gap_secs: i64,
    pub max_gap_secs: i64,
}

impl LookbackWindow {
    pub const fn new(min_gap_secs: i64, max_gap_secs: i64) -> Self {
        Self {
            min_gap_secs,
            max_gap_secs,
        }
    }

    /// Event-time range `[t - max_gap, t - min_gap]`
    pub fn range_before(&self, t: DateTime<Utc>) -> TimeRange {
        TimeRange::between(
            t - Duration::seconds(self.max_gap_secs),
            t - Duration::seconds(self.min_gap_secs),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub daily_previous_window: LookbackWindow,
    pub weekly_previous_window: LookbackWindow,
    pub pre_previous_slot_secs: i64,
    pub pre_previous_max_slots: u32,
    pub partial_daily_window_secs: i64,
    pub previous_search_limit: usize,
    pub calibration_commands: Vec<u8>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        const QUARTER_HOUR: i64 = 15 * 60;
        Self {
            daily_previous_window: LookbackWindow::new(SECS_PER_HOUR, SECS_PER_DAY + SECS_PER_HOUR),
            weekly_previous_window: LookbackWindow::new(
                SECS_PER_WEEK - SECS_PER_DAY - QUARTER_HOUR,
                SECS_PER_WEEK + QUARTER_HOUR,
            ),
            pre_previous_slot_secs: SECS_PER_DAY + SECS_PER_HOUR,
            pre_previous_max_slots: 3,
            // Slightly more than a week so the oldest daily of the week is included
            partial_daily_window_secs: 3620 * 24 * 7,
            previous_search_limit: 50,
            calibration_commands: vec![5, 33],
        }
    }
}

impl ProcessingConfig {
    pub fn from_json_str(json: &str) -> Result<Self, TelemetryError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| TelemetryError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, TelemetryError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .map_err(|e| TelemetryError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    /// Reject windows that are empty or point into the future
    pub fn validate(&self) -> Result<(), TelemetryError> {
        for (name, window) in [
            ("daily_previous_window", &self.daily_previous_window),
            ("weekly_previous_window", &self.weekly_previous_window),
        ] {
            if window.min_gap_secs < 0 || window.min_gap_secs > window.max_gap_secs {
                return Err(TelemetryError::Config(format!(
                    "{name}: min_gap_secs {} must be between 0 and max_gap_secs {}",
                    window.min_gap_secs, window.max_gap_secs
                )));
            }
        }
        if self.pre_previous_slot_secs <= 0 || self.pre_previous_max_slots < 2 {
            return Err(TelemetryError::Config(
                "pre-previous search needs a positive slot and at least 2 slots".to_string(),
            ));
        }
        if self.partial_daily_window_secs <= 0 {
            return Err(TelemetryError::Config(
                "partial_daily_window_secs must be positive".to_string(),
            ));
        }
        if self.previous_search_limit == 0 {
            return Err(TelemetryError::Config(
                "previous_search_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_calibration_command(&self, command: u8) -> bool {
        self.calibration_commands.contains(&command)
    }

    /// Range searched for the pre-previous daily: `[t - max_slots*slot, t - slot]`
    pub fn pre_previous_range(&self, t: DateTime<Utc>) -> TimeRange {
        LookbackWindow::new(
            self.pre_previous_slot_secs,
            self.pre_previous_slot_secs * i64::from(self.pre_previous_max_slots),
        )
        .range_before(t)
    }

    pub fn partial_daily_range(&self, t: DateTime<Utc>) -> TimeRange {
        LookbackWindow::new(0, self.partial_daily_window_secs).range_before(t)
    }
}
