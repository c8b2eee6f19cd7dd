//! Collaborator interfaces for record lookup and persistence
//!
//! The processing core never talks to a database directly. It reads raw
//! records, overflow ratios and device calibration through [`RecordLookup`]
//! and emits every side effect through [`TelemetrySink`]. Both are passed to
//! the [`Processor`](crate::processing::Processor) explicitly.
//!
//! Overflow ratios are versioned by event time. A ratio change takes effect
//! at the event time of the message that caused it, so a message processed
//! again later is still read against the ratio that was in force when it was
//! sent.
//!
//! Implementations report failures as [`TelemetryError::Store`]; the
//! processor aborts the current message on such an error and moves on.

pub mod memory;

use crate::error::TelemetryError;
use crate::protocol::{AggregationMode, MessageType, OverflowRatios, RawRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::{Bound, RangeBounds};

pub use memory::{MemoryStore, StoreReport, StoreSnapshot};

/// Processing mark stored against incoming records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessingStatus {
    /// Fully handled, including invalid payloads that were discarded
    Processed,
    /// Running total saved but sub-interval values missing; eligible for backfill
    Partial,
}

/// Registration state of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provisioning {
    Ready,
    /// Registered but awaiting moderation; daily and weekly messages are deferred
    NotModerated,
    Unregistered,
}

/// Calibration constants of the metering endpoint attached to a device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceCalibration {
    /// Impulse count of the modem when it was attached to the meter
    pub modem_initial_value: f64,
    /// Litres per impulse
    pub units_per_impulse: f64,
    /// Meter reading in m³ when the modem was attached
    pub meter_initial_value: f64,
}

impl Default for DeviceCalibration {
    fn default() -> Self {
        Self {
            modem_initial_value: 0.0,
            units_per_impulse: 1.0,
            meter_initial_value: 0.0,
        }
    }
}

impl DeviceCalibration {
    /// Convert an impulse total into a meter reading in m³
    pub fn to_real_value(&self, impulses: f64) -> f64 {
        let counted = (impulses - self.modem_initial_value).max(0.0);
        counted * self.units_per_impulse / 1000.0 + self.meter_initial_value
    }
}

/// Event-time range for record queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Bound<DateTime<Utc>>,
    pub end: Bound<DateTime<Utc>>,
}

impl TimeRange {
    /// Both ends inclusive
    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            start: Bound::Included(from),
            end: Bound::Included(to),
        }
    }

    pub fn at_or_before(to: DateTime<Utc>) -> Self {
        Self {
            start: Bound::Unbounded,
            end: Bound::Included(to),
        }
    }

    pub fn before(to: DateTime<Utc>) -> Self {
        Self {
            start: Bound::Unbounded,
            end: Bound::Excluded(to),
        }
    }

    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        (self.start, self.end).contains(ts)
    }
}

/// Query for previously received messages of a device
#[derive(Debug, Clone, PartialEq)]
pub struct MessageQuery {
    pub device_id: String,
    pub types: Vec<MessageType>,
    pub range: TimeRange,
    /// Order by event time, newest first
    pub newest_first: bool,
    pub limit: Option<usize>,
}

/// One point of a consumption series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// A counter wrap registered against the message that revealed it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrapEvent {
    pub device_id: String,
    pub incoming_id: u64,
    pub mode: AggregationMode,
    pub event_time: DateTime<Utc>,
}

/// Ratios overwritten from an absolute counter report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverflowReset {
    pub device_id: String,
    pub incoming_id: u64,
    pub event_time: DateTime<Utc>,
    pub absolute_total: u64,
    pub ratios: OverflowRatios,
}

/// Battery and firmware telemetry reported by a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceTelemetry {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub voltage: f64,
    pub temperature: Option<u8>,
    pub firmware_rev: Option<u8>,
}

/// Read side of the record store
pub trait RecordLookup {
    /// Devices with unprocessed records
    fn queued_devices(&self) -> Result<Vec<String>, TelemetryError>;

    /// Unprocessed records of a device in arrival order
    fn unprocessed_records(&self, device_id: &str) -> Result<Vec<RawRecord>, TelemetryError>;

    fn find_messages(&self, query: &MessageQuery) -> Result<Vec<RawRecord>, TelemetryError>;

    /// Daily records marked [`ProcessingStatus::Partial`] within `range`
    fn find_unprocessed_daily(
        &self,
        device_id: &str,
        range: &TimeRange,
    ) -> Result<Vec<RawRecord>, TelemetryError>;

    /// Overflow ratio in force for a message with event time `at`
    fn overflow_ratio(
        &self,
        device_id: &str,
        mode: AggregationMode,
        at: DateTime<Utc>,
    ) -> Result<u64, TelemetryError>;

    fn is_wrap_registered(
        &self,
        device_id: &str,
        incoming_id: u64,
        mode: AggregationMode,
    ) -> Result<bool, TelemetryError>;

    fn device_provisioning(&self, device_id: &str) -> Result<Provisioning, TelemetryError>;

    fn device_calibration(&self, device_id: &str)
        -> Result<Option<DeviceCalibration>, TelemetryError>;

    /// Timestamp of the device's latest known value, if any
    fn latest_value_timestamp(&self, device_id: &str)
        -> Result<Option<DateTime<Utc>>, TelemetryError>;
}

/// Write side of the record store
pub trait TelemetrySink {
    fn save_total(&self, device_id: &str, timestamp: DateTime<Utc>, value: f64)
        -> Result<(), TelemetryError>;

    fn save_series(&self, device_id: &str, points: &[SeriesPoint]) -> Result<(), TelemetryError>;

    fn mark_processed(&self, incoming_ids: &[u64], status: ProcessingStatus)
        -> Result<(), TelemetryError>;

    /// Set the ratio applying to messages with event time `effective_from` or later
    fn update_overflow_ratio(
        &self,
        device_id: &str,
        mode: AggregationMode,
        ratio: u64,
        effective_from: DateTime<Utc>,
    ) -> Result<(), TelemetryError>;

    /// Record a wrap as handled so reprocessing the same message does not count it twice
    fn register_wrap(&self, event: &WrapEvent) -> Result<(), TelemetryError>;

    fn register_overflow_reset(&self, reset: &OverflowReset) -> Result<(), TelemetryError>;

    fn update_device_telemetry(&self, telemetry: &DeviceTelemetry) -> Result<(), TelemetryError>;

    /// Move the device's latest-known-value pointer
    fn update_latest_value(
        &self,
        device_id: &str,
        timestamp: DateTime<Utc>,
        value: f64,
    ) -> Result<(), TelemetryError>;

    fn register_calibration_event(&self, device_id: &str, incoming_id: u64)
        -> Result<(), TelemetryError>;

    /// Schedule the device's backlog for another processing pass
    fn requeue_device(&self, device_id: &str, incoming_id: u64) -> Result<(), TelemetryError>;

    /// Create a device and its metering endpoint with default calibration
    fn register_device(&self, device_id: &str) -> Result<(), TelemetryError>;

    /// Ask the surrounding system to fill value gaps from `from` onwards
    fn schedule_fill(&self, _device_id: &str, _from: DateTime<Utc>) -> Result<(), TelemetryError> {
        Ok(())
    }
}
