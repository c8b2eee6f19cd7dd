//! In-memory record store
//!
//! This module provides a store implementing both [`RecordLookup`] and
//! [`TelemetrySink`] over plain collections. It backs the integration tests
//! and the CLI `replay` command, and can be seeded from a JSON
//! [`StoreSnapshot`]. Clones share state, so one handle can be given to the
//! processor while another inspects what was written.

use super::{
    DeviceCalibration, DeviceTelemetry, MessageQuery, OverflowReset, ProcessingStatus,
    Provisioning, RecordLookup, SeriesPoint, TelemetrySink, TimeRange, WrapEvent,
};
use crate::error::TelemetryError;
use crate::protocol::{AggregationMode, Message, MessageType, RawRecord};
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Device registration entry of a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub device_id: String,
    pub provisioning: Provisioning,
    #[serde(default)]
    pub calibration: Option<DeviceCalibration>,
}

/// Stored overflow ratio of a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatioEntry {
    pub device_id: String,
    pub mode: AggregationMode,
    pub ratio: u64,
    /// First event time the ratio applies to; `None` means from the start
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

/// Record with its processing mark
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    #[serde(flatten)]
    pub record: RawRecord,
    #[serde(default)]
    pub status: Option<ProcessingStatus>,
}

/// Serializable seed state for [`MemoryStore`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub records: Vec<StoredRecord>,
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
    #[serde(default)]
    pub overflow_ratios: Vec<RatioEntry>,
}

/// Saved running total
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedTotal {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Everything written to the store, for inspection and CLI output
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreReport {
    pub totals: Vec<SavedTotal>,
    pub series: BTreeMap<String, Vec<SeriesPoint>>,
    pub statuses: BTreeMap<u64, ProcessingStatus>,
    pub overflow_ratios: Vec<RatioEntry>,
    pub wraps: Vec<WrapEvent>,
    pub resets: Vec<OverflowReset>,
    pub telemetry: Vec<DeviceTelemetry>,
    pub latest_values: BTreeMap<String, SeriesPoint>,
    pub calibration_events: Vec<(String, u64)>,
    pub requeued: Vec<(String, u64)>,
    pub fill_jobs: Vec<(String, DateTime<Utc>)>,
    pub registered_devices: Vec<String>,
}

type RatioHistory = BTreeMap<Option<DateTime<Utc>>, u64>;

#[derive(Debug, Default)]
struct StoreInner {
    records: Vec<StoredRecord>,
    devices: BTreeMap<String, DeviceEntry>,
    ratios: BTreeMap<(String, AggregationMode), RatioHistory>,
    wrap_keys: HashSet<(String, u64, AggregationMode)>,
    report: StoreReport,
    /// Writes left to succeed before the error is returned
    pending_error: Option<(usize, TelemetryError)>,
}

impl StoreInner {
    fn set_ratio(
        &mut self,
        device_id: &str,
        mode: AggregationMode,
        since: Option<DateTime<Utc>>,
        ratio: u64,
    ) {
        self.ratios
            .entry((device_id.to_string(), mode))
            .or_default()
            .insert(since, ratio);
    }

    fn ratio_at(&self, device_id: &str, mode: AggregationMode, at: DateTime<Utc>) -> u64 {
        self.ratios
            .get(&(device_id.to_string(), mode))
            .and_then(|history| history.range(..=Some(at)).next_back())
            .map_or(0, |(_, ratio)| *ratio)
    }
}

/// Shared in-memory store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store from a snapshot
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let store = Self::new();
        {
            let mut inner = store.lock();
            inner.records = snapshot.records;
            for device in snapshot.devices {
                inner.devices.insert(device.device_id.clone(), device);
            }
            for entry in snapshot.overflow_ratios {
                inner.set_ratio(&entry.device_id, entry.mode, entry.since, entry.ratio);
            }
        }
        store
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock for a write, failing if an injected error is due
    fn lock_for_write(&self) -> Result<MutexGuard<'_, StoreInner>, TelemetryError> {
        let mut inner = self.lock();
        match inner.pending_error.take() {
            Some((0, err)) => Err(err),
            Some((left, err)) => {
                inner.pending_error = Some((left - 1, err));
                Ok(inner)
            }
            None => Ok(inner),
        }
    }

    /// Make the next write fail with a store error
    pub fn set_next_error(&self, message: &str) {
        self.fail_write_after(0, message);
    }

    /// Let `writes` more writes succeed, then fail the one after with a store error
    pub fn fail_write_after(&self, writes: usize, message: &str) {
        self.lock().pending_error = Some((writes, TelemetryError::Store(message.to_string())));
    }

    pub fn insert_record(&self, record: RawRecord) {
        self.lock().records.push(StoredRecord {
            record,
            status: None,
        });
    }

    /// Insert a record that an earlier run already marked
    pub fn insert_marked_record(&self, record: RawRecord, status: ProcessingStatus) {
        self.lock().records.push(StoredRecord {
            record,
            status: Some(status),
        });
    }

    pub fn register_device_with(
        &self,
        device_id: &str,
        provisioning: Provisioning,
        calibration: Option<DeviceCalibration>,
    ) {
        self.lock().devices.insert(
            device_id.to_string(),
            DeviceEntry {
                device_id: device_id.to_string(),
                provisioning,
                calibration,
            },
        );
    }

    /// Seed a ratio that applies from the device's first message on
    pub fn set_overflow_ratio(&self, device_id: &str, mode: AggregationMode, ratio: u64) {
        self.lock().set_ratio(device_id, mode, None, ratio);
    }

    pub fn status_of(&self, incoming_id: u64) -> Option<ProcessingStatus> {
        self.lock()
            .records
            .iter()
            .find(|stored| stored.record.incoming_id == incoming_id)
            .and_then(|stored| stored.status)
    }

    /// Most recent ratio, regardless of event time
    pub fn stored_ratio(&self, device_id: &str, mode: AggregationMode) -> u64 {
        self.lock()
            .ratios
            .get(&(device_id.to_string(), mode))
            .and_then(|history| history.values().next_back().copied())
            .unwrap_or(0)
    }

    /// Snapshot of everything written so far
    pub fn report(&self) -> StoreReport {
        let inner = self.lock();
        let mut report = inner.report.clone();
        report.statuses = inner
            .records
            .iter()
            .filter_map(|stored| stored.status.map(|s| (stored.record.incoming_id, s)))
            .collect();
        report.overflow_ratios = inner
            .ratios
            .iter()
            .flat_map(|((device_id, mode), history)| {
                history.iter().map(move |(since, ratio)| RatioEntry {
                    device_id: device_id.clone(),
                    mode: *mode,
                    ratio: *ratio,
                    since: *since,
                })
            })
            .collect();
        report
    }

    pub fn totals(&self) -> Vec<SavedTotal> {
        self.lock().report.totals.clone()
    }

    pub fn series(&self, device_id: &str) -> Vec<SeriesPoint> {
        self.lock()
            .report
            .series
            .get(device_id)
            .cloned()
            .unwrap_or_default()
    }
}

/// Message type of a stored record; undecodable payloads count as invalid
fn record_type(record: &RawRecord) -> MessageType {
    Message::from_record(record.clone())
        .map(|msg| msg.message_type())
        .unwrap_or(MessageType::Invalid)
}

impl RecordLookup for MemoryStore {
    fn queued_devices(&self) -> Result<Vec<String>, TelemetryError> {
        let devices: BTreeSet<String> = self
            .lock()
            .records
            .iter()
            .filter(|stored| stored.status.is_none())
            .map(|stored| stored.record.device_id.clone())
            .collect();
        Ok(devices.into_iter().collect())
    }

    fn unprocessed_records(&self, device_id: &str) -> Result<Vec<RawRecord>, TelemetryError> {
        let mut records: Vec<RawRecord> = self
            .lock()
            .records
            .iter()
            .filter(|stored| stored.status.is_none() && stored.record.device_id == device_id)
            .map(|stored| stored.record.clone())
            .collect();
        records.sort_by_key(|r| (r.received_at, r.incoming_id));
        Ok(records)
    }

    fn find_messages(&self, query: &MessageQuery) -> Result<Vec<RawRecord>, TelemetryError> {
        let mut found: Vec<RawRecord> = self
            .lock()
            .records
            .iter()
            .map(|stored| &stored.record)
            .filter(|r| r.device_id == query.device_id && query.range.contains(&r.event_time))
            .filter(|r| query.types.contains(&record_type(r)))
            .cloned()
            .collect();

        if query.newest_first {
            found.sort_by(|a, b| b.event_time.cmp(&a.event_time));
        } else {
            found.sort_by_key(|r| r.event_time);
        }
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }

        debug!(
            "find_messages {} {:?}: {} match(es)",
            query.device_id,
            query.types,
            found.len()
        );
        Ok(found)
    }

    fn find_unprocessed_daily(
        &self,
        device_id: &str,
        range: &TimeRange,
    ) -> Result<Vec<RawRecord>, TelemetryError> {
        let mut found: Vec<RawRecord> = self
            .lock()
            .records
            .iter()
            .filter(|stored| stored.status == Some(ProcessingStatus::Partial))
            .map(|stored| &stored.record)
            .filter(|r| r.device_id == device_id && range.contains(&r.event_time))
            .filter(|r| record_type(r) == MessageType::Daily)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.event_time);
        Ok(found)
    }

    fn overflow_ratio(
        &self,
        device_id: &str,
        mode: AggregationMode,
        at: DateTime<Utc>,
    ) -> Result<u64, TelemetryError> {
        Ok(self.lock().ratio_at(device_id, mode, at))
    }

    fn is_wrap_registered(
        &self,
        device_id: &str,
        incoming_id: u64,
        mode: AggregationMode,
    ) -> Result<bool, TelemetryError> {
        Ok(self
            .lock()
            .wrap_keys
            .contains(&(device_id.to_string(), incoming_id, mode)))
    }

    fn device_provisioning(&self, device_id: &str) -> Result<Provisioning, TelemetryError> {
        Ok(self
            .lock()
            .devices
            .get(device_id)
            .map(|d| d.provisioning)
            .unwrap_or(Provisioning::Unregistered))
    }

    fn device_calibration(
        &self,
        device_id: &str,
    ) -> Result<Option<DeviceCalibration>, TelemetryError> {
        Ok(self.lock().devices.get(device_id).and_then(|d| d.calibration))
    }

    fn latest_value_timestamp(
        &self,
        device_id: &str,
    ) -> Result<Option<DateTime<Utc>>, TelemetryError> {
        Ok(self
            .lock()
            .report
            .latest_values
            .get(device_id)
            .map(|point| point.timestamp))
    }
}

impl TelemetrySink for MemoryStore {
    fn save_total(
        &self,
        device_id: &str,
        timestamp: DateTime<Utc>,
        value: f64,
    ) -> Result<(), TelemetryError> {
        self.lock_for_write()?.report.totals.push(SavedTotal {
            device_id: device_id.to_string(),
            timestamp,
            value,
        });
        Ok(())
    }

    fn save_series(&self, device_id: &str, points: &[SeriesPoint]) -> Result<(), TelemetryError> {
        self.lock_for_write()?
            .report
            .series
            .entry(device_id.to_string())
            .or_default()
            .extend_from_slice(points);
        Ok(())
    }

    fn mark_processed(
        &self,
        incoming_ids: &[u64],
        status: ProcessingStatus,
    ) -> Result<(), TelemetryError> {
        let mut inner = self.lock_for_write()?;
        for stored in inner
            .records
            .iter_mut()
            .filter(|stored| incoming_ids.contains(&stored.record.incoming_id))
        {
            stored.status = Some(status);
        }
        Ok(())
    }

    fn update_overflow_ratio(
        &self,
        device_id: &str,
        mode: AggregationMode,
        ratio: u64,
        effective_from: DateTime<Utc>,
    ) -> Result<(), TelemetryError> {
        self.lock_for_write()?
            .set_ratio(device_id, mode, Some(effective_from), ratio);
        Ok(())
    }

    fn register_wrap(&self, event: &WrapEvent) -> Result<(), TelemetryError> {
        let mut inner = self.lock_for_write()?;
        inner
            .wrap_keys
            .insert((event.device_id.clone(), event.incoming_id, event.mode));
        inner.report.wraps.push(event.clone());
        Ok(())
    }

    fn register_overflow_reset(&self, reset: &OverflowReset) -> Result<(), TelemetryError> {
        self.lock_for_write()?.report.resets.push(reset.clone());
        Ok(())
    }

    fn update_device_telemetry(&self, telemetry: &DeviceTelemetry) -> Result<(), TelemetryError> {
        self.lock_for_write()?.report.telemetry.push(telemetry.clone());
        Ok(())
    }

    fn update_latest_value(
        &self,
        device_id: &str,
        timestamp: DateTime<Utc>,
        value: f64,
    ) -> Result<(), TelemetryError> {
        self.lock_for_write()?
            .report
            .latest_values
            .insert(device_id.to_string(), SeriesPoint { timestamp, value });
        Ok(())
    }

    fn register_calibration_event(
        &self,
        device_id: &str,
        incoming_id: u64,
    ) -> Result<(), TelemetryError> {
        self.lock_for_write()?
            .report
            .calibration_events
            .push((device_id.to_string(), incoming_id));
        Ok(())
    }

    fn requeue_device(&self, device_id: &str, incoming_id: u64) -> Result<(), TelemetryError> {
        self.lock_for_write()?
            .report
            .requeued
            .push((device_id.to_string(), incoming_id));
        Ok(())
    }

    fn register_device(&self, device_id: &str) -> Result<(), TelemetryError> {
        let mut inner = self.lock_for_write()?;
        inner.devices.insert(
            device_id.to_string(),
            DeviceEntry {
                device_id: device_id.to_string(),
                provisioning: Provisioning::Ready,
                calibration: Some(DeviceCalibration::default()),
            },
        );
        inner.report.registered_devices.push(device_id.to_string());
        Ok(())
    }

    fn schedule_fill(&self, device_id: &str, from: DateTime<Utc>) -> Result<(), TelemetryError> {
        self.lock_for_write()?
            .report
            .fill_jobs
            .push((device_id.to_string(), from));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn record(id: u64, hex: &str, hours: i64) -> RawRecord {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::hours(hours);
        RawRecord {
            incoming_id: id,
            device_id: "modem-1".to_string(),
            hex_payload: hex.to_string(),
            received_at: ts,
            event_time: ts,
            iterator: 0,
        }
    }

    #[test]
    fn test_find_messages_filters_and_orders() {
        let store = MemoryStore::new();
        store.insert_record(record(1, "C800000000000000", 0));
        store.insert_record(record(2, "51E803000021AAAA", 5));
        store.insert_record(record(3, "C800000000000000", 10));
        store.insert_record(record(4, "7100000000000000", 12));

        let query = MessageQuery {
            device_id: "modem-1".to_string(),
            types: vec![MessageType::Daily, MessageType::Manual],
            range: TimeRange::between(record(0, "", 0).event_time, record(0, "", 10).event_time),
            newest_first: true,
            limit: Some(2),
        };
        let ids: Vec<u64> = store
            .find_messages(&query)
            .unwrap()
            .iter()
            .map(|r| r.incoming_id)
            .collect();
        assert_eq!(ids, vec![3, 2]);
    }

    #[test]
    fn test_injected_error_hits_next_write_only() {
        let store = MemoryStore::new();
        store.set_next_error("disk full");
        let ts = record(0, "", 0).event_time;
        assert_eq!(
            store.save_total("modem-1", ts, 1.0),
            Err(TelemetryError::Store("disk full".to_string()))
        );
        assert!(store.save_total("modem-1", ts, 1.0).is_ok());
        assert_eq!(store.totals().len(), 1);
    }

    #[test]
    fn test_snapshot_json_roundtrip_into_store() {
        let json = r#"{
            "records": [{
                "incoming_id": 7, "device_id": "modem-9", "hex_payload": "C800000000000000",
                "received_at": "2024-03-01T00:00:00Z", "event_time": "2024-03-01T00:00:00Z"
            }],
            "devices": [{ "device_id": "modem-9", "provisioning": "NotModerated" }],
            "overflow_ratios": [{ "device_id": "modem-9", "mode": "day", "ratio": 2 }]
        }"#;
        let snapshot: StoreSnapshot = serde_json::from_str(json).unwrap();
        let store = MemoryStore::from_snapshot(snapshot);

        assert_eq!(store.queued_devices().unwrap(), vec!["modem-9".to_string()]);
        assert_eq!(
            store.device_provisioning("modem-9").unwrap(),
            Provisioning::NotModerated
        );
        let at = record(0, "", 0).event_time;
        assert_eq!(store.overflow_ratio("modem-9", AggregationMode::Day, at).unwrap(), 2);
        assert_eq!(store.overflow_ratio("modem-9", AggregationMode::Week, at).unwrap(), 0);
    }

    #[test]
    fn test_ratio_history_by_event_time() {
        let store = MemoryStore::new();
        store.set_overflow_ratio("modem-1", AggregationMode::Day, 1);
        let wrap_at = record(0, "", 24).event_time;
        store
            .update_overflow_ratio("modem-1", AggregationMode::Day, 2, wrap_at)
            .unwrap();

        let before = wrap_at - Duration::seconds(1);
        assert_eq!(store.overflow_ratio("modem-1", AggregationMode::Day, before).unwrap(), 1);
        assert_eq!(store.overflow_ratio("modem-1", AggregationMode::Day, wrap_at).unwrap(), 2);
        assert_eq!(store.stored_ratio("modem-1", AggregationMode::Day), 2);

        let entries = store.report().overflow_ratios;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].since, None);
        assert_eq!(entries[1].since, Some(wrap_at));
    }

    #[test]
    fn test_fail_write_after_skips_writes() {
        let store = MemoryStore::new();
        store.fail_write_after(1, "late failure");
        let ts = record(0, "", 0).event_time;
        assert!(store.save_total("modem-1", ts, 1.0).is_ok());
        assert_eq!(
            store.save_total("modem-1", ts, 2.0),
            Err(TelemetryError::Store("late failure".to_string()))
        );
        assert!(store.save_total("modem-1", ts, 3.0).is_ok());
        assert_eq!(store.totals().len(), 2);
    }
}
