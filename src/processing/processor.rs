//! # Processing Orchestrator
//!
//! Drains the backlog of unprocessed records device by device. Each device's
//! records are handled oldest first by event time, since correlation and wrap
//! detection compare a message with the ones before it.
//!
//! Every message ends with exactly one [`MessageOutcome`]:
//!
//! - invalid payloads are marked processed and skipped
//! - daily and weekly messages of devices awaiting moderation are deferred
//!   (left unmarked for a later run)
//! - a store failure aborts the current message only; it stays unmarked and
//!   the next message of the device is handled

use crate::config::ProcessingConfig;
use crate::constants::NOT_REPORTED_MAX_CONSUMPTION;
use crate::error::TelemetryError;
use crate::processing::correlate::Correlator;
use crate::processing::overflow::{OverflowTracker, WrapCheck};
use crate::processing::reconstruct::{reconstruct, round_to_hour, walk_back_totals};
use crate::protocol::{decode_voltage, AggregationMode, Message, MessageType, RawRecord};
use crate::store::{
    DeviceCalibration, DeviceTelemetry, ProcessingStatus, Provisioning, RecordLookup,
    TelemetrySink,
};
use crate::util::logging::log_payload_hex;
use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;

/// Final state of one message after a processing pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MessageOutcome {
    Processed,
    /// Total saved, sub-interval values missing until a weekly message heals them
    PartiallyProcessed,
    SkippedInvalid,
    Deferred,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageReport {
    pub device_id: String,
    pub incoming_ids: Vec<u64>,
    pub message_type: MessageType,
    pub outcome: MessageOutcome,
}

/// Per-outcome counts of a run, plus every message report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub devices: usize,
    pub processed: usize,
    pub partially_processed: usize,
    pub skipped_invalid: usize,
    pub deferred: usize,
    pub failed: usize,
    pub messages: Vec<MessageReport>,
}

impl RunSummary {
    fn record(&mut self, report: MessageReport) {
        match report.outcome {
            MessageOutcome::Processed => self.processed += 1,
            MessageOutcome::PartiallyProcessed => self.partially_processed += 1,
            MessageOutcome::SkippedInvalid => self.skipped_invalid += 1,
            MessageOutcome::Deferred => self.deferred += 1,
            MessageOutcome::Failed(_) => self.failed += 1,
        }
        self.messages.push(report);
    }

    /// Outcome of the message containing `incoming_id`, if it was seen
    pub fn outcome_of(&self, incoming_id: u64) -> Option<&MessageOutcome> {
        self.messages
            .iter()
            .find(|m| m.incoming_ids.contains(&incoming_id))
            .map(|m| &m.outcome)
    }
}

/// Runs the decode, correlate, reconcile and persist pipeline over the backlog
pub struct Processor<'a> {
    lookup: &'a dyn RecordLookup,
    sink: &'a dyn TelemetrySink,
    config: ProcessingConfig,
}

impl<'a> Processor<'a> {
    pub fn new(
        lookup: &'a dyn RecordLookup,
        sink: &'a dyn TelemetrySink,
        config: ProcessingConfig,
    ) -> Self {
        Self {
            lookup,
            sink,
            config,
        }
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    /// Process every queued device.
    ///
    /// Fails only if the list of queued devices cannot be read. A device
    /// whose setup fails is logged and skipped.
    pub fn run(&self) -> Result<RunSummary, TelemetryError> {
        let devices = self.lookup.queued_devices()?;
        let mut summary = RunSummary::default();

        if devices.is_empty() {
            info!("Queue is empty");
            return Ok(summary);
        }

        for device_id in &devices {
            if let Err(e) = self.process_device(device_id, &mut summary) {
                error!("{device_id}: device skipped: {e}");
            }
            summary.devices += 1;
        }

        info!(
            "Run finished: {} processed, {} partial, {} invalid, {} deferred, {} failed",
            summary.processed,
            summary.partially_processed,
            summary.skipped_invalid,
            summary.deferred,
            summary.failed
        );
        Ok(summary)
    }

    /// Process the backlog of one device, appending reports to `summary`
    pub fn process_device(
        &self,
        device_id: &str,
        summary: &mut RunSummary,
    ) -> Result<(), TelemetryError> {
        let mut provisioning = self.lookup.device_provisioning(device_id)?;
        if provisioning == Provisioning::Unregistered {
            info!("{device_id}: registering device");
            self.sink.register_device(device_id)?;
            provisioning = Provisioning::Ready;
        }

        let calibration = match self.lookup.device_calibration(device_id)? {
            Some(calibration) => calibration,
            None => {
                warn!("{device_id}: no calibration found, using defaults");
                DeviceCalibration::default()
            }
        };

        let mut records = self.lookup.unprocessed_records(device_id)?;
        records.sort_by_key(|r| r.event_time);

        let total = records.len();
        for (n, record) in records.into_iter().enumerate() {
            info!(
                "[ {} / {} ] {device_id}: message #{}",
                n + 1,
                total,
                record.incoming_id
            );
            let report = self.process_record(record, provisioning, &calibration);
            summary.record(report);
        }
        Ok(())
    }

    fn process_record(
        &self,
        record: RawRecord,
        provisioning: Provisioning,
        calibration: &DeviceCalibration,
    ) -> MessageReport {
        let device_id = record.device_id.clone();
        let incoming_id = record.incoming_id;

        let msg = match Message::from_record(record) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("{device_id}: message #{incoming_id} has an undecodable payload: {e}");
                let outcome = self.discard(&[incoming_id]);
                return MessageReport {
                    device_id,
                    incoming_ids: vec![incoming_id],
                    message_type: MessageType::Invalid,
                    outcome,
                };
            }
        };

        log_payload_hex(&format!("Message #{incoming_id}"), msg.hex());
        let message_type = msg.message_type();
        let incoming_ids = msg.packet_ids();
        debug!("{device_id}: message #{incoming_id} type {message_type}");

        let outcome = if message_type == MessageType::Invalid {
            info!("{device_id}: message #{incoming_id} is invalid");
            self.discard(&incoming_ids)
        } else if provisioning == Provisioning::NotModerated
            && matches!(message_type, MessageType::Daily | MessageType::Weekly)
        {
            info!("{device_id}: device awaits moderation, deferring #{incoming_id}");
            MessageOutcome::Deferred
        } else {
            match self
                .dispatch(&msg, calibration)
                .and_then(|status| self.sink.mark_processed(&incoming_ids, status).map(|_| status))
            {
                Ok(ProcessingStatus::Processed) => MessageOutcome::Processed,
                Ok(ProcessingStatus::Partial) => MessageOutcome::PartiallyProcessed,
                Err(e) => {
                    error!("{device_id}: message #{incoming_id} failed: {e}");
                    MessageOutcome::Failed(e.to_string())
                }
            }
        };

        MessageReport {
            device_id,
            incoming_ids,
            message_type,
            outcome,
        }
    }

    /// Mark an undecodable or invalid message as done
    fn discard(&self, incoming_ids: &[u64]) -> MessageOutcome {
        match self
            .sink
            .mark_processed(incoming_ids, ProcessingStatus::Processed)
        {
            Ok(()) => MessageOutcome::SkippedInvalid,
            Err(e) => {
                error!("failed to mark invalid message {incoming_ids:?}: {e}");
                MessageOutcome::Failed(e.to_string())
            }
        }
    }

    fn dispatch(
        &self,
        msg: &Message,
        calibration: &DeviceCalibration,
    ) -> Result<ProcessingStatus, TelemetryError> {
        match msg.message_type() {
            MessageType::Daily => self.process_daily(msg, calibration),
            MessageType::Weekly => self.process_weekly(msg, calibration),
            MessageType::Info => self.process_info(msg, calibration),
            MessageType::Manual => self.process_manual(msg, calibration),
            MessageType::Reset => self.process_reset(msg),
            MessageType::ExtInfo => self.process_ext_info(msg),
            MessageType::Invalid => Ok(ProcessingStatus::Processed),
        }
    }

    fn tracker(&self) -> OverflowTracker<'_> {
        OverflowTracker::new(self.lookup, self.sink)
    }

    fn correlator(&self) -> Correlator<'_> {
        Correlator::new(self.lookup, &self.config)
    }

    fn log_wrap(&self, msg: &Message, check: WrapCheck, basis: &str) {
        match check {
            WrapCheck::NoWrap => {}
            WrapCheck::Registered { ratio } => info!(
                "{}: overflow detected ({basis}), ratio now {ratio}",
                msg.device_id()
            ),
            WrapCheck::AlreadyRegistered => info!(
                "{}: overflow ({basis}) has already been registered before",
                msg.device_id()
            ),
        }
    }

    /// Save a running total at the message hour and advance the latest-value pointer
    fn save_total(
        &self,
        msg: &Message,
        impulses: f64,
        calibration: &DeviceCalibration,
    ) -> Result<(), TelemetryError> {
        let timestamp = round_to_hour(msg.event_time());
        let value = calibration.to_real_value(impulses);
        info!("{}: calculated total value {value}", msg.device_id());

        self.update_latest_if_newer(msg.device_id(), timestamp, value)?;
        self.sink.save_total(msg.device_id(), timestamp, value)
    }

    fn update_latest_if_newer(
        &self,
        device_id: &str,
        timestamp: DateTime<Utc>,
        value: f64,
    ) -> Result<(), TelemetryError> {
        let latest = self.lookup.latest_value_timestamp(device_id)?;
        if latest.map_or(true, |latest| latest < timestamp) {
            self.sink.update_latest_value(device_id, timestamp, value)?;
        }
        Ok(())
    }

    /// Persist a reconstructed series ending at `msg`'s hour
    fn save_series(
        &self,
        msg: &Message,
        step: Duration,
        total: f64,
        consumption: &[f64],
        calibration: &DeviceCalibration,
    ) -> Result<(), TelemetryError> {
        let points = walk_back_totals(
            round_to_hour(msg.event_time()),
            step,
            total,
            consumption,
            calibration,
        );
        self.sink.save_series(msg.device_id(), &points)
    }

    fn process_daily(
        &self,
        msg: &Message,
        calibration: &DeviceCalibration,
    ) -> Result<ProcessingStatus, TelemetryError> {
        let device_id = msg.device_id();
        let tracker = self.tracker();
        let correlator = self.correlator();

        // Reference totals use the ratio in force at the reference's own event time
        let previous = correlator.previous_message(msg, AggregationMode::Day)?;
        let previous_total = match &previous {
            Some(p) => Some(tracker.full_total(p, AggregationMode::Day)?),
            None => None,
        };

        let mut pre_previous = None;
        let mut pre_previous_total = None;
        match previous_total {
            Some(total) => info!("{device_id}: previous total {total}"),
            None => {
                info!("{device_id}: previous total was not found");
                pre_previous = correlator.pre_previous_message(msg)?;
                if let Some(pp) = &pre_previous {
                    let total = tracker.full_total(pp, AggregationMode::Day)?;
                    info!("{device_id}: pre-previous total {total}");
                    pre_previous_total = Some(total);
                } else {
                    info!("{device_id}: even pre-previous message was not found");
                }
            }
        }

        if let Some(reference) = &previous {
            let check = tracker.check_wrap(msg, reference, AggregationMode::Day)?;
            self.log_wrap(msg, check, "previous message");
        } else if let Some(reference) = &pre_previous {
            let check = tracker.check_wrap(msg, reference, AggregationMode::Day)?;
            self.log_wrap(msg, check, "pre-previous message");
        } else if let Some(last) = correlator.last_message(msg, MessageType::Daily)? {
            // A wrap may have happened during a long outage
            let check = tracker.check_wrap(msg, &last, AggregationMode::Day)?;
            self.log_wrap(msg, check, "last message from device");
        } else {
            debug!("{device_id}: no earlier daily message, wrap check skipped");
        }

        let mut new_total = tracker.full_total(msg, AggregationMode::Day)?;
        info!("{device_id}: current total {new_total}");

        let hour = round_to_hour(msg.event_time());
        let mut fill_from = hour;

        if let Some(previous_total) = previous_total {
            let consumption = if new_total < previous_total {
                warn!(
                    "{device_id}: total went back from {previous_total} to {new_total}, keeping previous"
                );
                new_total = previous_total;
                0
            } else {
                new_total - previous_total
            };
            info!("{device_id}: consumption {consumption}");

            let hourly = reconstruct(&msg.hourly_rates(), consumption as f64);
            self.save_series(msg, Duration::hours(1), new_total as f64, &hourly, calibration)?;
            fill_from = hour - Duration::days(1);
        } else if let Some(pre_previous_total) = pre_previous_total {
            let consumption = new_total as i128 - pre_previous_total as i128;
            info!("{device_id}: consumption {consumption} (based on pre-previous message)");
        }

        self.save_total(msg, new_total as f64, calibration)?;
        self.sink.schedule_fill(device_id, fill_from)?;

        if previous.is_none() && pre_previous.is_none() {
            Ok(ProcessingStatus::Partial)
        } else {
            Ok(ProcessingStatus::Processed)
        }
    }

    fn process_weekly(
        &self,
        msg: &Message,
        calibration: &DeviceCalibration,
    ) -> Result<ProcessingStatus, TelemetryError> {
        let device_id = msg.device_id();
        let tracker = self.tracker();
        let correlator = self.correlator();
        let fields = msg.weekly_fields()?;

        let voltage = decode_voltage(fields.voltage_raw);
        info!("{device_id}: voltage {voltage:.2}");
        self.sink.update_device_telemetry(&DeviceTelemetry {
            device_id: device_id.to_string(),
            timestamp: msg.event_time(),
            voltage,
            temperature: None,
            firmware_rev: None,
        })?;

        let partial_dailies = correlator.partially_processed_daily(msg)?;
        let previous = correlator.previous_message(msg, AggregationMode::Week)?;
        let previous_total = match &previous {
            Some(p) => Some(tracker.full_total(p, AggregationMode::Week)?),
            None => None,
        };

        let reference = match previous {
            Some(p) => Some(p),
            None => correlator.last_message(msg, MessageType::Weekly)?,
        };
        if let Some(reference) = &reference {
            let check = tracker.check_wrap(msg, reference, AggregationMode::Week)?;
            self.log_wrap(msg, check, "weekly reference");
        }

        let new_total = tracker.full_total(msg, AggregationMode::Week)?;

        let Some(previous_total) = previous_total else {
            info!("{device_id}: previous weekly total was not found, cannot check daily totals");
            info!("{device_id}: current total {new_total}");
            self.save_total(msg, new_total as f64, calibration)?;
            return Ok(ProcessingStatus::Processed);
        };

        info!("{device_id}: previous total {previous_total}, current total {new_total}");
        let consumption = new_total as f64 - previous_total as f64;
        info!("{device_id}: week consumption {consumption}");

        let weekly = reconstruct(&fields.rates, consumption);
        self.save_series(msg, Duration::days(1), new_total as f64, &weekly, calibration)?;

        let mut healed = Vec::new();
        for (day, daily) in &partial_dailies {
            let Some(day_consumption) = usize::try_from(*day).ok().and_then(|d| weekly.get(d)) else {
                debug!(
                    "{device_id}: partial daily #{} falls outside the week (day {day})",
                    daily.incoming_id()
                );
                continue;
            };

            let day_total = tracker.full_total(daily, AggregationMode::Day)?;
            let hourly = reconstruct(&daily.hourly_rates(), *day_consumption);
            self.save_series(daily, Duration::hours(1), day_total as f64, &hourly, calibration)?;
            healed.extend(daily.packet_ids());
            info!("{device_id}: restored hourly values for week day #{day}");
        }

        if healed.is_empty() {
            debug!("{device_id}: no partially processed daily messages to restore");
        } else {
            self.sink
                .mark_processed(&healed, ProcessingStatus::Processed)?;
        }

        self.save_total(msg, new_total as f64, calibration)?;
        Ok(ProcessingStatus::Processed)
    }

    fn process_info(
        &self,
        msg: &Message,
        calibration: &DeviceCalibration,
    ) -> Result<ProcessingStatus, TelemetryError> {
        let device_id = msg.device_id();
        let fields = msg.info_fields()?;

        self.tracker().reconcile_absolute(msg, fields.counter)?;

        if fields.max_consumption != NOT_REPORTED_MAX_CONSUMPTION {
            info!(
                "{device_id}: max consumption so far {} l/min",
                fields.max_consumption
            );
        }

        let real_value = calibration.to_real_value(fields.counter as f64);
        info!(
            "{device_id}: counter {} ({real_value}), message counter {}",
            fields.counter, fields.message_counter
        );

        self.update_latest_if_newer(device_id, msg.event_time(), real_value)?;
        Ok(ProcessingStatus::Processed)
    }

    fn process_ext_info(&self, msg: &Message) -> Result<ProcessingStatus, TelemetryError> {
        let fields = msg.ext_info_fields()?;
        let voltage = decode_voltage(fields.voltage_raw);
        info!(
            "{}: voltage {voltage:.2}, temperature {}",
            msg.device_id(),
            fields.temperature
        );

        self.sink.update_device_telemetry(&DeviceTelemetry {
            device_id: msg.device_id().to_string(),
            timestamp: msg.event_time(),
            voltage,
            temperature: Some(fields.temperature),
            firmware_rev: Some(fields.software_rev),
        })?;
        Ok(ProcessingStatus::Processed)
    }

    fn process_manual(
        &self,
        msg: &Message,
        calibration: &DeviceCalibration,
    ) -> Result<ProcessingStatus, TelemetryError> {
        let device_id = msg.device_id();
        let fields = msg.manual_fields()?;

        self.tracker().reconcile_absolute(msg, fields.counter)?;

        if let (Some(temperature), Some(voltage_raw)) = (fields.temperature, fields.voltage_raw) {
            let voltage = decode_voltage(voltage_raw);
            info!("{device_id}: voltage {voltage:.2}, temperature {temperature}");
            self.sink.update_device_telemetry(&DeviceTelemetry {
                device_id: device_id.to_string(),
                timestamp: msg.event_time(),
                voltage,
                temperature: Some(temperature),
                firmware_rev: None,
            })?;
        }

        if self.config.is_calibration_command(fields.command) {
            info!("{device_id}: calibration value {}", fields.counter);
            self.save_total(msg, fields.counter as f64, calibration)?;
            self.sink
                .register_calibration_event(device_id, msg.incoming_id())?;
            self.sink.requeue_device(device_id, msg.incoming_id())?;
        } else {
            warn!(
                "{device_id}: unauthorised magnet usage detected, command #{}",
                fields.command
            );
        }

        Ok(ProcessingStatus::Processed)
    }

    fn process_reset(&self, msg: &Message) -> Result<ProcessingStatus, TelemetryError> {
        let fields = msg.reset_fields()?;
        info!(
            "{}: cold reset with counter value {}",
            msg.device_id(),
            fields.counter
        );
        Ok(ProcessingStatus::Processed)
    }
}
