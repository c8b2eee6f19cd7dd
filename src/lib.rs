//! # w5-telemetry - Water5 Meter Telemetry Processing
//!
//! The w5-telemetry crate decodes the densely packed payloads sent by Water5
//! battery-powered water meter modems and turns them into meter readings,
//! despite counters that wrap and messages that arrive late, twice, or never.
//!
//! ## Features
//!
//! - Bit-level little-endian payload access with hex round-trip
//! - Classification into daily, weekly, info, manual, reset and extended-info messages
//! - Per-type field extraction (counters, rate codes, voltage, temperature, commands)
//! - Per-device overflow ratio tracking for wrapping 15- and 27-bit counters
//! - Reconstruction of hourly and daily consumption from proportional rate codes
//! - Backlog processing against pluggable record-store collaborators
//! - Healing of partially processed daily messages once a weekly summary arrives
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! w5-telemetry = "1.0.0"
//! ```
//!
//! ```rust
//! use w5_telemetry::{process_backlog, MemoryStore, ProcessingConfig};
//!
//! let store = MemoryStore::new();
//! let summary = process_backlog(&store, &store, ProcessingConfig::default()).unwrap();
//! assert_eq!(summary.devices, 0);
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod processing;
pub mod protocol;
pub mod store;
pub mod util;

pub use crate::config::{LookbackWindow, ProcessingConfig};
pub use crate::error::TelemetryError;
pub use crate::logging::{init_logger, log_info};

// Protocol decoding
pub use protocol::{
    AggregationMode, BitDecoder, DecodedMessage, Endianness, Message, MessageType,
    OverflowRatios, RawRecord,
};

// Processing pipeline
pub use processing::{
    MessageOutcome, MessageReport, OverflowTracker, Processor, RunSummary, WrapCheck,
};

// Store collaborators
pub use store::{
    DeviceCalibration, MemoryStore, ProcessingStatus, Provisioning, RecordLookup, SeriesPoint,
    StoreReport, StoreSnapshot, TelemetrySink,
};

/// Decode a single hex payload without any device context.
///
/// # Arguments
/// * `hex` - Payload as an even-length hex string
///
/// # Returns
/// * `Ok(DecodedMessage)` - Type and fields of the payload
/// * `Err(TelemetryError)` - The payload is not valid hex
pub fn decode_payload(hex: &str) -> Result<DecodedMessage, TelemetryError> {
    let now = chrono::Utc::now();
    let record = RawRecord {
        incoming_id: 0,
        device_id: String::new(),
        hex_payload: hex.to_string(),
        received_at: now,
        event_time: now,
        iterator: 0,
    };
    Message::from_record(record)?.decode()
}

/// Process every queued record once.
///
/// # Arguments
/// * `lookup` - Read side of the record store
/// * `sink` - Write side of the record store
/// * `config` - Correlation windows and limits
///
/// # Returns
/// * `Ok(RunSummary)` - Per-message outcomes of the run
/// * `Err(TelemetryError)` - The queue itself could not be read
pub fn process_backlog(
    lookup: &dyn RecordLookup,
    sink: &dyn TelemetrySink,
    config: ProcessingConfig,
) -> Result<RunSummary, TelemetryError> {
    Processor::new(lookup, sink, config).run()
}
