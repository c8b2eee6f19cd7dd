//! # Water5 Field Extraction
//!
//! Per-type decoding of counters, rate codes and device telemetry. All
//! multi-byte fields are read little-endian through [`BitDecoder::slice`].
//!
//! ## Counter layout
//!
//! | Type | Counter | Width |
//! |------|---------|-------|
//! | Daily | [0,16) shifted right by one (bit 0 of the value is the daily flag) | 15 |
//! | Weekly | low 24 bits at [8,24) plus the last 3 bits of the daily-rate field at [32,24) | 27 |
//! | Info, Manual, Reset, ExtInfo | [8,32) | 32 |
//!
//! Daily counters always count in tens. Weekly counters count in tens only
//! when the nibble at [4,4) equals 1. Other counters count single impulses and
//! are truncated to tens when a multiplied counter is requested.
//!
//! [`BitDecoder::slice`]: crate::protocol::bits::BitDecoder::slice

use crate::constants::*;
use crate::error::TelemetryError;
use crate::protocol::message::{Message, MessageType};
use crate::util::hex::bits_to_string;
use crate::util::logging::log_bit_field;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggregation granularity a counter belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMode {
    Day,
    Week,
}

impl AggregationMode {
    pub const ALL: [AggregationMode; 2] = [AggregationMode::Day, AggregationMode::Week];

    /// Width of the on-wire counter in this mode
    pub fn counter_bits(&self) -> u32 {
        match self {
            AggregationMode::Day => DAY_COUNTER_BITS,
            AggregationMode::Week => WEEK_COUNTER_BITS,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationMode::Day => "day",
            AggregationMode::Week => "week",
        }
    }
}

impl fmt::Display for AggregationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overflow ratios implied by an absolute counter, one per aggregation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OverflowRatios {
    pub day: u64,
    pub week: u64,
}

impl OverflowRatios {
    /// `floor(total / (2^counter_bits * 10))` for both modes
    pub fn from_absolute_total(total: u64) -> Self {
        let ratio = |mode: AggregationMode| total / ((1u64 << mode.counter_bits()) * COARSE_MULTIPLIER);
        Self {
            day: ratio(AggregationMode::Day),
            week: ratio(AggregationMode::Week),
        }
    }

    pub fn get(&self, mode: AggregationMode) -> u64 {
        match mode {
            AggregationMode::Day => self.day,
            AggregationMode::Week => self.week,
        }
    }
}

/// Battery voltage from its packed byte: 1 bit of whole volts, 7 bits of hundredths, offset 2 V
pub fn decode_voltage(raw: u8) -> f64 {
    2.0 + f64::from(raw >> 7) + f64::from(raw & 0x7F) / 100.0
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyFields {
    pub counter: u64,
    /// 24 hourly rate codes, index 0 = 24 hours ago, index 23 = most recent hour
    pub rates: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeeklyFields {
    pub counter: u64,
    /// 7 daily rate codes, index 0 = oldest day, index 6 = most recent day
    pub rates: Vec<u8>,
    pub voltage_raw: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoFields {
    pub counter: u64,
    pub message_counter: u64,
    pub power_level: u8,
    pub max_consumption: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtInfoFields {
    pub hardware_rev: u8,
    pub software_rev: u8,
    pub crc: u8,
    pub temperature: u8,
    pub voltage_raw: u8,
    pub power_level: u8,
    pub max_consumption: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualFields {
    pub counter: u64,
    pub command: u8,
    /// Absent on early firmware that filled spare bytes with 0xAA
    pub temperature: Option<u8>,
    pub voltage_raw: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetFields {
    pub counter: u64,
}

/// Flattened view of a decoded message, for logs and the CLI
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedMessage {
    pub incoming_ids: Vec<u64>,
    pub message_type: MessageType,
    pub bit_string: String,
    pub counter: u64,
    pub multiplier: u64,
    pub counter_multiplied: u64,
    pub rates: Vec<u8>,
    pub voltage: Option<f64>,
    pub temperature: Option<u8>,
    pub command: Option<u8>,
}

impl Message {
    /// Read a field and trace it at debug level
    fn field(&self, name: &str, start: usize, length: usize) -> Result<u64, TelemetryError> {
        let value = self.decoder().value_unsigned(start, length)?;
        log_bit_field(name, start, length, value, &[]);
        Ok(value)
    }

    fn byte_field(&self, name: &str, start: usize) -> Result<u8, TelemetryError> {
        Ok(self.field(name, start, 8)? as u8)
    }

    /// Raw on-wire counter, in the message type's own units
    pub fn counter(&self) -> Result<u64, TelemetryError> {
        let decoder = self.decoder();
        match self.message_type() {
            MessageType::Daily => {
                let value = decoder.value_unsigned(DAILY_COUNTER_START, DAILY_COUNTER_LEN)? >> 1;
                log_bit_field(
                    "counter",
                    DAILY_COUNTER_START,
                    DAILY_COUNTER_LEN,
                    value,
                    &decoder.slice(DAILY_COUNTER_START, DAILY_COUNTER_LEN),
                );
                Ok(value)
            }
            MessageType::Weekly => {
                let low = decoder.slice(WEEKLY_COUNTER_LOW_START, WEEKLY_COUNTER_LOW_LEN);
                let rates = decoder.slice(DAILY_RATES_START, DAILY_RATES_LEN);
                let high = &rates[rates.len().saturating_sub(WEEKLY_COUNTER_HIGH_BITS)..];

                let bits: Vec<bool> = high.iter().chain(low.iter()).copied().collect();
                let value = bits.iter().fold(0u64, |acc, &bit| (acc << 1) | u64::from(bit));
                log_bit_field(
                    "counter",
                    WEEKLY_COUNTER_LOW_START,
                    bits.len(),
                    value,
                    &bits,
                );
                Ok(value)
            }
            _ => {
                let value = decoder.value_unsigned(FULL_COUNTER_START, FULL_COUNTER_LEN)?;
                log_bit_field(
                    "counter",
                    FULL_COUNTER_START,
                    FULL_COUNTER_LEN,
                    value,
                    &decoder.slice(FULL_COUNTER_START, FULL_COUNTER_LEN),
                );
                Ok(value)
            }
        }
    }

    /// Units of one counter step
    pub fn multiplier(&self) -> Result<u64, TelemetryError> {
        match self.message_type() {
            MessageType::Daily => Ok(COARSE_MULTIPLIER),
            MessageType::Weekly => {
                let flag = self
                    .decoder()
                    .value_unsigned(WEEKLY_MULTIPLIER_FLAG_START, WEEKLY_MULTIPLIER_FLAG_LEN)?;
                Ok(if flag == 1 { COARSE_MULTIPLIER } else { 1 })
            }
            _ => Ok(1),
        }
    }

    /// Counter in impulses, normalized to tens for single-impulse counters
    pub fn counter_multiplied(&self) -> Result<u64, TelemetryError> {
        let multiplier = self.multiplier()?;
        let counter = self.counter()?;
        if multiplier > 1 {
            Ok(counter * multiplier)
        } else {
            Ok(counter / COARSE_MULTIPLIER * COARSE_MULTIPLIER)
        }
    }

    /// Split a rate field into `count` codes of `width` bits, oldest first.
    ///
    /// Codes are transmitted most recent first.
    fn rates(&self, prefix: &str, start: usize, length: usize, width: usize, count: usize) -> Vec<u8> {
        let bits = self.decoder().slice(start, length);
        let mut rates = vec![0u8; count];

        for n in 0..count {
            let pos = n * width;
            let from = pos.min(bits.len());
            let to = (pos + width).min(bits.len());
            let code = bits[from..to]
                .iter()
                .fold(0u8, |acc, &bit| (acc << 1) | u8::from(bit));
            log_bit_field(
                &format!("{prefix}{}", n + 1),
                start + pos,
                width,
                u64::from(code),
                &bits[from..to],
            );
            rates[count - 1 - n] = code;
        }

        rates
    }

    /// 24 two-bit hourly rate codes of a daily message
    pub fn hourly_rates(&self) -> Vec<u8> {
        self.rates(
            "h",
            HOURLY_RATES_START,
            HOURLY_RATES_LEN,
            HOURLY_RATE_BITS,
            HOURS_PER_DAY,
        )
    }

    /// 7 three-bit daily rate codes of a weekly message
    pub fn daily_rates(&self) -> Vec<u8> {
        self.rates(
            "d",
            DAILY_RATES_START,
            DAILY_RATES_LEN,
            DAILY_RATE_BITS,
            DAYS_PER_WEEK,
        )
    }

    pub fn daily_fields(&self) -> Result<DailyFields, TelemetryError> {
        Ok(DailyFields {
            counter: self.counter()?,
            rates: self.hourly_rates(),
        })
    }

    pub fn weekly_fields(&self) -> Result<WeeklyFields, TelemetryError> {
        Ok(WeeklyFields {
            counter: self.counter()?,
            rates: self.daily_rates(),
            voltage_raw: self.byte_field("voltage", WEEKLY_VOLTAGE_START)?,
        })
    }

    pub fn info_fields(&self) -> Result<InfoFields, TelemetryError> {
        Ok(InfoFields {
            counter: self.counter()?,
            message_counter: self.field("messcounter", 40, 16)?,
            power_level: self.field("power_level", 56, 2)? as u8,
            max_consumption: self.field("maxconsumption", 58, 6)? as u8,
        })
    }

    pub fn ext_info_fields(&self) -> Result<ExtInfoFields, TelemetryError> {
        Ok(ExtInfoFields {
            hardware_rev: self.byte_field("hardware_rev", 8)?,
            software_rev: self.byte_field("software_rev", 16)?,
            crc: self.byte_field("crc", 24)?,
            temperature: self.byte_field("temperature", 32)?,
            voltage_raw: self.byte_field("voltage", 40)?,
            power_level: self.byte_field("power_level", 48)?,
            max_consumption: self.byte_field("maxconsumption", 56)?,
        })
    }

    pub fn manual_fields(&self) -> Result<ManualFields, TelemetryError> {
        let counter = self.counter()?;
        let command = self.byte_field("command", 40)?;

        let temperature = self.field("temperature", 48, 8)?;
        let (temperature, voltage_raw) = if temperature != SPARE_BYTE_FILLER {
            (Some(temperature as u8), Some(self.byte_field("voltage", 56)?))
        } else {
            (None, None)
        };

        Ok(ManualFields {
            counter,
            command,
            temperature,
            voltage_raw,
        })
    }

    pub fn reset_fields(&self) -> Result<ResetFields, TelemetryError> {
        Ok(ResetFields {
            counter: self.counter()?,
        })
    }

    /// Decode everything the message type carries into a flat summary
    pub fn decode(&self) -> Result<DecodedMessage, TelemetryError> {
        let message_type = self.message_type();
        let mut decoded = DecodedMessage {
            incoming_ids: self.packet_ids(),
            message_type,
            bit_string: bits_to_string(self.decoder().as_bits()),
            counter: 0,
            multiplier: self.multiplier()?,
            counter_multiplied: 0,
            rates: Vec::new(),
            voltage: None,
            temperature: None,
            command: None,
        };

        if message_type == MessageType::Invalid {
            return Ok(decoded);
        }

        match message_type {
            MessageType::Daily => decoded.rates = self.hourly_rates(),
            MessageType::Weekly => {
                let fields = self.weekly_fields()?;
                decoded.rates = fields.rates;
                decoded.voltage = Some(decode_voltage(fields.voltage_raw));
            }
            MessageType::ExtInfo => {
                let fields = self.ext_info_fields()?;
                decoded.voltage = Some(decode_voltage(fields.voltage_raw));
                decoded.temperature = Some(fields.temperature);
            }
            MessageType::Manual => {
                let fields = self.manual_fields()?;
                decoded.command = Some(fields.command);
                decoded.temperature = fields.temperature;
                decoded.voltage = fields.voltage_raw.map(decode_voltage);
            }
            _ => {}
        }

        decoded.counter = self.counter()?;
        decoded.counter_multiplied = self.counter_multiplied()?;
        Ok(decoded)
    }
}
