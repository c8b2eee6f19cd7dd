//! # Water5 Messages
//!
//! A [`RawRecord`] is what the ingestion layer stores for every received
//! transmission. A [`Message`] wraps one (or several stitched) records with a
//! little-endian [`BitDecoder`] and classifies the payload.
//!
//! ## Classification
//!
//! 1. Bit 7 equal to 0 marks a daily message.
//! 2. Otherwise the type nibble at bits [0,4) decides: 7 weekly, 6 info,
//!    5 manual, 4 cold reset, 8 extended info. Any other value is invalid.
//!
//! Payload length is not used: some firmware revisions send several types
//! with the same length.

use crate::constants::*;
use crate::error::TelemetryError;
use crate::protocol::bits::{BitDecoder, Endianness};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One received transmission as stored by the ingestion layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Unique id of the incoming record
    pub incoming_id: u64,
    pub device_id: String,
    /// Even-length hex payload
    pub hex_payload: String,
    /// Ingestion timestamp
    pub received_at: DateTime<Utc>,
    /// Device-reported timestamp; authoritative for ordering
    pub event_time: DateTime<Utc>,
    /// 4-bit rolling sequence number
    #[serde(default)]
    pub iterator: u8,
}

impl RawRecord {
    /// Iterator value `plus` steps ahead, modulo 16. Negative steps wrap forward.
    pub fn next_iterator(&self, plus: i32) -> u8 {
        (i32::from(self.iterator) + plus).rem_euclid(ITERATOR_MODULUS) as u8
    }
}

/// Water5 message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Daily,
    Weekly,
    Info,
    Manual,
    Reset,
    ExtInfo,
    Invalid,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Daily => "daily",
            MessageType::Weekly => "weekly",
            MessageType::Info => "info",
            MessageType::Manual => "manual",
            MessageType::Reset => "reset",
            MessageType::ExtInfo => "extinfo",
            MessageType::Invalid => "invalid",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a decoded payload.
///
/// Payloads too short to carry the daily flag bit are invalid.
pub fn classify(decoder: &BitDecoder) -> MessageType {
    let daily_flag = decoder.slice(DAILY_FLAG_BIT, 1);
    match daily_flag.first() {
        None => MessageType::Invalid,
        Some(false) => MessageType::Daily,
        Some(true) => {
            let nibble = decoder
                .value_unsigned(TYPE_NIBBLE_START, TYPE_NIBBLE_LEN)
                .unwrap_or(u64::MAX);
            match nibble {
                TYPE_NIBBLE_WEEKLY => MessageType::Weekly,
                TYPE_NIBBLE_INFO => MessageType::Info,
                TYPE_NIBBLE_MANUAL => MessageType::Manual,
                TYPE_NIBBLE_RESET => MessageType::Reset,
                TYPE_NIBBLE_EXTINFO => MessageType::ExtInfo,
                _ => MessageType::Invalid,
            }
        }
    }
}

/// A raw record decoded into an addressable little-endian bit sequence
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    record: RawRecord,
    /// Payload hex, grown by appended fragments
    hex: String,
    decoder: BitDecoder,
    appended_ids: Vec<u64>,
}

impl Message {
    /// Decode a record with the protocol's little-endian field order
    pub fn from_record(record: RawRecord) -> Result<Self, TelemetryError> {
        Self::with_endianness(record, Endianness::Little)
    }

    pub fn with_endianness(
        record: RawRecord,
        endianness: Endianness,
    ) -> Result<Self, TelemetryError> {
        let decoder = BitDecoder::from_hex(&record.hex_payload, endianness)?;
        Ok(Self {
            hex: record.hex_payload.clone(),
            record,
            decoder,
            appended_ids: Vec::new(),
        })
    }

    pub fn record(&self) -> &RawRecord {
        &self.record
    }

    pub fn incoming_id(&self) -> u64 {
        self.record.incoming_id
    }

    pub fn device_id(&self) -> &str {
        &self.record.device_id
    }

    pub fn event_time(&self) -> DateTime<Utc> {
        self.record.event_time
    }

    pub fn iterator(&self) -> u8 {
        self.record.iterator
    }

    /// Payload hex including appended fragments
    pub fn hex(&self) -> &str {
        &self.hex
    }

    pub fn decoder(&self) -> &BitDecoder {
        &self.decoder
    }

    pub fn message_type(&self) -> MessageType {
        classify(&self.decoder)
    }

    /// Stitch a continuation fragment onto this message, skipping its first `shift` bits
    pub fn append(&mut self, other: &Message, shift: usize) {
        let tail = self.decoder.append(&other.decoder, shift);
        self.hex.push_str(&crate::util::hex::bits_to_hex(&tail));
        self.appended_ids.push(other.incoming_id());
    }

    /// Ids of every record contributing to this message, own id first
    pub fn packet_ids(&self) -> Vec<u64> {
        std::iter::once(self.incoming_id())
            .chain(self.appended_ids.iter().copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: u64, hex: &str) -> RawRecord {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
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
    fn test_classify_types() {
        let cases = [
            ("C800555555555555", MessageType::Daily),
            ("7100000000000000", MessageType::Weekly),
            ("6100000000000000", MessageType::Info),
            ("5100000000000000", MessageType::Manual),
            ("4100000000", MessageType::Reset),
            ("8100000000000000", MessageType::ExtInfo),
            ("3100000000000000", MessageType::Invalid),
            ("", MessageType::Invalid),
        ];

        for (hex, expected) in cases {
            let msg = Message::from_record(record(1, hex)).unwrap();
            assert_eq!(msg.message_type(), expected, "payload {hex}");
        }
    }

    #[test]
    fn test_daily_flag_wins_over_nibble() {
        // Nibble 7 but bit 7 clear: still daily
        let msg = Message::from_record(record(1, "7000000000000000")).unwrap();
        assert_eq!(msg.message_type(), MessageType::Daily);
    }

    #[test]
    fn test_next_iterator_wraps() {
        let mut rec = record(1, "C800");
        rec.iterator = 15;
        assert_eq!(rec.next_iterator(1), 0);
        assert_eq!(rec.next_iterator(3), 2);
        rec.iterator = 0;
        assert_eq!(rec.next_iterator(-1), 15);
    }

    #[test]
    fn test_append_tracks_ids_and_hex() {
        let mut first = Message::from_record(record(10, "C800")).unwrap();
        let second = Message::from_record(record(11, "5555")).unwrap();
        first.append(&second, 0);

        assert_eq!(first.packet_ids(), vec![10, 11]);
        assert_eq!(first.decoder().bits(true), 32);
        assert_eq!(first.hex(), "C8005555");
    }
}
