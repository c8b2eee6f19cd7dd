//! # Bit-Addressable Payload Decoder
//!
//! Water5 payloads are densely packed: fields start at arbitrary bit offsets
//! and multi-byte fields are transmitted least-significant byte first. The
//! [`BitDecoder`] exposes a hex payload as an MSB-first bit sequence and cuts
//! windows out of it, optionally byte-swapping multi-byte windows.
//!
//! ## Little-endian windows
//!
//! For windows longer than 8 bits in little-endian mode the decoder widens
//! the window to a byte boundary, splits it into 8-bit groups, reverses the
//! group order and trims again. Sub-byte windows are never swapped. The
//! trimming differs for windows starting at offset 0 and at a non-zero
//! offset; field offsets of the protocol are calibrated against this exact
//! behaviour, so it is reproduced as-is.
//!
//! ```rust
//! use w5_telemetry::protocol::bits::{BitDecoder, Endianness};
//!
//! let decoder = BitDecoder::from_hex("C800", Endianness::Little).unwrap();
//! // 0x00C8 read little-endian
//! assert_eq!(decoder.value_unsigned(0, 16).unwrap(), 200);
//! assert_eq!(decoder.to_hex(), "C800");
//! ```

use crate::error::TelemetryError;
use crate::util::hex::{bits_to_hex, bytes_to_bits, decode_hex};
use serde::{Deserialize, Serialize};

/// Byte order applied to multi-byte windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Endianness {
    #[default]
    Big,
    Little,
}

/// Width of the leading iterator nibble
const ITERATOR_BITS: usize = 4;

/// Hex payload viewed as an addressable bit sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitDecoder {
    bits: Vec<bool>,
    endianness: Endianness,
}

/// Clamped window, mirroring substring semantics on short input
fn window(bits: &[bool], start: usize, length: usize) -> &[bool] {
    let from = start.min(bits.len());
    let to = from.saturating_add(length).min(bits.len());
    &bits[from..to]
}

impl BitDecoder {
    /// Decode a hex payload. An empty payload yields an empty decoder.
    pub fn from_hex(hex: &str, endianness: Endianness) -> Result<Self, TelemetryError> {
        let bytes = decode_hex(hex)?;
        Ok(Self {
            bits: bytes_to_bits(&bytes),
            endianness,
        })
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    pub fn as_bits(&self) -> &[bool] {
        &self.bits
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Number of bits, optionally excluding the leading iterator nibble
    pub fn bits(&self, with_iterator: bool) -> usize {
        if with_iterator {
            self.bits.len()
        } else {
            self.bits.len().saturating_sub(ITERATOR_BITS)
        }
    }

    /// Number of whole bytes, optionally excluding the leading iterator nibble
    pub fn bytes(&self, with_iterator: bool) -> usize {
        self.bits(with_iterator) / 8
    }

    /// Cut `length` bits starting at `start`, honouring the decoder's endianness.
    ///
    /// Windows running past the end of the payload are truncated.
    pub fn slice(&self, start: usize, length: usize) -> Vec<bool> {
        if self.endianness == Endianness::Big || length <= 8 {
            return window(&self.bits, start, length).to_vec();
        }

        let mut target_length = if length % 8 != 0 {
            8 * (length / 8 + 1)
        } else {
            length
        };

        let target_start = if start % 8 != 0 {
            target_length = length + start % 8;
            start - start % 8
        } else {
            start
        };

        let swapped: Vec<bool> = window(&self.bits, target_start, target_length)
            .chunks(8)
            .rev()
            .flatten()
            .copied()
            .collect();

        if start > 0 {
            return window(&swapped, 0, target_length).to_vec();
        }

        if length % 8 != 0 {
            // Keep the trailing `length` bits; on short input fewer remain
            let n = swapped.len();
            let from = if n >= length {
                n - length
            } else {
                n - (length - n).min(n)
            };
            return swapped[from..].to_vec();
        }

        swapped
    }

    /// Unsigned value of a window
    pub fn value_unsigned(&self, start: usize, length: usize) -> Result<u64, TelemetryError> {
        let bits = self.slice(start, length);
        if bits.len() > 64 {
            return Err(TelemetryError::FieldTooWide {
                start,
                length: bits.len(),
            });
        }

        Ok(bits.iter().fold(0u64, |acc, &bit| (acc << 1) | u64::from(bit)))
    }

    /// Signed value of a window, taken from its low 16 bits in two's complement.
    ///
    /// The 16-bit sign window applies regardless of `length`.
    pub fn value_signed_low16(&self, start: usize, length: usize) -> Result<i32, TelemetryError> {
        let num = (self.value_unsigned(start, length)? & 0xFFFF) as i32;
        if num & 0x8000 != 0 {
            Ok(-(0x1_0000 - num))
        } else {
            Ok(num)
        }
    }

    /// Window rendered as upper-case hex, left-padded to `ceil(length / 4)` digits.
    ///
    /// Legacy tooling printed these slices in lower case; compare
    /// case-insensitively when matching against such output.
    pub fn hex_slice(&self, start: usize, length: usize) -> String {
        let hex = bits_to_hex(&self.slice(start, length));
        let significant = hex.trim_start_matches('0');
        let significant = if significant.is_empty() { "0" } else { significant };

        let width = length.div_ceil(4);
        format!("{significant:0>width$}")
    }

    /// Whole payload as upper-case hex; an empty payload yields `"0"`
    pub fn to_hex(&self) -> String {
        bits_to_hex(&self.bits)
    }

    /// Concatenate the bits of `other`, starting `shift` bits into it, onto this sequence.
    ///
    /// The tail is read through `other`'s own slicing rules. Returns the appended bits.
    pub fn append(&mut self, other: &BitDecoder, shift: usize) -> Vec<bool> {
        let tail = other.slice(shift, other.bits(true).saturating_sub(shift));
        self.bits.extend_from_slice(&tail);
        tail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn le(hex: &str) -> BitDecoder {
        BitDecoder::from_hex(hex, Endianness::Little).unwrap()
    }

    #[test]
    fn test_big_endian_is_straight_substring() {
        let decoder = BitDecoder::from_hex("1234", Endianness::Big).unwrap();
        assert_eq!(decoder.value_unsigned(0, 16).unwrap(), 0x1234);
        assert_eq!(decoder.value_unsigned(4, 8).unwrap(), 0x23);
    }

    #[test]
    fn test_little_endian_swaps_bytes() {
        let decoder = le("12345678");
        assert_eq!(decoder.value_unsigned(0, 16).unwrap(), 0x3412);
        assert_eq!(decoder.value_unsigned(0, 32).unwrap(), 0x7856_3412);
        assert_eq!(decoder.value_unsigned(8, 16).unwrap(), 0x5634);
    }

    #[test]
    fn test_little_endian_short_windows_untouched() {
        let decoder = le("12345678");
        assert_eq!(decoder.value_unsigned(0, 8).unwrap(), 0x12);
        assert_eq!(decoder.value_unsigned(0, 4).unwrap(), 0x1);
        assert_eq!(decoder.value_unsigned(12, 4).unwrap(), 0x4);
    }

    #[test]
    fn test_little_endian_unaligned_length_at_zero_keeps_tail() {
        // 12-bit window at 0: widened to 16 bits, swapped to 0x3412, low 12 bits kept
        let decoder = le("1234");
        assert_eq!(decoder.value_unsigned(0, 12).unwrap(), 0x412);
    }

    #[test]
    fn test_little_endian_unaligned_start_keeps_widened_window() {
        // start 4, length 12: window [0,16) swapped, returned whole
        let decoder = le("1234");
        assert_eq!(decoder.slice(4, 12).len(), 16);
        assert_eq!(decoder.value_unsigned(4, 12).unwrap(), 0x3412);
    }

    #[test]
    fn test_signed_low16() {
        let decoder = BitDecoder::from_hex("FFFE", Endianness::Big).unwrap();
        assert_eq!(decoder.value_signed_low16(0, 16).unwrap(), -2);

        let decoder = BitDecoder::from_hex("01FFFE", Endianness::Big).unwrap();
        // Only the low 16 bits carry the sign
        assert_eq!(decoder.value_signed_low16(0, 24).unwrap(), -2);

        let decoder = BitDecoder::from_hex("7FFF", Endianness::Big).unwrap();
        assert_eq!(decoder.value_signed_low16(0, 16).unwrap(), 32767);
    }

    #[test]
    fn test_hex_slice_padding() {
        let decoder = BitDecoder::from_hex("00AB", Endianness::Big).unwrap();
        assert_eq!(decoder.hex_slice(0, 16), "00AB");
        assert_eq!(decoder.hex_slice(0, 8), "00");
        assert_eq!(decoder.hex_slice(8, 4), "A");
    }

    #[test]
    fn test_empty_payload_sentinel() {
        let decoder = le("");
        assert!(decoder.is_empty());
        assert_eq!(decoder.to_hex(), "0");
        assert_eq!(decoder.value_unsigned(0, 16).unwrap(), 0);
    }

    #[test]
    fn test_malformed_hex_rejected() {
        assert!(matches!(
            BitDecoder::from_hex("ABC", Endianness::Little),
            Err(TelemetryError::OddLength(3))
        ));
        assert!(matches!(
            BitDecoder::from_hex("ZZ", Endianness::Little),
            Err(TelemetryError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_field_too_wide() {
        let decoder = BitDecoder::from_hex(&"FF".repeat(10), Endianness::Big).unwrap();
        assert!(matches!(
            decoder.value_unsigned(0, 72),
            Err(TelemetryError::FieldTooWide { start: 0, length: 72 })
        ));
    }

    #[test]
    fn test_append_with_shift() {
        let mut first = BitDecoder::from_hex("AB", Endianness::Big).unwrap();
        let second = BitDecoder::from_hex("CD", Endianness::Big).unwrap();
        first.append(&second, 4);
        assert_eq!(first.bits(true), 12);
        assert_eq!(first.to_hex(), "ABD");
    }

    #[test]
    fn test_bit_and_byte_counts() {
        let decoder = le("C8005555");
        assert_eq!(decoder.bits(true), 32);
        assert_eq!(decoder.bits(false), 28);
        assert_eq!(decoder.bytes(true), 4);
        assert_eq!(decoder.bytes(false), 3);
    }
}
