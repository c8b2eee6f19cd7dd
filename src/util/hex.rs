//! # Hex Encoding/Decoding Utilities
//!
//! Hex helpers shared by the bit decoder and the CLI. Payloads arrive from the
//! ingestion layer as hex strings; this module turns them into bytes and back
//! using the `hex` crate and converts bit sequences to their hex form.
//!
//! ## Usage
//!
//! ```rust
//! use w5_telemetry::util::hex::{decode_hex, bits_to_hex};
//!
//! let bytes = decode_hex("C800").unwrap();
//! assert_eq!(bytes, vec![0xC8, 0x00]);
//!
//! assert_eq!(bits_to_hex(&[true, false, true, false]), "A");
//! ```

use thiserror::Error;

/// Errors that can occur during hex operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HexError {
    #[error("Invalid hex character: {0}")]
    InvalidCharacter(char),

    #[error("Odd number of hex characters: {0}")]
    OddLength(usize),

    #[error("Hex decoding error: {0}")]
    DecodeError(String),
}

/// Encode bytes to uppercase hex string
pub fn encode_hex_upper(data: &[u8]) -> String {
    hex::encode_upper(data)
}

/// Decode hex string to bytes
///
/// Accepts both uppercase and lowercase hex characters. An empty string
/// decodes to an empty vector; callers decide what an empty payload means.
pub fn decode_hex(hex_str: &str) -> Result<Vec<u8>, HexError> {
    if hex_str.len() % 2 != 0 {
        return Err(HexError::OddLength(hex_str.len()));
    }

    if let Some(bad) = hex_str.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(HexError::InvalidCharacter(bad));
    }

    hex::decode(hex_str).map_err(|e| HexError::DecodeError(e.to_string()))
}

/// Convert a bit sequence to upper-case hex, left-padded to `ceil(len / 4)` digits.
///
/// An empty sequence yields the sentinel `"0"`.
pub fn bits_to_hex(bits: &[bool]) -> String {
    if bits.is_empty() {
        return "0".to_string();
    }

    // Left-pad to a whole number of nibbles so the value is preserved
    let pad = (4 - bits.len() % 4) % 4;
    let padded = std::iter::repeat(false).take(pad).chain(bits.iter().copied());

    let mut out = String::with_capacity((bits.len() + pad) / 4);
    let mut nibble = 0u8;
    for (i, bit) in padded.enumerate() {
        nibble = (nibble << 1) | u8::from(bit);
        if i % 4 == 3 {
            out.push(char::from_digit(u32::from(nibble), 16).unwrap_or('0').to_ascii_uppercase());
            nibble = 0;
        }
    }
    out
}

/// Expand bytes into MSB-first bits
pub fn bytes_to_bits(data: &[u8]) -> Vec<bool> {
    data.iter()
        .flat_map(|byte| (0..8).rev().map(move |shift| (byte >> shift) & 1 == 1))
        .collect()
}

/// Render bits as a `0`/`1` string for logs
pub fn bits_to_string(bits: &[bool]) -> String {
    bits.iter().map(|&b| if b { '1' } else { '0' }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_case_insensitive() {
        assert_eq!(decode_hex("abCD").unwrap(), vec![0xAB, 0xCD]);
        assert_eq!(encode_hex_upper(&[0xAB, 0xCD]), "ABCD");
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(decode_hex("1"), Err(HexError::OddLength(1)));
        assert_eq!(decode_hex("GG"), Err(HexError::InvalidCharacter('G')));
        assert_eq!(decode_hex("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_bits_to_hex_padding() {
        assert_eq!(bits_to_hex(&[]), "0");
        assert_eq!(bits_to_hex(&[true]), "1");
        assert_eq!(bits_to_hex(&[true, false, false, false, false]), "10");
        assert_eq!(bits_to_hex(&bytes_to_bits(&[0x0F, 0xA0])), "0FA0");
    }

    #[test]
    fn test_bits_to_string() {
        assert_eq!(bits_to_string(&bytes_to_bits(&[0xC8])), "11001000");
    }
}
