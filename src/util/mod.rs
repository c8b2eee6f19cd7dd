//! # Utility Modules
//!
//! This module provides common utility functions used throughout the
//! w5-telemetry crate: hex encoding/decoding and decode-step logging.

pub mod hex;
pub mod logging;

// Re-export commonly used functions
pub use hex::{bits_to_hex, bytes_to_bits, decode_hex, encode_hex_upper, HexError};
pub use logging::{log_bit_field, log_payload_hex};
