//! # Telemetry Error Handling
//!
//! This module defines the TelemetryError enum, which represents the different error
//! types that can occur in the w5-telemetry crate.

use crate::util::hex::HexError;
use thiserror::Error;

/// Represents the different error types that can occur while decoding and reconciling telemetry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TelemetryError {
    /// Indicates a payload that is not valid hexadecimal.
    #[error("Invalid hex payload: {0}")]
    InvalidHex(String),

    /// Indicates a payload with an odd number of hex digits.
    #[error("Odd number of hex digits in payload: {0}")]
    OddLength(usize),

    /// Indicates a numeric extraction wider than the supported integer width.
    #[error("Bit field too wide: {length} bits at offset {start}")]
    FieldTooWide { start: usize, length: usize },

    /// Indicates a failure reported by a lookup or persistence collaborator.
    #[error("Store error: {0}")]
    Store(String),

    /// Indicates an invalid processing configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TelemetryError {
    /// Whether the error describes malformed payload input rather than a downstream failure.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            TelemetryError::InvalidHex(_)
                | TelemetryError::OddLength(_)
                | TelemetryError::FieldTooWide { .. }
        )
    }
}

impl From<HexError> for TelemetryError {
    fn from(err: HexError) -> Self {
        match err {
            HexError::OddLength(len) => TelemetryError::OddLength(len),
            other => TelemetryError::InvalidHex(other.to_string()),
        }
    }
}
