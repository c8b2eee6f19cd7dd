//! # Decode-Step Logging Utilities
//!
//! Debug-level tracing of how a payload was taken apart: which bit window
//! produced which value. Output goes through the `log` facade, so it costs
//! nothing unless `RUST_LOG` enables `debug` for this crate.
//!
//! ## Usage
//!
//! ```rust
//! use w5_telemetry::util::logging::{log_bit_field, log_payload_hex};
//!
//! log_payload_hex("Message #17", "C800555555555555");
//! log_bit_field("counter", 0, 16, 100, &[]);
//! ```

use log::{debug, log_enabled, Level};

/// Limit hex output to prevent log spam on stitched multi-fragment payloads
const MAX_LOG_HEX_CHARS: usize = 128;

/// Log a raw hex payload for debugging
pub fn log_payload_hex(prefix: &str, hex: &str) {
    if !log_enabled!(Level::Debug) {
        return;
    }

    if hex.len() > MAX_LOG_HEX_CHARS {
        debug!(
            "{prefix}: {} ... ({} hex digits total)",
            &hex[..MAX_LOG_HEX_CHARS],
            hex.len()
        );
    } else {
        debug!("{prefix}: {hex}");
    }
}

/// Log one decoded bit field: name, window, value and the bits it came from
pub fn log_bit_field(name: &str, start: usize, length: usize, value: u64, bits: &[bool]) {
    if !log_enabled!(Level::Debug) {
        return;
    }

    if bits.is_empty() {
        debug!("field {name} [{start}, +{length}) = {value}");
    } else {
        debug!(
            "field {name} [{start}, +{length}) = {value} ({})",
            crate::util::hex::bits_to_string(bits)
        );
    }
}
