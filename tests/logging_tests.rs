//! Unit tests for the logging functionality in the `w5-telemetry` crate.

use w5_telemetry::logging::{
    init_logger_with_level, log_debug, log_error, log_info, log_warn,
};
use w5_telemetry::util::logging::{log_bit_field, log_payload_hex};

/// Tests that the logging helpers do not panic once a logger is installed.
#[test]
fn test_logging() {
    init_logger_with_level(log::LevelFilter::Debug);
    log_error("This is an error message");
    log_warn("This is a warning message");
    log_info("This is an info message");
    log_debug("This is a debug message");
}

/// Tests that decode-step tracing handles long payloads and raw bits.
#[test]
fn test_decode_step_tracing() {
    init_logger_with_level(log::LevelFilter::Debug);
    log_payload_hex("Message #1", &"AB".repeat(200));
    log_payload_hex("Message #2", "C800555555555555");
    log_bit_field("counter", 0, 16, 100, &[true, true, false, false]);
    log_bit_field("h1", 16, 2, 1, &[]);
}

/// Tests that repeated initialization is tolerated.
#[test]
fn test_init_logger_twice() {
    init_logger_with_level(log::LevelFilter::Info);
    init_logger_with_level(log::LevelFilter::Warn);
}
