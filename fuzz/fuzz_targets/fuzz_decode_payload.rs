#![no_main]

use libfuzzer_sys::fuzz_target;
use w5_telemetry::decode_payload;
use w5_telemetry::util::hex::encode_hex_upper;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes as a well-formed hex payload: every message type and
    // payload length must decode without panicking
    let hex = encode_hex_upper(data);
    let _ = decode_payload(&hex);

    // Truncated payloads exercise the clamped bit windows
    for len in [1usize, 2, 4, 5, 7] {
        if data.len() > len {
            let _ = decode_payload(&encode_hex_upper(&data[..len]));
        }
    }

    // Raw bytes as text: mostly malformed hex, must be rejected gracefully
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = decode_payload(text);
    }
});
