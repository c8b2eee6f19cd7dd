#![no_main]

use libfuzzer_sys::fuzz_target;
use w5_telemetry::util::hex::encode_hex_upper;
use w5_telemetry::{BitDecoder, Endianness};

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }

    // First two bytes pick the window, the rest is the payload
    let start = data[0] as usize;
    let length = data[1] as usize;
    let hex = encode_hex_upper(&data[2..]);

    for endianness in [Endianness::Big, Endianness::Little] {
        if let Ok(decoder) = BitDecoder::from_hex(&hex, endianness) {
            let _ = decoder.slice(start, length);
            let _ = decoder.value_unsigned(start, length);
            let _ = decoder.value_signed_low16(start, length);
            let _ = decoder.hex_slice(start, length);
        }
    }
});
