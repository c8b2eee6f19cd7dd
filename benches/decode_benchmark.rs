use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use w5_telemetry::processing::reconstruct;
use w5_telemetry::{Message, RawRecord};

fn message(hex: &str) -> Message {
    let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    Message::from_record(RawRecord {
        incoming_id: 1,
        device_id: "bench".to_string(),
        hex_payload: hex.to_string(),
        received_at: ts,
        event_time: ts,
        iterator: 0,
    })
    .unwrap()
}

fn benchmark_decode_daily(c: &mut Criterion) {
    c.bench_function("decode_daily", |b| {
        b.iter(|| {
            let msg = message(black_box("C800E4B1C2D3A596"));
            black_box(msg.decode().unwrap())
        })
    });
}

fn benchmark_decode_weekly(c: &mut Criterion) {
    let msg = message("7101000005000080");
    c.bench_function("weekly_fields", |b| {
        b.iter(|| black_box(black_box(&msg).weekly_fields().unwrap()))
    });
}

fn benchmark_reconstruct(c: &mut Criterion) {
    let rates: Vec<u8> = (0..24).map(|i| (i % 4) as u8).collect();
    c.bench_function("reconstruct_hourly", |b| {
        b.iter(|| black_box(reconstruct(black_box(&rates), black_box(1234.567))))
    });
}

criterion_group!(
    benches,
    benchmark_decode_daily,
    benchmark_decode_weekly,
    benchmark_reconstruct
);
criterion_main!(benches);
