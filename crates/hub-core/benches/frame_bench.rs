//! Criterion benchmarks for hub frame encoding and classification.
//!
//! Every inbound frame passes through `Envelope::decode` on the single read
//! loop, so its cost bounds how fast replies and notifications are routed.
//!
//! Run with:
//! ```bash
//! cargo bench --package hub-core --bench frame_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hub_core::protocol::commands::{
    ActivityRule, HoldActionParams, HoldStatus, RunActivityParams, HOLD_ACTION, RUN_ACTIVITY,
};
use hub_core::protocol::{CorrelationIdGenerator, DeviceIdentity, Envelope, OutboundCommand};

// ── Frame fixtures ────────────────────────────────────────────────────────────

const SMALL_REPLY: &str = r#"{"cmd":"harmony.engine?changeChannel","id":"a#b#c-123-7","code":200,"msg":"OK"}"#;

const PROGRESS: &str = r#"{"cmd":"harmony.engine?helpdiscretes","id":"a#b#c-123-8","code":100,"msg":"progress","data":{"deviceId":"51212","done":2,"total":5}}"#;

const TYPED_NOTIFICATION: &str = r#"{"type":"connect.stateDigest?notify","data":{"activityId":"100","activityStatus":2}}"#;

fn large_config_reply() -> String {
    let functions: Vec<String> = (0..40)
        .map(|i| {
            format!(
                r#"{{"name":"Fn{i}","label":"Function {i}","action":"{{\"command\":\"Fn{i}\",\"deviceId\":\"51212\"}}"}}"#
            )
        })
        .collect();
    let devices: Vec<String> = (0..12)
        .map(|i| {
            format!(
                r#"{{"id":"{i}","label":"Device {i}","model":"M{i}","controlGroup":[{{"name":"G","function":[{}]}}]}}"#,
                functions.join(",")
            )
        })
        .collect();
    format!(
        r#"{{"cmd":"vnd.logitech.harmony/vnd.logitech.harmony.engine?config","id":"a#b#c-123-0","code":200,"msg":"OK","data":{{"activity":[],"device":[{}]}}}}"#,
        devices.join(",")
    )
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    group.bench_function("reply_small", |b| {
        b.iter(|| Envelope::decode(black_box(SMALL_REPLY)).unwrap())
    });
    group.bench_function("progress_notification", |b| {
        b.iter(|| Envelope::decode(black_box(PROGRESS)).unwrap())
    });
    group.bench_function("typed_notification", |b| {
        b.iter(|| Envelope::decode(black_box(TYPED_NOTIFICATION)).unwrap())
    });

    // The payload stays raw, so a large config reply costs a scan, not a tree.
    let config = large_config_reply();
    group.bench_function("reply_config_large", |b| {
        b.iter(|| Envelope::decode(black_box(&config)).unwrap())
    });

    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    let ids = CorrelationIdGenerator::with_key(DeviceIdentity::new("bench", "linux", "x86_64"), 500);

    group.bench_function("hold_action", |b| {
        let params = HoldActionParams {
            action: r#"{"command":"VolumeUp","type":"IRCommand","deviceId":"51212"}"#.to_string(),
            status: HoldStatus::Hold,
            timestamp: 12_345,
        };
        b.iter(|| {
            OutboundCommand::new(HOLD_ACTION, ids.next_id(), black_box(&params))
                .unwrap()
                .encode()
                .unwrap()
        })
    });

    group.bench_function("run_activity", |b| {
        let params = RunActivityParams::new("100", ActivityRule::Start, 12_345);
        b.iter(|| {
            OutboundCommand::new(RUN_ACTIVITY, ids.next_id(), black_box(&params))
                .unwrap()
                .encode()
                .unwrap()
        })
    });

    group.finish();
}

criterion_group!(benches, bench_decode, bench_encode);
criterion_main!(benches);
