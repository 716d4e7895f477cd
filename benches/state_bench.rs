use chrono::{DateTime, Utc};
use criterion::{Criterion, criterion_group, criterion_main};
use litf_relay::core::state::RunStateMachine;
use litf_relay::models::RunId;
use litf_relay::protocol::{self, Event, Outcome};

fn ts() -> DateTime<Utc> {
    "2026-01-05T12:00:00Z".parse().unwrap()
}

/// Pre-encodes a realistic feed: one root suite, 64 tests with start and
/// result lines each.
fn wire_feed() -> Vec<String> {
    let root = vec!["root".to_string()];
    let mut lines = vec![protocol::encode(&Event::suite_start(root.clone(), ts()))];
    for i in 0..64 {
        let path = vec!["root".to_string(), format!("test_{i}")];
        lines.push(protocol::encode(&Event::test_start(path.clone(), ts())));
        lines.push(protocol::encode(&Event::test_result(
            path,
            ts(),
            Outcome::Passed,
            Some(4.2),
            None,
        )));
    }
    lines.push(protocol::encode(&Event::suite_end(root, ts())));
    lines
}

fn bench_decode(c: &mut Criterion) {
    let lines = wire_feed();
    c.bench_function("decode_feed", |b| {
        b.iter(|| {
            for line in &lines {
                let _ = protocol::decode(line).unwrap();
            }
        });
    });
}

fn bench_decode_and_apply(c: &mut Criterion) {
    let lines = wire_feed();
    c.bench_function("decode_and_apply_feed", |b| {
        b.iter(|| {
            let mut machine = RunStateMachine::new(RunId(1));
            let mut deltas = 0usize;
            for line in &lines {
                let event = protocol::decode(line).unwrap();
                deltas += machine.apply(&event).len();
            }
            deltas
        });
    });
}

criterion_group!(benches, bench_decode, bench_decode_and_apply);
criterion_main!(benches);
