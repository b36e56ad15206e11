//! Throughput benchmarks

use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use netremote_core::{CommandRegistry, FramingPolicy, ProtocolEngine, RemoteCodec, SimulatedDevice};
use std::hint::black_box;
use std::sync::Arc;
use tokio_util::codec::Decoder;

const GET: &str = "{\"command\":\"get\",\"method\":\"audiogain\"}\r\n";
const SET: &str = "{\"command\":\"set\",\"method\":\"squelchthreshold\",\"value\":42}\r\n";

fn framing_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("framing");
    group.throughput(Throughput::Bytes(SET.len() as u64));

    for policy in [FramingPolicy::BraceBalance, FramingPolicy::LineTerminated] {
        group.bench_function(policy.name(), |b| {
            let mut codec = RemoteCodec::new(policy);
            b.iter(|| {
                let mut buf = BytesMut::from(black_box(SET).as_bytes());
                black_box(codec.decode(&mut buf).unwrap())
            })
        });
    }

    group.finish();
}

fn dispatch_benchmark(c: &mut Criterion) {
    let engine = ProtocolEngine::new(CommandRegistry::new(), Arc::new(SimulatedDevice::new()));

    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get", |b| {
        b.iter(|| black_box(engine.handle_frame(black_box(GET)).unwrap()))
    });

    group.bench_function("set", |b| {
        b.iter(|| black_box(engine.handle_frame(black_box(SET)).unwrap()))
    });

    group.bench_function("syntax_error", |b| {
        b.iter(|| black_box(engine.handle_frame(black_box("not json")).unwrap()))
    });

    group.finish();
}

criterion_group!(benches, framing_benchmark, dispatch_benchmark);
criterion_main!(benches);
