//! Codec benchmarks for parley-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use parley_protocol::{codec, Command, Envelope};

fn message(len: usize) -> Envelope {
    Envelope::new("message", "x".repeat(len))
        .with_user("alice")
        .with_conversation("general")
}

fn bench_encode_small(c: &mut Criterion) {
    let envelope = message(64);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("small_64B", |b| b.iter(|| codec::encode(black_box(&envelope))));
    group.finish();
}

fn bench_decode_small(c: &mut Criterion) {
    let encoded = codec::encode(&message(64)).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("small_64B", |b| {
        b.iter(|| codec::decode(black_box(&encoded)))
    });
    group.finish();
}

fn bench_decode_command(c: &mut Criterion) {
    let encoded = codec::encode(&message(256)).unwrap();

    c.bench_function("decode_command_256B", |b| {
        b.iter(|| {
            let envelope = codec::decode(black_box(&encoded)).unwrap();
            Command::try_from(envelope).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_encode_small,
    bench_decode_small,
    bench_decode_command
);
criterion_main!(benches);
