//! Codec benchmarks for linkdrop-protocol.

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use linkdrop_protocol::{codec, Link, ServerFrame};

fn link_frame(url_len: usize) -> ServerFrame {
    ServerFrame::link(Link {
        id: 42,
        user_id: 1,
        from_device_id: 1,
        to_device_id: 2,
        url: format!("https://example.com/{}", "a".repeat(url_len)),
        created_at: Utc::now(),
    })
}

fn bench_encode_link(c: &mut Criterion) {
    let frame = link_frame(64);
    let encoded = codec::encode(&frame).unwrap();

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("link_64B_url", |b| b.iter(|| codec::encode(black_box(&frame))));
    group.finish();
}

fn bench_decode_link(c: &mut Criterion) {
    let encoded = codec::encode(&link_frame(64)).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("link_64B_url", |b| {
        b.iter(|| codec::decode(black_box(&encoded)))
    });
    group.finish();
}

fn bench_encode_long_url(c: &mut Criterion) {
    let frame = link_frame(2048);

    c.bench_function("encode_link_2KB_url", |b| {
        b.iter(|| codec::encode(black_box(&frame)).unwrap())
    });
}

criterion_group!(
    benches,
    bench_encode_link,
    bench_decode_link,
    bench_encode_long_url
);
criterion_main!(benches);
