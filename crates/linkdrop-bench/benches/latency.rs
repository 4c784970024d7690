//! Latency benchmarks for Linkdrop.
//!
//! These benchmarks measure the time from `send_link` to the frame reaching
//! the device side of a live session.

use criterion::{criterion_group, criterion_main, Criterion};
use linkdrop_bench::NullSink;
use linkdrop_core::{DeliverySession, DeviceKey, LinkRouter, NewLink, PresenceRegistry};
use linkdrop_transport::memory;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

/// Benchmark send to receive through a live session.
fn bench_session_delivery(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_delivery");
    let rt = runtime();

    group.bench_function("single_device", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let registry = Arc::new(PresenceRegistry::new());
                let sink = Arc::new(NullSink::default());
                let router = LinkRouter::new(registry.clone(), sink.clone());

                let session = DeliverySession::new(DeviceKey::new(1, 2), registry, sink);
                let (conn, mut peer) = memory::pair();
                tokio::spawn(session.run(conn));
                peer.recv().await.unwrap();

                let start = Instant::now();
                for _ in 0..iters {
                    router
                        .send_link(1, NewLink::new(1, 2, "https://example.com"))
                        .await
                        .unwrap();
                    peer.recv().await.unwrap();
                }
                start.elapsed()
            })
        });
    });

    group.bench_function("ten_devices_round_robin", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let registry = Arc::new(PresenceRegistry::new());
                let sink = Arc::new(NullSink::default());
                let router = LinkRouter::new(registry.clone(), sink.clone());

                let mut peers = Vec::new();
                for device in 1..=10 {
                    let key = DeviceKey::new(1, device);
                    let session = DeliverySession::new(key, registry.clone(), sink.clone());
                    let (conn, mut peer) = memory::pair();
                    tokio::spawn(session.run(conn));
                    peer.recv().await.unwrap();
                    peers.push(peer);
                }

                let mut elapsed = Duration::ZERO;
                for i in 0..iters {
                    let device = (i % 10) as usize;
                    let start = Instant::now();
                    router
                        .send_link(1, NewLink::new(1, device as i64 + 1, "https://example.com"))
                        .await
                        .unwrap();
                    peers[device].recv().await.unwrap();
                    elapsed += start.elapsed();
                }
                elapsed
            })
        });
    });

    group.finish();
}

/// Benchmark session setup and teardown.
fn bench_session_lifecycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_lifecycle");
    let rt = runtime();

    group.bench_function("connect_disconnect", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let registry = Arc::new(PresenceRegistry::new());
                let sink = Arc::new(NullSink::default());

                let start = Instant::now();
                for _ in 0..iters {
                    let key = DeviceKey::new(1, 2);
                    let session = DeliverySession::new(key, registry.clone(), sink.clone());
                    let (conn, mut peer) = memory::pair();
                    let task = tokio::spawn(session.run(conn));
                    peer.recv().await.unwrap();
                    peer.disconnect();
                    task.await.unwrap();
                }
                start.elapsed()
            })
        });
    });

    group.finish();
}

criterion_group!(benches, bench_session_delivery, bench_session_lifecycle);
criterion_main!(benches);
