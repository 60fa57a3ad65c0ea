//! Benchmarks for broadcast fan-out
//!
//! Run with: cargo bench

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fanoutd::{
    BroadcastPayload, Broadcaster, ConnectionId, ConnectionRecord, ConnectionStore,
    DeliveryOutcome, DeliveryTransport, InMemoryConnectionStore,
};
use std::sync::Arc;

struct NullTransport;

#[async_trait::async_trait]
impl DeliveryTransport for NullTransport {
    async fn send(&self, _connection_id: &ConnectionId, payload: Bytes) -> DeliveryOutcome {
        black_box(payload);
        DeliveryOutcome::Delivered
    }
}

fn bench_broadcast(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
    let payload =
        BroadcastPayload::from_value(&serde_json::json!({"now": "2024-01-01T00:00:00Z"}))
            .unwrap();

    let mut group = c.benchmark_group("broadcast");
    for size in [10usize, 100, 1000] {
        let store = Arc::new(InMemoryConnectionStore::new());
        runtime.block_on(async {
            for _ in 0..size {
                store
                    .put(ConnectionRecord::new(ConnectionId::generate()))
                    .await
                    .unwrap();
            }
        });
        let broadcaster = Broadcaster::new(store, Arc::new(NullTransport));

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                runtime
                    .block_on(broadcaster.broadcast(black_box(&payload)))
                    .unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_broadcast);
criterion_main!(benches);
