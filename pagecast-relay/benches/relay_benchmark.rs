use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pagecast_relay::broadcast::Broadcaster;
use pagecast_relay::protocol::PageId;
use pagecast_relay::queue::{outbound_queue, OutboundReceiver, OverflowPolicy, QueueConfig};
use pagecast_relay::registry::ConnectionRegistry;
use pagecast_relay::storage::PageStore;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn bench_publish_fanout_100(c: &mut Criterion) {
    let rt = runtime();
    let page = PageId::new("bench").unwrap();
    let registry = Arc::new(ConnectionRegistry::new());
    let broadcaster = Broadcaster::new(registry.clone(), OverflowPolicy::Disconnect);

    let mut receivers: Vec<OutboundReceiver> = rt.block_on(async {
        let mut receivers = Vec::with_capacity(100);
        for _ in 0..100 {
            let config = QueueConfig {
                capacity: 1024,
                ..QueueConfig::default()
            };
            let (handle, rx) = outbound_queue(page.clone(), config);
            registry.join(&page, handle).await;
            receivers.push(rx);
        }
        receivers
    });
    let payload = Bytes::from(vec![b'x'; 1024]);

    c.bench_function("publish_1KB_to_100_clients", |b| {
        b.iter(|| {
            rt.block_on(async {
                let report = broadcaster
                    .publish(black_box(&page), payload.clone(), None)
                    .await;
                // Drain so queues never fill up and trigger eviction.
                for rx in receivers.iter_mut() {
                    black_box(rx.recv().await);
                }
                black_box(report);
            })
        })
    });
}

fn bench_save_memory(c: &mut Criterion) {
    let rt = runtime();
    let store = PageStore::in_memory();
    let page = PageId::new("bench").unwrap();
    let content = vec![b'a'; 4096];

    c.bench_function("save_4KB_memory", |b| {
        b.iter(|| rt.block_on(store.save(black_box(&page), black_box(&content))))
    });
}

fn bench_save_file(c: &mut Criterion) {
    let rt = runtime();
    let dir = tempfile::tempdir().unwrap();
    let store = PageStore::open(dir.path()).unwrap();
    let page = PageId::new("bench").unwrap();
    let content = vec![b'a'; 4096];

    c.bench_function("save_4KB_file", |b| {
        b.iter(|| rt.block_on(store.save(black_box(&page), black_box(&content))))
    });
}

fn bench_load_file(c: &mut Criterion) {
    let rt = runtime();
    let dir = tempfile::tempdir().unwrap();
    let store = PageStore::open(dir.path()).unwrap();
    let page = PageId::new("bench").unwrap();
    rt.block_on(store.save(&page, &vec![b'a'; 4096]));

    c.bench_function("load_4KB_file", |b| {
        b.iter(|| black_box(rt.block_on(store.load(black_box(&page)))))
    });
}

criterion_group!(
    benches,
    bench_publish_fanout_100,
    bench_save_memory,
    bench_save_file,
    bench_load_file,
);
criterion_main!(benches);
