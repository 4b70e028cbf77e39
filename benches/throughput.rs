//! Throughput Benchmark for mcwire
//!
//! Measures command-line parsing, response encoding, statistics counter
//! submission and the reference store under various workloads.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use mcwire::protocol::{parse_command, Item, Response};
use mcwire::stats::Counter;
use mcwire::storage::MemoryStore;
use std::sync::Arc;
use std::time::Duration;

/// Benchmark command-line parsing
fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_single", |b| {
        b.iter(|| black_box(parse_command(black_box(b"get user:1234")).unwrap()));
    });

    group.bench_function("get_multi", |b| {
        let line = (0..32)
            .map(|i| format!("user:{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let line = format!("get {}", line);
        b.iter(|| black_box(parse_command(black_box(line.as_bytes())).unwrap()));
    });

    group.bench_function("set", |b| {
        b.iter(|| {
            black_box(parse_command(black_box(b"set session:abc 42 3600 1024 noreply")).unwrap())
        });
    });

    group.finish();
}

/// Benchmark response encoding
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(1));

    let small = Response::item(Item::new("key", 0, "small_value"));
    let large = Response::item(Item::new("key", 0, Bytes::from("x".repeat(64 * 1024))));
    let bulk = Response::bulk(
        (0..32)
            .map(|i| Some(Response::item(Item::new(format!("key:{}", i), 0, "value"))))
            .collect(),
    );

    let mut buf = Vec::with_capacity(128 * 1024);

    group.bench_function("value_small", |b| {
        b.iter(|| {
            buf.clear();
            black_box(small.serialize_into(&mut buf));
        });
    });

    group.bench_function("value_64k", |b| {
        b.iter(|| {
            buf.clear();
            black_box(large.serialize_into(&mut buf));
        });
    });

    group.bench_function("bulk_32", |b| {
        b.iter(|| {
            buf.clear();
            black_box(bulk.serialize_into(&mut buf));
        });
    });

    group.finish();
}

/// Benchmark statistics counter submission
fn bench_counter(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();

    let mut group = c.benchmark_group("counter");
    group.throughput(Throughput::Elements(1_000));

    group.bench_function("increment_1000", |b| {
        let counter = rt.block_on(async { Counter::new() });
        b.iter(|| {
            rt.block_on(async {
                for _ in 0..1_000 {
                    counter.increment(1).await;
                }
            })
        });
    });

    group.bench_function("increment_1000_from_8_tasks", |b| {
        let counter = rt.block_on(async { Counter::new() });
        b.iter(|| {
            rt.block_on(async {
                let tasks: Vec<_> = (0..8)
                    .map(|_| {
                        let counter = counter.clone();
                        tokio::spawn(async move {
                            for _ in 0..125 {
                                counter.increment(1).await;
                            }
                        })
                    })
                    .collect();
                for task in tasks {
                    task.await.unwrap();
                }
                black_box(counter.settled().await);
            })
        });
    });

    group.finish();
}

/// Benchmark store inserts
fn bench_insert(c: &mut Criterion) {
    let store = Arc::new(MemoryStore::new());

    let mut group = c.benchmark_group("insert");
    group.throughput(Throughput::Elements(1));

    group.bench_function("insert_small", |b| {
        let mut i = 0u64;
        b.iter(|| {
            store.insert(Item::new(format!("key:{}", i), 0, "small_value"));
            i += 1;
        });
    });

    group.bench_function("insert_1k", |b| {
        let mut i = 0u64;
        let value = Bytes::from("x".repeat(1024));
        b.iter(|| {
            store.insert(Item::new(format!("key:{}", i), 0, value.clone()));
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark mixed workload (80% reads, 20% writes)
fn bench_mixed(c: &mut Criterion) {
    let store = Arc::new(MemoryStore::new());

    for i in 0..10_000 {
        store.insert(Item::new(format!("key:{}", i), 0, format!("value:{}", i)));
    }

    let mut group = c.benchmark_group("mixed");
    group.throughput(Throughput::Elements(1));

    group.bench_function("80_read_20_write", |b| {
        let mut i = 0u64;
        b.iter(|| {
            if i % 5 == 0 {
                store.insert(Item::new(format!("new:{}", i), 0, "value"));
            } else {
                black_box(store.lookup(&format!("key:{}", i % 10_000)));
            }
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark concurrent store access
fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("4_threads_mixed", |b| {
        b.iter(|| {
            let store = Arc::new(MemoryStore::new());
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let store = Arc::clone(&store);
                    thread::spawn(move || {
                        for i in 0..10_000 {
                            let key = format!("key:{}:{}", t, i);
                            store.insert(Item::new(key.clone(), 0, "value"));
                            store.lookup(&key);
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            black_box(store.len());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_parse,
    bench_encode,
    bench_counter,
    bench_insert,
    bench_mixed,
    bench_concurrent,
);

criterion_main!(benches);
