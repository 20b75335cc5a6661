//! Client operation benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use cubby_bench::utils::{generate_keys, random_data, BenchStore};
use cubby_core::{OpContext, Operation, StorageClient};

/// Benchmark single key writes.
fn bench_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("client_set");
    let ctx = OpContext::background();

    for size in [64, 256, 1024, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let store = BenchStore::new(false);
            let client = store.client();
            let keys = generate_keys(1000);
            let value = random_data(size);
            let mut next = 0;

            b.iter(|| {
                client.set(&ctx, &keys[next % keys.len()], black_box(&value)).unwrap();
                next += 1;
            });
        });
    }
    group.finish();
}

/// Benchmark writes with fsync on every commit.
fn bench_set_fsync(c: &mut Criterion) {
    let mut group = c.benchmark_group("client_set_fsync");
    group.sample_size(20);
    let ctx = OpContext::background();

    let store = BenchStore::new(true);
    let client = store.client();
    let value = random_data(256);
    group.throughput(Throughput::Bytes(256));
    group.bench_function("256", |b| {
        b.iter(|| client.set(&ctx, b"offset", black_box(&value)).unwrap());
    });
    group.finish();
}

/// Benchmark reads from a populated bucket.
fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("client_get");
    let ctx = OpContext::background();

    for count in [100, 1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let store = BenchStore::new(false);
            let keys = generate_keys(count);
            let client = store.fill(&keys, 256, 1);
            let mut next = 0;

            b.iter(|| {
                let value = client.get(&ctx, black_box(&keys[next % count])).unwrap();
                next += 1;
                black_box(value);
            });
        });
    }
    group.finish();
}

/// Benchmark soft misses.
fn bench_get_missing(c: &mut Criterion) {
    let ctx = OpContext::background();
    let store = BenchStore::new(false);
    let client = store.fill(&generate_keys(1000), 64, 1);

    c.bench_function("client_get_missing", |b| {
        b.iter(|| black_box(client.get(&ctx, black_box(b"absent")).unwrap()));
    });
}

/// Benchmark batches of mixed operations.
fn bench_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("client_batch");
    let ctx = OpContext::background();

    for batch_size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            batch_size,
            |b, &batch_size| {
                let store = BenchStore::new(false);
                let client = store.client();
                let keys = generate_keys(batch_size);
                let value = random_data(128);

                b.iter(|| {
                    let mut ops: Vec<Operation> = keys
                        .iter()
                        .enumerate()
                        .map(|(i, key)| match i % 3 {
                            0 => Operation::set(key.clone(), value.clone()),
                            1 => Operation::get(key.clone()),
                            _ => Operation::delete(key.clone()),
                        })
                        .collect();
                    client.batch(&ctx, black_box(&mut ops)).unwrap();
                });
            },
        );
    }
    group.finish();
}

/// Benchmark set followed by delete of the same key.
fn bench_set_delete(c: &mut Criterion) {
    let ctx = OpContext::background();
    let store = BenchStore::new(false);
    let client = store.client();
    let value = random_data(64);

    c.bench_function("client_set_delete", |b| {
        b.iter(|| {
            client.set(&ctx, b"transient", &value).unwrap();
            client.delete(&ctx, b"transient").unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_set,
    bench_set_fsync,
    bench_get,
    bench_get_missing,
    bench_batch,
    bench_set_delete,
);

criterion_main!(benches);
