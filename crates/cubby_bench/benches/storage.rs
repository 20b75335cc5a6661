//! Storage backend and frame benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use cubby_bench::utils::random_data;
use cubby_core::store::{Frame, FrameIterator, Op};
use cubby_core::TransactionId;
use cubby_storage::{FileBackend, InMemoryBackend, StorageBackend};
use tempfile::TempDir;

fn commit_frame(txid: u64, value_size: usize) -> Frame {
    Frame::Commit {
        txid: TransactionId::new(txid),
        ops: vec![Op::Put {
            bucket: "8:receiver5:bench0:".into(),
            key: format!("key-{txid}").into_bytes(),
            value: random_data(value_size),
        }],
    }
}

/// Benchmark InMemoryBackend appends.
fn bench_inmemory_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("inmemory_append");

    for size in [64, 256, 1024, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let mut backend = InMemoryBackend::new();
            let data = random_data(size);

            b.iter(|| black_box(backend.append(black_box(&data)).unwrap()));
        });
    }
    group.finish();
}

/// Benchmark FileBackend appends, with and without sync.
fn bench_file_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_append");
    group.sample_size(50);

    for sync in [false, true] {
        let label = if sync { "sync" } else { "nosync" };
        group.throughput(Throughput::Bytes(1024));
        group.bench_function(label, |b| {
            let temp_dir = TempDir::new().unwrap();
            let mut backend = FileBackend::open(&temp_dir.path().join("bench.db")).unwrap();
            let data = random_data(1024);

            b.iter(|| {
                black_box(backend.append(black_box(&data)).unwrap());
                if sync {
                    backend.sync().unwrap();
                }
            });
        });
    }
    group.finish();
}

/// Benchmark FileBackend positional reads.
fn bench_file_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_read");

    for size in [256, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let temp_dir = TempDir::new().unwrap();
            let mut backend = FileBackend::open(&temp_dir.path().join("bench.db")).unwrap();
            let offset = backend.append(&random_data(size)).unwrap();
            backend.flush().unwrap();

            b.iter(|| black_box(backend.read_at(black_box(offset), size).unwrap()));
        });
    }
    group.finish();
}

/// Benchmark commit frame encoding.
fn bench_frame_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");

    for size in [64, 1024, 16 * 1024].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let frame = commit_frame(1, size);
            b.iter(|| black_box(frame.encode().unwrap()));
        });
    }
    group.finish();
}

/// Benchmark a full recovery scan over many frames.
fn bench_frame_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_scan");

    for count in [1000, 10000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let mut backend = InMemoryBackend::new();
            backend.append(&Frame::header().encode().unwrap().bytes).unwrap();
            for txid in 1..=count as u64 {
                backend
                    .append(&commit_frame(txid, 128).encode().unwrap().bytes)
                    .unwrap();
            }

            b.iter(|| {
                let frames = FrameIterator::new(&backend).unwrap();
                black_box(frames.map(Result::unwrap).count())
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_inmemory_append,
    bench_file_append,
    bench_file_read,
    bench_frame_encode,
    bench_frame_scan,
);

criterion_main!(benches);
