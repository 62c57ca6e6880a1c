//! Store read/write performance benchmarks

use criterion::{Criterion, criterion_group, criterion_main};
use shmkv::{Store, StoreConfig};
use std::hint::black_box;

const BENCH_APP_KEY: u32 = 0x5EED_0000;

fn bench_store() -> Store {
    Store::with_config(
        BENCH_APP_KEY,
        StoreConfig {
            unlink_gates_on_free: true,
            free_on_drop: true,
            ..StoreConfig::default()
        },
    )
    .unwrap()
}

/// Benchmark write operations for different sizes
fn bench_write_operations(c: &mut Criterion) {
    let mut store = bench_store();

    for (name, len) in [("write_64_bytes", 64), ("write_1k_bytes", 1024), ("write_4k_bytes", 4096)] {
        let data = vec![0xAAu8; len];
        store.write(name, &data).unwrap();

        c.bench_function(name, |b| {
            b.iter(|| {
                store.write(name, black_box(&data)).unwrap();
            });
        });
    }
}

/// Benchmark read operations for different sizes
fn bench_read_operations(c: &mut Criterion) {
    let mut store = bench_store();

    for (name, len) in [("read_64_bytes", 64), ("read_1k_bytes", 1024), ("read_4k_bytes", 4096)] {
        store.write(name, &vec![0xAAu8; len]).unwrap();

        c.bench_function(name, |b| {
            b.iter(|| {
                let read_data = black_box(store.read(name).unwrap());
                black_box(read_data.len());
            });
        });
    }
}

/// Benchmark identifier derivation alone
fn bench_derive(c: &mut Criterion) {
    c.bench_function("derive_identifier", |b| {
        b.iter(|| black_box(shmkv::derive(BENCH_APP_KEY, black_box("session:user-12345"))));
    });
}

criterion_group!(benches, bench_write_operations, bench_read_operations, bench_derive);
criterion_main!(benches);
