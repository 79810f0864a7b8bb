//! Criterion micro-benchmarks for single-threaded allocation, commit, and reset.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use vmarena::{Arena, ArenaConfig, SimulatedVm, SystemVm};

/// Allocations per reset cycle: 1024 × 8 bytes stays within two pages.
const CYCLE: usize = 1024;

/// Benchmark: 1024 committed-path allocations followed by a reset.
///
/// After the first cycle every allocation hits the wait-free fast path.
fn bench_alloc_fast_path(c: &mut Criterion) {
    let mut arena = Arena::new(1 << 20).unwrap();
    c.bench_function("alloc_fast_path_1024", |b| {
        b.iter(|| {
            for i in 0..CYCLE {
                black_box(arena.alloc_value(i as u64).unwrap());
            }
            arena.reset();
        });
    });
}

/// Benchmark: allocate 1 MiB in 64-byte pieces from a fresh OS reservation.
///
/// Includes reserve, 256 page commits, and release.
fn bench_alloc_cold_system(c: &mut Criterion) {
    c.bench_function("alloc_cold_system_1mib", |b| {
        b.iter(|| {
            let arena = Arena::new(1 << 20).unwrap();
            for _ in 0..(1 << 20) / 64 {
                black_box(arena.allocate(64, 8).unwrap().as_ptr());
            }
        });
    });
}

/// Benchmark: the same cold workload with 64 KiB commit steps.
fn bench_alloc_cold_coarse(c: &mut Criterion) {
    c.bench_function("alloc_cold_system_1mib_64k_commit", |b| {
        b.iter(|| {
            let config = ArenaConfig::new(1 << 20).with_commit_granularity(1 << 16);
            let arena = Arena::with_config(config, SystemVm).unwrap();
            for _ in 0..(1 << 20) / 64 {
                black_box(arena.allocate(64, 8).unwrap().as_ptr());
            }
        });
    });
}

/// Benchmark: cold workload on the simulated backend (no syscalls).
fn bench_alloc_cold_simulated(c: &mut Criterion) {
    c.bench_function("alloc_cold_simulated_1mib", |b| {
        b.iter(|| {
            let arena = Arena::with_config(ArenaConfig::new(1 << 20), SimulatedVm::new()).unwrap();
            for _ in 0..(1 << 20) / 64 {
                black_box(arena.allocate(64, 8).unwrap().as_ptr());
            }
        });
    });
}

/// Benchmark: a failing request, which bumps and rolls back.
fn bench_exhausted(c: &mut Criterion) {
    let arena = Arena::new(4096).unwrap();
    arena.allocate(4000, 8).unwrap();
    c.bench_function("alloc_exhausted", |b| {
        b.iter(|| {
            black_box(arena.allocate(black_box(200), 8).unwrap_err());
        });
    });
}

criterion_group!(
    benches,
    bench_alloc_fast_path,
    bench_alloc_cold_system,
    bench_alloc_cold_coarse,
    bench_alloc_cold_simulated,
    bench_exhausted
);
criterion_main!(benches);
