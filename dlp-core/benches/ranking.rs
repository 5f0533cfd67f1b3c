//! Ranked eligible set benchmarks
//!
//! Run with: cargo bench -p dlp-core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dlp_core::ranking::RankedSet;
use rust_decimal::Decimal;

/// Set of `size` members with distinct, interleaved stakes
fn build_set(size: u64) -> RankedSet {
    let mut set = RankedSet::new();
    for id in 1..=size {
        set.upsert(id, Decimal::from((id * 7_919) % 100_003));
    }
    set
}

fn bench_upsert(c: &mut Criterion) {
    let mut group = c.benchmark_group("ranked_set_upsert");
    for size in [100u64, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut set = build_set(size);
            let mut round = 0u64;
            b.iter(|| {
                round += 1;
                let id = round % size + 1;
                set.upsert(black_box(id), Decimal::from(round % 100_003));
            });
        });
    }
    group.finish();
}

fn bench_top(c: &mut Criterion) {
    let mut group = c.benchmark_group("ranked_set_top");
    for size in [100u64, 1_000, 10_000] {
        let set = build_set(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &set, |b, set| {
            b.iter(|| black_box(set.top(black_box(16), |_| true)));
        });
    }
    group.finish();
}

fn bench_remove_reinsert(c: &mut Criterion) {
    let mut set = build_set(10_000);
    c.bench_function("ranked_set_remove_reinsert_10000", |b| {
        b.iter(|| {
            set.remove(black_box(5_000));
            set.upsert(black_box(5_000), Decimal::from(42));
        });
    });
}

criterion_group!(benches, bench_upsert, bench_top, bench_remove_reinsert);
criterion_main!(benches);
