//! Label Matching Benchmarks
//!
//! Benchmarks for normalization and fuzzy comparison of entity labels.
//!
//! Run with: `cargo bench --bench matcher_ops`

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use esperar::prelude::*;

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize");

    let labels = vec![
        ("ascii", "Anna Han"),
        ("padded", "   Anna    Han   "),
        ("accented", "Nguyễn Thị Minh Khai"),
        ("long", "Phạm Văn Đồng Street, Ward 12, District Gò Vấp, Hồ Chí Minh City"),
    ];

    for (name, label) in labels {
        group.bench_with_input(BenchmarkId::from_parameter(name), &label, |bench, label| {
            bench.iter(|| black_box(normalize(black_box(label))));
        });
    }

    group.finish();
}

fn bench_compare(c: &mut Criterion) {
    let mut group = c.benchmark_group("compare");
    let matcher = FuzzyMatcher::new();

    let pairs = vec![
        ("exact", "Anna Han", "anna han"),
        ("substring", "Minh Khai", "Nguyễn Thị Minh Khai"),
        ("token_superset", "Khai Nguyễn", "Nguyễn Thị Minh Khai"),
        ("partial_overlap", "Nguyễn Minh Tuấn", "Nguyễn Thị Minh Khai"),
        ("miss", "Bob Lee", "Nguyễn Thị Minh Khai"),
    ];

    for (name, expected, observed) in pairs {
        group.bench_with_input(
            BenchmarkId::from_parameter(name),
            &(expected, observed),
            |bench, (expected, observed)| {
                bench.iter(|| black_box(matcher.compare(black_box(expected), black_box(observed))));
            },
        );
    }

    group.finish();
}

fn bench_best_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("best_match");
    let matcher = FuzzyMatcher::new();

    for size in [5_usize, 50, 500] {
        let candidates: Vec<String> = (0..size).map(|i| format!("Customer {i} Trần Văn")).collect();
        let target = format!("customer {} tran van", size - 1);
        group.bench_with_input(BenchmarkId::from_parameter(size), &candidates, |bench, candidates| {
            bench.iter(|| {
                black_box(matcher.best_match(black_box(&target), candidates.iter().map(String::as_str)))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_normalize, bench_compare, bench_best_match);
criterion_main!(benches);
