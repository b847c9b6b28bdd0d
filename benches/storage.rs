//! Benchmark for sorted-index and keyspace operations.

use bytes::Bytes;
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use fiscus::types::SortedSet;

fn benchmark_sorted_index(c: &mut Criterion) {
    let mut book = SortedSet::new();
    for i in 0..10_000 {
        let price = 100.0 + (i % 500) as f64 * 0.01;
        book.add(Bytes::from(format!("bid:{i}")), price);
        book.add(Bytes::from(format!("ask:{i}")), -(price + 0.05));
    }

    c.bench_function("zrank_10k", |b| {
        b.iter(|| book.rank(black_box(b"bid:5000")))
    });

    c.bench_function("best_bid_ask_10k", |b| {
        b.iter(|| (book.best_bid(), book.best_ask()))
    });

    c.bench_function("book_depth_10", |b| {
        b.iter(|| book.book(black_box(10)))
    });
}

criterion_group!(benches, benchmark_sorted_index);
criterion_main!(benches);
