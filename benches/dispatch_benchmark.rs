//! Performance benchmarks for swr-kit
//!
//! This benchmark suite measures:
//! - Fingerprint resolution for simple and parameterised requests
//! - Dispatcher fresh hits and stale hits across payload sizes
//! - Response assembly (metadata merge, fix-ups, headers)
//!
//! Run with: cargo bench
//! View results: open target/criterion/report/index.html

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use std::hint::black_box;
use std::sync::Arc;
use swr_kit::backend::InMemoryBackend;
use swr_kit::upstream::{InMemoryUpstream, JsonSerializer};
use swr_kit::{
    FingerprintResolver, ManualClock, RefreshDispatcher, RefreshQueue, Request, ResponseAssembler,
};

const T0: i64 = 1_700_000_000;

fn payload(size: usize) -> serde_json::Value {
    json!({
        "title": "Cowboy Bebop",
        "synopsis": "x".repeat(size),
        "related": [],
    })
}

fn dispatcher(
    upstream: InMemoryUpstream,
    clock: ManualClock,
) -> RefreshDispatcher<InMemoryBackend, InMemoryUpstream, JsonSerializer> {
    RefreshDispatcher::new(
        InMemoryBackend::new(),
        upstream,
        JsonSerializer,
        RefreshQueue::new(),
    )
    .with_clock(Arc::new(clock))
}

// ============================================================================
// Group 1: Fingerprint Resolution
// ============================================================================

fn resolver_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint");
    let resolver = FingerprintResolver::new();

    let simple = Request::new("anime", "/anime/1");
    group.bench_function("simple", |b| {
        b.iter(|| resolver.resolve(black_box(&simple)));
    });

    let search = Request::from_uri(
        "anime_search",
        "/anime?q=bebop&Type=tv&page=3&order_by=score&sort=desc&sfw=true",
    )
    .with_header("User-Agent", "bench")
    .with_header("Accept", "application/json");
    group.bench_function("search_with_params", |b| {
        b.iter(|| resolver.resolve(black_box(&search)));
    });

    group.finish();
}

// ============================================================================
// Group 2: Dispatcher Benchmarks
// ============================================================================

fn dispatch_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatcher");

    // Create tokio runtime for async operations
    let rt = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");

    for size in [100, 1_000, 10_000].iter() {
        // Fresh hit: negative check + entry read + TTL read
        group
            .throughput(Throughput::Bytes(*size as u64))
            .bench_with_input(BenchmarkId::new("hit_fresh", size), size, |b, &size| {
                let upstream = InMemoryUpstream::new();
                upstream.insert("/anime/1", payload(size));
                let dispatcher = dispatcher(upstream, ManualClock::new(T0));
                let request = Request::new("anime", "/anime/1");

                rt.block_on(async {
                    dispatcher
                        .dispatch(&request)
                        .await
                        .expect("Failed to populate cache");
                });

                b.to_async(&rt)
                    .iter(|| async { dispatcher.dispatch(black_box(&request)).await });
            });

        // Stale hit with a refresh already pending: no upstream, no enqueue
        group
            .throughput(Throughput::Bytes(*size as u64))
            .bench_with_input(BenchmarkId::new("hit_stale_queued", size), size, |b, &size| {
                let upstream = InMemoryUpstream::new();
                upstream.insert("/anime/1", payload(size));
                let clock = ManualClock::new(T0);
                let dispatcher = dispatcher(upstream, clock.clone());
                let request = Request::new("anime", "/anime/1");

                rt.block_on(async {
                    dispatcher
                        .dispatch(&request)
                        .await
                        .expect("Failed to populate cache");
                    clock.advance(86_401);
                    dispatcher
                        .dispatch(&request)
                        .await
                        .expect("Failed to enqueue refresh");
                });

                b.to_async(&rt)
                    .iter(|| async { dispatcher.dispatch(black_box(&request)).await });
            });
    }

    group.finish();
}

// ============================================================================
// Group 3: Response Assembly
// ============================================================================

fn assembler_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("assembler");
    let rt = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");
    let assembler = ResponseAssembler::new();

    for size in [100, 10_000].iter() {
        let upstream = InMemoryUpstream::new();
        upstream.insert("/anime/1", payload(*size));
        let dispatcher = dispatcher(upstream, ManualClock::new(T0));
        let dispatched = rt
            .block_on(dispatcher.dispatch(&Request::new("anime", "/anime/1")))
            .expect("Failed to dispatch");

        group
            .throughput(Throughput::Bytes(*size as u64))
            .bench_with_input(BenchmarkId::new("assemble", size), &dispatched, |b, d| {
                b.iter(|| assembler.assemble(black_box(d)));
            });
    }

    group.finish();
}

// ============================================================================
// Benchmark Registration
// ============================================================================

criterion_group!(
    benches,
    resolver_benchmarks,
    dispatch_benchmarks,
    assembler_benchmarks
);
criterion_main!(benches);
