//! Throughput and latency benchmarks for the pipeline engine.
//!
//! Mirrors the concerns the teacher crate's SPSC benches covered
//! (throughput, burst, small buffer, slow consumer) but exercised through
//! `Subject`/`Pipeline` and the `concurrent` operator instead of the raw
//! ring buffer.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use pipeflow::free::{discard, from_iterable, to_vec};
use pipeflow::ops::{concurrent_ordered, map};
use pipeflow::permit::TokioPermitSource;
use pipeflow::{BoxedOperator, ChannelConfig, Subject};
use std::sync::Arc;

fn rt() -> tokio::runtime::Runtime {
    tokio::runtime::Runtime::new().unwrap()
}

fn bench_unbuffered_throughput(c: &mut Criterion) {
    let rt = rt();
    c.bench_function("unbuffered_emit_continue_1k", |b| {
        b.to_async(&rt).iter_batched(
            || (0..1_000i32).collect::<Vec<_>>(),
            |items| async move {
                let p = from_iterable::<_, ()>(black_box(items));
                black_box(discard(p).await.unwrap());
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_buffered_burst(c: &mut Criterion) {
    let rt = rt();
    c.bench_function("buffered_burst_64_then_drain", |b| {
        b.to_async(&rt).iter(|| async {
            let (subject, mut pipeline) = Subject::<i32, ()>::channel_with(ChannelConfig { buffer: 64 });
            for v in 0..64 {
                subject.emit(v).await.unwrap();
            }
            subject.complete().unwrap();
            let mut count = 0;
            while pipeline.next().await.is_some() {
                count += 1;
            }
            black_box(count);
        });
    });
}

fn bench_map_chain(c: &mut Criterion) {
    let rt = rt();
    c.bench_function("map_chain_of_5_over_1k", |b| {
        b.to_async(&rt).iter_batched(
            || (0..1_000i32).collect::<Vec<_>>(),
            |items| async move {
                let p = from_iterable::<_, ()>(items)
                    .pipe(&map(|v: i32| v + 1))
                    .pipe(&map(|v: i32| v * 2))
                    .pipe(&map(|v: i32| v - 1))
                    .pipe(&map(|v: i32| v / 2))
                    .pipe(&map(|v: i32| v + 1));
                black_box(to_vec(p).await.unwrap());
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_concurrent_ordered(c: &mut Criterion) {
    let rt = rt();
    let capacity = num_cpus::get().max(1);
    c.bench_function("concurrent_ordered_capacity_num_cpus_over_256", |b| {
        b.to_async(&rt).iter_batched(
            || (0..256i32).collect::<Vec<_>>(),
            |items| async move {
                let permits = TokioPermitSource::new(capacity);
                let ops: Vec<BoxedOperator<i32, ()>> = vec![Arc::new(map(|v: i32| v.wrapping_mul(31)))];
                let p = from_iterable::<_, ()>(items).pipe(&concurrent_ordered(permits, ops));
                black_box(to_vec(p).await.unwrap());
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_unbuffered_throughput,
    bench_buffered_burst,
    bench_map_chain,
    bench_concurrent_ordered,
);
criterion_main!(benches);
