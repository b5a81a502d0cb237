//! SPSC queue benchmarks

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use pl_realtime::{ChunkCursor, FixedSpscQueue};

const BATCH: u64 = 512;

fn bench_fixed_spsc_push_pop(c: &mut Criterion) {
    let (mut producer, mut consumer) = FixedSpscQueue::new::<u64>(1024);

    c.bench_function("fixed_spsc_push_pop_512", |b| {
        b.iter(|| {
            for i in 0..BATCH {
                let _ = producer.try_push(black_box(i));
            }
            while let Some(value) = consumer.try_pop() {
                black_box(value);
            }
        })
    });
}

fn bench_rtrb_push_pop(c: &mut Criterion) {
    let (mut producer, mut consumer) = rtrb::RingBuffer::<u64>::new(1023);

    c.bench_function("rtrb_push_pop_512", |b| {
        b.iter(|| {
            for i in 0..BATCH {
                let _ = producer.push(black_box(i));
            }
            while let Ok(value) = consumer.pop() {
                black_box(value);
            }
        })
    });
}

fn bench_chunk_claim(c: &mut Criterion) {
    let cursor = ChunkCursor::new(256);

    c.bench_function("chunk_cursor_claim_4096", |b| {
        b.iter(|| {
            cursor.reset();
            while let Some(range) = cursor.claim(black_box(4096)) {
                black_box(range);
            }
        })
    });
}

criterion_group!(
    benches,
    bench_fixed_spsc_push_pop,
    bench_rtrb_push_pop,
    bench_chunk_claim
);
criterion_main!(benches);
