//! Sine bank benchmarks

use std::time::Duration;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use pl_core::StereoBuffer;
use pl_engine::{
    AMP_SMOOTHING_DURATION, CHORD_NOTE_NUMBERS, ParallelSineBank, Partial, generate_chord,
    process_partial,
};

const SAMPLE_RATE: f32 = 48000.0;

fn bench_process_partial(c: &mut Criterion) {
    let mut output = StereoBuffer::new(512);
    let mut partial = Partial {
        amp_when_active: 0.1,
        target_amp: 0.1,
        amp: 0.1,
        amp_smoothing_coeff: 0.001,
        pan: 0.3,
        phase_increment: 0.05,
        phase: 0.0,
    };

    let mut group = c.benchmark_group("process_partial");
    for num_frames in [64, 128, 512] {
        group.bench_with_input(
            BenchmarkId::from_parameter(num_frames),
            &num_frames,
            |b, &num_frames| {
                b.iter(|| process_partial(&mut partial, black_box(num_frames), &mut output))
            },
        );
    }
    group.finish();
}

fn bench_sine_bank_single_thread(c: &mut Criterion) {
    let mut bank = ParallelSineBank::new();
    bank.set_partials(generate_chord(
        SAMPLE_RATE,
        AMP_SMOOTHING_DURATION,
        &CHORD_NOTE_NUMBERS,
    ));
    bank.set_num_threads(1);
    let num_partials = bank.num_partials();

    let mut group = c.benchmark_group("sine_bank_128_frames");
    group.measurement_time(Duration::from_secs(5));
    for num_active in [18, 500, num_partials] {
        group.bench_with_input(
            BenchmarkId::from_parameter(num_active),
            &num_active,
            |b, &num_active| {
                b.iter(|| {
                    // SAFETY: single-threaded, no process call in flight
                    unsafe { bank.prepare(num_active, 128) };
                    black_box(bank.process(0, 128))
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_process_partial, bench_sine_bank_single_thread);
criterion_main!(benches);
