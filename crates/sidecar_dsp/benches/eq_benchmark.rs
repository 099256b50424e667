//! Performance benchmarks for the DSP module
//!
//! Run with: cargo bench -p sidecar_dsp

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use sidecar_dsp::{apply_gain_and_clip, EqGains, FilterCascade, NUM_BANDS};

fn benchmark_cascade_processing(c: &mut Criterion) {
    let mut group = c.benchmark_group("cascade");

    // Cost should scale with active bands only
    for active in [0usize, 1, 3, NUM_BANDS] {
        let mut gains = EqGains::flat();
        for band in 0..active {
            gains.set(band, 6.0).unwrap();
        }

        let frames = 2048;
        group.throughput(Throughput::Elements(frames as u64));
        group.bench_function(format!("process_2048_frames_{}_bands", active), |b| {
            let mut cascade = FilterCascade::build(&gains, 44100.0, 2).unwrap();
            let mut buffer: Vec<f32> = (0..frames * 2).map(|i| (i as f32 * 0.001).sin()).collect();

            b.iter(|| {
                cascade.process_interleaved(black_box(&mut buffer));
            });
        });
    }

    group.finish();
}

fn benchmark_cascade_rebuild(c: &mut Criterion) {
    c.bench_function("cascade_rebuild_all_bands", |b| {
        let mut gains = EqGains::flat();
        let mut band = 0;
        let mut gain = -12.0_f32;

        b.iter(|| {
            // Simulate dragging a slider
            gains.set(band, gain).unwrap();
            black_box(FilterCascade::build(&gains, 44100.0, 2).unwrap());
            band = (band + 1) % NUM_BANDS;
            gain = if gain >= 12.0 { -12.0 } else { gain + 0.5 };
        });
    });
}

fn benchmark_gain_and_clip(c: &mut Criterion) {
    c.bench_function("apply_gain_and_clip_4096_samples", |b| {
        let mut buffer: Vec<f32> = (0..4096).map(|i| (i as f32 * 0.01).sin() * 1.5).collect();

        b.iter(|| {
            apply_gain_and_clip(black_box(&mut buffer), black_box(0.8));
        });
    });
}

criterion_group!(
    benches,
    benchmark_cascade_processing,
    benchmark_cascade_rebuild,
    benchmark_gain_and_clip
);

criterion_main!(benches);
