//! Playback engine benchmarks
//!
//! Measures the per-chunk work the playback thread does between device
//! writes, and the cost of a cascade rebuild on the control thread.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use crossbeam_channel::unbounded;
use sidecar_core::{Engine, EngineConfig, NullOutput};
use sidecar_dsp::{apply_gain_and_clip, EqGains, FilterCascade};

fn benchmark_chunk(c: &mut Criterion) {
    let mut group = c.benchmark_group("playback_chunk");
    let chunk_frames = EngineConfig::default().chunk_frames;

    for channels in [1usize, 2] {
        let gains = EqGains::from_array([6.0, 3.0, -2.0, 0.0, 4.0, -6.0, 2.0]);
        let mut cascade = FilterCascade::build(&gains, 44100.0, channels).unwrap();
        let source: Vec<f32> = (0..chunk_frames * channels)
            .map(|i| (i as f32 * 0.01).sin() * 0.5)
            .collect();
        let mut chunk = source.clone();

        group.throughput(Throughput::Elements(source.len() as u64));
        group.bench_function(format!("eq_volume_clip_{}ch", channels), |b| {
            b.iter(|| {
                chunk.copy_from_slice(&source);
                cascade.process_interleaved(black_box(&mut chunk));
                apply_gain_and_clip(black_box(&mut chunk), 0.8);
            })
        });
    }

    group.finish();
}

fn benchmark_set_eq_band(c: &mut Criterion) {
    let (tx, _rx) = unbounded();
    let engine = Engine::new(EngineConfig::default(), Arc::new(NullOutput::unpaced()), tx);
    let mut gain = 0.0f32;

    c.bench_function("engine_set_eq_band", |b| {
        b.iter(|| {
            gain = if gain >= 12.0 { -12.0 } else { gain + 0.5 };
            engine.set_eq_band(black_box(0), black_box(gain)).unwrap();
        })
    });
}

criterion_group!(benches, benchmark_chunk, benchmark_set_eq_band);
criterion_main!(benches);
