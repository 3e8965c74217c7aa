//! Performance benchmarks for the mix bus
//!
//! Run with: cargo bench -p whitewave_dsp

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use whitewave_dsp::{AudioBuffer, GainCell, MixBus};

fn loop_buffer(rate: u32) -> AudioBuffer {
    let samples = (0..rate as usize * 2)
        .map(|i| (i as f32 * 0.001).sin() * 0.3)
        .collect();
    AudioBuffer::new(samples, rate, 2).unwrap()
}

fn benchmark_bus_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("mix_bus");

    // Common buffer sizes in audio applications
    for size in [128, 512, 1024] {
        for voices in [1, 4, 9] {
            let bus = MixBus::new(48000, 2);
            for _ in 0..voices {
                bus.add_voice(loop_buffer(44100), Arc::new(GainCell::new(0.5)));
            }
            let mut output = vec![0.0_f32; size * 2];

            group.throughput(Throughput::Elements(size as u64));
            group.bench_function(format!("render_{}_frames_{}_voices", size, voices), |b| {
                b.iter(|| bus.render(black_box(&mut output)));
            });
        }
    }

    group.finish();
}

fn benchmark_master_toggle(c: &mut Criterion) {
    let bus = MixBus::new(48000, 2);

    c.bench_function("master_mute_toggle", |b| {
        b.iter(|| {
            bus.set_master_gain(black_box(0.0));
            bus.set_master_gain(black_box(1.0));
        })
    });
}

criterion_group!(benches, benchmark_bus_render, benchmark_master_toggle);
criterion_main!(benches);
