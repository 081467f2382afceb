use criterion::{criterion_group, criterion_main, Criterion};
use ride_tracker::models::Coordinate;
use ride_tracker::services::distance::path_length;
use ride_tracker::services::mapbox::{downsample, MAX_MATCHING_COORDINATES};
use ride_tracker::services::RidePathAccumulator;
use std::hint::black_box;

/// A wandering path of `n` samples around Palo Alto, roughly 5 m apart.
fn synthetic_path(n: usize) -> Vec<Coordinate> {
    (0..n)
        .map(|i| {
            let t = i as f64;
            Coordinate::new(-122.143 + t * 4.5e-5, 37.4419 + (t / 40.0).sin() * 2e-4)
        })
        .collect()
}

fn benchmark_path_accumulation(c: &mut Criterion) {
    // The accumulator spawns its duration ticker on the ambient runtime.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("Failed to build runtime");
    let _guard = runtime.enter();

    let mut group = c.benchmark_group("ride_path");

    for n in [100, 1_000, 10_000] {
        let path = synthetic_path(n);

        group.bench_function(format!("accumulate_{}", n), |b| {
            b.iter(|| {
                let mut acc = RidePathAccumulator::new();
                acc.on_ride_start();
                for &p in &path {
                    acc.on_position_sample(black_box(p));
                }
                acc.on_ride_stop()
            })
        });

        group.bench_function(format!("path_length_{}", n), |b| {
            b.iter(|| path_length(black_box(&path)))
        });

        group.bench_function(format!("downsample_{}", n), |b| {
            b.iter(|| downsample(black_box(&path), MAX_MATCHING_COORDINATES))
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_path_accumulation);
criterion_main!(benches);
