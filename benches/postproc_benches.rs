use std::hint::black_box;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array3;
use prostalyzer::core::config::SeverityThresholds;
use prostalyzer::core::image::ImageGeometry;
use prostalyzer::core::postproc::{binarize, label_components, PredictionResults};

const VOLUME_SIZES: [usize; 3] = [32, 64, 96];
const THRESHOLD: f32 = 0.5;

/// Deterministic phantom: four spherical high-probability blobs placed
/// at fixed relative positions inside a cubic volume.
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn phantom(size: usize) -> Array3<f32> {
    let mut probability = Array3::<f32>::zeros((size, size, size));
    let radius = (size / 12).max(2) as isize;
    let centers = [
        (size / 4, size / 4, size / 4),
        (size / 2, size / 2, size / 2),
        (3 * size / 4, size / 4, 3 * size / 4),
        (size / 4, 3 * size / 4, size / 2),
    ];
    for &(cx, cy, cz) in &centers {
        let (cx, cy, cz) = (cx as isize, cy as isize, cz as isize);
        for dx in -radius..=radius {
            for dy in -radius..=radius {
                for dz in -radius..=radius {
                    if dx * dx + dy * dy + dz * dz > radius * radius {
                        continue;
                    }
                    let (x, y, z) = (cx + dx, cy + dy, cz + dz);
                    if x >= 0 && y >= 0 && z >= 0 {
                        let index = [x as usize, y as usize, z as usize];
                        if index.iter().all(|&i| i < size) {
                            probability[index] = 0.9;
                        }
                    }
                }
            }
        }
    }
    probability
}

fn run_benches(c: &mut Criterion) {
    let mut group = c.benchmark_group("Post Processing");
    let geometry = ImageGeometry {
        spacing: [0.5, 0.5, 3.0],
        ..Default::default()
    };
    let thresholds = SeverityThresholds::default();

    for size in VOLUME_SIZES {
        let probability = phantom(size);
        let mask = binarize(probability.view(), THRESHOLD);
        group.throughput(criterion::Throughput::Elements((size * size * size) as u64));

        group.bench_function(BenchmarkId::new("binarize", size), |b| {
            b.iter(|| binarize(black_box(probability.view()), THRESHOLD));
        });
        group.bench_function(BenchmarkId::new("label_components", size), |b| {
            b.iter(|| label_components(black_box(&mask)));
        });
        group.bench_function(BenchmarkId::new("full_pipeline", size), |b| {
            b.iter(|| {
                PredictionResults::from_probability_map(
                    black_box(probability.view()),
                    &geometry,
                    THRESHOLD,
                    &thresholds,
                )
            });
        });
    }
    group.finish();
}

criterion_group! {name = benches;
config = Criterion::default().measurement_time(Duration::from_secs(10)).sample_size(20);
targets=run_benches}
criterion_main!(benches);
