use beamform::{DelayAndSumInputs, DelayAndSumOptions, ScanlinePairs, delay_and_sum_nearest};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use ndarray::{Array2, Array3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const NUM_ELEMENTS: usize = 32;
const NUM_SAMPLES: usize = 1024;
const NUM_POINTS: usize = 64 * 64;
const INVDT: f32 = 25.0e6;

struct Acquisition {
    scanlines: Array3<f32>,
    pairs: ScanlinePairs,
    times: Array2<f32>,
    amplitudes: Array2<f32>,
}

fn random_acquisition() -> Acquisition {
    let mut rng = StdRng::seed_from_u64(0x5EED_DA5);
    let pairs = ScanlinePairs::hmc(NUM_ELEMENTS);
    let scanlines =
        Array3::from_shape_simple_fn((pairs.len(), NUM_SAMPLES, 2), || rng.gen_range(-1.0f32..1.0));
    let max_leg = NUM_SAMPLES as f32 / INVDT / 2.0;
    let times =
        Array2::from_shape_simple_fn((NUM_POINTS, NUM_ELEMENTS), || rng.gen_range(0.0..max_leg));
    let amplitudes =
        Array2::from_shape_simple_fn((NUM_POINTS, NUM_ELEMENTS), || rng.gen_range(0.5f32..1.0));
    Acquisition {
        scanlines,
        pairs,
        times,
        amplitudes,
    }
}

fn benchmark_chunk_sizes(c: &mut Criterion) {
    let acquisition = random_acquisition();
    let inputs = DelayAndSumInputs::from_views(
        acquisition.scanlines.view(),
        &acquisition.pairs,
        acquisition.times.view(),
        acquisition.times.view(),
        acquisition.amplitudes.view(),
        acquisition.amplitudes.view(),
        INVDT,
        0.0,
        0.0,
    )
    .expect("benchmark inputs are consistent");

    let mut group = c.benchmark_group("delay_and_sum_nearest");
    group.throughput(Throughput::Elements(NUM_POINTS as u64));
    for chunk_size in [1_usize, 16, 64, 512] {
        let options = DelayAndSumOptions::default().with_chunk_size(chunk_size);
        group.bench_with_input(
            BenchmarkId::new("chunk_size", chunk_size),
            &options,
            |b, options| {
                b.iter(|| {
                    let output = delay_and_sum_nearest(black_box(&inputs), options)
                        .expect("reconstruction succeeds");
                    black_box(output);
                });
            },
        );
    }
    group.finish();
}

criterion_group!(nearest_benchmark, benchmark_chunk_sizes);
criterion_main!(nearest_benchmark);
