//! Benchmarks for depth reconstruction.
use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use depthfill::{Backend, CameraIntrinsics, Config, Grid, Observations, Weights, solve_with_rng};
use rand::{SeedableRng, rngs::StdRng};

/// A tilted plane seen through a `size × size` camera, with depth measured on
/// every 4th pixel of every 4th row and normals everywhere.
fn tilted_plane(size: usize) -> (Observations, Config) {
    let intrinsics = CameraIntrinsics::new(size as f64, size as f64);
    let camera = intrinsics.resolve(size, size);
    let truth = |ix, iy| 2.0 / (1.0 - 0.2 * camera.ray(ix, iy).x);
    let depth = Grid::from_fn(size, size, |ix, iy| {
        (ix % 4 == 0 && iy % 4 == 0).then(|| truth(ix, iy))
    });
    let norm = libm::hypot(0.2, 1.0);
    let obs = Observations::new(size, size)
        .with_depth(depth)
        .with_normals(
            Grid::filled(size, size, 0.2 / norm),
            Grid::filled(size, size, 0.0),
            Grid::filled(size, size, 1.0 / norm),
        );
    let config = Config::default()
        .with_weights(Weights {
            inertia: 1.0,
            normal: 1.0,
            ..Default::default()
        })
        .with_intrinsics(intrinsics);
    (obs, config)
}

fn bench_backend(c: &mut Criterion, backend: Backend) {
    let mut group = c.benchmark_group(format!("tilted_plane_{backend}"));
    for size in [16, 32, 64] {
        let (obs, config) = tilted_plane(size);
        let config = config.with_backend(backend);
        group.throughput(Throughput::Elements((size * size) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _size| {
            b.iter(|| {
                let mut rng = StdRng::seed_from_u64(0);
                let _actual = black_box(solve_with_rng(&obs, &config, &mut rng).unwrap());
            });
        });
    }
    group.finish();
}

fn solve_sparse_direct(c: &mut Criterion) {
    bench_backend(c, Backend::SparseDirect);
}

fn solve_levenberg_marquardt(c: &mut Criterion) {
    bench_backend(c, Backend::LevenbergMarquardt);
}

fn solve_trust_region(c: &mut Criterion) {
    bench_backend(c, Backend::TrustRegion);
}

/// Only the linear phase, on a larger image.
fn solve_linear_only(c: &mut Criterion) {
    let size = 128;
    let depth = Grid::from_fn(size, size, |ix, iy| {
        (ix % 8 == 0 && iy % 8 == 0).then_some(1.0 + (ix + iy) as f64 / size as f64)
    });
    let obs = Observations::new(size, size).with_depth(depth);
    let config = Config::default().with_weights(Weights {
        inertia: 1.0,
        ..Default::default()
    });
    c.bench_function("solve linear 128x128", |b| {
        b.iter(|| {
            let mut rng = StdRng::seed_from_u64(0);
            let _actual = black_box(solve_with_rng(&obs, &config, &mut rng).unwrap());
        });
    });
}

criterion_group!(
    benches,
    solve_sparse_direct,
    solve_levenberg_marquardt,
    solve_trust_region,
    solve_linear_only,
);
criterion_main!(benches);
