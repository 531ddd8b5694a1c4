use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use fluid_kernel::{
    DomainBounds, FluidSimulation, NeighborBackend, SimParams, SimulationKernel, SolverSettings, SpatialGrid,
    SpawnConfig, SpawnRegion,
};
use glam::{UVec3, Vec3};

fn block(per_axis: u32) -> SpawnConfig {
    SpawnConfig {
        regions: vec![SpawnRegion {
            center: Vec3::new(-1.0, 0.0, 0.0),
            size: Vec3::splat(2.0),
            particles_per_axis: UVec3::splat(per_axis),
        }],
        ..Default::default()
    }
}

fn params() -> SimParams {
    SimParams {
        smoothing_radius: 0.12,
        bounds: DomainBounds::new(Vec3::new(-3.0, -2.0, -2.0), Vec3::new(3.0, 3.0, 2.0)),
        ..Default::default()
    }
}

fn bench_grid_build(c: &mut Criterion) {
    let particles = fluid_kernel::spawn_particles(&block(40));
    let params = params();
    let mut group = c.benchmark_group("grid_build_64k");
    for backend in [NeighborBackend::Hashed, NeighborBackend::LinearStrip] {
        let mut grid = SpatialGrid::new(&SolverSettings {
            backend,
            ..Default::default()
        });
        group.bench_function(BenchmarkId::from_parameter(format!("{backend:?}")), |b| {
            b.iter(|| grid.build(&particles.predicted, params.smoothing_radius, &params.bounds))
        });
    }
    group.finish();
}

fn bench_step(c: &mut Criterion) {
    let params = params();
    let mut group = c.benchmark_group("step");
    group.sample_size(20);
    for per_axis in [16u32, 32] {
        let mut sim = FluidSimulation::from_spawn(&block(per_axis), SolverSettings::default());
        let n = per_axis.pow(3);
        group.bench_function(BenchmarkId::from_parameter(n), |b| b.iter(|| sim.step(1.0 / 60.0, &params)));
    }
    group.finish();
}

criterion_group!(benches, bench_grid_build, bench_step);
criterion_main!(benches);
