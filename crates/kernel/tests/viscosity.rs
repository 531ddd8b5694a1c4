//! Viscosity pass: velocity blending between neighbors and the stage toggle.

use fluid_kernel::sph::apply_viscosity;
use fluid_kernel::{
    DomainBounds, FluidSimulation, ParticleSet, SimParams, SimulationKernel, SolverSettings, SpatialGrid,
    SphKernels,
};
use glam::Vec3;

fn approaching_pair() -> ParticleSet {
    ParticleSet::from_positions(
        vec![Vec3::ZERO, Vec3::new(0.5, 0.0, 0.0)],
        Some(vec![Vec3::X, Vec3::ZERO]),
    )
}

#[test]
fn pass_blends_pair_velocities() {
    let h = 1.0;
    let dt = 0.1;
    let mut particles = approaching_pair();
    let mut grid = SpatialGrid::new(&SolverSettings::default());
    grid.build(&particles.predicted, h, &DomainBounds::new(Vec3::splat(-2.0), Vec3::splat(2.0)));

    let kernels = SphKernels::new(h);
    let mut scratch = Vec::new();
    apply_viscosity(&mut particles, &grid, &kernels, 1.0, dt, &mut scratch);

    let w = kernels.poly6(0.5);
    assert!(w > 0.0);
    let (v0, v1) = (particles.velocity[0], particles.velocity[1]);
    assert!((v0.x - (1.0 - w * dt)).abs() < 1.0e-6, "v0={v0:?}");
    assert!((v1.x - w * dt).abs() < 1.0e-6, "v1={v1:?}");
    assert_eq!(v0.y, 0.0);
    assert_eq!(v1.z, 0.0);
    assert!((particles.momentum() - Vec3::X).length() < 1.0e-6);
}

#[test]
fn isolated_particle_keeps_its_velocity() {
    let mut particles = ParticleSet::from_positions(
        vec![Vec3::ZERO, Vec3::new(1.5, 0.0, 0.0)],
        Some(vec![Vec3::new(0.3, -0.2, 0.1), Vec3::ZERO]),
    );
    let mut grid = SpatialGrid::new(&SolverSettings::default());
    grid.build(&particles.predicted, 1.0, &DomainBounds::new(Vec3::splat(-2.0), Vec3::splat(2.0)));
    let mut scratch = Vec::new();
    apply_viscosity(&mut particles, &grid, &SphKernels::new(1.0), 5.0, 0.1, &mut scratch);
    assert_eq!(particles.velocity[0], Vec3::new(0.3, -0.2, 0.1));
    assert_eq!(particles.velocity[1], Vec3::ZERO);
}

fn step_pair(params: &SimParams) -> ParticleSet {
    let mut sim = FluidSimulation::new(approaching_pair(), SolverSettings::default());
    sim.step(1.0 / 60.0, params);
    sim.particles().clone()
}

fn pair_params() -> SimParams {
    SimParams {
        smoothing_radius: 1.0,
        target_density: 0.0,
        pressure_multiplier: 1.0,
        near_pressure_multiplier: 1.0,
        viscosity_strength: 1.0,
        viscosity_enabled: true,
        gravity: Vec3::ZERO,
        substeps: 1,
        prediction_lookahead: 0.0,
        bounds: DomainBounds::new(Vec3::splat(-5.0), Vec3::splat(5.0)),
        ..Default::default()
    }
}

fn closing_speed(p: &ParticleSet) -> f32 {
    let left = p.index_of(0).unwrap();
    let right = p.index_of(1).unwrap();
    p.velocity[left].x - p.velocity[right].x
}

#[test]
fn disabled_viscosity_leaves_velocities_untouched() {
    let disabled = step_pair(&SimParams {
        viscosity_enabled: false,
        ..pair_params()
    });
    let zero_strength = step_pair(&SimParams {
        viscosity_strength: 0.0,
        ..pair_params()
    });
    assert_eq!(disabled.velocity, zero_strength.velocity);
    assert_eq!(disabled.position, zero_strength.position);

    let enabled = step_pair(&pair_params());
    let (inviscid, viscous) = (closing_speed(&disabled), closing_speed(&enabled));
    assert!(inviscid > 0.0);
    assert!(viscous < inviscid, "viscosity should damp the closing speed: {viscous} vs {inviscid}");
    assert!((enabled.momentum() - Vec3::X).length() < 1.0e-5, "momentum={:?}", enabled.momentum());
}
