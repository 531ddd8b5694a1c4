//! Seeded particle spawning from cuboid regions.

use glam::{UVec3, Vec3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::particle::ParticleSet;

/// A box filled with a regular lattice of particles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpawnRegion {
    /// Region center.
    pub center: Vec3,
    /// Region size (full extent per axis).
    pub size: Vec3,
    /// Lattice resolution per axis.
    pub particles_per_axis: UVec3,
}

impl SpawnRegion {
    /// Number of particles this region produces.
    pub fn particle_count(&self) -> usize {
        let n = self.particles_per_axis;
        n.x as usize * n.y as usize * n.z as usize
    }
}

/// Spawn distribution used by `reset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnConfig {
    /// Regions to fill, in order.
    pub regions: Vec<SpawnRegion>,
    /// Radius of the random offset added to each lattice point.
    pub jitter: f32,
    /// Velocity every particle starts with.
    pub initial_velocity: Vec3,
    /// RNG seed; the same seed always gives the same particles.
    pub seed: u64,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            regions: vec![SpawnRegion {
                center: Vec3::new(-2.0, 0.5, 0.0),
                size: Vec3::new(3.0, 4.0, 3.5),
                particles_per_axis: UVec3::new(16, 20, 18),
            }],
            jitter: 0.005,
            initial_velocity: Vec3::ZERO,
            seed: 42,
        }
    }
}

impl SpawnConfig {
    /// Total particle count over all regions.
    pub fn particle_count(&self) -> usize {
        self.regions.iter().map(SpawnRegion::particle_count).sum()
    }
}

/// Uniform random point inside the unit sphere (rejection sampling).
fn inside_unit_sphere(rng: &mut impl Rng) -> Vec3 {
    loop {
        let v = Vec3::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        );
        if v.length_squared() <= 1.0 {
            return v;
        }
    }
}

/// Lattice coordinate `i` of `n` points spanning `[-0.5, 0.5]`.
fn lattice_t(i: u32, n: u32) -> f32 {
    if n <= 1 {
        0.0
    } else {
        i as f32 / (n - 1) as f32 - 0.5
    }
}

/// Generate the particle set described by `config`.
pub fn spawn_particles(config: &SpawnConfig) -> ParticleSet {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut particles = ParticleSet::with_capacity(config.particle_count());

    for region in &config.regions {
        let n = region.particles_per_axis;
        for z in 0..n.z {
            for y in 0..n.y {
                for x in 0..n.x {
                    let t = Vec3::new(lattice_t(x, n.x), lattice_t(y, n.y), lattice_t(z, n.z));
                    let jitter = if config.jitter > 0.0 {
                        inside_unit_sphere(&mut rng) * config.jitter
                    } else {
                        Vec3::ZERO
                    };
                    particles.push(region.center + t * region.size + jitter, config.initial_velocity);
                }
            }
        }
    }
    particles
}
