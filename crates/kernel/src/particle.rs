//! Particle data in struct-of-arrays layout.
//!
//! Every array is indexed by the same particle index. The simulation owns the
//! set exclusively while a step is running; external consumers get `&` access
//! (or the byte views below) between completed steps.

use glam::Vec3;

/// Struct-of-arrays particle storage.
#[derive(Debug, Clone, Default)]
pub struct ParticleSet {
    /// Positions at the end of the last substep.
    pub position: Vec<Vec3>,
    /// Velocities.
    pub velocity: Vec<Vec3>,
    /// Positions extrapolated a fixed look-ahead into the future; the grid and
    /// the force passes read these instead of `position`.
    pub predicted: Vec<Vec3>,
    /// Standard density (Spiky² sum).
    pub density: Vec<f32>,
    /// Near density (Spiky³ sum).
    pub near_density: Vec<f32>,
    /// Stable identity of each particle. Reordering permutes this together
    /// with the other arrays so consumers can follow a particle across steps.
    pub id: Vec<u32>,
}

impl ParticleSet {
    /// Create an empty particle set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty particle set with room for `n` particles.
    pub fn with_capacity(n: usize) -> Self {
        Self {
            position: Vec::with_capacity(n),
            velocity: Vec::with_capacity(n),
            predicted: Vec::with_capacity(n),
            density: Vec::with_capacity(n),
            near_density: Vec::with_capacity(n),
            id: Vec::with_capacity(n),
        }
    }

    /// Build a particle set from positions and velocities.
    ///
    /// Predicted positions start at the current positions; densities are zero
    /// until the first density pass. Missing velocities default to zero.
    pub fn from_positions(positions: Vec<Vec3>, velocities: Option<Vec<Vec3>>) -> Self {
        let n = positions.len();
        let mut velocity = velocities.unwrap_or_default();
        velocity.resize(n, Vec3::ZERO);
        Self {
            predicted: positions.clone(),
            position: positions,
            velocity,
            density: vec![0.0; n],
            near_density: vec![0.0; n],
            id: (0..n as u32).collect(),
        }
    }

    /// Number of particles.
    pub fn len(&self) -> usize {
        self.position.len()
    }

    /// `true` if there are no particles.
    pub fn is_empty(&self) -> bool {
        self.position.is_empty()
    }

    /// Append a particle at rest-state defaults.
    pub fn push(&mut self, position: Vec3, velocity: Vec3) {
        let id = self.position.len() as u32;
        self.position.push(position);
        self.velocity.push(velocity);
        self.predicted.push(position);
        self.density.push(0.0);
        self.near_density.push(0.0);
        self.id.push(id);
    }

    /// Index of the particle whose stable id is `id`, if present.
    pub fn index_of(&self, id: u32) -> Option<usize> {
        self.id.iter().position(|&x| x == id)
    }

    /// Positions as raw bytes (tightly packed `[f32; 3]`), for zero-copy upload.
    pub fn position_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.position)
    }

    /// Velocities as raw bytes (tightly packed `[f32; 3]`).
    pub fn velocity_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.velocity)
    }

    /// Total linear momentum assuming unit particle mass.
    pub fn momentum(&self) -> Vec3 {
        self.velocity.iter().copied().sum()
    }

    /// Permute every per-particle array so that new index `s` holds the
    /// particle previously at `order[s]`.
    ///
    /// `scratch` provides the second buffer of each double-buffered array; it
    /// is resized as needed and left holding the previous data.
    pub(crate) fn apply_permutation(&mut self, order: &[u32], scratch: &mut ParticleScratch) {
        use rayon::prelude::*;

        debug_assert_eq!(order.len(), self.len());
        let n = self.len();
        scratch.resize(n);

        scratch
            .position
            .par_iter_mut()
            .zip(scratch.velocity.par_iter_mut())
            .zip(scratch.predicted.par_iter_mut())
            .zip(scratch.id.par_iter_mut())
            .zip(order.par_iter())
            .for_each(|((((p, v), q), id), &src)| {
                let src = src as usize;
                *p = self.position[src];
                *v = self.velocity[src];
                *q = self.predicted[src];
                *id = self.id[src];
            });

        std::mem::swap(&mut self.position, &mut scratch.position);
        std::mem::swap(&mut self.velocity, &mut scratch.velocity);
        std::mem::swap(&mut self.predicted, &mut scratch.predicted);
        std::mem::swap(&mut self.id, &mut scratch.id);
    }
}

/// Second half of the double-buffered particle arrays used by reordering.
#[derive(Debug, Clone, Default)]
pub(crate) struct ParticleScratch {
    position: Vec<Vec3>,
    velocity: Vec<Vec3>,
    predicted: Vec<Vec3>,
    id: Vec<u32>,
}

impl ParticleScratch {
    fn resize(&mut self, n: usize) {
        self.position.resize(n, Vec3::ZERO);
        self.velocity.resize(n, Vec3::ZERO);
        self.predicted.resize(n, Vec3::ZERO);
        self.id.resize(n, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_set() {
        let ps = ParticleSet::new();
        assert_eq!(ps.len(), 0);
        assert!(ps.is_empty());
        assert!(ps.position_bytes().is_empty());
    }

    #[test]
    fn push_and_len() {
        let mut ps = ParticleSet::new();
        ps.push(Vec3::new(1.0, 2.0, 3.0), Vec3::X);
        assert_eq!(ps.len(), 1);
        assert_eq!(ps.predicted[0], Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(ps.density[0], 0.0);
        assert_eq!(ps.id[0], 0);
        assert_eq!(ps.position_bytes().len(), 12);
    }

    #[test]
    fn from_positions_fills_defaults() {
        let ps = ParticleSet::from_positions(vec![Vec3::ZERO, Vec3::ONE], None);
        assert_eq!(ps.velocity, vec![Vec3::ZERO; 2]);
        assert_eq!(ps.id, vec![0, 1]);
        assert_eq!(ps.near_density.len(), 2);
    }

    #[test]
    fn permutation_moves_all_arrays_together() {
        let mut ps = ParticleSet::new();
        for i in 0..4 {
            ps.push(Vec3::splat(i as f32), Vec3::X * i as f32);
        }
        let mut scratch = ParticleScratch::default();
        ps.apply_permutation(&[2, 0, 3, 1], &mut scratch);

        assert_eq!(ps.id, vec![2, 0, 3, 1]);
        assert_eq!(ps.position[0], Vec3::splat(2.0));
        assert_eq!(ps.velocity[2], Vec3::X * 3.0);
        assert_eq!(ps.predicted[3], Vec3::splat(1.0));
        assert_eq!(ps.index_of(3), Some(2));
    }
}
