//! SPH smoothing kernels and the density / pressure / viscosity passes.
//!
//! Kernels (3D normalizations, `r` = distance, support radius `h`):
//!
//! ```text
//! Spiky2  W2(r) = 15 / (2 pi h^5) * (h - r)^2       density
//! Spiky3  W3(r) = 15 / (pi h^6)   * (h - r)^3       near density
//! Poly6   W(r)  = 315 / (64 pi h^9) * (h^2 - r^2)^3 viscosity
//! ```
//!
//! Every kernel and derivative is exactly zero for `r >= h` and for `h <= 0`.
//!
//! All passes read predicted positions and walk neighbors through the
//! [`SpatialGrid`]; each runs as one rayon parallel loop, and the end of the
//! loop is the barrier before the next pass.

use std::f32::consts::PI;

use glam::Vec3;
use rayon::prelude::*;

use crate::eos::LinearEos;
use crate::neighbor::SpatialGrid;
use crate::particle::ParticleSet;

/// Kernel normalizations for a fixed smoothing radius.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphKernels {
    h: f32,
    h_sq: f32,
    spiky_pow2_scale: f32,
    spiky_pow3_scale: f32,
    poly6_scale: f32,
    spiky_pow2_derivative_scale: f32,
    spiky_pow3_derivative_scale: f32,
}

impl SphKernels {
    /// Precompute the scale factors for radius `h`.
    ///
    /// A non-positive `h` yields all-zero kernels.
    pub fn new(h: f32) -> Self {
        if h <= 0.0 || !h.is_finite() {
            return Self {
                h: 0.0,
                h_sq: 0.0,
                spiky_pow2_scale: 0.0,
                spiky_pow3_scale: 0.0,
                poly6_scale: 0.0,
                spiky_pow2_derivative_scale: 0.0,
                spiky_pow3_derivative_scale: 0.0,
            };
        }
        let h5 = h.powi(5);
        let h6 = h5 * h;
        Self {
            h,
            h_sq: h * h,
            spiky_pow2_scale: 15.0 / (2.0 * PI * h5),
            spiky_pow3_scale: 15.0 / (PI * h6),
            poly6_scale: 315.0 / (64.0 * PI * h.powi(9)),
            spiky_pow2_derivative_scale: 15.0 / (PI * h5),
            spiky_pow3_derivative_scale: 45.0 / (PI * h6),
        }
    }

    /// Smoothing radius.
    pub fn radius(&self) -> f32 {
        self.h
    }

    /// Density kernel `W2`.
    #[inline]
    pub fn spiky_pow2(&self, r: f32) -> f32 {
        if r >= self.h {
            return 0.0;
        }
        let v = self.h - r;
        v * v * self.spiky_pow2_scale
    }

    /// Near-density kernel `W3`.
    #[inline]
    pub fn spiky_pow3(&self, r: f32) -> f32 {
        if r >= self.h {
            return 0.0;
        }
        let v = self.h - r;
        v * v * v * self.spiky_pow3_scale
    }

    /// Viscosity kernel.
    #[inline]
    pub fn poly6(&self, r: f32) -> f32 {
        if r >= self.h {
            return 0.0;
        }
        let v = self.h_sq - r * r;
        v * v * v * self.poly6_scale
    }

    /// `dW2/dr`, non-positive inside the support.
    #[inline]
    pub fn spiky_pow2_derivative(&self, r: f32) -> f32 {
        if r >= self.h {
            return 0.0;
        }
        -(self.h - r) * self.spiky_pow2_derivative_scale
    }

    /// `dW3/dr`, non-positive inside the support.
    #[inline]
    pub fn spiky_pow3_derivative(&self, r: f32) -> f32 {
        if r >= self.h {
            return 0.0;
        }
        let v = self.h - r;
        -v * v * self.spiky_pow3_derivative_scale
    }
}

// ---------------------------------------------------------------------------
// Density
// ---------------------------------------------------------------------------

/// Density and near density at `p`, self contribution included.
#[inline]
pub fn density_at(p: Vec3, predicted: &[Vec3], grid: &SpatialGrid, kernels: &SphKernels) -> (f32, f32) {
    let mut density = 0.0;
    let mut near_density = 0.0;
    grid.for_each_neighbor(p, predicted, |_, _, dst_sq| {
        let dst = dst_sq.sqrt();
        density += kernels.spiky_pow2(dst);
        near_density += kernels.spiky_pow3(dst);
    });
    (density, near_density)
}

/// Fill `density` and `near_density` for every particle.
pub fn compute_density(particles: &mut ParticleSet, grid: &SpatialGrid, kernels: &SphKernels) {
    let predicted = &particles.predicted;
    particles
        .density
        .par_iter_mut()
        .zip(particles.near_density.par_iter_mut())
        .zip(predicted.par_iter())
        .for_each(|((density, near_density), &p)| {
            (*density, *near_density) = density_at(p, predicted, grid, kernels);
        });
}

// ---------------------------------------------------------------------------
// Pressure
// ---------------------------------------------------------------------------

/// Direction from particle `i` toward particle `j`.
///
/// Coincident particles get a fixed axis whose sign depends on index order,
/// so the pair still pushes apart and the two contributions cancel.
#[inline]
fn direction_to(i: usize, j: usize, offset: Vec3, dst: f32) -> Vec3 {
    if dst > 0.0 {
        offset / dst
    } else if j > i {
        Vec3::Y
    } else {
        Vec3::NEG_Y
    }
}

/// Pressure acceleration of particle `i`.
///
/// ```text
/// F_i = sum_j dir_ij * ( dW2(r) * (P_i + P_j) / 2 / rho_j
///                      + dW3(r) * (Pn_i + Pn_j) / 2 / rhon_j )
/// a_i = F_i / rho_i
/// ```
///
/// Zero if the particle's own density is not positive; a neighbor whose
/// (near) density is not positive contributes nothing to that term.
pub fn pressure_acceleration(
    i: usize,
    particles: &ParticleSet,
    grid: &SpatialGrid,
    kernels: &SphKernels,
    eos: &LinearEos,
) -> Vec3 {
    let density = particles.density[i];
    if density <= 0.0 {
        return Vec3::ZERO;
    }
    let near_density = particles.near_density[i];
    let pressure = eos.pressure(density);
    let near_pressure = eos.near_pressure(near_density);
    let p = particles.predicted[i];

    let mut force = Vec3::ZERO;
    grid.for_each_neighbor(p, &particles.predicted, |j, offset, dst_sq| {
        if j == i {
            return;
        }
        let dst = dst_sq.sqrt();
        let dir = direction_to(i, j, offset, dst);

        let neighbor_density = particles.density[j];
        if neighbor_density > 0.0 {
            let shared = 0.5 * (pressure + eos.pressure(neighbor_density));
            force += dir * kernels.spiky_pow2_derivative(dst) * shared / neighbor_density;
        }
        let neighbor_near = particles.near_density[j];
        if neighbor_near > 0.0 {
            let shared_near = 0.5 * (near_pressure + eos.near_pressure(neighbor_near));
            force += dir * kernels.spiky_pow3_derivative(dst) * shared_near / neighbor_near;
        }
    });
    force / density
}

/// Apply the pressure acceleration to every velocity: `v += a * dt`.
///
/// Only densities and predicted positions are read, so velocities can be
/// updated in place.
pub fn apply_pressure(
    particles: &mut ParticleSet,
    grid: &SpatialGrid,
    kernels: &SphKernels,
    eos: &LinearEos,
    dt: f32,
) {
    let mut velocity = std::mem::take(&mut particles.velocity);
    {
        let particles = &*particles;
        velocity.par_iter_mut().enumerate().for_each(|(i, v)| {
            *v += pressure_acceleration(i, particles, grid, kernels, eos) * dt;
        });
    }
    particles.velocity = velocity;
}

// ---------------------------------------------------------------------------
// Viscosity
// ---------------------------------------------------------------------------

/// Velocity-smoothing term of particle `i`: `sum_j (v_j - v_i) * poly6(r)`.
pub fn viscosity_term(i: usize, particles: &ParticleSet, grid: &SpatialGrid, kernels: &SphKernels) -> Vec3 {
    let v_i = particles.velocity[i];
    let mut acc = Vec3::ZERO;
    grid.for_each_neighbor(particles.predicted[i], &particles.predicted, |j, _, dst_sq| {
        if j != i {
            acc += (particles.velocity[j] - v_i) * kernels.poly6(dst_sq.sqrt());
        }
    });
    acc
}

/// Blend nearby velocities: `v += strength * term * dt`.
///
/// Terms are computed into `scratch` from the unmodified velocities, then
/// applied in a second pass.
pub fn apply_viscosity(
    particles: &mut ParticleSet,
    grid: &SpatialGrid,
    kernels: &SphKernels,
    strength: f32,
    dt: f32,
    scratch: &mut Vec<Vec3>,
) {
    let n = particles.len();
    scratch.resize(n, Vec3::ZERO);
    {
        let particles = &*particles;
        scratch
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, term)| *term = viscosity_term(i, particles, grid, kernels));
    }
    particles
        .velocity
        .par_iter_mut()
        .zip(scratch.par_iter())
        .for_each(|(v, &term)| *v += term * strength * dt);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernels_vanish_outside_support() {
        let k = SphKernels::new(1.0);
        for r in [1.0, 1.5, 100.0] {
            assert_eq!(k.spiky_pow2(r), 0.0);
            assert_eq!(k.spiky_pow3(r), 0.0);
            assert_eq!(k.poly6(r), 0.0);
            assert_eq!(k.spiky_pow2_derivative(r), 0.0);
            assert_eq!(k.spiky_pow3_derivative(r), 0.0);
        }
    }

    #[test]
    fn degenerate_radius_gives_zero_kernels() {
        for h in [0.0, -1.0, f32::NAN] {
            let k = SphKernels::new(h);
            assert_eq!(k.spiky_pow2(0.0), 0.0);
            assert_eq!(k.spiky_pow3(0.0), 0.0);
            assert_eq!(k.poly6(0.0), 0.0);
        }
    }

    #[test]
    fn kernel_values_at_origin() {
        let h = 0.5_f32;
        let k = SphKernels::new(h);
        let w2 = 15.0 / (2.0 * PI * h.powi(5)) * h * h;
        let w3 = 15.0 / (PI * h.powi(6)) * h * h * h;
        assert!((k.spiky_pow2(0.0) - w2).abs() / w2 < 1.0e-6);
        assert!((k.spiky_pow3(0.0) - w3).abs() / w3 < 1.0e-6);
    }

    #[test]
    fn kernels_decrease_monotonically() {
        let k = SphKernels::new(1.0);
        let mut last = (f32::INFINITY, f32::INFINITY, f32::INFINITY);
        for step in 0..20 {
            let r = step as f32 * 0.05;
            let now = (k.spiky_pow2(r), k.spiky_pow3(r), k.poly6(r));
            assert!(now.0 < last.0 && now.1 < last.1 && now.2 < last.2, "not decreasing at r={r}");
            last = now;
        }
    }

    #[test]
    fn derivatives_match_finite_differences() {
        let k = SphKernels::new(1.0);
        let eps = 1.0e-3;
        for r in [0.1_f32, 0.4, 0.8] {
            let d2 = (k.spiky_pow2(r + eps) - k.spiky_pow2(r - eps)) / (2.0 * eps);
            let d3 = (k.spiky_pow3(r + eps) - k.spiky_pow3(r - eps)) / (2.0 * eps);
            assert!((d2 - k.spiky_pow2_derivative(r)).abs() < 1.0e-2, "dW2 at r={r}");
            assert!((d3 - k.spiky_pow3_derivative(r)).abs() < 1.0e-2, "dW3 at r={r}");
        }
    }

    #[test]
    fn coincident_direction_is_antisymmetric() {
        assert_eq!(direction_to(0, 1, Vec3::ZERO, 0.0), Vec3::Y);
        assert_eq!(direction_to(1, 0, Vec3::ZERO, 0.0), Vec3::NEG_Y);
        assert_eq!(direction_to(0, 1, Vec3::new(2.0, 0.0, 0.0), 2.0), Vec3::X);
    }
}
