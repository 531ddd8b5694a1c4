//! Density splatting into a dense voxel volume for external volume renderers.
//!
//! Particles scatter their Spiky2 contribution into every voxel center within
//! `h`. Many particles hit the same voxel, so contributions are accumulated
//! with atomic integer adds in fixed point and converted back to `f32` once
//! all particles are done.

use std::sync::atomic::{AtomicU32, Ordering};

use glam::{IVec3, UVec3, Vec3};
use rayon::prelude::*;

use crate::sph::SphKernels;

/// Fixed-point scale of the voxel accumulators.
///
/// One unit is `1 / 1024` of density. A voxel overflows (wraps) above
/// `u32::MAX / 1024`, about 4.19 million; contributions smaller than one unit
/// are truncated away. Raising the scale trades overflow headroom for
/// precision.
pub const SPLAT_FIXED_POINT_SCALE: f32 = 1024.0;

/// Dense density grid over an axis-aligned box.
#[derive(Debug)]
pub struct DensityVolume {
    origin: Vec3,
    voxel_size: Vec3,
    dims: UVec3,
    accum: Vec<AtomicU32>,
    values: Vec<f32>,
}

impl DensityVolume {
    /// Volume covering `[min, max]` with `resolution` voxels per axis
    /// (at least one).
    pub fn new(min: Vec3, max: Vec3, resolution: UVec3) -> Self {
        let dims = resolution.max(UVec3::ONE);
        let count = dims.x as usize * dims.y as usize * dims.z as usize;
        Self {
            origin: min,
            voxel_size: (max - min) / dims.as_vec3(),
            dims,
            accum: (0..count).map(|_| AtomicU32::new(0)).collect(),
            values: vec![0.0; count],
        }
    }

    /// Voxels per axis.
    pub fn dims(&self) -> UVec3 {
        self.dims
    }

    /// Density per voxel, x fastest, then y, then z.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Density of voxel `(x, y, z)`.
    pub fn value_at(&self, voxel: UVec3) -> f32 {
        self.values[self.index(voxel)]
    }

    /// World-space center of a voxel.
    pub fn voxel_center(&self, voxel: UVec3) -> Vec3 {
        self.origin + (voxel.as_vec3() + Vec3::splat(0.5)) * self.voxel_size
    }

    fn index(&self, voxel: UVec3) -> usize {
        voxel.x as usize + self.dims.x as usize * (voxel.y as usize + self.dims.y as usize * voxel.z as usize)
    }

    /// Recompute the volume from `positions`.
    pub fn splat(&mut self, positions: &[Vec3], kernels: &SphKernels) {
        self.accum.par_iter().for_each(|a| a.store(0, Ordering::Relaxed));

        let h = kernels.radius();
        if h > 0.0 {
            let this = &*self;
            positions.par_iter().for_each(|&p| this.splat_one(p, kernels));
        }

        let accum = &self.accum;
        self.values
            .par_iter_mut()
            .zip(accum.par_iter())
            .for_each(|(v, a)| *v = a.load(Ordering::Relaxed) as f32 / SPLAT_FIXED_POINT_SCALE);
    }

    fn splat_one(&self, p: Vec3, kernels: &SphKernels) {
        if !p.is_finite() {
            return;
        }
        let h = kernels.radius();
        let max = self.dims.as_ivec3() - IVec3::ONE;
        let lo = ((p - h - self.origin) / self.voxel_size - 0.5)
            .floor()
            .as_ivec3()
            .max(IVec3::ZERO);
        let hi = ((p + h - self.origin) / self.voxel_size - 0.5)
            .ceil()
            .as_ivec3()
            .min(max);

        for z in lo.z..=hi.z {
            for y in lo.y..=hi.y {
                for x in lo.x..=hi.x {
                    let voxel = UVec3::new(x as u32, y as u32, z as u32);
                    let w = kernels.spiky_pow2(p.distance(self.voxel_center(voxel)));
                    if w <= 0.0 {
                        continue;
                    }
                    let fixed = (w * SPLAT_FIXED_POINT_SCALE) as u32;
                    self.accum[self.index(voxel)].fetch_add(fixed, Ordering::Relaxed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_volume_is_zero() {
        let mut volume = DensityVolume::new(Vec3::ZERO, Vec3::ONE, UVec3::splat(4));
        volume.splat(&[], &SphKernels::new(0.5));
        assert!(volume.values().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn single_particle_matches_kernel_within_precision() {
        let kernels = SphKernels::new(0.5);
        let mut volume = DensityVolume::new(Vec3::ZERO, Vec3::ONE, UVec3::splat(4));
        let p = Vec3::new(0.375, 0.375, 0.375);
        volume.splat(&[p], &kernels);

        let voxel = UVec3::splat(1);
        assert_eq!(volume.voxel_center(voxel), p);
        let expected = kernels.spiky_pow2(0.0);
        let got = volume.value_at(voxel);
        assert!((got - expected).abs() <= 1.0 / SPLAT_FIXED_POINT_SCALE, "{got} vs {expected}");

        // Voxel centers farther than h receive nothing.
        assert_eq!(volume.value_at(UVec3::new(3, 3, 3)), 0.0);
    }

    #[test]
    fn contributions_add_up() {
        let kernels = SphKernels::new(0.5);
        let mut volume = DensityVolume::new(Vec3::ZERO, Vec3::ONE, UVec3::splat(2));
        let p = Vec3::splat(0.25);
        volume.splat(&[p, p, p], &kernels);
        let single = kernels.spiky_pow2(0.0);
        let got = volume.value_at(UVec3::ZERO);
        assert!((got - 3.0 * single).abs() <= 3.0 / SPLAT_FIXED_POINT_SCALE);
    }

    #[test]
    fn resplat_replaces_previous_values() {
        let kernels = SphKernels::new(0.5);
        let mut volume = DensityVolume::new(Vec3::ZERO, Vec3::ONE, UVec3::splat(2));
        volume.splat(&[Vec3::splat(0.25)], &kernels);
        volume.splat(&[], &kernels);
        assert!(volume.values().iter().all(|&v| v == 0.0));
    }
}
