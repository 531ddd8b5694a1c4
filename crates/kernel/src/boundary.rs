//! Domain bounds, static obstacles and collision response.
//!
//! Both layers reflect the velocity component along the contact normal scaled
//! by the collision damping `d` (`v_n' = -d * v_n`) and leave the tangential
//! components untouched. Rotated shapes are resolved in their local frame and
//! the corrected state is rotated back to world space.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Simulation domain: an axis-aligned box `[min, max]` optionally rotated
/// about its own center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainBounds {
    /// Minimum corner (before rotation).
    pub min: Vec3,
    /// Maximum corner (before rotation).
    pub max: Vec3,
    /// Rotation about the box center.
    pub rotation: Quat,
}

impl Default for DomainBounds {
    fn default() -> Self {
        Self {
            min: Vec3::new(-4.0, -2.0, -2.0),
            max: Vec3::new(4.0, 4.0, 2.0),
            rotation: Quat::IDENTITY,
        }
    }
}

impl DomainBounds {
    /// Axis-aligned, unrotated bounds.
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min,
            max,
            rotation: Quat::IDENTITY,
        }
    }

    /// Box center.
    pub fn center(&self) -> Vec3 {
        0.5 * (self.min + self.max)
    }

    /// Half of the box size along each local axis.
    pub fn half_extents(&self) -> Vec3 {
        0.5 * (self.max - self.min)
    }

    /// `true` if the box is rotated.
    pub fn is_rotated(&self) -> bool {
        self.rotation != Quat::IDENTITY
    }

    /// World-space axis-aligned bounding box of the (possibly rotated) domain.
    pub fn world_aabb(&self) -> (Vec3, Vec3) {
        if !self.is_rotated() {
            return (self.min, self.max);
        }
        let half = self.half_extents();
        let axes = glam::Mat3::from_quat(self.rotation);
        let extent = axes.x_axis.abs() * half.x + axes.y_axis.abs() * half.y + axes.z_axis.abs() * half.z;
        let c = self.center();
        (c - extent, c + extent)
    }

    /// `true` if `p` lies inside the (possibly rotated) box, faces included.
    pub fn contains(&self, p: Vec3) -> bool {
        if self.is_rotated() {
            let local = self.rotation.inverse() * (p - self.center());
            let half = self.half_extents();
            local.abs().cmple(half + Vec3::splat(1.0e-4)).all()
        } else {
            p.cmpge(self.min).all() && p.cmple(self.max).all()
        }
    }
}

/// Shape of a static obstacle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum ObstacleShape {
    /// Box with the given half-extents.
    Box {
        /// Half size along each local axis.
        half_extents: Vec3,
    },
    /// Sphere with the given radius.
    Sphere {
        /// Sphere radius.
        radius: f32,
    },
}

/// A static collidable shape embedded in the domain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    /// Shape tag and size.
    #[serde(flatten)]
    pub shape: ObstacleShape,
    /// World-space center.
    pub center: Vec3,
    /// Rotation about the center (ignored for spheres).
    #[serde(default = "identity_rotation")]
    pub rotation: Quat,
}

fn identity_rotation() -> Quat {
    Quat::IDENTITY
}

impl Obstacle {
    /// Unrotated box obstacle.
    pub fn cuboid(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            shape: ObstacleShape::Box { half_extents },
            center,
            rotation: Quat::IDENTITY,
        }
    }

    /// Sphere obstacle.
    pub fn sphere(center: Vec3, radius: f32) -> Self {
        Self {
            shape: ObstacleShape::Sphere { radius },
            center,
            rotation: Quat::IDENTITY,
        }
    }

    /// A zero or negative extent disables the obstacle.
    pub fn is_enabled(&self) -> bool {
        match self.shape {
            ObstacleShape::Box { half_extents } => half_extents.cmpgt(Vec3::ZERO).all(),
            ObstacleShape::Sphere { radius } => radius > 0.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Collision response
// ---------------------------------------------------------------------------

/// Clamp `p` into `[lo, hi]` per axis, reflecting the velocity component of
/// every axis the particle was leaving through.
#[inline]
fn clamp_axes(p: &mut Vec3, v: &mut Vec3, lo: Vec3, hi: Vec3, damping: f32) {
    for axis in 0..3 {
        if p[axis] < lo[axis] {
            p[axis] = lo[axis];
            if v[axis] < 0.0 {
                v[axis] = -damping * v[axis];
            }
        } else if p[axis] > hi[axis] {
            p[axis] = hi[axis];
            if v[axis] > 0.0 {
                v[axis] = -damping * v[axis];
            }
        }
    }
}

/// Keep a particle inside the domain box.
///
/// Unrotated domains are clamped directly in world space so the result lies
/// exactly on `min`/`max`.
pub fn resolve_domain(p: &mut Vec3, v: &mut Vec3, bounds: &DomainBounds, damping: f32) {
    if !bounds.is_rotated() {
        clamp_axes(p, v, bounds.min, bounds.max, damping);
        return;
    }

    let center = bounds.center();
    let half = bounds.half_extents();
    let inv = bounds.rotation.inverse();
    let mut local_p = inv * (*p - center);
    if local_p.abs().cmple(half).all() {
        return;
    }
    let mut local_v = inv * *v;
    clamp_axes(&mut local_p, &mut local_v, -half, half, damping);
    *p = center + bounds.rotation * local_p;
    *v = bounds.rotation * local_v;
}

/// Push a particle out of an obstacle. Disabled obstacles are skipped.
pub fn resolve_obstacle(p: &mut Vec3, v: &mut Vec3, obstacle: &Obstacle, damping: f32) {
    if !obstacle.is_enabled() {
        return;
    }
    match obstacle.shape {
        ObstacleShape::Box { half_extents } => resolve_box(p, v, obstacle, half_extents, damping),
        ObstacleShape::Sphere { radius } => resolve_sphere(p, v, obstacle.center, radius, damping),
    }
}

fn resolve_box(p: &mut Vec3, v: &mut Vec3, obstacle: &Obstacle, half: Vec3, damping: f32) {
    let local = obstacle.rotation.inverse() * (*p - obstacle.center);
    let depth = half - local.abs();
    if depth.cmple(Vec3::ZERO).any() {
        return;
    }

    // Least penetration picks the face; strict `<` keeps x before y before z.
    let mut axis = 0;
    if depth.y < depth[axis] {
        axis = 1;
    }
    if depth.z < depth[axis] {
        axis = 2;
    }

    let side = if local[axis] >= 0.0 { 1.0 } else { -1.0 };
    let mut snapped = local;
    snapped[axis] = side * half[axis];
    let mut local_normal = Vec3::ZERO;
    local_normal[axis] = side;

    *p = obstacle.center + obstacle.rotation * snapped;
    let normal = obstacle.rotation * local_normal;
    reflect_inward(v, normal, damping);
}

fn resolve_sphere(p: &mut Vec3, v: &mut Vec3, center: Vec3, radius: f32, damping: f32) {
    let offset = *p - center;
    let dst = offset.length();
    if dst >= radius {
        return;
    }
    let normal = if dst > 0.0 { offset / dst } else { Vec3::Y };
    *p = center + normal * radius;
    reflect_inward(v, normal, damping);
}

/// Reflect the normal component of `v` about the outward `normal`, only if the
/// particle is moving into the surface.
#[inline]
fn reflect_inward(v: &mut Vec3, normal: Vec3, damping: f32) {
    let vn = v.dot(normal);
    if vn < 0.0 {
        *v -= (1.0 + damping) * vn * normal;
    }
}
