//! Ray picking of individual particles.
//!
//! The nearest hit along the ray wins; exact ties go to the lowest particle
//! index. The reduction is a total order, so the result does not depend on
//! how rayon splits the work.

use std::cmp::Ordering;

use glam::Vec3;
use rayon::prelude::*;

/// A picked particle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PickHit {
    /// Particle index.
    pub index: usize,
    /// Ray parameter of the closest approach (distance along the unit ray).
    pub t: f32,
}

fn closer(a: PickHit, b: PickHit) -> PickHit {
    match a.t.total_cmp(&b.t).then(a.index.cmp(&b.index)) {
        Ordering::Greater => b,
        _ => a,
    }
}

/// Pick the particle nearest to `origin` along `direction` whose distance to
/// the ray is at most `pick_radius`. Particles behind the origin are ignored.
pub fn pick_particle(positions: &[Vec3], origin: Vec3, direction: Vec3, pick_radius: f32) -> Option<PickHit> {
    let dir = direction.try_normalize()?;
    let radius_sq = pick_radius * pick_radius;

    positions
        .par_iter()
        .enumerate()
        .filter_map(|(index, &p)| {
            let t = (p - origin).dot(dir);
            if !(t >= 0.0) {
                return None;
            }
            let closest = origin + dir * t;
            (p.distance_squared(closest) <= radius_sq).then_some(PickHit { index, t })
        })
        .reduce_with(closer)
}
