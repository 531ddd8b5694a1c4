//! External forces, prediction, explicit Euler integration and collisions.

use glam::Vec3;
use rayon::prelude::*;

use crate::boundary::{resolve_domain, resolve_obstacle};
use crate::params::{PointerInteraction, SimParams};
use crate::particle::ParticleSet;

/// Gravity plus the optional pointer force field at one particle.
///
/// Inside the interaction radius the pull/push grows toward the center, gravity
/// fades out as the pull dominates, and `-v * centre_weight` damps the motion
/// so particles do not oscillate around the pointer.
pub fn external_acceleration(
    position: Vec3,
    velocity: Vec3,
    gravity: Vec3,
    interaction: Option<&PointerInteraction>,
) -> Vec3 {
    let Some(interaction) = interaction else {
        return gravity;
    };
    if interaction.strength == 0.0 || interaction.radius <= 0.0 {
        return gravity;
    }

    let offset = interaction.point - position;
    let dst_sq = offset.length_squared();
    if dst_sq >= interaction.radius * interaction.radius {
        return gravity;
    }

    let dst = dst_sq.sqrt();
    let edge_t = dst / interaction.radius;
    let centre_t = 1.0 - edge_t;
    let dir = if dst > 0.0 { offset / dst } else { Vec3::ZERO };

    let gravity_weight = 1.0 - centre_t * (interaction.strength / 10.0).clamp(0.0, 1.0);
    gravity * gravity_weight + dir * centre_t * interaction.strength - velocity * centre_t
}

/// `v += a_ext * dt`, then `predicted = position + v * lookahead`.
pub fn apply_external_forces(particles: &mut ParticleSet, params: &SimParams, dt: f32) {
    let gravity = params.gravity;
    let interaction = params.interaction.as_ref();
    let lookahead = params.prediction_lookahead;

    particles
        .velocity
        .par_iter_mut()
        .zip(particles.predicted.par_iter_mut())
        .zip(particles.position.par_iter())
        .for_each(|((v, predicted), &p)| {
            *v += external_acceleration(p, *v, gravity, interaction) * dt;
            *predicted = p + *v * lookahead;
        });
}

/// Advance positions by `v * dt` and resolve collisions.
///
/// Non-finite velocities or positions are repaired: the particle keeps its
/// last finite position (or the domain center) and stops. Returns the number
/// of repaired particles.
pub fn integrate(particles: &mut ParticleSet, params: &SimParams, dt: f32) -> u32 {
    let bounds = params.bounds;
    let damping = params.collision_damping;
    let obstacle = params.obstacle;
    let fallback = bounds.center();

    let repairs: u32 = particles
        .position
        .par_iter_mut()
        .zip(particles.velocity.par_iter_mut())
        .map(|(p, v)| {
            let next = *p + *v * dt;
            let repaired = if v.is_finite() && next.is_finite() {
                *p = next;
                0
            } else {
                if !p.is_finite() {
                    *p = fallback;
                }
                *v = Vec3::ZERO;
                1
            };

            if let Some(obstacle) = &obstacle {
                resolve_obstacle(p, v, obstacle, damping);
            }
            resolve_domain(p, v, &bounds, damping);
            repaired
        })
        .sum();

    if repairs > 0 {
        tracing::warn!(repairs, "repaired non-finite particle state");
    }
    repairs
}
