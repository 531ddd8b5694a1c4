//! Per-step simulation parameters and construction-time solver settings.
//!
//! [`SimParams`] is passed by reference into every `step` call and is only
//! read by the core. [`SolverSettings`] is fixed when the simulation is built.

use glam::Vec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::boundary::{DomainBounds, Obstacle};

/// Default look-ahead for predicted positions (seconds).
pub const DEFAULT_PREDICTION_LOOKAHEAD: f32 = 1.0 / 120.0;

/// Errors reported by [`SimParams::validate`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamsError {
    /// A scalar or vector component is NaN or infinite.
    #[error("parameter `{0}` must be finite")]
    NonFinite(&'static str),
    /// Collision damping outside `[0, 1]`.
    #[error("collision damping must lie in [0, 1], got {0}")]
    DampingOutOfRange(f32),
    /// `substeps == 0`.
    #[error("substeps per frame must be at least 1")]
    ZeroSubsteps,
    /// `grid_rebuild_interval == 0`.
    #[error("grid rebuild interval must be at least 1")]
    ZeroRebuildInterval,
    /// Negative time scale or non-positive frame clamp.
    #[error("invalid frame timing: {0}")]
    Timing(&'static str),
    /// `min > max` on some axis of the domain.
    #[error("domain bounds inverted on axis {axis}: min {min} > max {max}")]
    InvertedBounds {
        /// Offending axis (0 = x).
        axis: usize,
        /// Minimum on that axis.
        min: f32,
        /// Maximum on that axis.
        max: f32,
    },
}

/// Transient pointer-driven force field, supplied per frame.
///
/// Positive strength pulls particles toward `point`, negative pushes them away.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerInteraction {
    /// Center of the force field.
    pub point: Vec3,
    /// Radius of influence.
    pub radius: f32,
    /// Signed strength.
    pub strength: f32,
}

/// Parameters read by every substep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimParams {
    /// Smoothing radius `h`, also the grid cell size.
    pub smoothing_radius: f32,
    /// Rest density `rho0`.
    pub target_density: f32,
    /// Pressure multiplier `k`.
    pub pressure_multiplier: f32,
    /// Near-pressure multiplier `k_near`.
    pub near_pressure_multiplier: f32,
    /// Viscosity strength.
    pub viscosity_strength: f32,
    /// Run the viscosity stage.
    pub viscosity_enabled: bool,
    /// Gravitational acceleration.
    pub gravity: Vec3,
    /// Collision damping `d` in `[0, 1]`.
    pub collision_damping: f32,
    /// Substeps per frame.
    pub substeps: u32,
    /// Multiplier on simulated time.
    pub time_scale: f32,
    /// Upper bound on the frame dt before scaling.
    pub max_frame_dt: f32,
    /// Look-ahead used for predicted positions.
    pub prediction_lookahead: f32,
    /// Rebuild the grid every `n`th substep (1 = every substep).
    pub grid_rebuild_interval: u32,
    /// Domain box.
    pub bounds: DomainBounds,
    /// Optional static obstacle.
    pub obstacle: Option<Obstacle>,
    /// Optional pointer interaction for this frame.
    pub interaction: Option<PointerInteraction>,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            smoothing_radius: 0.2,
            target_density: 630.0,
            pressure_multiplier: 288.0,
            near_pressure_multiplier: 2.16,
            viscosity_strength: 0.001,
            viscosity_enabled: true,
            gravity: Vec3::new(0.0, -10.0, 0.0),
            collision_damping: 0.95,
            substeps: 3,
            time_scale: 1.0,
            max_frame_dt: 1.0 / 60.0,
            prediction_lookahead: DEFAULT_PREDICTION_LOOKAHEAD,
            grid_rebuild_interval: 1,
            bounds: DomainBounds::default(),
            obstacle: None,
            interaction: None,
        }
    }
}

impl SimParams {
    /// Check the parameters for values the core cannot step with.
    ///
    /// Degenerate but finite values (`h <= 0`, disabled obstacles) are
    /// accepted: the step short-circuits on them instead.
    pub fn validate(&self) -> Result<(), ParamsError> {
        let scalars = [
            ("smoothing_radius", self.smoothing_radius),
            ("target_density", self.target_density),
            ("pressure_multiplier", self.pressure_multiplier),
            ("near_pressure_multiplier", self.near_pressure_multiplier),
            ("viscosity_strength", self.viscosity_strength),
            ("collision_damping", self.collision_damping),
            ("time_scale", self.time_scale),
            ("max_frame_dt", self.max_frame_dt),
            ("prediction_lookahead", self.prediction_lookahead),
        ];
        for (name, value) in scalars {
            if !value.is_finite() {
                return Err(ParamsError::NonFinite(name));
            }
        }
        let vectors = [
            ("gravity", self.gravity),
            ("bounds.min", self.bounds.min),
            ("bounds.max", self.bounds.max),
        ];
        for (name, value) in vectors {
            if !value.is_finite() {
                return Err(ParamsError::NonFinite(name));
            }
        }
        if !self.bounds.rotation.is_finite() {
            return Err(ParamsError::NonFinite("bounds.rotation"));
        }
        if let Some(interaction) = &self.interaction {
            if !interaction.point.is_finite()
                || !interaction.radius.is_finite()
                || !interaction.strength.is_finite()
            {
                return Err(ParamsError::NonFinite("interaction"));
            }
        }
        if let Some(obstacle) = &self.obstacle {
            if !obstacle.center.is_finite() || !obstacle.rotation.is_finite() {
                return Err(ParamsError::NonFinite("obstacle"));
            }
        }

        if !(0.0..=1.0).contains(&self.collision_damping) {
            return Err(ParamsError::DampingOutOfRange(self.collision_damping));
        }
        if self.substeps == 0 {
            return Err(ParamsError::ZeroSubsteps);
        }
        if self.grid_rebuild_interval == 0 {
            return Err(ParamsError::ZeroRebuildInterval);
        }
        if self.time_scale < 0.0 {
            return Err(ParamsError::Timing("time_scale must not be negative"));
        }
        if self.max_frame_dt <= 0.0 {
            return Err(ParamsError::Timing("max_frame_dt must be positive"));
        }
        for axis in 0..3 {
            let (min, max) = (self.bounds.min[axis], self.bounds.max[axis]);
            if min > max {
                return Err(ParamsError::InvertedBounds { axis, min, max });
            }
        }
        Ok(())
    }

    /// Substep dt for a frame of `frame_dt` seconds.
    ///
    /// ```text
    /// dt = min(frame_dt, max_frame_dt) * time_scale / substeps
    /// ```
    pub fn substep_dt(&self, frame_dt: f32) -> f32 {
        let substeps = self.substeps.max(1) as f32;
        frame_dt.min(self.max_frame_dt) * self.time_scale / substeps
    }
}

// ---------------------------------------------------------------------------
// Construction-time settings
// ---------------------------------------------------------------------------

/// Cell-addressing backend of the spatial grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeighborBackend {
    /// Block hash reduced modulo the particle count.
    Hashed,
    /// Dense grid over the domain, one lookup per neighbor cell.
    Linear,
    /// Dense grid, one contiguous range per neighbor row.
    LinearStrip,
    /// Dense strip grid when it fits `max_linear_cells`, hashed otherwise.
    #[default]
    Auto,
}

/// Solver choices fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    /// Grid addressing backend.
    pub backend: NeighborBackend,
    /// Permute particle arrays into cell order after every grid build.
    pub reorder_particles: bool,
    /// Sort each cell run by original index, making steps bit-reproducible.
    pub deterministic_order: bool,
    /// Dedicated worker threads; `0` uses the global rayon pool.
    pub worker_threads: usize,
    /// Largest dense cell count any linear backend accepts; larger domains
    /// fall back to the hashed grid.
    pub max_linear_cells: usize,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            backend: NeighborBackend::Auto,
            reorder_particles: true,
            deterministic_order: true,
            worker_threads: 0,
            max_linear_cells: 1 << 22,
        }
    }
}
