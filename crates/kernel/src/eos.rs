//! Equation of state for the double-density solver.
//!
//! Pressure is linear in the density error and near-pressure is linear in the
//! near density. Both are evaluated on the fly in the pressure pass rather
//! than stored per particle.

use crate::params::SimParams;

/// Linear pressure response to density.
///
/// ```text
/// P      = k * (rho - rho0)
/// P_near = k_near * rho_near
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearEos {
    /// Rest density `rho0`.
    pub target_density: f32,
    /// Pressure multiplier `k`.
    pub pressure_multiplier: f32,
    /// Near-pressure multiplier `k_near`.
    pub near_pressure_multiplier: f32,
}

impl LinearEos {
    /// Take the coefficients from the step parameters.
    pub fn from_params(params: &SimParams) -> Self {
        Self {
            target_density: params.target_density,
            pressure_multiplier: params.pressure_multiplier,
            near_pressure_multiplier: params.near_pressure_multiplier,
        }
    }

    /// Pressure at `density`. Negative below rest density (tension).
    #[inline]
    pub fn pressure(&self, density: f32) -> f32 {
        (density - self.target_density) * self.pressure_multiplier
    }

    /// Near-pressure at `near_density`.
    #[inline]
    pub fn near_pressure(&self, near_density: f32) -> f32 {
        near_density * self.near_pressure_multiplier
    }
}
