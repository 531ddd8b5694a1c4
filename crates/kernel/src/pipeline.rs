//! Substep stage graph, per-stage profiling and cooperative cancellation.
//!
//! Every substep runs a [`StagePlan`]: an ordered list of [`Stage`]s, each of
//! which declares the particle fields it reads and writes. A plan is valid if
//! every field a stage reads is either persistent simulation state or written
//! by an earlier stage of the same plan. Stages never overlap: a stage starts
//! only after the previous one finished for every particle.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Fields and stages
// ---------------------------------------------------------------------------

/// A piece of simulation state a stage can read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    /// Particle positions.
    Position,
    /// Particle velocities.
    Velocity,
    /// Predicted positions.
    Predicted,
    /// Density and near density.
    Density,
    /// Spatial grid (keys, sorted order, offsets).
    Grid,
}

impl Field {
    const fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// Small set of [`Field`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldSet(u8);

impl FieldSet {
    /// Set holding `fields`.
    pub fn of(fields: &[Field]) -> Self {
        let mut set = Self::default();
        for &f in fields {
            set.insert(f);
        }
        set
    }

    /// Add a field.
    pub fn insert(&mut self, field: Field) {
        self.0 |= field.bit();
    }

    /// `true` if `field` is in the set.
    pub fn contains(&self, field: Field) -> bool {
        self.0 & field.bit() != 0
    }
}

/// One phase of a substep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Gravity and pointer force, then predicted positions.
    ExternalForces,
    /// Counting-sort grid build (and particle reorder).
    GridBuild,
    /// Density and near density.
    Density,
    /// Pressure acceleration applied to velocities.
    Pressure,
    /// Velocity smoothing.
    Viscosity,
    /// Euler step, collisions and non-finite repair.
    Integrate,
}

impl Stage {
    /// Every stage in execution order.
    pub const ALL: [Stage; 6] = [
        Stage::ExternalForces,
        Stage::GridBuild,
        Stage::Density,
        Stage::Pressure,
        Stage::Viscosity,
        Stage::Integrate,
    ];

    /// Fields the stage reads.
    pub fn reads(self) -> &'static [Field] {
        use Field::*;
        match self {
            Stage::ExternalForces => &[Position, Velocity],
            Stage::GridBuild => &[Predicted],
            Stage::Density => &[Predicted, Grid],
            Stage::Pressure => &[Predicted, Grid, Density],
            Stage::Viscosity => &[Predicted, Grid, Velocity],
            Stage::Integrate => &[Position, Velocity],
        }
    }

    /// Fields the stage writes.
    pub fn writes(self) -> &'static [Field] {
        use Field::*;
        match self {
            Stage::ExternalForces => &[Velocity, Predicted],
            // Reordering permutes the particle arrays along with the grid.
            Stage::GridBuild => &[Grid, Position, Velocity, Predicted],
            Stage::Density => &[Density],
            Stage::Pressure => &[Velocity],
            Stage::Viscosity => &[Velocity],
            Stage::Integrate => &[Position, Velocity],
        }
    }

    /// Span / log name.
    pub fn name(self) -> &'static str {
        match self {
            Stage::ExternalForces => "external_forces",
            Stage::GridBuild => "grid_build",
            Stage::Density => "density",
            Stage::Pressure => "pressure",
            Stage::Viscosity => "viscosity",
            Stage::Integrate => "integrate",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Plans
// ---------------------------------------------------------------------------

/// Stage plan validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// A stage reads a field nothing has produced.
    #[error("stage `{stage}` reads {field:?}, which no earlier stage or persistent state provides")]
    MissingInput {
        /// Reading stage.
        stage: Stage,
        /// Missing field.
        field: Field,
    },
    /// A stage is listed twice.
    #[error("stage `{0}` appears more than once")]
    DuplicateStage(Stage),
}

/// Which optional stages a substep runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubstepToggles {
    /// Run the SPH stages at all (requires `h > 0` and particles).
    pub sph: bool,
    /// Rebuild the grid this substep.
    pub rebuild_grid: bool,
    /// Run the viscosity stage.
    pub viscosity: bool,
}

/// Ordered stages of one substep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePlan {
    stages: Vec<Stage>,
}

impl StagePlan {
    /// Plan from an explicit stage list.
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// Standard substep plan for the given toggles.
    ///
    /// ```text
    /// external forces -> [grid build] -> density -> pressure -> [viscosity] -> integrate
    /// ```
    pub fn for_substep(toggles: SubstepToggles) -> Self {
        let mut stages = Vec::with_capacity(Stage::ALL.len());
        stages.push(Stage::ExternalForces);
        if toggles.sph {
            if toggles.rebuild_grid {
                stages.push(Stage::GridBuild);
            }
            stages.push(Stage::Density);
            stages.push(Stage::Pressure);
            if toggles.viscosity {
                stages.push(Stage::Viscosity);
            }
        }
        stages.push(Stage::Integrate);
        Self { stages }
    }

    /// Stages in execution order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// `true` if the plan contains `stage`.
    pub fn contains(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }

    /// Check that every read is satisfied by `persistent` state or an earlier
    /// write, and that no stage repeats.
    pub fn validate(&self, persistent: FieldSet) -> Result<(), PipelineError> {
        let mut available = persistent;
        for (i, &stage) in self.stages.iter().enumerate() {
            if self.stages[..i].contains(&stage) {
                return Err(PipelineError::DuplicateStage(stage));
            }
            if let Some(&field) = stage.reads().iter().find(|&&f| !available.contains(f)) {
                return Err(PipelineError::MissingInput { stage, field });
            }
            for &field in stage.writes() {
                available.insert(field);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Profiling and reports
// ---------------------------------------------------------------------------

/// Wall-clock time per stage, summed over the substeps of one step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepProfile {
    /// External forces + prediction (microseconds).
    pub external_forces_us: u64,
    /// Grid build + reorder (microseconds).
    pub grid_build_us: u64,
    /// Density pass (microseconds).
    pub density_us: u64,
    /// Pressure pass (microseconds).
    pub pressure_us: u64,
    /// Viscosity pass (microseconds).
    pub viscosity_us: u64,
    /// Integration + collisions (microseconds).
    pub integrate_us: u64,
    /// Whole step (microseconds).
    pub total_us: u64,
}

impl StepProfile {
    /// Add `elapsed` to the counter of `stage`.
    pub fn record(&mut self, stage: Stage, elapsed: Duration) {
        let us = elapsed.as_micros() as u64;
        let slot = match stage {
            Stage::ExternalForces => &mut self.external_forces_us,
            Stage::GridBuild => &mut self.grid_build_us,
            Stage::Density => &mut self.density_us,
            Stage::Pressure => &mut self.pressure_us,
            Stage::Viscosity => &mut self.viscosity_us,
            Stage::Integrate => &mut self.integrate_us,
        };
        *slot += us;
    }

    /// Accumulated microseconds of `stage`.
    pub fn stage_us(&self, stage: Stage) -> u64 {
        match stage {
            Stage::ExternalForces => self.external_forces_us,
            Stage::GridBuild => self.grid_build_us,
            Stage::Density => self.density_us,
            Stage::Pressure => self.pressure_us,
            Stage::Viscosity => self.viscosity_us,
            Stage::Integrate => self.integrate_us,
        }
    }
}

/// Outcome of one `step` call.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepReport {
    /// Substeps the frame asked for.
    pub substeps_requested: u32,
    /// Substeps that ran to completion.
    pub substeps_completed: u32,
    /// Grid builds performed.
    pub grid_builds: u32,
    /// `true` if the step stopped early on a cancel request.
    pub cancelled: bool,
    /// Particles whose non-finite state was repaired.
    pub non_finite_repairs: u32,
    /// Substep dt used.
    pub dt: f32,
    /// Per-stage timings.
    pub profile: StepProfile,
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cooperative cancel flag, checked between substeps only.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// New, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Every clone observes it.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Clear a previous request.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }

    /// `true` once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
