//! SPH particle fluid simulation kernel.
//!
//! Double-density SPH (density + near density) over a counting-sort spatial
//! grid. Every phase is a data-parallel rayon loop; the end of each loop is
//! the barrier before the next phase.
//!
//! # Modules
//! - [`scan`] -- Blelloch exclusive prefix sum used by the grid build.
//! - [`neighbor`] -- Spatial grid with hashed and dense (linear / strip) addressing.
//! - [`sph`] -- Spiky / Poly6 kernels and the density, pressure and viscosity passes.
//! - [`eos`] -- Linear equation of state.
//! - [`integrator`] -- External forces, prediction, Euler step, NaN repair.
//! - [`boundary`] -- Domain box and obstacle collision response.
//! - [`pipeline`] -- Stage graph, step profile, cancellation.
//! - [`params`] -- Per-step parameters and construction-time settings.
//! - [`particle`] -- Struct-of-arrays particle storage.
//! - [`spawn`] -- Seeded lattice spawning.
//! - [`splat`] -- Fixed-point density splatting into a voxel volume.
//! - [`picking`] -- Deterministic ray picking.

#![warn(missing_docs)]

pub mod boundary;
pub mod eos;
pub mod integrator;
pub mod neighbor;
pub mod params;
pub mod particle;
pub mod picking;
pub mod pipeline;
pub mod scan;
pub mod spawn;
pub mod sph;
pub mod splat;

use std::sync::Arc;
use std::time::Instant;

use glam::Vec3;

pub use boundary::{DomainBounds, Obstacle, ObstacleShape};
pub use eos::LinearEos;
pub use neighbor::SpatialGrid;
pub use params::{NeighborBackend, ParamsError, PointerInteraction, SimParams, SolverSettings};
pub use particle::ParticleSet;
pub use picking::{pick_particle, PickHit};
pub use pipeline::{
    CancelToken, Field, FieldSet, PipelineError, Stage, StagePlan, StepProfile, StepReport, SubstepToggles,
};
pub use scan::PrefixSum;
pub use spawn::{spawn_particles, SpawnConfig, SpawnRegion};
pub use sph::SphKernels;
pub use splat::DensityVolume;

use particle::ParticleScratch;

// ---------------------------------------------------------------------------
// SimulationKernel trait
// ---------------------------------------------------------------------------

/// In-process interface between the simulation core and its consumers.
///
/// Particle state may only be read between `step` calls; a step owns it
/// exclusively while running.
pub trait SimulationKernel: Send {
    /// Advance by one frame of `frame_dt` seconds, split into substeps.
    fn step(&mut self, frame_dt: f32, params: &SimParams) -> StepReport;

    /// Replace the particle set with a fresh spawn.
    fn reset(&mut self, spawn: &SpawnConfig);

    /// Read-only particle state as of the last completed step.
    fn particles(&self) -> &ParticleSet;

    /// Number of particles in the simulation.
    fn particle_count(&self) -> usize {
        self.particles().len()
    }
}

// ---------------------------------------------------------------------------
// FluidSimulation
// ---------------------------------------------------------------------------

/// What the grid was last built for. A different radius, particle count or
/// domain invalidates it.
#[derive(Debug, Clone, Copy, PartialEq)]
struct GridStamp {
    radius: f32,
    particle_count: usize,
    bounds: DomainBounds,
}

/// CPU implementation of [`SimulationKernel`].
pub struct FluidSimulation {
    particles: ParticleSet,
    grid: SpatialGrid,
    settings: SolverSettings,
    pool: Option<Arc<rayon::ThreadPool>>,
    reorder_scratch: ParticleScratch,
    viscosity_scratch: Vec<Vec3>,
    grid_stamp: Option<GridStamp>,
    substep_counter: u64,
    cancel: CancelToken,
}

impl FluidSimulation {
    /// Create a simulation owning `particles`.
    ///
    /// With `settings.worker_threads > 0` a dedicated rayon pool runs every
    /// step; if the pool cannot be created the global pool is used instead.
    pub fn new(particles: ParticleSet, settings: SolverSettings) -> Self {
        let pool = if settings.worker_threads > 0 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(settings.worker_threads)
                .thread_name(|i| format!("fluid-worker-{i}"))
                .build()
            {
                Ok(pool) => Some(Arc::new(pool)),
                Err(err) => {
                    tracing::warn!(%err, "failed to build worker pool; using global rayon pool");
                    None
                }
            }
        } else {
            None
        };

        tracing::info!(
            particles = particles.len(),
            backend = ?settings.backend,
            reorder = settings.reorder_particles,
            deterministic = settings.deterministic_order,
            worker_threads = settings.worker_threads,
            "fluid simulation created"
        );

        Self {
            grid: SpatialGrid::new(&settings),
            particles,
            settings,
            pool,
            reorder_scratch: ParticleScratch::default(),
            viscosity_scratch: Vec::new(),
            grid_stamp: None,
            substep_counter: 0,
            cancel: CancelToken::new(),
        }
    }

    /// Create a simulation seeded from `spawn`.
    pub fn from_spawn(spawn: &SpawnConfig, settings: SolverSettings) -> Self {
        Self::new(spawn_particles(spawn), settings)
    }

    /// Solver settings fixed at construction.
    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    /// The spatial grid as of the last build.
    pub fn grid(&self) -> &SpatialGrid {
        &self.grid
    }

    /// Token checked between substeps; cancelling it stops the current and
    /// every later step after the running substep. Reset it to resume.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Ray-pick a particle at the current positions.
    pub fn pick(&self, origin: Vec3, direction: Vec3, pick_radius: f32) -> Option<PickHit> {
        pick_particle(&self.particles.position, origin, direction, pick_radius)
    }

    /// Splat current positions into `volume` with the kernel radius of `params`.
    pub fn splat_density(&self, volume: &mut DensityVolume, params: &SimParams) {
        volume.splat(&self.particles.position, &SphKernels::new(params.smoothing_radius));
    }

    /// Fields that survive from earlier substeps.
    fn persistent_fields(&self, stamp: &GridStamp) -> FieldSet {
        let mut fields = FieldSet::of(&[Field::Position, Field::Velocity, Field::Predicted]);
        if self.grid.is_built() && self.grid_stamp.as_ref() == Some(stamp) {
            fields.insert(Field::Grid);
        }
        fields
    }

    /// Plan for the next substep. A plan that would reuse an invalid grid is
    /// replaced by one that rebuilds it.
    fn plan_substep(&self, toggles: SubstepToggles, stamp: &GridStamp) -> StagePlan {
        let plan = StagePlan::for_substep(toggles);
        match plan.validate(self.persistent_fields(stamp)) {
            Ok(()) => plan,
            Err(err) => {
                tracing::debug!(%err, "stage plan rejected; rebuilding grid");
                StagePlan::for_substep(SubstepToggles {
                    rebuild_grid: true,
                    ..toggles
                })
            }
        }
    }

    /// Advance one frame, checking `cancel` before every substep.
    pub fn step_cancellable(&mut self, frame_dt: f32, params: &SimParams, cancel: &CancelToken) -> StepReport {
        match self.pool.clone() {
            Some(pool) => pool.install(|| self.step_inner(frame_dt, params, cancel)),
            None => self.step_inner(frame_dt, params, cancel),
        }
    }

    fn step_inner(&mut self, frame_dt: f32, params: &SimParams, cancel: &CancelToken) -> StepReport {
        let start = Instant::now();
        let substeps = params.substeps.max(1);
        let dt = params.substep_dt(frame_dt);
        let h = params.smoothing_radius;
        let n = self.particles.len();

        let kernels = SphKernels::new(h);
        let eos = LinearEos::from_params(params);
        let stamp = GridStamp {
            radius: h,
            particle_count: n,
            bounds: params.bounds,
        };
        let sph = h > 0.0 && h.is_finite() && n > 0;
        let viscosity = params.viscosity_enabled && params.viscosity_strength != 0.0;
        let interval = u64::from(params.grid_rebuild_interval.max(1));

        let mut report = StepReport {
            substeps_requested: substeps,
            dt,
            ..Default::default()
        };

        for _ in 0..substeps {
            if cancel.is_cancelled() {
                report.cancelled = true;
                tracing::warn!(
                    completed = report.substeps_completed,
                    requested = substeps,
                    "step cancelled between substeps"
                );
                break;
            }

            let toggles = SubstepToggles {
                sph,
                rebuild_grid: self.substep_counter % interval == 0,
                viscosity,
            };
            let plan = self.plan_substep(toggles, &stamp);

            for &stage in plan.stages() {
                let span = tracing::trace_span!("stage", name = stage.name());
                let _enter = span.enter();
                let stage_start = Instant::now();
                match stage {
                    Stage::ExternalForces => integrator::apply_external_forces(&mut self.particles, params, dt),
                    Stage::GridBuild => {
                        self.build_grid(h, &params.bounds);
                        self.grid_stamp = Some(stamp);
                        report.grid_builds += 1;
                    }
                    Stage::Density => sph::compute_density(&mut self.particles, &self.grid, &kernels),
                    Stage::Pressure => sph::apply_pressure(&mut self.particles, &self.grid, &kernels, &eos, dt),
                    Stage::Viscosity => sph::apply_viscosity(
                        &mut self.particles,
                        &self.grid,
                        &kernels,
                        params.viscosity_strength,
                        dt,
                        &mut self.viscosity_scratch,
                    ),
                    Stage::Integrate => {
                        report.non_finite_repairs += integrator::integrate(&mut self.particles, params, dt);
                    }
                }
                report.profile.record(stage, stage_start.elapsed());
            }

            self.substep_counter += 1;
            report.substeps_completed += 1;
        }

        report.profile.total_us = start.elapsed().as_micros() as u64;
        report
    }

    /// Build the grid from predicted positions and optionally reorder the
    /// particle arrays into cell order.
    fn build_grid(&mut self, h: f32, bounds: &DomainBounds) {
        self.grid.build(&self.particles.predicted, h, bounds);
        if self.settings.reorder_particles {
            self.particles
                .apply_permutation(self.grid.sorted_indices(), &mut self.reorder_scratch);
            self.grid.mark_reordered();
        }
    }
}

impl SimulationKernel for FluidSimulation {
    fn step(&mut self, frame_dt: f32, params: &SimParams) -> StepReport {
        let cancel = self.cancel.clone();
        self.step_cancellable(frame_dt, params, &cancel)
    }

    fn reset(&mut self, spawn: &SpawnConfig) {
        self.particles = spawn_particles(spawn);
        self.grid.invalidate();
        self.grid_stamp = None;
        self.substep_counter = 0;
        tracing::info!(particles = self.particles.len(), seed = spawn.seed, "simulation reset");
    }

    fn particles(&self) -> &ParticleSet {
        &self.particles
    }
}
