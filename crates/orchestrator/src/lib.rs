//! Orchestration layer for the fluid kernel.
//!
//! This crate owns everything outside the per-step core:
//! - JSON configuration loading and validation
//! - Building a simulation from a configuration
//! - A background runner with lifecycle management and frame snapshots

#![warn(missing_docs)]

pub mod config;
pub mod runner;

pub use config::{ConfigError, SimulationConfig};
pub use runner::{FrameSnapshot, RunnerState, SimulationRunner};

use std::path::Path;

use fluid_kernel::{FluidSimulation, SimulationKernel};

/// Build the kernel described by `config`, seeded from its spawn layout.
pub fn build_simulation(config: &SimulationConfig) -> FluidSimulation {
    let simulation = FluidSimulation::from_spawn(&config.spawn, config.settings.clone());
    tracing::info!(
        name = %config.name,
        particles = simulation.particle_count(),
        "simulation built"
    );
    simulation
}

/// Create a complete simulation from a configuration file.
///
/// Loads and validates the configuration, spawns the particles and wraps
/// the kernel in a [`SimulationRunner`] that is ready to be started.
///
/// # Example
/// ```no_run
/// use orchestrator::create_simulation;
///
/// let runner = create_simulation("configs/dam_break.json")?;
/// runner.start();
/// // ... read snapshots, pause, resume, etc.
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn create_simulation(config_path: impl AsRef<Path>) -> Result<SimulationRunner, ConfigError> {
    let config_path = config_path.as_ref();
    tracing::info!(path = %config_path.display(), "creating simulation from config");

    let config = SimulationConfig::load(config_path)?;
    let simulation = build_simulation(&config);
    Ok(SimulationRunner::new(
        simulation,
        config.params,
        config.spawn,
        config.frame_dt,
        config.max_frames,
    ))
}
