//! Background simulation runner with lifecycle management.
//!
//! The kernel lives on a dedicated thread and is only touched there. The
//! control handle shares a small mutex-protected state with that thread:
//! lifecycle state, pending commands and the last published snapshot.
//! Snapshots are taken between frames, so readers never observe a
//! half-stepped particle set.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use fluid_kernel::{
    CancelToken, FluidSimulation, ParamsError, ParticleSet, PointerInteraction, SimParams, SimulationKernel,
    SpawnConfig, StepReport,
};

/// Runner lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    /// Created but not yet started.
    Created,
    /// Stepping frames.
    Running,
    /// Paused; the thread idles until resumed.
    Paused,
    /// Reached `max_frames`. A `reset` returns to `Paused`.
    Finished,
}

/// Particle state published after a completed frame.
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    /// Frames completed since start or the last reset.
    pub frame: u64,
    /// Simulated seconds since start or the last reset.
    pub sim_time: f64,
    /// Particle arrays as of the end of the frame.
    pub particles: ParticleSet,
    /// Report of the frame that produced this snapshot; `None` right after a
    /// reset.
    pub report: Option<StepReport>,
}

/// Shared state between the runner thread and the control handle.
struct SharedState {
    state: RunnerState,
    params: SimParams,
    reset_requested: bool,
    shutdown: bool,
    frame: u64,
    sim_time: f64,
    snapshot: Option<Arc<FrameSnapshot>>,
}

/// Handle for controlling and querying a background simulation.
pub struct SimulationRunner {
    shared: Arc<Mutex<SharedState>>,
    cancel: CancelToken,
    thread_handle: Option<thread::JoinHandle<()>>,
}

fn lock(shared: &Mutex<SharedState>) -> MutexGuard<'_, SharedState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimulationRunner {
    /// Move `simulation` onto a background thread.
    ///
    /// The runner starts in [`RunnerState::Created`]; nothing is stepped until
    /// [`start`](Self::start). A snapshot of the initial particles is
    /// available immediately.
    pub fn new(
        simulation: FluidSimulation,
        params: SimParams,
        spawn: SpawnConfig,
        frame_dt: f32,
        max_frames: Option<u64>,
    ) -> Self {
        let cancel = simulation.cancel_token();
        let initial = Arc::new(FrameSnapshot {
            frame: 0,
            sim_time: 0.0,
            particles: simulation.particles().clone(),
            report: None,
        });
        let shared = Arc::new(Mutex::new(SharedState {
            state: RunnerState::Created,
            params,
            reset_requested: false,
            shutdown: false,
            frame: 0,
            sim_time: 0.0,
            snapshot: Some(initial),
        }));

        let loop_shared = Arc::clone(&shared);
        let kernel: Box<dyn SimulationKernel> = Box::new(simulation);
        let thread_handle = thread::Builder::new()
            .name("fluid-runner".to_string())
            .spawn(move || run_simulation_loop(kernel, loop_shared, spawn, frame_dt, max_frames));

        let thread_handle = match thread_handle {
            Ok(handle) => Some(handle),
            Err(err) => {
                tracing::warn!(%err, "failed to spawn runner thread; runner will not step");
                None
            }
        };

        Self {
            shared,
            cancel,
            thread_handle,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RunnerState {
        lock(&self.shared).state
    }

    /// Frames completed since start or the last reset.
    pub fn frame_count(&self) -> u64 {
        lock(&self.shared).frame
    }

    /// Simulated seconds since start or the last reset.
    pub fn sim_time(&self) -> f64 {
        lock(&self.shared).sim_time
    }

    /// Particle state of the last completed frame.
    pub fn snapshot(&self) -> Option<Arc<FrameSnapshot>> {
        lock(&self.shared).snapshot.clone()
    }

    /// Begin stepping (`Created` -> `Running`).
    pub fn start(&self) {
        let mut shared = lock(&self.shared);
        if shared.state == RunnerState::Created {
            shared.state = RunnerState::Running;
            tracing::info!("runner started");
        }
    }

    /// Pause after the current frame (`Running` -> `Paused`).
    pub fn pause(&self) {
        let mut shared = lock(&self.shared);
        if shared.state == RunnerState::Running {
            shared.state = RunnerState::Paused;
        }
    }

    /// Resume stepping (`Paused` -> `Running`).
    pub fn resume(&self) {
        let mut shared = lock(&self.shared);
        if shared.state == RunnerState::Paused {
            shared.state = RunnerState::Running;
        }
    }

    /// Reseed the particles from the spawn config before the next frame.
    ///
    /// Frame count and simulated time restart at zero. A finished runner
    /// becomes `Paused`.
    pub fn reset(&self) {
        let mut shared = lock(&self.shared);
        shared.reset_requested = true;
        if shared.state == RunnerState::Finished {
            shared.state = RunnerState::Paused;
        }
    }

    /// Replace the per-step parameters, effective from the next frame.
    ///
    /// The current pointer interaction is kept unless `params` carries one.
    pub fn update_params(&self, params: SimParams) -> Result<(), ParamsError> {
        params.validate()?;
        let mut shared = lock(&self.shared);
        let interaction = shared.params.interaction;
        shared.params = SimParams {
            interaction: params.interaction.or(interaction),
            ..params
        };
        Ok(())
    }

    /// Set or clear the pointer interaction. It stays active until cleared
    /// with `None`.
    pub fn set_interaction(&self, interaction: Option<PointerInteraction>) {
        lock(&self.shared).params.interaction = interaction;
    }

    /// Poll until the runner reaches `state` or `timeout` elapses.
    pub fn wait_for_state(&self, state: RunnerState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.state() == state {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Drop for SimulationRunner {
    fn drop(&mut self) {
        lock(&self.shared).shutdown = true;
        self.cancel.cancel();
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                tracing::warn!("runner thread panicked");
            }
        }
    }
}

/// Frame loop executed on the runner thread.
fn run_simulation_loop(
    mut kernel: Box<dyn SimulationKernel>,
    shared: Arc<Mutex<SharedState>>,
    spawn: SpawnConfig,
    frame_dt: f32,
    max_frames: Option<u64>,
) {
    let start_wall_time = Instant::now();

    loop {
        let (state, params, reset) = {
            let mut guard = lock(&shared);
            if guard.shutdown {
                break;
            }
            let reset = std::mem::take(&mut guard.reset_requested);
            (guard.state, guard.params.clone(), reset)
        };

        if reset {
            kernel.reset(&spawn);
            let snapshot = Arc::new(FrameSnapshot {
                frame: 0,
                sim_time: 0.0,
                particles: kernel.particles().clone(),
                report: None,
            });
            let mut guard = lock(&shared);
            guard.frame = 0;
            guard.sim_time = 0.0;
            guard.snapshot = Some(snapshot);
            continue;
        }

        match state {
            RunnerState::Running => {
                let report = kernel.step(frame_dt, &params);
                if report.cancelled {
                    // Only shutdown cancels the kernel's token.
                    break;
                }
                let advanced = f64::from(report.dt) * f64::from(report.substeps_completed);

                let mut guard = lock(&shared);
                guard.frame += 1;
                guard.sim_time += advanced;
                let frame = guard.frame;
                let sim_time = guard.sim_time;
                guard.snapshot = Some(Arc::new(FrameSnapshot {
                    frame,
                    sim_time,
                    particles: kernel.particles().clone(),
                    report: Some(report),
                }));

                if frame % 100 == 0 {
                    tracing::debug!(
                        frame,
                        sim_time,
                        dt = report.dt,
                        step_us = report.profile.total_us,
                        wall_time = start_wall_time.elapsed().as_secs_f64(),
                        "runner progress"
                    );
                }

                if max_frames.is_some_and(|max| frame >= max) {
                    tracing::info!(frame, sim_time, "runner finished: reached max_frames");
                    // A pause or reset issued during this frame takes precedence.
                    if guard.state == RunnerState::Running {
                        guard.state = RunnerState::Finished;
                    }
                }
            }
            RunnerState::Created | RunnerState::Paused | RunnerState::Finished => {
                thread::sleep(Duration::from_millis(10));
            }
        }
    }

    let guard = lock(&shared);
    tracing::info!(
        frames = guard.frame,
        sim_time = guard.sim_time,
        "runner thread exiting"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluid_kernel::{DomainBounds, SolverSettings, SpawnRegion};
    use glam::{UVec3, Vec3};

    fn spawn() -> SpawnConfig {
        SpawnConfig {
            regions: vec![SpawnRegion {
                center: Vec3::ZERO,
                size: Vec3::splat(0.5),
                particles_per_axis: UVec3::splat(4),
            }],
            jitter: 0.0,
            initial_velocity: Vec3::ZERO,
            seed: 1,
        }
    }

    fn params() -> SimParams {
        SimParams {
            smoothing_radius: 0.3,
            bounds: DomainBounds::new(Vec3::splat(-1.0), Vec3::splat(1.0)),
            substeps: 1,
            ..Default::default()
        }
    }

    fn runner(max_frames: Option<u64>) -> SimulationRunner {
        let spawn = spawn();
        let sim = FluidSimulation::from_spawn(&spawn, SolverSettings::default());
        SimulationRunner::new(sim, params(), spawn, 1.0 / 60.0, max_frames)
    }

    #[test]
    fn runner_lifecycle() {
        let runner = runner(Some(10));
        assert_eq!(runner.state(), RunnerState::Created);
        assert_eq!(runner.snapshot().unwrap().particles.len(), 64);

        runner.start();
        assert!(runner.wait_for_state(RunnerState::Finished, Duration::from_secs(30)));
        assert_eq!(runner.frame_count(), 10);

        let snapshot = runner.snapshot().unwrap();
        assert_eq!(snapshot.frame, 10);
        assert!(snapshot.report.is_some());
        assert!((snapshot.sim_time - 10.0 / 60.0).abs() < 1.0e-5);
    }

    #[test]
    fn pause_stops_frame_count() {
        let runner = runner(None);
        runner.start();
        thread::sleep(Duration::from_millis(50));

        runner.pause();
        assert_eq!(runner.state(), RunnerState::Paused);
        // Let an in-flight frame finish.
        thread::sleep(Duration::from_millis(100));
        let frames_paused = runner.frame_count();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(runner.frame_count(), frames_paused);

        runner.resume();
        assert_eq!(runner.state(), RunnerState::Running);
    }

    #[test]
    fn reset_restarts_finished_runner() {
        let runner = runner(Some(3));
        runner.start();
        assert!(runner.wait_for_state(RunnerState::Finished, Duration::from_secs(30)));

        runner.reset();
        assert_eq!(runner.state(), RunnerState::Paused);
        let deadline = Instant::now() + Duration::from_secs(10);
        while runner.frame_count() != 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(runner.frame_count(), 0);
        assert_eq!(runner.sim_time(), 0.0);
    }

    #[test]
    fn update_params_validates_and_keeps_interaction() {
        let runner = runner(None);
        let pointer = PointerInteraction {
            point: Vec3::ZERO,
            radius: 0.5,
            strength: 3.0,
        };
        runner.set_interaction(Some(pointer));

        let bad = SimParams {
            substeps: 0,
            ..params()
        };
        assert_eq!(runner.update_params(bad), Err(ParamsError::ZeroSubsteps));

        runner
            .update_params(SimParams {
                gravity: Vec3::ZERO,
                ..params()
            })
            .unwrap();
        let shared = lock(&runner.shared);
        assert_eq!(shared.params.gravity, Vec3::ZERO);
        assert_eq!(shared.params.interaction, Some(pointer));
    }

    #[test]
    fn drop_stops_running_thread() {
        let runner = runner(None);
        runner.start();
        thread::sleep(Duration::from_millis(20));
        drop(runner);
    }
}
