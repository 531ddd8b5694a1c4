//! Headless fluid driver.
//!
//! Usage: `fluid-headless [CONFIG.json] [--frames N]`
//!
//! Loads a scene (or the built-in default), steps it for `N` frames
//! (`max_frames` from the config, else 600) and logs frame statistics.

use std::error::Error;
use std::time::Instant;

use fluid_kernel::{SimulationKernel, StepProfile};
use orchestrator::SimulationConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FRAMES: u64 = 600;

struct Args {
    config: Option<String>,
    frames: Option<u64>,
}

fn parse_args() -> Result<Args, Box<dyn Error>> {
    let mut args = Args {
        config: None,
        frames: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--frames" => {
                let value = iter.next().ok_or("--frames needs a value")?;
                args.frames = Some(value.parse()?);
            }
            _ if args.config.is_none() => args.config = Some(arg),
            _ => return Err(format!("unexpected argument: {arg}").into()),
        }
    }
    Ok(args)
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fluid_headless=info,orchestrator=info,fluid_kernel=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = parse_args()?;
    let config = match &args.config {
        Some(path) => SimulationConfig::load(path)?,
        None => SimulationConfig::default(),
    };
    let frames = args.frames.or(config.max_frames).unwrap_or(DEFAULT_FRAMES);

    tracing::info!(name = %config.name, frames, "starting headless run");

    let mut sim = orchestrator::build_simulation(&config);
    let mut totals = StepProfile::default();
    let mut repairs = 0u64;
    let wall = Instant::now();

    for frame in 1..=frames {
        let report = sim.step(config.frame_dt, &config.params);
        totals.external_forces_us += report.profile.external_forces_us;
        totals.grid_build_us += report.profile.grid_build_us;
        totals.density_us += report.profile.density_us;
        totals.pressure_us += report.profile.pressure_us;
        totals.viscosity_us += report.profile.viscosity_us;
        totals.integrate_us += report.profile.integrate_us;
        totals.total_us += report.profile.total_us;
        repairs += u64::from(report.non_finite_repairs);

        if frame % 100 == 0 || frame == frames {
            let particles = sim.particles();
            let n = particles.len().max(1) as f32;
            let mean_density = particles.density.iter().sum::<f32>() / n;
            let max_speed = particles.velocity.iter().map(|v| v.length()).fold(0.0, f32::max);
            tracing::info!(
                frame,
                step_ms = report.profile.total_us as f64 / 1000.0,
                grid_builds = report.grid_builds,
                mean_density,
                max_speed,
                "frame"
            );
        }
    }

    let elapsed = wall.elapsed().as_secs_f64();
    let per_frame = |us: u64| us as f64 / frames.max(1) as f64 / 1000.0;
    tracing::info!(
        frames,
        particles = sim.particle_count(),
        wall_s = elapsed,
        fps = frames as f64 / elapsed.max(f64::EPSILON),
        grid_build_ms = per_frame(totals.grid_build_us),
        density_ms = per_frame(totals.density_us),
        pressure_ms = per_frame(totals.pressure_us),
        viscosity_ms = per_frame(totals.viscosity_us),
        integrate_ms = per_frame(totals.integrate_us + totals.external_forces_us),
        non_finite_repairs = repairs,
        "headless run complete"
    );
    Ok(())
}
