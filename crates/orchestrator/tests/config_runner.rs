//! End-to-end: JSON file on disk -> runner -> published snapshots.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use fluid_kernel::{DomainBounds, ObstacleShape};
use glam::Vec3;
use orchestrator::{create_simulation, ConfigError, RunnerState, SimulationConfig};

fn write_config(name: &str, json: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("fluid-orchestrator-{}-{name}.json", std::process::id()));
    fs::write(&path, json).unwrap();
    path
}

const SMALL_BLOCK: &str = r#"{
    "name": "small block",
    "params": {
        "smoothing_radius": 0.3,
        "substeps": 2,
        "bounds": { "min": [-1.0, -1.0, -1.0], "max": [1.0, 1.0, 1.0] }
    },
    "spawn": {
        "regions": [
            { "center": [0.0, 0.0, 0.0], "size": [0.6, 0.6, 0.6], "particles_per_axis": [5, 5, 5] }
        ],
        "seed": 9
    },
    "max_frames": 8
}"#;

#[test]
fn runs_config_to_completion() {
    let path = write_config("complete", SMALL_BLOCK);
    let runner = create_simulation(&path).unwrap();
    runner.start();
    assert!(runner.wait_for_state(RunnerState::Finished, Duration::from_secs(60)));

    let snapshot = runner.snapshot().unwrap();
    assert_eq!(snapshot.frame, 8);
    assert_eq!(snapshot.particles.len(), 125);
    let report = snapshot.report.unwrap();
    assert_eq!(report.substeps_completed, 2);

    let bounds = DomainBounds::new(Vec3::splat(-1.0), Vec3::splat(1.0));
    assert!(snapshot.particles.position.iter().all(|&p| bounds.contains(p)));
    fs::remove_file(path).ok();
}

#[test]
fn obstacle_and_pointer_parse_from_json() {
    let json = r#"{
        "params": {
            "obstacle": { "shape": "sphere", "radius": 0.25, "center": [0.0, -0.5, 0.0] },
            "interaction": { "point": [0.0, 0.5, 0.0], "radius": 0.4, "strength": -2.0 }
        },
        "max_frames": 1
    }"#;
    let config = SimulationConfig::from_json(json).unwrap();
    let obstacle = config.params.obstacle.unwrap();
    assert_eq!(obstacle.shape, ObstacleShape::Sphere { radius: 0.25 });
    assert_eq!(obstacle.center, Vec3::new(0.0, -0.5, 0.0));
    assert_eq!(config.params.interaction.unwrap().strength, -2.0);
}

#[test]
fn invalid_file_is_rejected_before_spawning() {
    let path = write_config("invalid", r#"{ "params": { "substeps": 0 } }"#);
    let err = create_simulation(&path).err().unwrap();
    assert!(matches!(err, ConfigError::Invalid(_)), "{err}");
    fs::remove_file(path).ok();
}

#[test]
fn bundled_scenes_validate() {
    let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../configs");
    for scene in ["dam_break.json", "rotated_tank.json"] {
        let config = SimulationConfig::load(dir.join(scene)).unwrap_or_else(|err| panic!("{scene}: {err}"));
        assert!(config.spawn.particle_count() > 0, "{scene}");
        assert!(config.params.obstacle.is_some(), "{scene}");
    }
}
