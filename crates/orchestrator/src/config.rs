//! JSON simulation configuration: parameters, solver settings, spawn layout
//! and run length.

use std::fs;
use std::path::{Path, PathBuf};

use fluid_kernel::{ParamsError, SimParams, SolverSettings, SpawnConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating a [`SimulationConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        /// Path that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The document is not valid JSON for this schema.
    #[error("failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// Simulation parameters failed validation.
    #[error("invalid simulation parameters: {0}")]
    Invalid(#[from] ParamsError),
    /// `frame_dt` is not a positive finite number.
    #[error("frame_dt must be positive and finite, got {0}")]
    FrameDt(f32),
    /// `max_frames` is present but zero.
    #[error("max_frames must be at least 1")]
    ZeroMaxFrames,
    /// Spawn jitter is negative or not finite.
    #[error("spawn jitter must be finite and non-negative, got {0}")]
    Jitter(f32),
}

/// Top-level simulation document.
///
/// Every field has a default, so `{}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Human-readable simulation name.
    pub name: String,
    /// Per-step parameters.
    pub params: SimParams,
    /// Construction-time solver choices.
    pub settings: SolverSettings,
    /// Initial particle layout, also used by `reset`.
    pub spawn: SpawnConfig,
    /// Wall-clock seconds per frame handed to `step`.
    pub frame_dt: f32,
    /// Stop after this many frames.
    pub max_frames: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            name: "untitled".to_string(),
            params: SimParams::default(),
            settings: SolverSettings::default(),
            spawn: SpawnConfig::default(),
            frame_dt: 1.0 / 60.0,
            max_frames: None,
        }
    }
}

impl SimulationConfig {
    /// Load and validate a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents)
    }

    /// Parse and validate a configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: SimulationConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.params.validate()?;

        if !(self.frame_dt.is_finite() && self.frame_dt > 0.0) {
            return Err(ConfigError::FrameDt(self.frame_dt));
        }
        if self.max_frames == Some(0) {
            return Err(ConfigError::ZeroMaxFrames);
        }
        if !(self.spawn.jitter.is_finite() && self.spawn.jitter >= 0.0) {
            return Err(ConfigError::Jitter(self.spawn.jitter));
        }
        Ok(())
    }

    /// Simulated seconds advanced per frame.
    pub fn sim_seconds_per_frame(&self) -> f32 {
        self.params.substep_dt(self.frame_dt) * self.params.substeps.max(1) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn empty_document_uses_defaults() {
        let config = SimulationConfig::from_json("{}").unwrap();
        assert_eq!(config, SimulationConfig::default());
    }

    #[test]
    fn partial_params_keep_other_defaults() {
        let json = r#"{
            "name": "dam break",
            "params": { "smoothing_radius": 0.35, "gravity": [0.0, -9.81, 0.0] },
            "settings": { "backend": "hashed", "worker_threads": 2 },
            "max_frames": 300
        }"#;
        let config = SimulationConfig::from_json(json).unwrap();
        assert_eq!(config.name, "dam break");
        assert_eq!(config.params.smoothing_radius, 0.35);
        assert_eq!(config.params.gravity, Vec3::new(0.0, -9.81, 0.0));
        assert_eq!(config.params.substeps, SimParams::default().substeps);
        assert_eq!(config.settings.backend, fluid_kernel::NeighborBackend::Hashed);
        assert_eq!(config.settings.worker_threads, 2);
        assert_eq!(config.max_frames, Some(300));
    }

    #[test]
    fn invalid_params_are_rejected() {
        let err = SimulationConfig::from_json(r#"{ "params": { "collision_damping": 1.5 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ParamsError::DampingOutOfRange(_))));
    }

    #[test]
    fn frame_settings_are_validated() {
        let bad_dt = SimulationConfig {
            frame_dt: 0.0,
            ..Default::default()
        };
        assert!(matches!(bad_dt.validate(), Err(ConfigError::FrameDt(_))));

        let zero_frames = SimulationConfig {
            max_frames: Some(0),
            ..Default::default()
        };
        assert!(matches!(zero_frames.validate(), Err(ConfigError::ZeroMaxFrames)));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            SimulationConfig::from_json("{ not json"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let path = std::env::temp_dir().join("fluid-orchestrator-missing-config.json");
        let err = SimulationConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("fluid-orchestrator-missing-config.json"));
    }

    #[test]
    fn seconds_per_frame_follow_clamp_and_scale() {
        let config = SimulationConfig {
            frame_dt: 0.1,
            params: SimParams {
                max_frame_dt: 0.02,
                time_scale: 0.5,
                substeps: 4,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!((config.sim_seconds_per_frame() - 0.01).abs() < 1.0e-7);
    }
}
