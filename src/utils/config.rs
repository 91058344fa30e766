//! Application configuration: both controllers, throttle mapping, simulation, export.
//!
//! Loaded from a TOML file; every section falls back to defaults. A loaded
//! config is always validated, and errors name the file they came from.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::controller::{ControllerConfig, ControllerError};
use crate::drive::{session::ThrottleMap, vehicle::SimulationConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error in {file}: {source}")]
    Parse {
        file: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid controller config: {0}")]
    Controller(#[from] ControllerError),

    #[error("Field '{field}' has invalid value {value}: {reason}")]
    Invalid {
        field: &'static str,
        value: String,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// CSV file receiving reset and final diagnostics. `None` disables export.
    pub trace_path: Option<PathBuf>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            trace_path: Some(PathBuf::from("data/logs/tuning_trace.csv")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub steer: ControllerConfig,
    pub throttle: ControllerConfig,
    pub throttle_map: ThrottleMap,
    pub simulation: SimulationConfig,
    pub export: ExportConfig,
}

impl Default for AppConfig {
    // Steering tunes from its best known gains; throttle stays fixed.
    fn default() -> Self {
        Self {
            steer: ControllerConfig::new(0.153144, 0.0, 2.9, true, "pid_steer"),
            throttle: ControllerConfig::new(1.0, 0.0, 0.0, false, "pid_throttle"),
            throttle_map: ThrottleMap::default(),
            simulation: SimulationConfig::default(),
            export: ExportConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.steer.validate()?;
        self.throttle.validate()?;

        let sim = &self.simulation;
        if !(sim.dt.is_finite() && sim.dt > 0.0) {
            return Err(invalid("simulation.dt", sim.dt, "must be finite and positive"));
        }
        if !(sim.noise.is_finite() && sim.noise >= 0.0) {
            return Err(invalid("simulation.noise", sim.noise, "must be finite and non-negative"));
        }
        if !(sim.speed_limit.is_finite() && sim.speed_limit > 0.0) {
            return Err(invalid("simulation.speed_limit", sim.speed_limit, "must be finite and positive"));
        }
        if !(sim.track_period.is_finite() && sim.track_period > 0.0) {
            return Err(invalid("simulation.track_period", sim.track_period, "must be finite and positive"));
        }
        if !sim.track_amplitude.is_finite() {
            return Err(invalid("simulation.track_amplitude", sim.track_amplitude, "must be finite"));
        }

        let map = &self.throttle_map;
        if !(map.base.is_finite() && map.span.is_finite()) {
            return Err(invalid("throttle_map", format!("{:?}", map), "must be finite"));
        }

        Ok(())
    }
}

fn invalid(field: &'static str, value: impl ToString, reason: &'static str) -> ConfigError {
    ConfigError::Invalid {
        field,
        value: value.to_string(),
        reason,
    }
}

/// Read, parse and validate a TOML config file.
pub fn load_from_file(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        file: path.display().to_string(),
        source: e,
    })?;

    load_from_str(&content, &path.display().to_string())
}

/// Parse and validate TOML content; `source_name` labels parse errors.
pub fn load_from_str(content: &str, source_name: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
        file: source_name.to_string(),
        source: e,
    })?;

    config.validate()?;
    Ok(config)
}
