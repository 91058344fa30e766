//! config.rs
//! Per-axis controller configuration and the core error type.
//!
//! Defaults reproduce the tuning setup the controller was built for:
//! 1000-step tuning window, 6000-step lap estimate, unit perturbations,
//! and a divergence bound of 4.0 on the error signal.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_MAX_ERROR: f64 = 4.0;
pub const DEFAULT_CEILING: u64 = 1_000;
pub const DEFAULT_LAP_THRESHOLD: u64 = 6_000;
pub const DEFAULT_DELTAS: [f64; 3] = [1.0, 1.0, 1.0];

#[derive(Debug, Error, PartialEq)]
pub enum ControllerError {
    #[error("gain {name} must be finite, got {value}")]
    NonFiniteGain { name: &'static str, value: f64 },

    #[error("error bound must be finite and positive, got {0}")]
    InvalidBound(f64),

    #[error("perturbation {index} must be finite and non-negative, got {value}")]
    InvalidPerturbation { index: usize, value: f64 },

    #[error("ceiling {ceiling} must be at least 1 and not above lap threshold {lap_threshold}")]
    InvalidCeiling { ceiling: u64, lap_threshold: u64 },

    #[error("[{label}] rejected non-finite error sample {sample}")]
    NonFiniteSample { label: String, sample: f64 },
}

/// Construction parameters for one [`Controller`](super::Controller).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub label: String,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Enables the twiddle search over the three gains.
    pub tuning: bool,
    /// Largest tolerated |error| before a run counts as diverged. `None` turns the check off.
    pub max_error: Option<f64>,
    /// Initial step ceiling of the tuning window.
    pub initial_ceiling: u64,
    /// Steps approximating one lap of the controlled process.
    pub lap_threshold: u64,
    /// Starting perturbation magnitudes, ordered P, D, I.
    pub initial_deltas: [f64; 3],
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            label: "pid".to_string(),
            kp: 0.0,
            ki: 0.0,
            kd: 0.0,
            tuning: false,
            max_error: Some(DEFAULT_MAX_ERROR),
            initial_ceiling: DEFAULT_CEILING,
            lap_threshold: DEFAULT_LAP_THRESHOLD,
            initial_deltas: DEFAULT_DELTAS,
        }
    }
}

impl ControllerConfig {
    pub fn new(kp: f64, ki: f64, kd: f64, tuning: bool, label: &str) -> Self {
        Self {
            label: label.to_string(),
            kp,
            ki,
            kd,
            tuning,
            ..Self::default()
        }
    }

    pub fn with_max_error(mut self, max_error: Option<f64>) -> Self {
        self.max_error = max_error;
        self
    }

    pub fn with_ceiling(mut self, ceiling: u64) -> Self {
        self.initial_ceiling = ceiling;
        self
    }

    pub fn with_lap_threshold(mut self, lap_threshold: u64) -> Self {
        self.lap_threshold = lap_threshold;
        self
    }

    pub fn with_deltas(mut self, deltas: [f64; 3]) -> Self {
        self.initial_deltas = deltas;
        self
    }

    /// Rejects configurations the state machine cannot run with.
    pub fn validate(&self) -> Result<(), ControllerError> {
        for (name, value) in [("kp", self.kp), ("ki", self.ki), ("kd", self.kd)] {
            if !value.is_finite() {
                return Err(ControllerError::NonFiniteGain { name, value });
            }
        }

        if let Some(bound) = self.max_error {
            if !bound.is_finite() || bound <= 0.0 {
                return Err(ControllerError::InvalidBound(bound));
            }
        }

        for (index, &value) in self.initial_deltas.iter().enumerate() {
            if !value.is_finite() || value < 0.0 {
                return Err(ControllerError::InvalidPerturbation { index, value });
            }
        }

        if self.initial_ceiling == 0 || self.lap_threshold < self.initial_ceiling {
            return Err(ControllerError::InvalidCeiling {
                ceiling: self.initial_ceiling,
                lap_threshold: self.lap_threshold,
            });
        }

        Ok(())
    }
}
