//! Tuning and limits for a controller, loadable from JSON

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Gains, limits, and cadence of a [`crate::Pid`].
///
/// Fields missing from a serialized document take their default values.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(default)]
pub struct PidConfig {
    /// Proportional gain
    pub kp: f64,

    /// Integral gain
    pub ki: f64,

    /// Derivative gain, applied to the measurement rather than the error
    pub kd: f64,

    /// Anti-windup saturation limit for the integral term. Zero disables anti-windup.
    pub windup_max: f64,

    /// Minimum interval [s] between accepted ticks
    pub sample_time: f64,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: 0.5,
            ki: 0.1,
            kd: 0.0,
            windup_max: 0.0,
            sample_time: 0.02,
        }
    }
}

impl PidConfig {
    /// Check that every value is usable by the controller.
    /// Gain signs are not restricted.
    pub fn validate(&self) -> Result<(), String> {
        for (name, v) in [("kp", self.kp), ("ki", self.ki), ("kd", self.kd)] {
            if !v.is_finite() {
                return Err(format!("Gain {name} must be finite; got {v}"));
            }
        }

        if !self.windup_max.is_finite() || self.windup_max < 0.0 {
            return Err(format!(
                "windup_max must be finite and >= 0; got {}",
                self.windup_max
            ));
        }

        if !self.sample_time.is_finite() || self.sample_time < 0.0 {
            return Err(format!(
                "sample_time must be finite and >= 0; got {}",
                self.sample_time
            ));
        }

        Ok(())
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(s: &str) -> Result<Self, String> {
        let cfg: Self =
            serde_json::from_str(s).map_err(|e| format!("Failed to parse PID config: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse, and validate a JSON file
    pub fn load(path: &Path) -> Result<Self, String> {
        let s = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read PID config {path:?}: {e}"))?;
        Self::from_json_str(&s)
    }
}
