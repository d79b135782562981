use serde::{Deserialize, Serialize};

use crate::error::{OptimizerError, OptimizerResult};

/// Parameters for one optimization run.
///
/// Built once from the optional JSON argument and passed by reference to every
/// component, so all pair costs within a run are comparable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Ratio between best and second-best descriptor distance for a match to
    /// be kept.
    pub ratio_test: f64,
    /// Number of Harris corners kept per frame.
    pub n_features: usize,
    /// Weight of the quadratic penalty for skipped frames.
    pub velocity_factor: f64,
    /// Largest index gap considered as a single edge.
    pub window_size: usize,
    /// Worker threads. Defaults to the number of logical CPUs.
    pub threads: Option<usize>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            ratio_test: 0.75,
            n_features: 360,
            velocity_factor: 100.0,
            window_size: 4,
            threads: None,
        }
    }
}

impl OptimizerConfig {
    /// Parse a JSON object of overrides. Missing keys keep their defaults and
    /// unknown keys are ignored. An empty string yields the defaults.
    pub fn from_json(json: &str) -> OptimizerResult<Self> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the optimizer cannot run with
    pub fn validate(&self) -> OptimizerResult<()> {
        if self.window_size == 0 {
            return Err(OptimizerError::invalid_config("window_size must be at least 1"));
        }
        if !(self.ratio_test > 0.0 && self.ratio_test <= 1.0) {
            return Err(OptimizerError::invalid_config(format!(
                "ratio_test must be in (0, 1], got {}",
                self.ratio_test
            )));
        }
        if !self.velocity_factor.is_finite() || self.velocity_factor < 0.0 {
            return Err(OptimizerError::invalid_config(format!(
                "velocity_factor must be a finite non-negative number, got {}",
                self.velocity_factor
            )));
        }
        if self.threads == Some(0) {
            return Err(OptimizerError::invalid_config("threads must be at least 1"));
        }
        Ok(())
    }

    pub fn thread_count(&self) -> usize {
        self.threads.unwrap_or_else(num_cpus::get)
    }
}
