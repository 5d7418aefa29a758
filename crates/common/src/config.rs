//! Simulation tuning, built once and passed explicitly.
//!
//! Every constant the simulation reads lives here, so two simulations in one
//! process can run with different settings.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Errors from loading or validating a [`SimConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config field `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Edge length of a simulation box, in voxels.
    pub box_size: i32,
    /// Number of worker threads in the pool.
    pub worker_threads: usize,
    /// How long an idle worker waits for a task before re-checking the stop flag.
    pub idle_wait_ms: u64,
    /// Refill the scheduler when pending tasks fall below this fraction of all boxes.
    pub refill_threshold: f32,
    /// Fraction of all boxes enqueued per refill.
    pub refill_fraction: f32,
    /// Upper bound on water moved downward from one voxel per tick.
    pub max_flow_per_tick: i32,
    /// Water a single voxel can hold.
    pub water_capacity: i32,
    /// Voxels holding less water than this evaporate under sunlight.
    pub evaporation_threshold: i32,
    pub evaporation_divisor: i32,
    /// Vapor at or above this amount condenses back into water.
    pub condensation_threshold: i32,
    pub condensation_divisor: i32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            box_size: 32,
            worker_threads: default_worker_threads(),
            idle_wait_ms: 1,
            refill_threshold: 0.1,
            refill_fraction: 0.3,
            max_flow_per_tick: 10,
            water_capacity: 100,
            evaporation_threshold: 50,
            evaporation_divisor: 10,
            condensation_threshold: 20,
            condensation_divisor: 2,
        }
    }
}

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl SimConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject settings the simulation cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(field: &'static str, v: i64) -> Result<(), ConfigError> {
            if v <= 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("must be positive, got {v}"),
                });
            }
            Ok(())
        }
        fn fraction(field: &'static str, v: f32) -> Result<(), ConfigError> {
            if !(v > 0.0 && v <= 1.0) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("must be in (0, 1], got {v}"),
                });
            }
            Ok(())
        }

        positive("box_size", self.box_size as i64)?;
        positive("worker_threads", self.worker_threads as i64)?;
        positive("max_flow_per_tick", self.max_flow_per_tick as i64)?;
        positive("water_capacity", self.water_capacity as i64)?;
        positive("evaporation_divisor", self.evaporation_divisor as i64)?;
        positive("condensation_divisor", self.condensation_divisor as i64)?;
        fraction("refill_threshold", self.refill_threshold)?;
        fraction("refill_fraction", self.refill_fraction)?;
        Ok(())
    }
}
