//! Configuration types for cachesweep.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::distribution::EvaluationConfig;
use crate::formula::{Parameters, DEFAULT_FORMULA};
use crate::sweep::{SweepAxis, SweepParameter};
use prometheus::Registry;

/// How one task's per-user miss counts become a matrix cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    /// Sum of misses over all users.
    #[default]
    Total,
    /// Mean misses per user.
    MeanPerUser,
}

/// Where each task gets its base popularity distribution from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BasePolicy {
    /// Every task generates its own base distribution.
    #[default]
    Regenerate,
    /// The base distribution is generated once per trial and shared by all cells.
    FixedPerTrial,
}

/// Values for every simulation parameter not driven by an axis.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulationDefaults {
    /// Number of items in the catalogue.
    pub num_items: usize,
    pub cache_size: usize,
    pub num_users: usize,
    pub num_requests: usize,
    pub alpha: f64,
    pub beta: f64,
    /// Skew of the base popularity distribution.
    pub zipf_exponent: f64,
}

impl Default for SimulationDefaults {
    fn default() -> Self {
        Self {
            num_items: 1000,
            cache_size: 20,
            num_users: 3,
            num_requests: 5,
            alpha: 1.0005,
            beta: 1.0005,
            zipf_exponent: 1.0005,
        }
    }
}

/// Configuration for a sweep.
///
/// This struct can be deserialized from TOML, YAML, JSON, or environment variables
/// using figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SweepConfig {
    /// Thread name prefix (default: "cachesweep")
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Number of tokio threads driving collection (default: 1)
    #[serde(default)]
    pub tokio_threads: Option<usize>,

    /// Number of compute workers running cells (default: one per x-axis value)
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// Per-cell wait in milliseconds (default: 10000)
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,

    /// Base seed for reproducible sweeps; OS entropy when unset
    #[serde(default)]
    pub seed: Option<u64>,

    /// Number of repetitions summed by `drive_multiple` (default: 1)
    #[serde(default = "default_trials")]
    pub trials: usize,

    #[serde(default)]
    pub reduction: Reduction,

    #[serde(default)]
    pub base_policy: BasePolicy,

    /// Caching-probability formula, before normalization
    #[serde(default = "default_formula")]
    pub formula: String,

    /// Values for formula parameters other than `alpha` and `beta`
    #[serde(default)]
    pub parameters: Parameters,

    #[serde(default)]
    pub simulation: SimulationDefaults,

    #[serde(default)]
    pub evaluation: EvaluationConfig,

    /// Swept across columns; also sizes the worker pool
    #[serde(default = "default_x_axis")]
    pub x_axis: SweepAxis,

    /// Swept across rows
    #[serde(default = "default_y_axis")]
    pub y_axis: SweepAxis,

    /// Prometheus registry for metrics exposition.
    /// If provided, metrics will be registered for scraping.
    /// Not serializable - must be set programmatically.
    #[serde(skip)]
    pub prometheus_registry: Option<Registry>,
}

fn default_prefix() -> String {
    "cachesweep".to_string()
}

fn default_task_timeout_ms() -> u64 {
    10_000
}

fn default_trials() -> usize {
    1
}

fn default_formula() -> String {
    DEFAULT_FORMULA.to_string()
}

fn default_x_axis() -> SweepAxis {
    let values = (0..10)
        .map(|i| 10f64.powf(-3.0 + 6.0 * i as f64 / 9.0))
        .collect();
    SweepAxis {
        parameter: SweepParameter::Alpha,
        values,
    }
}

fn default_y_axis() -> SweepAxis {
    SweepAxis {
        parameter: SweepParameter::CacheSize,
        values: (1..=10).map(f64::from).collect(),
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            tokio_threads: None,
            worker_threads: None,
            task_timeout_ms: default_task_timeout_ms(),
            seed: None,
            trials: default_trials(),
            reduction: Reduction::default(),
            base_policy: BasePolicy::default(),
            formula: default_formula(),
            parameters: Parameters::new(),
            simulation: SimulationDefaults::default(),
            evaluation: EvaluationConfig::default(),
            x_axis: default_x_axis(),
            y_axis: default_y_axis(),
            prometheus_registry: None,
        }
    }
}

impl SweepConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the effective number of tokio threads.
    ///
    /// Returns the configured value or 1 as the default.
    pub fn effective_tokio_threads(&self) -> usize {
        self.tokio_threads.unwrap_or(1)
    }

    /// Get the effective number of compute workers.
    ///
    /// Returns the configured value, or one per x-axis value when unset.
    pub fn effective_worker_threads(&self) -> usize {
        self.worker_threads.unwrap_or(self.x_axis.len()).max(1)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }
}
