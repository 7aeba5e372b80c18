//! Immutable per-cell task records.

use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::SeedableRng;

use super::axis::SweepParameter;
use crate::config::SimulationDefaults;
use crate::distribution::{DistributionVector, EvaluationConfig};
use crate::formula::{CompiledFormula, Parameters};

/// Where a task sits in the sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct GridPosition {
    pub trial: usize,
    /// Index into the y-axis values.
    pub row: usize,
    /// Index into the x-axis values.
    pub column: usize,
}

/// Where a task's base popularity distribution comes from.
#[derive(Debug, Clone)]
pub enum BaseSource {
    /// Generate it inside the task from `num_items` and `zipf_exponent`.
    Generate,
    /// Use a distribution generated once for the whole trial.
    Provided(Arc<DistributionVector>),
}

/// Everything one worker needs to simulate one grid cell.
#[derive(Debug, Clone)]
pub struct SimulationTask {
    pub formula: CompiledFormula,
    pub alpha: f64,
    pub beta: f64,
    /// Formula parameters other than `alpha` and `beta`.
    pub parameters: Arc<Parameters>,
    pub cache_size: usize,
    pub num_requests: usize,
    pub num_items: usize,
    pub zipf_exponent: f64,
    pub num_users: usize,
    pub eval: EvaluationConfig,
    pub seed: Option<u64>,
    pub position: GridPosition,
    pub base: BaseSource,
}

impl SimulationTask {
    /// A task holding the fixed simulation values.
    pub fn new(
        formula: CompiledFormula,
        defaults: &SimulationDefaults,
        parameters: Arc<Parameters>,
        eval: EvaluationConfig,
    ) -> Self {
        Self {
            formula,
            alpha: defaults.alpha,
            beta: defaults.beta,
            parameters,
            cache_size: defaults.cache_size,
            num_requests: defaults.num_requests,
            num_items: defaults.num_items,
            zipf_exponent: defaults.zipf_exponent,
            num_users: defaults.num_users,
            eval,
            seed: None,
            position: GridPosition::default(),
            base: BaseSource::Generate,
        }
    }

    /// Override the field a sweep axis drives.
    ///
    /// Count parameters take the value as a whole number; axis validation has
    /// already rejected negative and fractional values.
    pub fn with_axis_value(mut self, parameter: SweepParameter, value: f64) -> Self {
        match parameter {
            SweepParameter::Alpha => self.alpha = value,
            SweepParameter::Beta => self.beta = value,
            SweepParameter::CacheSize => self.cache_size = value as usize,
            SweepParameter::NumRequests => self.num_requests = value as usize,
            SweepParameter::NumUsers => self.num_users = value as usize,
        }
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_position(mut self, position: GridPosition) -> Self {
        self.position = position;
        self
    }

    pub fn with_base(mut self, base: BaseSource) -> Self {
        self.base = base;
        self
    }

    /// The full parameter map the formula is evaluated with.
    pub fn formula_parameters(&self) -> Parameters {
        let mut params = (*self.parameters).clone();
        params.insert("alpha".to_string(), self.alpha);
        params.insert("beta".to_string(), self.beta);
        params
    }

    /// The task's own RNG.
    ///
    /// Seeded sweeps derive it from the base seed and grid position so every
    /// cell draws an independent, reproducible stream.
    pub fn rng(&self) -> SmallRng {
        match self.seed {
            Some(seed) => SmallRng::seed_from_u64(derive_seed(seed, self.position)),
            None => SmallRng::from_os_rng(),
        }
    }
}

/// Mix a base seed with a grid position (splitmix64 finalizer per component).
pub(crate) fn derive_seed(seed: u64, position: GridPosition) -> u64 {
    [position.trial, position.row, position.column]
        .into_iter()
        .fold(mix(seed), |acc, part| mix(acc ^ part as u64))
}

fn mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
