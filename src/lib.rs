//! # cachesweep
//!
//! **Monte-Carlo cache-miss sweeps over Zipf popularity**
//!
//! Users cache items drawn from a caching distribution and request items drawn
//! from a Zipf popularity distribution; every request for an item a user did
//! not cache is a miss. The caching distribution is defined by a LaTeX-like
//! formula over the popularity of each item, and a sweep measures misses over
//! a two-dimensional grid of simulation parameters.
//!
//! ## Features
//!
//! - **Formula Language**: LaTeX-flavoured expressions (`\over`, `^{..}`,
//!   `\sum_{n=1}^{m}{p_r(n)}`) compiled once into closures
//! - **Parallel Sweeps**: one worker per x-axis value; a full row runs concurrently
//! - **Typed Faults**: division by zero and non-finite values surface as errors
//!   naming the offending grid cell
//! - **Reproducible**: a single seed fixes every draw of every cell
//! - **Flexible Configuration**: Configure via files (TOML/YAML/JSON), environment variables, or code
//! - **CLI Integration**: Built-in clap support for command-line overrides
//!
//! ## Quick Start
//!
//! ```
//! use cachesweep::{SweepAxis, SweepBuilder, SweepParameter};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut sweep = SweepBuilder::new()
//!         .num_items(100)
//!         .num_requests(5)
//!         .seed(42)
//!         .x_axis(SweepAxis::logarithmic(SweepParameter::Alpha, -1.0, 1.0, 3)?)
//!         .y_axis(SweepAxis::stepped(SweepParameter::CacheSize, 1, 5, 2)?)
//!         .build()?;
//!
//!     let matrix = sweep.drive_multiple(4)?;
//!     for (row, cache_size) in matrix.rows().zip(&matrix.y_axis.values) {
//!         println!("cache {cache_size}: {row:?}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Formulas
//!
//! A raw formula is normalized before it is parsed: `p_r(m)` becomes the item
//! popularity `r`, `\sum_{n=1}^{m}{p_r(n)}` its running sum `v`, and the
//! Greek-letter commands become plain identifiers. Any other identifier is a
//! parameter; `alpha` and `beta` come from the simulation (or the swept axis),
//! everything else from [`SweepBuilder::parameter`].
//!
//! ```
//! use cachesweep::{compile_raw, transform, DistributionVector, EvaluationConfig, Parameters};
//!
//! let formula = compile_raw(r"{p_r(m)^{1\over\alpha}}").unwrap();
//! let base = DistributionVector::uniform(4);
//! let params = Parameters::from([("alpha".to_string(), 1.0)]);
//! let derived = transform(&base, &formula, &params, &EvaluationConfig::default()).unwrap();
//! assert!(derived.iter().all(|p| (p - 0.25).abs() < 1e-12));
//! ```
//!
//! ## Configuration
//!
//! Configuration sources are merged in order (later sources override earlier):
//!
//! 1. Default values
//! 2. Config files (via `.file()`)
//! 3. Environment variables (via `.env_prefix()`)
//! 4. Programmatic overrides
//! 5. CLI arguments (via `.with_cli_args()`)
//!
//! ### Config File Example (TOML)
//!
//! ```toml
//! seed = 42
//! trials = 10
//! reduction = "mean_per_user"
//! formula = '{p_r(m)^{1\over\alpha}}\over{\sum_{n=1}^{m}{p_r(n)^{1\over\alpha}}}'
//!
//! [simulation]
//! num_items = 1000
//! num_users = 3
//!
//! [evaluation]
//! strict = false
//! zipf_mode = "analytic"
//!
//! [x_axis]
//! parameter = "alpha"
//! values = [0.5, 1.0, 2.0]
//!
//! [y_axis]
//! parameter = "cache_size"
//! values = [5, 10, 20]
//! ```
//!
//! ### Environment Variables
//!
//! With `.env_prefix("CACHESWEEP")`:
//! - `CACHESWEEP_SEED=42`
//! - `CACHESWEEP_TRIALS=10`
//! - `CACHESWEEP_SIMULATION__NUM_ITEMS=500`
//! - `CACHESWEEP_EVALUATION__STRICT=true`
//!
//! ## Thread Naming
//!
//! Threads are named with the configured prefix:
//! - Tokio threads: `{prefix}-tokio-0000`, `{prefix}-tokio-0001`, ...
//! - Worker threads: `{prefix}-worker-0000`, `{prefix}-worker-0001`, ...

pub(crate) mod bridge;
pub mod builder;
pub mod config;
pub mod distribution;
pub mod error;
pub mod evaluator;
pub mod formula;
pub mod metrics;
pub mod runtime;
pub mod sampler;
pub mod sweep;

pub use builder::{SweepArgs, SweepBuilder};
pub use config::{BasePolicy, Reduction, SimulationDefaults, SweepConfig};
pub use distribution::{
    generate_base, generate_custom, transform, DistributionVector, EvaluationConfig, ZipfMode,
};
pub use error::{NumericFault, Result, SimError};
pub use evaluator::{misses, setup_and_simulate, simulate_user, SimulationResult, UserOutcome};
pub use formula::{compile, compile_raw, normalize, CompiledFormula, FormulaInputs, Parameters};
pub use metrics::SweepMetrics;
pub use runtime::{RuntimeOptions, SweepRuntime};
pub use sampler::{sample_requests, sample_without_replacement};
pub use sweep::{
    BaseSource, CellStatistics, GridPosition, ResultMatrix, SimulationTask, Sweep, SweepAxis,
    SweepParameter, SweepState, TrialStatistics,
};

pub use cachesweep_macros::test;
