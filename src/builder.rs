//! Builder for constructing sweeps.
//!
//! The builder supports multiple configuration sources using figment:
//! - Default values
//! - Config files (TOML, YAML, JSON)
//! - Environment variables
//! - Programmatic overrides
//! - CLI arguments via clap

use crate::config::{BasePolicy, Reduction, SweepConfig};
use crate::distribution::ZipfMode;
use crate::error::Result;
use crate::sweep::{Sweep, SweepAxis};

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use prometheus::Registry;
use std::path::Path;

/// Builder for constructing a [`Sweep`].
///
/// Configuration sources are merged in the following order (later sources override earlier):
/// 1. Default values
/// 2. Config files (in order added)
/// 3. Environment variables
/// 4. Programmatic overrides
///
/// # Examples
///
/// ```no_run
/// use cachesweep::SweepBuilder;
///
/// let sweep = SweepBuilder::new()
///     .file("sweep.toml")
///     .env_prefix("CACHESWEEP")
///     .seed(7)
///     .trials(5)
///     .build()?;
/// # Ok::<(), cachesweep::SimError>(())
/// ```
pub struct SweepBuilder {
    figment: Figment,
    prometheus_registry: Option<Registry>,
}

impl Default for SweepBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SweepBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SweepBuilder")
            .field("figment", &self.figment)
            .field(
                "prometheus_registry",
                &self.prometheus_registry.as_ref().map(|_| "<Registry>"),
            )
            .finish()
    }
}

impl SweepBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            figment: Figment::from(Serialized::defaults(SweepConfig::default())),
            prometheus_registry: None,
        }
    }

    fn set<T: serde::Serialize>(mut self, key: &str, value: T) -> Self {
        self.figment = self.figment.merge(Serialized::default(key, value));
        self
    }

    /// Add a configuration file.
    ///
    /// Supports TOML, YAML, and JSON formats (detected by extension).
    /// Files are merged in the order they are added.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref();
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        self.figment = match extension.to_lowercase().as_str() {
            "yaml" | "yml" => self.figment.merge(Yaml::file(path)),
            "json" => self.figment.merge(Json::file(path)),
            // anything else is read as TOML
            _ => self.figment.merge(Toml::file(path)),
        };
        self
    }

    /// Add environment variables with a prefix.
    ///
    /// Variables are read as `{PREFIX}_{KEY}`, with `__` separating nested
    /// keys: `CACHESWEEP_SEED`, `CACHESWEEP_SIMULATION__NUM_ITEMS`.
    pub fn env_prefix(mut self, prefix: &str) -> Self {
        self.figment = self
            .figment
            .merge(Env::prefixed(&format!("{}_", prefix)).split("__"));
        self
    }

    /// Set the thread name prefix.
    ///
    /// Thread names will be formatted as `{prefix}-tokio-{NNNN}` and
    /// `{prefix}-worker-{NNNN}`. The prefix also names the metrics.
    pub fn prefix(self, prefix: impl Into<String>) -> Self {
        self.set("prefix", prefix.into())
    }

    /// Set the number of tokio threads. Default is 1.
    pub fn tokio_threads(self, n: usize) -> Self {
        self.set("tokio_threads", n)
    }

    /// Set the number of compute workers. Default is one per x-axis value.
    pub fn worker_threads(self, n: usize) -> Self {
        self.set("worker_threads", n)
    }

    /// Set how long a single cell may run before the sweep fails.
    pub fn task_timeout_ms(self, ms: u64) -> Self {
        self.set("task_timeout_ms", ms)
    }

    /// Make the sweep reproducible.
    pub fn seed(self, seed: u64) -> Self {
        self.set("seed", seed)
    }

    /// Number of trials [`Sweep::run`] sums.
    pub fn trials(self, trials: usize) -> Self {
        self.set("trials", trials)
    }

    pub fn reduction(self, reduction: Reduction) -> Self {
        self.set("reduction", reduction)
    }

    pub fn base_policy(self, policy: BasePolicy) -> Self {
        self.set("base_policy", policy)
    }

    /// Set the caching-probability formula, in raw form.
    pub fn formula(self, formula: impl Into<String>) -> Self {
        self.set("formula", formula.into())
    }

    /// Supply a value for a named formula parameter.
    pub fn parameter(self, name: &str, value: f64) -> Self {
        self.set(&format!("parameters.{}", name), value)
    }

    pub fn num_items(self, n: usize) -> Self {
        self.set("simulation.num_items", n)
    }

    pub fn cache_size(self, n: usize) -> Self {
        self.set("simulation.cache_size", n)
    }

    pub fn num_users(self, n: usize) -> Self {
        self.set("simulation.num_users", n)
    }

    pub fn num_requests(self, n: usize) -> Self {
        self.set("simulation.num_requests", n)
    }

    pub fn alpha(self, alpha: f64) -> Self {
        self.set("simulation.alpha", alpha)
    }

    pub fn beta(self, beta: f64) -> Self {
        self.set("simulation.beta", beta)
    }

    /// Skew of the base popularity distribution.
    pub fn zipf_exponent(self, skew: f64) -> Self {
        self.set("simulation.zipf_exponent", skew)
    }

    /// Reject malformed distributions instead of repairing them.
    pub fn strict(self, strict: bool) -> Self {
        self.set("evaluation.strict", strict)
    }

    pub fn zipf_mode(self, mode: ZipfMode) -> Self {
        self.set("evaluation.zipf_mode", mode)
    }

    /// The axis swept across columns. Its length sizes the worker pool.
    pub fn x_axis(self, axis: SweepAxis) -> Self {
        self.set("x_axis", axis)
    }

    /// The axis swept across rows.
    pub fn y_axis(self, axis: SweepAxis) -> Self {
        self.set("y_axis", axis)
    }

    /// Provide an external Prometheus registry for metrics exposition.
    ///
    /// When a registry is provided, sweep metrics will be registered
    /// and available for Prometheus scraping.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use prometheus::Registry;
    /// use cachesweep::SweepBuilder;
    ///
    /// let registry = Registry::new();
    /// let mut sweep = SweepBuilder::new()
    ///     .prometheus_registry(registry.clone())
    ///     .build()?;
    /// sweep.drive()?;
    ///
    /// let metric_families = registry.gather();
    /// # Ok::<(), cachesweep::SimError>(())
    /// ```
    pub fn prometheus_registry(mut self, registry: Registry) -> Self {
        self.prometheus_registry = Some(registry);
        self
    }

    /// Apply CLI argument overrides.
    ///
    /// This method applies any non-None values from the `SweepArgs` struct.
    pub fn with_cli_args(mut self, args: &SweepArgs) -> Self {
        if let Some(ref path) = args.sweep_config {
            self = self.file(path);
        }
        if let Some(ref prefix) = args.sweep_prefix {
            self = self.prefix(prefix.clone());
        }
        if let Some(threads) = args.sweep_tokio_threads {
            self = self.tokio_threads(threads);
        }
        if let Some(workers) = args.sweep_worker_threads {
            self = self.worker_threads(workers);
        }
        if let Some(ms) = args.sweep_task_timeout_ms {
            self = self.task_timeout_ms(ms);
        }
        if let Some(seed) = args.sweep_seed {
            self = self.seed(seed);
        }
        if let Some(trials) = args.sweep_trials {
            self = self.trials(trials);
        }
        if let Some(ref formula) = args.sweep_formula {
            self = self.formula(formula.clone());
        }
        if args.sweep_strict {
            self = self.strict(true);
        }
        self
    }

    /// Extract the layered configuration.
    pub fn config(&self) -> Result<SweepConfig> {
        let mut config: SweepConfig = self.figment.extract().map_err(Box::new)?;
        config.prometheus_registry = self.prometheus_registry.clone();
        Ok(config)
    }

    /// Build the sweep.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration extraction fails
    /// - The formula does not compile or its parameters are not all supplied
    /// - Either axis is empty, out of its parameter's domain, or both axes
    ///   name the same parameter
    pub fn build(self) -> Result<Sweep> {
        Sweep::new(self.config()?)
    }
}

/// CLI arguments for sweep configuration.
///
/// Use with clap's `Parser` derive macro. These arguments can be applied
/// to a `SweepBuilder` using `with_cli_args`.
///
/// # Examples
///
/// ```no_run
/// use clap::Parser;
/// use cachesweep::{SweepArgs, SweepBuilder};
///
/// #[derive(Parser)]
/// struct MyArgs {
///     #[command(flatten)]
///     sweep: SweepArgs,
/// }
///
/// let args = MyArgs::parse();
/// let sweep = SweepBuilder::new()
///     .with_cli_args(&args.sweep)
///     .build()?;
/// # Ok::<(), cachesweep::SimError>(())
/// ```
#[derive(Debug, Default, Clone, clap::Args)]
pub struct SweepArgs {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long)]
    pub sweep_config: Option<std::path::PathBuf>,

    /// Thread name prefix
    #[arg(long)]
    pub sweep_prefix: Option<String>,

    /// Number of tokio threads
    #[arg(long)]
    pub sweep_tokio_threads: Option<usize>,

    /// Number of compute workers
    #[arg(long)]
    pub sweep_worker_threads: Option<usize>,

    /// Per-cell timeout in milliseconds
    #[arg(long)]
    pub sweep_task_timeout_ms: Option<u64>,

    /// Base seed for a reproducible sweep
    #[arg(long)]
    pub sweep_seed: Option<u64>,

    /// Number of trials to sum
    #[arg(long)]
    pub sweep_trials: Option<usize>,

    /// Caching-probability formula
    #[arg(long)]
    pub sweep_formula: Option<String>,

    /// Reject malformed distributions
    #[arg(long)]
    pub sweep_strict: bool,
}
