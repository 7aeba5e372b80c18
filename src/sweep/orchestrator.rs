//! Grid dispatch, collection and reduction.

use std::sync::Arc;
use std::time::Instant;

use rand::rngs::SmallRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use super::axis::SweepParameter;
use super::matrix::{ResultMatrix, TrialStatistics};
use super::task::{derive_seed, BaseSource, GridPosition, SimulationTask};
use crate::config::{BasePolicy, Reduction, SweepConfig};
use crate::distribution::generate_base;
use crate::error::{Result, SimError};
use crate::evaluator::{setup_and_simulate, SimulationResult};
use crate::formula::{compile_raw, CompiledFormula, Parameters};
use crate::metrics::SweepMetrics;
use crate::runtime::{RuntimeOptions, SweepRuntime};

/// Lifecycle of a sweep.
///
/// `Dispatched` and `Collecting` alternate once per row while a drive is in
/// progress. A failed drive leaves the sweep `Failed` until the next drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepState {
    Built,
    Dispatched,
    Collecting,
    Done,
    Failed,
}

/// A configured sweep, ready to drive.
///
/// Build one with [`SweepBuilder`](crate::SweepBuilder) or [`Sweep::new`].
///
/// # Examples
///
/// ```
/// use cachesweep::{SweepAxis, SweepBuilder, SweepParameter};
///
/// let mut sweep = SweepBuilder::new()
///     .num_items(10)
///     .num_requests(3)
///     .num_users(1)
///     .x_axis(SweepAxis::new(SweepParameter::Alpha, vec![0.5, 1.0, 1.5]).unwrap())
///     .y_axis(SweepAxis::new(SweepParameter::CacheSize, vec![1.0, 2.0, 3.0]).unwrap())
///     .build()
///     .unwrap();
///
/// let matrix = sweep.drive().unwrap();
/// assert_eq!(matrix.shape(), (3, 3));
/// ```
pub struct Sweep {
    config: SweepConfig,
    formula: CompiledFormula,
    parameters: Arc<Parameters>,
    metrics: SweepMetrics,
    state: SweepState,
}

impl Sweep {
    /// Validate `config` and compile its formula.
    ///
    /// # Errors
    ///
    /// - `Parse` if the formula does not parse
    /// - `ReservedParameter` / `MissingParameter` if the configured parameters
    ///   cannot satisfy the formula
    /// - `EmptyAxis` / `InvalidAxis` / `DuplicateAxis` for bad axes
    pub fn new(config: SweepConfig) -> Result<Self> {
        config.x_axis.validate()?;
        config.y_axis.validate()?;
        if config.x_axis.parameter == config.y_axis.parameter {
            return Err(SimError::DuplicateAxis(config.x_axis.parameter));
        }

        let formula = compile_raw(&config.formula)?;
        let parameters = Arc::new(config.parameters.clone());
        let template = SimulationTask::new(
            formula.clone(),
            &config.simulation,
            parameters.clone(),
            config.evaluation,
        );
        formula.resolve(&template.formula_parameters())?;

        let metrics = SweepMetrics::with_prefix(&config.prefix);
        if let Some(ref registry) = config.prometheus_registry {
            if let Err(e) = metrics.register(registry) {
                warn!(%e, "failed to register prometheus metrics");
            }
        }

        Ok(Self {
            config,
            formula,
            parameters,
            metrics,
            state: SweepState::Built,
        })
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    pub fn formula(&self) -> &CompiledFormula {
        &self.formula
    }

    pub fn metrics(&self) -> &SweepMetrics {
        &self.metrics
    }

    pub fn state(&self) -> SweepState {
        self.state
    }

    /// Run the whole grid once.
    pub fn drive(&mut self) -> Result<ResultMatrix> {
        self.drive_multiple(1)
    }

    /// Run the whole grid `trials` times and sum the matrices elementwise.
    pub fn drive_multiple(&mut self, trials: usize) -> Result<ResultMatrix> {
        self.drive_with_statistics(trials).map(|(matrix, _)| matrix)
    }

    /// Run the configured number of trials.
    pub fn run(&mut self) -> Result<ResultMatrix> {
        self.drive_multiple(self.config.trials)
    }

    /// Like [`drive_multiple`](Self::drive_multiple), also returning per-cell
    /// mean, minimum and maximum across the trials.
    ///
    /// A fresh worker pool with one thread per x-axis value is built for the
    /// call and torn down before it returns.
    pub fn drive_with_statistics(
        &mut self,
        trials: usize,
    ) -> Result<(ResultMatrix, TrialStatistics)> {
        if trials == 0 {
            return Err(SimError::Domain("a sweep needs at least one trial".into()));
        }

        let runtime = SweepRuntime::new(RuntimeOptions {
            prefix: self.config.prefix.clone(),
            tokio_threads: self.config.effective_tokio_threads(),
            worker_threads: self.config.effective_worker_threads(),
        })?;

        info!(
            x_axis = %self.config.x_axis.parameter,
            y_axis = %self.config.y_axis.parameter,
            columns = self.config.x_axis.len(),
            rows = self.config.y_axis.len(),
            trials,
            "starting sweep"
        );
        let started = Instant::now();

        let outcome = runtime.block_on(self.run_on(&runtime, trials));
        match outcome {
            Ok(_) => {
                self.state = SweepState::Done;
                runtime.block_until_idle();
                info!(elapsed = ?started.elapsed(), "sweep finished");
            }
            Err(ref e) => {
                self.state = SweepState::Failed;
                self.metrics.clear_inflight();
                // abandoned cells keep running; the pool is dropped without waiting
                runtime.shutdown();
                warn!(%e, in_flight = runtime.compute_tasks_in_flight(), "sweep failed");
            }
        }
        outcome
    }

    /// Drive `trials` trials on an existing runtime.
    ///
    /// Must be awaited inside `runtime.block_on`.
    pub async fn run_on(
        &mut self,
        runtime: &SweepRuntime,
        trials: usize,
    ) -> Result<(ResultMatrix, TrialStatistics)> {
        let x_axis = self.config.x_axis.clone();
        let y_axis = self.config.y_axis.clone();
        let mut total = ResultMatrix::zeros(x_axis.clone(), y_axis.clone());
        let mut statistics = TrialStatistics::new(x_axis.clone(), y_axis.clone());

        for trial in 0..trials {
            let base = self.base_for_trial(runtime, trial).await?;
            let mut matrix = ResultMatrix::zeros(x_axis.clone(), y_axis.clone());

            for (row, &y_value) in y_axis.values.iter().enumerate() {
                let row_started = Instant::now();

                self.state = SweepState::Dispatched;
                let handles: Vec<_> = x_axis
                    .values
                    .iter()
                    .enumerate()
                    .map(|(column, &x_value)| {
                        let task = self.task(
                            GridPosition { trial, row, column },
                            x_value,
                            y_value,
                            base.clone(),
                        );
                        self.metrics.record_submitted();
                        runtime.submit(move || {
                            let mut rng = task.rng();
                            setup_and_simulate(&task, &mut rng)
                        })
                    })
                    .collect();

                self.state = SweepState::Collecting;
                let mut values = Vec::with_capacity(handles.len());
                for (column, handle) in handles.into_iter().enumerate() {
                    let x_value = x_axis.values[column];
                    let result = self.collect_cell(handle, row, column, x_value, y_value).await?;
                    statistics.record(row, column, &result);
                    values.push(self.reduce(&result));
                }
                matrix.set_row(row, &values);

                let elapsed = row_started.elapsed();
                self.metrics.record_row(elapsed);
                debug!(trial, row, y_value, ?elapsed, "row collected");
            }

            total.add_assign(&matrix)?;
            statistics.finish_trial();
        }

        Ok((total, statistics.finalize()))
    }

    async fn collect_cell(
        &self,
        handle: impl std::future::Future<Output = Result<SimulationResult>>,
        row: usize,
        column: usize,
        x_value: f64,
        y_value: f64,
    ) -> Result<SimulationResult> {
        let after = self.config.task_timeout();
        match tokio::time::timeout(after, handle).await {
            Ok(Ok(result)) => {
                self.metrics.record_completed(result.truncated_cache_draws);
                Ok(result)
            }
            Ok(Err(e)) => {
                self.metrics.record_failed();
                let e = self.translate(e, x_value, y_value);
                warn!(row, column, %e, "cell failed");
                Err(e)
            }
            Err(_) => {
                self.metrics.record_timeout();
                warn!(row, column, ?after, "cell timed out");
                Err(SimError::Timeout { row, column, after })
            }
        }
    }

    async fn base_for_trial(&self, runtime: &SweepRuntime, trial: usize) -> Result<BaseSource> {
        match self.config.base_policy {
            BasePolicy::Regenerate => Ok(BaseSource::Generate),
            BasePolicy::FixedPerTrial => {
                let simulation = &self.config.simulation;
                let (length, skew) = (simulation.num_items, simulation.zipf_exponent);
                let eval = self.config.evaluation;
                let mut rng = trial_rng(self.config.seed, trial);
                let handle = runtime.submit(move || generate_base(length, skew, &eval, &mut rng));
                let after = self.config.task_timeout();
                let base = tokio::time::timeout(after, handle)
                    .await
                    .map_err(|_| SimError::Timeout {
                        row: 0,
                        column: 0,
                        after,
                    })??;
                Ok(BaseSource::Provided(Arc::new(base)))
            }
        }
    }

    fn task(&self, position: GridPosition, x_value: f64, y_value: f64, base: BaseSource) -> SimulationTask {
        SimulationTask::new(
            self.formula.clone(),
            &self.config.simulation,
            self.parameters.clone(),
            self.config.evaluation,
        )
        .with_axis_value(self.config.x_axis.parameter, x_value)
        .with_axis_value(self.config.y_axis.parameter, y_value)
        .with_seed(self.config.seed)
        .with_position(position)
        .with_base(base)
    }

    fn reduce(&self, result: &SimulationResult) -> f64 {
        match self.config.reduction {
            Reduction::Total => result.total() as f64,
            Reduction::MeanPerUser => result.mean_per_user(),
        }
    }

    /// Fold a numeric fault into an error naming the cell's axis values.
    fn translate(&self, e: SimError, x_value: f64, y_value: f64) -> SimError {
        match e {
            SimError::Numeric(fault) => SimError::InvalidParameter {
                x_axis: self.config.x_axis.parameter,
                x_value,
                y_axis: self.config.y_axis.parameter,
                y_value,
                fault,
            },
            other => other,
        }
    }

    /// The parameter driven by the x axis.
    pub fn x_parameter(&self) -> SweepParameter {
        self.config.x_axis.parameter
    }

    /// The parameter driven by the y axis.
    pub fn y_parameter(&self) -> SweepParameter {
        self.config.y_axis.parameter
    }
}

fn trial_rng(seed: Option<u64>, trial: usize) -> SmallRng {
    match seed {
        Some(seed) => SmallRng::seed_from_u64(derive_seed(
            seed,
            GridPosition {
                trial,
                row: usize::MAX,
                column: usize::MAX,
            },
        )),
        None => SmallRng::from_os_rng(),
    }
}

impl std::fmt::Debug for Sweep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweep")
            .field("formula", &self.formula.source())
            .field("x_axis", &self.config.x_axis.parameter)
            .field("y_axis", &self.config.y_axis.parameter)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
