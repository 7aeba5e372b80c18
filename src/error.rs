//! Error types for cachesweep.

use std::time::Duration;

use thiserror::Error;

use crate::sweep::SweepParameter;

/// Numeric singularities raised by the evaluation step itself.
///
/// These are parameter-domain problems: the orchestrator translates them into
/// [`SimError::InvalidParameter`] for the grid cell that produced them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NumericFault {
    /// A scalar divisor evaluated to exactly zero (e.g. `1/\alpha` at `alpha = 0`).
    #[error("division by zero in `{expression}`")]
    DivisionByZero { expression: String },

    /// Strict evaluation saw `inf` or `NaN` at an item index.
    #[error("non-finite value {value} at index {index}")]
    NonFinite { index: usize, value: f64 },

    /// Strict evaluation produced a distribution with no mass to normalize.
    #[error("distribution has zero total mass")]
    ZeroMass,

    /// A base distribution generator rejected its skew exponent.
    #[error("invalid skew exponent {skew}: {reason}")]
    InvalidSkew { skew: f64, reason: String },
}

/// Errors that can occur while compiling formulas, generating distributions,
/// sampling, or driving a sweep.
#[derive(Debug, Error)]
pub enum SimError {
    /// The formula string is not valid syntax.
    #[error("formula parse error at byte {position}: {message}")]
    Parse { position: usize, message: String },

    /// The formula references a symbol that has no supplied value.
    #[error("formula parameter `{0}` was not supplied")]
    MissingParameter(String),

    /// A caller tried to supply a value for a reserved formula symbol.
    #[error("`{0}` is a reserved formula symbol and cannot be supplied as a parameter")]
    ReservedParameter(String),

    /// The request draw needs more eligible items than the distribution has.
    #[error("cannot draw {requested} items from a distribution with {available} non-zero entries")]
    DegenerateDistribution { requested: usize, available: usize },

    /// Strict evaluation found a malformed distribution.
    #[error("malformed distribution: {0}")]
    Domain(String),

    /// Distributions that must line up index-for-index have different lengths.
    #[error("distribution length mismatch: {left} != {right}")]
    LengthMismatch { left: usize, right: usize },

    /// A numeric fault inside a single task, before translation.
    #[error(transparent)]
    Numeric(#[from] NumericFault),

    /// A swept value drove the simulation into a numeric singularity.
    #[error("invalid parameter at {x_axis}={x_value}, {y_axis}={y_value}")]
    InvalidParameter {
        x_axis: SweepParameter,
        x_value: f64,
        y_axis: SweepParameter,
        y_value: f64,
        #[source]
        fault: NumericFault,
    },

    /// A grid cell did not finish within the configured wait.
    #[error("task at row {row}, column {column} timed out after {after:?}")]
    Timeout {
        row: usize,
        column: usize,
        after: Duration,
    },

    /// An axis value is outside its parameter's domain.
    #[error("invalid value {value} for sweep axis {parameter}: {reason}")]
    InvalidAxis {
        parameter: SweepParameter,
        value: f64,
        reason: &'static str,
    },

    /// An axis has no values to iterate.
    #[error("sweep axis {0} has no values")]
    EmptyAxis(SweepParameter),

    /// Both axes name the same parameter.
    #[error("x and y axes both sweep {0}")]
    DuplicateAxis(SweepParameter),

    /// A worker closure panicked.
    #[error("worker panicked: {0}")]
    WorkerPanicked(String),

    /// Error extracting configuration from figment.
    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Error building tokio runtime.
    #[error("failed to build tokio runtime: {0}")]
    TokioRuntime(#[from] std::io::Error),

    /// Error building rayon thread pool.
    #[error("failed to build worker pool: {0}")]
    RayonThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl SimError {
    /// Whether the error belongs to the parameter-domain class that the
    /// orchestrator folds into [`SimError::InvalidParameter`].
    pub fn is_numeric(&self) -> bool {
        matches!(self, SimError::Numeric(_))
    }
}

/// Result type alias for cachesweep operations.
pub type Result<T> = std::result::Result<T, SimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_parameter_display_and_source() {
        let err = SimError::InvalidParameter {
            x_axis: SweepParameter::Alpha,
            x_value: 0.0,
            y_axis: SweepParameter::CacheSize,
            y_value: 3.0,
            fault: NumericFault::DivisionByZero {
                expression: "1/alpha".to_string(),
            },
        };
        assert_eq!(
            err.to_string(),
            "invalid parameter at alpha=0, cache_size=3"
        );
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "division by zero in `1/alpha`");
    }

    #[test]
    fn test_numeric_from_fault() {
        let err: SimError = NumericFault::ZeroMass.into();
        assert!(err.is_numeric());
        assert!(!SimError::MissingParameter("k".into()).is_numeric());
    }
}
