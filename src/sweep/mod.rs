//! Two-dimensional parameter sweeps.
//!
//! A [`Sweep`] varies two [`SweepParameter`]s over the values of its x and y
//! [`SweepAxis`], simulates one [`SimulationTask`] per grid cell on a fresh
//! worker pool, and reduces the results into a [`ResultMatrix`].

mod axis;
mod matrix;
mod orchestrator;
mod task;

pub use axis::{SweepAxis, SweepParameter};
pub use matrix::{CellStatistics, ResultMatrix, TrialStatistics};
pub use orchestrator::{Sweep, SweepState};
pub use task::{BaseSource, GridPosition, SimulationTask};
