//! Sweep output matrices.

use serde::Serialize;

use super::axis::SweepAxis;
use crate::error::{Result, SimError};
use crate::evaluator::SimulationResult;

/// Reduced miss statistic per grid cell, indexed `(row, column)` = `(y, x)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultMatrix {
    pub x_axis: SweepAxis,
    pub y_axis: SweepAxis,
    /// Row-major, `y_axis.len()` rows of `x_axis.len()` cells.
    cells: Vec<f64>,
}

impl ResultMatrix {
    pub(crate) fn zeros(x_axis: SweepAxis, y_axis: SweepAxis) -> Self {
        let cells = vec![0.0; x_axis.len() * y_axis.len()];
        Self {
            x_axis,
            y_axis,
            cells,
        }
    }

    /// `(rows, columns)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.y_axis.len(), self.x_axis.len())
    }

    pub fn get(&self, row: usize, column: usize) -> Option<f64> {
        let (rows, columns) = self.shape();
        (row < rows && column < columns).then(|| self.cells[row * columns + column])
    }

    pub fn row(&self, row: usize) -> Option<&[f64]> {
        let columns = self.x_axis.len();
        self.cells.get(row * columns..(row + 1) * columns)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.cells.chunks(self.x_axis.len().max(1))
    }

    pub fn cells(&self) -> &[f64] {
        &self.cells
    }

    pub(crate) fn set_row(&mut self, row: usize, values: &[f64]) {
        let columns = self.x_axis.len();
        self.cells[row * columns..(row + 1) * columns].copy_from_slice(values);
    }

    /// Elementwise sum with a matrix of the same shape.
    pub fn add_assign(&mut self, other: &ResultMatrix) -> Result<()> {
        if self.cells.len() != other.cells.len() {
            return Err(SimError::LengthMismatch {
                left: self.cells.len(),
                right: other.cells.len(),
            });
        }
        self.cells
            .iter_mut()
            .zip(&other.cells)
            .for_each(|(a, b)| *a += b);
        Ok(())
    }
}

/// Per-cell summary across trials.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CellStatistics {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub mean_per_user: f64,
    pub min_per_user: f64,
    pub max_per_user: f64,
}

impl Default for CellStatistics {
    fn default() -> Self {
        Self {
            mean: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            mean_per_user: 0.0,
            min_per_user: f64::INFINITY,
            max_per_user: f64::NEG_INFINITY,
        }
    }
}

/// Total misses and per-user means of every cell, across every trial.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialStatistics {
    pub x_axis: SweepAxis,
    pub y_axis: SweepAxis,
    pub trials: usize,
    cells: Vec<CellStatistics>,
}

impl TrialStatistics {
    pub(crate) fn new(x_axis: SweepAxis, y_axis: SweepAxis) -> Self {
        let cells = vec![CellStatistics::default(); x_axis.len() * y_axis.len()];
        Self {
            x_axis,
            y_axis,
            trials: 0,
            cells,
        }
    }

    pub(crate) fn record(&mut self, row: usize, column: usize, result: &SimulationResult) {
        let total = result.total() as f64;
        let per_user = result.mean_per_user();
        let cell = &mut self.cells[row * self.x_axis.len() + column];
        cell.mean += total;
        cell.min = cell.min.min(total);
        cell.max = cell.max.max(total);
        cell.mean_per_user += per_user;
        cell.min_per_user = cell.min_per_user.min(per_user);
        cell.max_per_user = cell.max_per_user.max(per_user);
    }

    /// Close a trial. Means are kept as sums until then.
    pub(crate) fn finish_trial(&mut self) {
        self.trials += 1;
    }

    pub(crate) fn finalize(mut self) -> Self {
        if self.trials > 0 {
            let n = self.trials as f64;
            for cell in self.cells.iter_mut() {
                cell.mean /= n;
                cell.mean_per_user /= n;
            }
        }
        self
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.y_axis.len(), self.x_axis.len())
    }

    pub fn get(&self, row: usize, column: usize) -> Option<&CellStatistics> {
        let (rows, columns) = self.shape();
        if row < rows && column < columns {
            self.cells.get(row * columns + column)
        } else {
            None
        }
    }
}
