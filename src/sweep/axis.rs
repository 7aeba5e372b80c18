//! Sweep axes: which parameter varies and over which values.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

/// A simulation parameter that can be swept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepParameter {
    /// Formula parameter `alpha`.
    Alpha,
    /// Formula parameter `beta`.
    Beta,
    /// Items each user caches.
    CacheSize,
    /// Items each user requests.
    NumRequests,
    /// Simulated users per task.
    NumUsers,
}

impl SweepParameter {
    pub const ALL: [SweepParameter; 5] = [
        SweepParameter::Alpha,
        SweepParameter::Beta,
        SweepParameter::CacheSize,
        SweepParameter::NumRequests,
        SweepParameter::NumUsers,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SweepParameter::Alpha => "alpha",
            SweepParameter::Beta => "beta",
            SweepParameter::CacheSize => "cache_size",
            SweepParameter::NumRequests => "num_requests",
            SweepParameter::NumUsers => "num_users",
        }
    }

    /// Whether negative values are admissible.
    pub fn is_signed(self) -> bool {
        matches!(self, SweepParameter::Alpha | SweepParameter::Beta)
    }

    /// Whether values must be whole numbers.
    pub fn is_integral(self) -> bool {
        !self.is_signed()
    }

    /// Check a single value against the parameter's domain.
    pub fn validate(self, value: f64) -> Result<()> {
        let reason = if !value.is_finite() {
            Some("value must be finite")
        } else if !self.is_signed() && value < 0.0 {
            Some("value must be non-negative")
        } else if self.is_integral() && value.fract() != 0.0 {
            Some("value must be a whole number")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(SimError::InvalidAxis {
                parameter: self,
                value,
                reason,
            }),
            None => Ok(()),
        }
    }
}

impl fmt::Display for SweepParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One axis of the sweep grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepAxis {
    pub parameter: SweepParameter,
    pub values: Vec<f64>,
}

impl SweepAxis {
    /// Create an axis over explicit values, validating each one.
    pub fn new(parameter: SweepParameter, values: impl Into<Vec<f64>>) -> Result<Self> {
        let axis = Self {
            parameter,
            values: values.into(),
        };
        axis.validate()?;
        Ok(axis)
    }

    /// `steps` evenly spaced values from `start` to `end` inclusive.
    pub fn linear(parameter: SweepParameter, start: f64, end: f64, steps: usize) -> Result<Self> {
        Self::new(parameter, linspace(start, end, steps))
    }

    /// `10^e` for `steps` exponents evenly spaced from `start_exp` to `end_exp`.
    pub fn logarithmic(
        parameter: SweepParameter,
        start_exp: f64,
        end_exp: f64,
        steps: usize,
    ) -> Result<Self> {
        let values: Vec<f64> = linspace(start_exp, end_exp, steps)
            .into_iter()
            .map(|e| 10f64.powf(e))
            .collect();
        Self::new(parameter, values)
    }

    /// Integers from `start` to `end` inclusive, `step` apart.
    pub fn stepped(parameter: SweepParameter, start: i64, end: i64, step: usize) -> Result<Self> {
        let values: Vec<f64> = (start..=end).step_by(step.max(1)).map(|v| v as f64).collect();
        Self::new(parameter, values)
    }

    /// Re-check the axis, e.g. after deserializing it.
    pub fn validate(&self) -> Result<()> {
        if self.values.is_empty() {
            return Err(SimError::EmptyAxis(self.parameter));
        }
        self.values
            .iter()
            .try_for_each(|value| self.parameter.validate(*value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn linspace(start: f64, end: f64, steps: usize) -> Vec<f64> {
    match steps {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let delta = (end - start) / (steps - 1) as f64;
            (0..steps).map(|i| start + delta * i as f64).collect()
        }
    }
}
