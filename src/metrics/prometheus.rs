//! Prometheus metrics for sweep observability.
//!
//! Counters and gauges work standalone without a Registry; registration is only
//! needed for exposition (scraping). Metric names use a `{prefix}_` prefix
//! (default: "cachesweep").
//!
//! # Usage
//!
//! ```ignore
//! let registry = prometheus::Registry::new();
//! let sweep = SweepBuilder::new()
//!     .prometheus_registry(registry.clone())
//!     .build()?;
//!
//! sweep.drive()?;
//!
//! let encoder = TextEncoder::new();
//! encoder.encode(&registry.gather(), &mut buffer)?;
//! ```

use std::time::Duration;

use prometheus::{Gauge, IntCounter, IntGauge, Opts, Registry};

/// Prometheus metrics for a [`Sweep`](crate::Sweep).
///
/// Shared by every drive of the same sweep, so counters accumulate across
/// `drive`, `drive_multiple` and `drive_with_statistics` calls.
#[derive(Clone)]
pub struct SweepMetrics {
    // === Gauges (current values) ===
    /// Grid cells submitted but not yet collected
    pub inflight_cells: IntGauge,

    /// Wall time of the most recently collected row, in seconds
    pub last_row_seconds: Gauge,

    // === Counters (cumulative) ===
    /// Grid cells handed to the worker pool
    pub cells_submitted: IntCounter,

    /// Grid cells whose result was collected successfully
    pub cells_completed: IntCounter,

    /// Grid cells that returned an error or panicked
    pub cells_failed: IntCounter,

    /// Grid cells that exceeded the per-task wait
    pub task_timeouts: IntCounter,

    /// Users whose cache draw was truncated to the eligible items
    pub truncated_cache_draws: IntCounter,

    /// Rows fully collected
    pub rows_completed: IntCounter,
}

impl Default for SweepMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn sanitize(prefix: &str) -> String {
    // Valid chars: [a-zA-Z_:] for first char, [a-zA-Z0-9_:] for rest
    prefix
        .chars()
        .enumerate()
        .map(|(i, c)| {
            let valid = c == '_' || c == ':' || if i == 0 {
                c.is_ascii_alphabetic()
            } else {
                c.is_ascii_alphanumeric()
            };
            if valid {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn int_counter(prefix: &str, name: &str, help: &str) -> IntCounter {
    IntCounter::with_opts(Opts::new(format!("{}_{}", prefix, name), help))
        .expect("metric creation should not fail")
}

fn int_gauge(prefix: &str, name: &str, help: &str) -> IntGauge {
    IntGauge::with_opts(Opts::new(format!("{}_{}", prefix, name), help))
        .expect("metric creation should not fail")
}

impl SweepMetrics {
    /// Create metrics with default prefix "cachesweep".
    pub fn new() -> Self {
        Self::with_prefix("cachesweep")
    }

    /// Create metrics with a custom prefix.
    ///
    /// The prefix is sanitized to be a valid Prometheus metric name: hyphens and
    /// other invalid characters are replaced with underscores.
    pub fn with_prefix(prefix: &str) -> Self {
        let prefix = sanitize(prefix);
        Self {
            inflight_cells: int_gauge(&prefix, "inflight_cells", "Grid cells in flight"),
            last_row_seconds: Gauge::with_opts(Opts::new(
                format!("{}_last_row_seconds", prefix),
                "Duration of the last collected row",
            ))
            .expect("metric creation should not fail"),
            cells_submitted: int_counter(&prefix, "cells_submitted", "Grid cells submitted"),
            cells_completed: int_counter(&prefix, "cells_completed", "Grid cells completed"),
            cells_failed: int_counter(&prefix, "cells_failed", "Grid cells failed"),
            task_timeouts: int_counter(&prefix, "task_timeouts", "Grid cells timed out"),
            truncated_cache_draws: int_counter(
                &prefix,
                "truncated_cache_draws",
                "Cache draws truncated to eligible items",
            ),
            rows_completed: int_counter(&prefix, "rows_completed", "Rows collected"),
        }
    }

    /// Register all metrics with a Registry for exposition.
    ///
    /// # Errors
    ///
    /// Returns an error if any metric fails to register (e.g., duplicate names).
    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.inflight_cells.clone()))?;
        registry.register(Box::new(self.last_row_seconds.clone()))?;
        registry.register(Box::new(self.cells_submitted.clone()))?;
        registry.register(Box::new(self.cells_completed.clone()))?;
        registry.register(Box::new(self.cells_failed.clone()))?;
        registry.register(Box::new(self.task_timeouts.clone()))?;
        registry.register(Box::new(self.truncated_cache_draws.clone()))?;
        registry.register(Box::new(self.rows_completed.clone()))?;
        Ok(())
    }

    #[inline]
    pub fn record_submitted(&self) {
        self.cells_submitted.inc();
        self.inflight_cells.inc();
    }

    /// Record a collected cell and its truncated cache draws.
    #[inline]
    pub fn record_completed(&self, truncated_cache_draws: usize) {
        self.cells_completed.inc();
        self.inflight_cells.dec();
        self.truncated_cache_draws
            .inc_by(truncated_cache_draws as u64);
    }

    #[inline]
    pub fn record_failed(&self) {
        self.cells_failed.inc();
        self.inflight_cells.dec();
    }

    #[inline]
    pub fn record_timeout(&self) {
        self.task_timeouts.inc();
        self.record_failed();
    }

    #[inline]
    pub fn record_row(&self, elapsed: Duration) {
        self.rows_completed.inc();
        self.last_row_seconds.set(elapsed.as_secs_f64());
    }

    /// Forget cells abandoned when a sweep fails mid-row.
    #[inline]
    pub fn clear_inflight(&self) {
        self.inflight_cells.set(0);
    }
}

impl std::fmt::Debug for SweepMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SweepMetrics")
            .field("inflight_cells", &self.inflight_cells.get())
            .field("cells_submitted", &self.cells_submitted.get())
            .field("cells_completed", &self.cells_completed.get())
            .field("cells_failed", &self.cells_failed.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = SweepMetrics::new();
        assert_eq!(metrics.inflight_cells.get(), 0);
        assert_eq!(metrics.cells_submitted.get(), 0);
    }

    #[test]
    fn test_cell_lifecycle() {
        let metrics = SweepMetrics::new();

        metrics.record_submitted();
        metrics.record_submitted();
        metrics.record_submitted();
        assert_eq!(metrics.inflight_cells.get(), 3);

        metrics.record_completed(2);
        metrics.record_failed();
        metrics.record_timeout();
        assert_eq!(metrics.inflight_cells.get(), 0);
        assert_eq!(metrics.cells_completed.get(), 1);
        assert_eq!(metrics.cells_failed.get(), 2);
        assert_eq!(metrics.task_timeouts.get(), 1);
        assert_eq!(metrics.truncated_cache_draws.get(), 2);
    }

    #[test]
    fn test_row_gauge() {
        let metrics = SweepMetrics::new();
        metrics.record_row(Duration::from_millis(250));
        assert_eq!(metrics.rows_completed.get(), 1);
        assert!((metrics.last_row_seconds.get() - 0.25).abs() < 0.001);
    }

    #[test]
    fn test_registry_integration() {
        let metrics = SweepMetrics::new();
        let registry = Registry::new();

        metrics
            .register(&registry)
            .expect("registration should succeed");
        metrics.record_submitted();

        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "cachesweep_cells_submitted"));
    }

    #[test]
    fn test_custom_prefix_sanitized() {
        let metrics = SweepMetrics::with_prefix("my-study");
        let registry = Registry::new();
        metrics
            .register(&registry)
            .expect("registration should succeed");
        metrics.record_submitted();

        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "my_study_cells_submitted"));
        assert!(!families
            .iter()
            .any(|f| f.get_name() == "cachesweep_cells_submitted"));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = Registry::new();
        SweepMetrics::new().register(&registry).unwrap();
        assert!(SweepMetrics::new().register(&registry).is_err());
    }

    #[test]
    fn test_metrics_clone() {
        let metrics = SweepMetrics::new();
        metrics.record_submitted();

        let cloned = metrics.clone();
        assert_eq!(cloned.cells_submitted.get(), 1);

        cloned.record_submitted();
        assert_eq!(metrics.cells_submitted.get(), 2);
    }
}
