//! Metrics collection for sweep observability.
//!
//! Metrics are always collected and can optionally be exposed via a Prometheus
//! registry for scraping.
//!
//! # Available Metrics
//!
//! ## Gauges (current values)
//!
//! - `cachesweep_inflight_cells` - Grid cells submitted but not yet collected
//! - `cachesweep_last_row_seconds` - Duration of the last collected row
//!
//! ## Counters (cumulative)
//!
//! - `cachesweep_cells_submitted` - Grid cells handed to the worker pool
//! - `cachesweep_cells_completed` - Grid cells collected successfully
//! - `cachesweep_cells_failed` - Grid cells that errored, panicked or timed out
//! - `cachesweep_task_timeouts` - Grid cells that exceeded the per-task wait
//! - `cachesweep_truncated_cache_draws` - Cache draws cut short by too few eligible items
//! - `cachesweep_rows_completed` - Rows fully collected

mod prometheus;

pub use prometheus::SweepMetrics;
