//! Integration tests for the #[cachesweep::test] macro.

use cachesweep::{
    setup_and_simulate, EvaluationConfig, GridPosition, Parameters, SimError, SimulationDefaults,
    SimulationTask, SweepParameter, SweepRuntime,
};
use std::sync::Arc;

fn task(formula: &str) -> SimulationTask {
    let defaults = SimulationDefaults {
        num_items: 20,
        cache_size: 4,
        num_users: 2,
        num_requests: 3,
        ..Default::default()
    };
    SimulationTask::new(
        cachesweep::compile_raw(formula).unwrap(),
        &defaults,
        Arc::new(Parameters::new()),
        EvaluationConfig::default(),
    )
}

/// Test basic usage with defaults (1 tokio, 2 workers)
#[cachesweep::test]
async fn test_default_thread_counts(runtime: &SweepRuntime) {
    assert_eq!(runtime.tokio_threads(), 1);
    assert_eq!(runtime.worker_threads(), 2);
}

#[cachesweep::test(tokio_threads = 2)]
async fn test_custom_tokio_threads(runtime: &SweepRuntime) {
    assert_eq!(runtime.tokio_threads(), 2);
    assert_eq!(runtime.worker_threads(), 2);
}

#[cachesweep::test(tokio_threads = 2, workers = 4)]
async fn test_custom_both_thread_counts(runtime: &SweepRuntime) {
    assert_eq!(runtime.tokio_threads(), 2);
    assert_eq!(runtime.worker_threads(), 4);
}

/// Bodies that do not need the runtime may omit the argument.
#[cachesweep::test]
async fn test_without_runtime_argument() {
    tokio::task::yield_now().await;
}

/// A whole row of cells is submitted before any is awaited.
#[cachesweep::test(workers = 3)]
async fn test_submit_row_of_cells(runtime: &SweepRuntime) {
    let handles: Vec<_> = [0.5, 1.0, 1.5]
        .into_iter()
        .enumerate()
        .map(|(column, alpha)| {
            let cell = task(r"{p_r(m)^{1\over\alpha}}")
                .with_axis_value(SweepParameter::Alpha, alpha)
                .with_seed(Some(17))
                .with_position(GridPosition {
                    trial: 0,
                    row: 0,
                    column,
                });
            runtime.submit(move || {
                let mut rng = cell.rng();
                setup_and_simulate(&cell, &mut rng)
            })
        })
        .collect();

    for handle in handles {
        let result = handle.await.unwrap();
        assert_eq!(result.misses_per_user.len(), 2);
        assert!(result.total() <= 6);
    }
}

/// Cells run on the named worker threads, not on the tokio thread.
#[cachesweep::test]
async fn test_cells_run_on_workers(runtime: &SweepRuntime) {
    let name = runtime
        .submit(|| Ok(std::thread::current().name().map(str::to_string)))
        .await
        .unwrap();
    assert!(name.unwrap().starts_with("test-test_cells_run_on_workers-worker-"));
}

/// A numeric fault inside a worker comes back as an error, not a panic.
#[cachesweep::test]
async fn test_submitted_fault_is_returned(runtime: &SweepRuntime) {
    let cell = task(r"{p_r(m)^{1\over\alpha}}").with_axis_value(SweepParameter::Alpha, 0.0);
    let result = runtime
        .submit(move || {
            let mut rng = cell.rng();
            setup_and_simulate(&cell, &mut rng)
        })
        .await;
    assert!(matches!(result, Err(SimError::Numeric(_))));
}

/// A panicking cell resolves to an error; the other cells of the row finish.
#[cachesweep::test(workers = 2)]
async fn test_panicking_cell_is_captured(runtime: &SweepRuntime) {
    let bad = runtime.submit(|| -> cachesweep::Result<usize> { panic!("cell exploded") });
    let good = runtime.submit(|| Ok(7usize));

    match bad.await {
        Err(SimError::WorkerPanicked(message)) => assert_eq!(message, "cell exploded"),
        other => panic!("expected WorkerPanicked, got {:?}", other),
    }
    assert_eq!(good.await.unwrap(), 7);
}

#[cachesweep::test]
#[should_panic(expected = "test panic")]
async fn test_panic_propagation() {
    panic!("test panic");
}

/// Abandoned cells still finish before the test returns; the macro calls
/// block_until_idle() after the body.
#[cachesweep::test]
async fn test_abandoned_cells_complete(runtime: &SweepRuntime) {
    for seed in 0..6 {
        let cell = task("p_r(m)").with_seed(Some(seed));
        drop(runtime.submit(move || {
            let mut rng = cell.rng();
            setup_and_simulate(&cell, &mut rng)
        }));
    }
    assert!(runtime.compute_tasks_in_flight() <= 6);
}
