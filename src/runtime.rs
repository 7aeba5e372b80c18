//! Sweep runtime implementation.
//!
//! The runtime combines a tokio async runtime, which owns the collection loop
//! and per-cell timeouts, with a rayon pool that runs the simulations.
//!
//! # Thread Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     SweepRuntime                            │
//! │  task_tracker + in-flight compute counter                   │
//! └─────────────────────────────────────────────────────────────┘
//!          │ block_on / timeouts       │ submit
//!          ▼                           ▼
//! ┌─────────────────────┐     ┌─────────────────────┐
//! │   Tokio Threads     │     │   Worker Threads    │
//! │  {prefix}-tokio-N   │     │  {prefix}-worker-N  │
//! │  collection loop    │     │  one cell per job   │
//! └─────────────────────┘     └─────────────────────┘
//! ```

use crate::bridge::{panic_message, WorkerTask};
use crate::error::{Result, SimError};

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

/// Thread counts and naming for a [`SweepRuntime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeOptions {
    /// Thread name prefix
    pub prefix: String,
    /// Tokio threads driving collection
    pub tokio_threads: usize,
    /// Worker threads running simulations
    pub worker_threads: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            prefix: "cachesweep".to_string(),
            tokio_threads: 1,
            worker_threads: 1,
        }
    }
}

/// State for tracking in-flight compute tasks.
///
/// Combines the task counter with a notification mechanism for shutdown
/// waiting without a spin loop.
struct ComputeTaskState {
    /// Number of tasks currently executing on the worker pool
    count: AtomicUsize,
    /// Notified when count reaches 0
    notify: Notify,
}

impl ComputeTaskState {
    fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
            notify: Notify::new(),
        }
    }
}

/// Guard that decrements the compute task counter on drop.
///
/// Holds its own reference to the state: abandoned tasks may still be running
/// when the runtime is dropped.
struct ComputeTaskGuard {
    state: Arc<ComputeTaskState>,
}

impl ComputeTaskGuard {
    fn new(state: &Arc<ComputeTaskState>) -> Self {
        state.count.fetch_add(1, Ordering::Relaxed);
        Self {
            state: Arc::clone(state),
        }
    }
}

impl Drop for ComputeTaskGuard {
    fn drop(&mut self) {
        let prev = self.state.count.fetch_sub(1, Ordering::Release);
        if prev == 1 {
            self.state.notify.notify_waiters();
        }
    }
}

/// A runtime pairing tokio (collection, timeouts) with a rayon worker pool
/// (simulation work).
///
/// # Examples
///
/// ```
/// use cachesweep::{RuntimeOptions, SweepRuntime};
///
/// let runtime = SweepRuntime::new(RuntimeOptions {
///     worker_threads: 2,
///     ..Default::default()
/// })
/// .unwrap();
///
/// let value = runtime.block_on(async {
///     let a = runtime.submit(|| Ok(20));
///     let b = runtime.submit(|| Ok(22));
///     a.await.unwrap() + b.await.unwrap()
/// });
/// assert_eq!(value, 42);
/// runtime.block_until_idle();
/// ```
pub struct SweepRuntime {
    inner: SweepRuntimeInner,
}

struct SweepRuntimeInner {
    options: RuntimeOptions,
    tokio_runtime: tokio::runtime::Runtime,
    worker_pool: rayon::ThreadPool,
    task_tracker: TaskTracker,
    /// Track in-flight worker tasks for graceful shutdown
    compute_state: Arc<ComputeTaskState>,
}

impl SweepRuntime {
    /// Build a runtime with the given thread counts.
    ///
    /// # Errors
    ///
    /// Returns `TokioRuntime` or `RayonThreadPool` if either pool cannot be
    /// built (e.g. the OS refuses to spawn threads).
    pub fn new(options: RuntimeOptions) -> Result<Self> {
        let tokio_threads = options.tokio_threads.max(1);
        let worker_threads = options.worker_threads.max(1);

        info!(
            prefix = %options.prefix,
            tokio_threads,
            worker_threads,
            "building sweep runtime"
        );

        let prefix: Arc<str> = options.prefix.as_str().into();
        let options = RuntimeOptions {
            tokio_threads,
            worker_threads,
            ..options
        };

        let tokio_runtime = Self::build_tokio_runtime(&prefix, tokio_threads)?;
        let worker_pool = Self::build_worker_pool(&prefix, worker_threads)?;

        Ok(Self {
            inner: SweepRuntimeInner {
                options,
                tokio_runtime,
                worker_pool,
                task_tracker: TaskTracker::new(),
                compute_state: Arc::new(ComputeTaskState::new()),
            },
        })
    }

    fn build_tokio_runtime(
        prefix: &Arc<str>,
        num_threads: usize,
    ) -> Result<tokio::runtime::Runtime> {
        let thread_counter = Arc::new(AtomicUsize::new(0));
        let name_prefix = Arc::clone(prefix);
        let start_prefix = Arc::clone(prefix);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(num_threads)
            .thread_name_fn(move || {
                let id = thread_counter.fetch_add(1, Ordering::SeqCst);
                format!("{}-tokio-{:04}", name_prefix, id)
            })
            .on_thread_start(move || {
                debug!(%start_prefix, "tokio thread starting");
            })
            .enable_all()
            .build()?;

        Ok(runtime)
    }

    fn build_worker_pool(prefix: &Arc<str>, num_threads: usize) -> Result<rayon::ThreadPool> {
        let name_prefix = Arc::clone(prefix);
        let start_prefix = Arc::clone(prefix);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(move |i| format!("{}-worker-{:04}", name_prefix, i))
            .start_handler(move |thread_index| {
                debug!(thread_index, %start_prefix, "worker thread starting");
            })
            .build()?;

        Ok(pool)
    }

    /// The resolved thread options.
    pub fn options(&self) -> &RuntimeOptions {
        &self.inner.options
    }

    /// Block on a future using the tokio runtime.
    pub fn block_on<F: Future>(&self, f: F) -> F::Output {
        self.inner.tokio_runtime.block_on(f)
    }

    /// Dispatch fallible work to the worker pool immediately.
    ///
    /// The work is queued when this is called, not when the returned future
    /// is first polled, so a whole row can be in flight before anything is
    /// awaited. A panic in `f` resolves to [`SimError::WorkerPanicked`].
    ///
    /// Dropping the returned future abandons the result; the work itself runs
    /// to completion.
    pub fn submit<F, R>(&self, f: F) -> impl Future<Output = Result<R>> + Send + 'static
    where
        F: FnOnce() -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let task = self.inner.dispatch(f);
        async move {
            match task.await {
                Ok(result) => result,
                Err(payload) => Err(SimError::WorkerPanicked(panic_message(&*payload))),
            }
        }
    }

    /// Close the task tracker so [`wait_for_shutdown`](Self::wait_for_shutdown)
    /// can finish once in-flight cells drain.
    pub fn shutdown(&self) {
        self.inner.task_tracker.close();
    }

    /// Check if all tracked tasks have completed.
    ///
    /// Returns `true` if `shutdown()` has been called and every submitted
    /// job has finished.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.inner.task_tracker.is_closed()
            && self.inner.task_tracker.is_empty()
            && self.inner.compute_state.count.load(Ordering::Acquire) == 0
    }

    /// Get the number of compute tasks currently in flight.
    #[inline]
    pub fn compute_tasks_in_flight(&self) -> usize {
        self.inner.compute_state.count.load(Ordering::Relaxed)
    }

    /// Wait for all tracked tasks to complete (async).
    ///
    /// Requires `shutdown()` to be called first, otherwise this will wait
    /// forever.
    pub async fn wait_for_shutdown(&self) {
        self.inner.task_tracker.wait().await;

        let mut logged = false;
        loop {
            let notified = self.inner.compute_state.notify.notified();
            let count = self.inner.compute_state.count.load(Ordering::Acquire);
            if count == 0 {
                break;
            }
            if !logged {
                debug!(count, "waiting for compute tasks to complete");
                logged = true;
            }
            notified.await;
        }
    }

    /// Block until all tracked tasks complete (from main thread).
    pub fn block_until_idle(&self) {
        self.shutdown();
        self.block_on(self.wait_for_shutdown());
    }

    /// Get the number of tokio threads.
    pub fn tokio_threads(&self) -> usize {
        self.inner.options.tokio_threads
    }

    /// Get the number of worker threads.
    pub fn worker_threads(&self) -> usize {
        self.inner.options.worker_threads
    }
}

impl SweepRuntimeInner {
    /// Queue `f` on the worker pool, capturing panics.
    fn dispatch<F, R>(&self, f: F) -> WorkerTask<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (task, completion) = WorkerTask::new();

        // Create guard BEFORE spawning - it increments counter in constructor
        let guard = ComputeTaskGuard::new(&self.compute_state);
        let token = self.task_tracker.token();

        self.worker_pool.spawn(move || {
            // the counter drops before completion so an awakened waiter sees 0
            let result = {
                let _guard = guard;
                let _token = token;
                panic::catch_unwind(AssertUnwindSafe(f))
            };
            completion.complete(result);
        });

        task
    }
}

impl std::fmt::Debug for SweepRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SweepRuntime")
            .field("options", &self.inner.options)
            .field(
                "compute_tasks_in_flight",
                &self.inner.compute_state.count.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

impl std::fmt::Display for SweepRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SweepRuntime[{}]: tokio({}) workers({})",
            self.inner.options.prefix,
            self.inner.options.tokio_threads,
            self.inner.options.worker_threads,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_runtime() -> SweepRuntime {
        SweepRuntime::new(RuntimeOptions {
            prefix: "test".to_string(),
            tokio_threads: 1,
            worker_threads: 2,
        })
        .unwrap()
    }

    #[test]
    fn test_runtime_creation() {
        let runtime = test_runtime();
        assert_eq!(runtime.options().prefix, "test");
        assert_eq!(runtime.worker_threads(), 2);
        assert_eq!(runtime.tokio_threads(), 1);
    }

    #[test]
    fn test_zero_threads_clamped() {
        let runtime = SweepRuntime::new(RuntimeOptions {
            tokio_threads: 0,
            worker_threads: 0,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(runtime.worker_threads(), 1);
        assert_eq!(runtime.tokio_threads(), 1);
    }

    #[test]
    fn test_block_on() {
        let runtime = test_runtime();
        assert_eq!(runtime.block_on(async { 42 }), 42);
    }

    #[test]
    fn test_pool_build_error_converts() {
        let err = rayon::ThreadPoolBuilder::new()
            .num_threads(1)
            .spawn_handler(|_| Err(std::io::Error::other("refused")))
            .build()
            .unwrap_err();
        assert!(matches!(SimError::from(err), SimError::RayonThreadPool(_)));

        let err = std::io::Error::new(std::io::ErrorKind::WouldBlock, "no threads");
        assert!(matches!(SimError::from(err), SimError::TokioRuntime(_)));
    }

    #[test]
    fn test_submit_is_eager() {
        let runtime = test_runtime();
        let (tx, rx) = std::sync::mpsc::channel();
        let handle = runtime.submit(move || {
            tx.send(()).map_err(|e| SimError::Domain(e.to_string()))?;
            Ok(1)
        });
        // the job runs without the future ever being polled
        rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert_eq!(runtime.block_on(handle).unwrap(), 1);
    }

    #[test]
    fn test_submit_propagates_errors() {
        let runtime = test_runtime();
        let result = runtime.block_on(runtime.submit(|| -> Result<()> {
            Err(SimError::MissingParameter("k".into()))
        }));
        assert!(matches!(result, Err(SimError::MissingParameter(_))));
    }

    #[test]
    fn test_submit_captures_panics() {
        let runtime = test_runtime();
        let result = runtime.block_on(runtime.submit(|| -> Result<()> { panic!("bad cell") }));
        match result {
            Err(SimError::WorkerPanicked(message)) => assert_eq!(message, "bad cell"),
            other => panic!("expected WorkerPanicked, got {:?}", other),
        }
        assert_eq!(runtime.compute_tasks_in_flight(), 0);
    }

    #[test]
    fn test_worker_thread_names() {
        let runtime = test_runtime();
        let name = runtime
            .block_on(runtime.submit(|| Ok(std::thread::current().name().map(str::to_string))))
            .unwrap();
        assert!(name.unwrap().starts_with("test-worker-"));
    }

    #[test]
    fn test_tokio_thread_names() {
        let runtime = test_runtime();
        let name = runtime.block_on(async {
            tokio::spawn(async { std::thread::current().name().map(str::to_string) })
                .await
                .unwrap()
        });
        assert!(name.unwrap().starts_with("test-tokio-"));
    }

    #[test]
    fn test_shutdown_and_idle() {
        let runtime = test_runtime();
        assert!(!runtime.is_idle());
        runtime.shutdown();
        assert!(runtime.is_idle());
    }

    #[test]
    fn test_block_until_idle_waits_for_abandoned_work() {
        let runtime = test_runtime();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let done = Arc::clone(&done);
            // dropped without being awaited
            let _ = runtime.submit(move || {
                std::thread::sleep(std::time::Duration::from_millis(20));
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        runtime.block_until_idle();
        assert!(runtime.is_idle());
        assert_eq!(done.load(Ordering::SeqCst), 4);
        assert_eq!(runtime.compute_tasks_in_flight(), 0);
    }

    #[test]
    fn test_not_idle_while_work_is_in_flight() {
        let runtime = test_runtime();
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        let handle = runtime.submit(move || {
            rx.recv_timeout(std::time::Duration::from_secs(5))
                .map_err(|e| SimError::Domain(e.to_string()))
        });
        runtime.shutdown();
        assert!(!runtime.is_idle());
        tx.send(()).unwrap();
        runtime.block_on(handle).unwrap();
        runtime.block_until_idle();
        assert!(runtime.is_idle());
    }

    #[test]
    fn test_guard_drops_on_scope_exit() {
        let state = Arc::new(ComputeTaskState::new());
        {
            let _guard = ComputeTaskGuard::new(&state);
            assert_eq!(state.count.load(Ordering::Relaxed), 1);
        }
        assert_eq!(state.count.load(Ordering::Relaxed), 0);

        let guard1 = ComputeTaskGuard::new(&state);
        let guard2 = ComputeTaskGuard::new(&state);
        assert_eq!(state.count.load(Ordering::Relaxed), 2);
        drop(guard1);
        drop(guard2);
        assert_eq!(state.count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_display() {
        let runtime = test_runtime();
        assert_eq!(
            runtime.to_string(),
            "SweepRuntime[test]: tokio(1) workers(2)"
        );
    }
}
