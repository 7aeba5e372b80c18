//! Async-to-rayon bridge.
//!
//! A [`WorkerTask`] is a future over work running on the worker pool. The
//! worker side holds the matching [`TaskCompletion`] and stores either the
//! closure's result or its panic payload; the future is woken through a
//! `diatomic-waker` instead of a channel.
//!
//! If a completion is dropped without completing (the pool was torn down
//! before the job ran), the future resolves to a panic payload rather than
//! hanging.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread;

use diatomic_waker::DiatomicWaker;
use parking_lot::Mutex;

/// Shared state between the task future and completion handle.
struct TaskState<R> {
    result: Mutex<Option<thread::Result<R>>>,
    waker: DiatomicWaker,
}

/// A future representing work spawned on the worker pool.
///
/// Resolves to `Err(payload)` if the work panicked.
pub struct WorkerTask<R> {
    state: Arc<TaskState<R>>,
}

impl<R> WorkerTask<R> {
    /// Create a new task and return (task, completion_handle).
    #[inline]
    pub fn new() -> (Self, TaskCompletion<R>) {
        let state = Arc::new(TaskState {
            result: Mutex::new(None),
            waker: DiatomicWaker::new(),
        });
        (
            WorkerTask {
                state: state.clone(),
            },
            TaskCompletion { state: Some(state) },
        )
    }
}

impl<R> Future for WorkerTask<R> {
    type Output = thread::Result<R>;

    #[inline]
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(result) = self.state.result.lock().take() {
            return Poll::Ready(result);
        }

        // SAFETY: WorkerTask is polled from a single task at a time, so
        // register() is never called concurrently for this waker.
        unsafe {
            self.state.waker.register(cx.waker());
        }

        // completion may have landed between the first check and registration
        if let Some(result) = self.state.result.lock().take() {
            Poll::Ready(result)
        } else {
            Poll::Pending
        }
    }
}

/// Handle used by the worker thread to complete the task.
pub struct TaskCompletion<R> {
    state: Option<Arc<TaskState<R>>>,
}

impl<R> TaskCompletion<R> {
    /// Complete the task with the closure's outcome. Wakes the waiting future.
    #[inline]
    pub fn complete(mut self, result: thread::Result<R>) {
        if let Some(state) = self.state.take() {
            *state.result.lock() = Some(result);
            state.waker.notify();
        }
    }
}

impl<R> Drop for TaskCompletion<R> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            let payload: Box<dyn Any + Send> = Box::new("task dropped before completion");
            *state.result.lock() = Some(Err(payload));
            state.waker.notify();
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
