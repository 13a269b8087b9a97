//! Recursive tasks and join handles.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use super::worker::WorkerContext;
use crate::error::{Error, Result};
use crate::tracing_compat::warn;

/// How long a joining worker that found no work to help with sleeps before
/// looking again.
const JOIN_PARK: Duration = Duration::from_millis(1);

/// A divide-and-conquer computation run by a
/// [`ForkJoinPool`](super::ForkJoinPool).
///
/// `compute` typically checks whether its share of the work is below a
/// threshold, computes it directly if so, and otherwise splits itself,
/// [`fork`](WorkerContext::fork)s one half, computes the other, and joins.
/// Tasks that only have side effects use `Output = ()`.
///
/// Errors returned from `compute` (or panics inside it) propagate to every
/// `join` and `invoke` up the chain of callers.
pub trait RecursiveTask: Send + 'static {
    /// The value produced.
    type Output: Send + 'static;

    /// Runs the task on a worker of the pool.
    fn compute(self, ctx: &WorkerContext) -> Result<Self::Output>;
}

/// Runs `task`, converting a panic into a `Panicked` error.
pub(crate) fn run_task<T: RecursiveTask>(task: T, ctx: &WorkerContext) -> Result<T::Output> {
    match panic::catch_unwind(AssertUnwindSafe(|| task.compute(ctx))) {
        Ok(result) => result,
        Err(payload) => {
            let error = Error::from_panic(payload.as_ref());
            warn!(error = %error, "fork/join task panicked");
            Err(error)
        }
    }
}

/// Where a forked task leaves its result.
pub(crate) struct ForkSlot<T> {
    result: Mutex<Option<Result<T>>>,
    ready: Condvar,
}

impl<T> ForkSlot<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(None),
            ready: Condvar::new(),
        })
    }

    pub(crate) fn fill(&self, result: Result<T>) {
        *self.result.lock() = Some(result);
        self.ready.notify_all();
    }

    fn take(&self) -> Option<Result<T>> {
        self.result.lock().take()
    }

    fn is_filled(&self) -> bool {
        self.result.lock().is_some()
    }

    fn park_briefly(&self) {
        let mut result = self.result.lock();
        if result.is_none() {
            let _ = self.ready.wait_for(&mut result, JOIN_PARK);
        }
    }

    /// Blocks a non-worker thread until the result arrives.
    pub(crate) fn wait(&self) -> Result<T> {
        let mut result = self.result.lock();
        loop {
            if let Some(r) = result.take() {
                return r;
            }
            self.ready.wait(&mut result);
        }
    }
}

/// The pending result of a [`fork`](WorkerContext::fork)ed task.
#[must_use = "a forked task's failure is only observed through join"]
pub struct ForkHandle<T> {
    slot: Arc<ForkSlot<T>>,
}

impl<T> ForkHandle<T> {
    pub(crate) fn new(slot: Arc<ForkSlot<T>>) -> Self {
        Self { slot }
    }

    /// Returns true once the forked task has finished.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.slot.is_filled()
    }

    /// Waits for the forked task and returns its result.
    ///
    /// While waiting, the calling worker runs other pending tasks (its own
    /// first, then the shared queue, then stolen ones), so joins never starve
    /// the pool of threads.
    pub fn join(self, ctx: &WorkerContext) -> Result<T> {
        loop {
            if let Some(result) = self.slot.take() {
                return result;
            }
            if !ctx.help() {
                self.slot.park_briefly();
            }
        }
    }
}

impl<T> fmt::Debug for ForkHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForkHandle")
            .field("done", &self.is_done())
            .finish()
    }
}
