//! Single-assignment asynchronous results.
//!
//! A [`Promise<T>`] starts `Pending` and moves exactly once to `Completed`,
//! `Failed`, or `Cancelled`. After that it never changes: later attempts to
//! complete, fail, or cancel return `false` and leave the outcome alone.
//! Every clone of a promise shares the same cell, so any holder may observe
//! the outcome as many times as it likes.
//!
//! # Observing
//!
//! - [`get`](Promise::get) blocks until the promise is terminal. A failure
//!   surfaces as `Execution` wrapping the original cause
//!   ([`Error::cause`]), cancellation as `Cancelled`.
//! - [`get_timeout`](Promise::get_timeout) additionally fails with `Timeout`.
//! - [`try_get`](Promise::try_get), [`get_now`](Promise::get_now), and
//!   [`state`](Promise::state) never block.
//!
//! # Continuations
//!
//! Combinators (see the `combinators` module) register continuations that
//! run on whichever thread settles the promise, or immediately on the
//! registering thread if it is already settled. Panics inside user closures
//! are caught and turn the derived promise into a `Panicked` failure.
//!
//! # Cancellation
//!
//! [`cancel`](Promise::cancel) only succeeds while pending. With
//! `interrupt = true` the thread running the backing task (if any) is
//! interrupted; the task observes it through
//! [`interrupt::check`](crate::interrupt::check) and is never stopped
//! forcibly.

mod combinators;
mod timer;

pub use combinators::{all_of, any_of};

use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::executor::ExecutorHandle;
use crate::interrupt::{self, InterruptHandle, Wake};
use crate::tracing_compat::{trace, warn};

/// Snapshot of a promise's lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum PromiseState<T> {
    /// Not yet settled.
    Pending,
    /// Settled with a value.
    Completed(T),
    /// Settled with a failure.
    Failed(Error),
    /// Cancelled before it settled.
    Cancelled,
}

impl<T> PromiseState<T> {
    /// Returns true unless pending.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Converts a terminal state into the result `get` would return.
    fn to_result(&self) -> Option<Result<T>>
    where
        T: Clone,
    {
        match self {
            Self::Pending => None,
            Self::Completed(v) => Some(Ok(v.clone())),
            Self::Failed(e) => Some(Err(Error::execution(e.clone()))),
            Self::Cancelled => Some(Err(Error::cancelled())),
        }
    }

    /// The failure a dependent promise inherits, if this state is not a value.
    fn failure(&self) -> Option<Error> {
        match self {
            Self::Failed(e) => Some(e.clone()),
            Self::Cancelled => Some(Error::cancelled()),
            Self::Pending | Self::Completed(_) => None,
        }
    }
}

type Continuation<T> = Box<dyn FnOnce(&PromiseState<T>) + Send>;

struct Cell<T> {
    state: PromiseState<T>,
    continuations: SmallVec<[Continuation<T>; 2]>,
    /// Thread currently running the backing task.
    runner: Option<InterruptHandle>,
}

struct Shared<T> {
    cell: Mutex<Cell<T>>,
    settled: Condvar,
}

/// A single-assignment result cell shared by all its clones.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Creates a pending promise to be settled by hand.
    #[must_use]
    pub fn new() -> Self {
        Self::with_state(PromiseState::Pending)
    }

    /// Creates an already completed promise.
    #[must_use]
    pub fn completed(value: T) -> Self {
        Self::with_state(PromiseState::Completed(value))
    }

    /// Creates an already failed promise.
    #[must_use]
    pub fn failed(error: Error) -> Self {
        Self::with_state(PromiseState::Failed(error))
    }

    fn with_state(state: PromiseState<T>) -> Self {
        Self {
            shared: Arc::new(Shared {
                cell: Mutex::new(Cell {
                    state,
                    continuations: SmallVec::new(),
                    runner: None,
                }),
                settled: Condvar::new(),
            }),
        }
    }

    /// Runs `f` on `executor` and returns a promise for its result.
    pub fn supply_async<F>(executor: &impl AsRef<ExecutorHandle>, f: F) -> Result<Self>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        executor.as_ref().submit(f)
    }

    /// Completes with `value`. Returns false if already settled.
    pub fn complete(&self, value: T) -> bool {
        self.settle(PromiseState::Completed(value))
    }

    /// Fails with `error`. Returns false if already settled.
    pub fn fail(&self, error: Error) -> bool {
        self.settle(PromiseState::Failed(error))
    }

    /// Cancels a pending promise.
    ///
    /// Returns false if already settled. With `interrupt`, the thread running
    /// the backing task is interrupted; the interrupt never outlives the task.
    pub fn cancel(&self, interrupt: bool) -> bool {
        self.settle_and(PromiseState::Cancelled, |cell| {
            // Sent under the cell lock: `run` clears `runner` under the same
            // lock, so the target is still inside this task.
            if let (true, Some(runner)) = (interrupt, &cell.runner) {
                trace!(thread = ?runner.thread_name(), "interrupting cancelled task");
                runner.interrupt();
            }
        })
    }

    /// Returns true once settled (completed, failed, or cancelled).
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.shared.cell.lock().state.is_terminal()
    }

    /// Returns true if cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.shared.cell.lock().state, PromiseState::Cancelled)
    }

    /// Returns true if settled by a failure.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.shared.cell.lock().state, PromiseState::Failed(_))
    }

    /// Returns a snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> PromiseState<T> {
        self.shared.cell.lock().state.clone()
    }

    /// Blocks until settled.
    ///
    /// Fails with `Execution` (wrapping the cause), `Cancelled`, or
    /// `Interrupted` if the waiting thread is interrupted.
    pub fn get(&self) -> Result<T> {
        self.wait_settled(None)
    }

    /// Blocks until settled or `timeout` elapses (`Timeout`).
    pub fn get_timeout(&self, timeout: Duration) -> Result<T> {
        self.wait_settled(Some(timeout))
    }

    /// Returns the outcome if settled, without blocking.
    #[must_use]
    pub fn try_get(&self) -> Option<Result<T>> {
        self.shared.cell.lock().state.to_result()
    }

    /// Returns the value if completed, otherwise the outcome for failures,
    /// or `default` while pending.
    pub fn get_now(&self, default: T) -> Result<T> {
        self.try_get().unwrap_or(Ok(default))
    }

    /// Blocks until settled, ignoring interrupts and failures.
    pub fn join(&self) {
        let mut cell = self.shared.cell.lock();
        while !cell.state.is_terminal() {
            self.shared.settled.wait(&mut cell);
        }
    }

    fn wait_settled(&self, timeout: Option<Duration>) -> Result<T> {
        let deadline = interrupt::deadline_after(timeout);
        let mut cell = self.shared.cell.lock();
        loop {
            if let Some(result) = cell.state.to_result() {
                return result;
            }
            match interrupt::park(&self.shared.settled, &mut cell, deadline, true) {
                Wake::Signalled => {}
                Wake::TimedOut => return Err(Error::timeout(timeout.unwrap_or_default())),
                Wake::Interrupted => return Err(Error::interrupted()),
            }
        }
    }

    /// Registers `f` to run once settled; runs it now if already settled.
    pub(crate) fn on_settle(&self, f: impl FnOnce(&PromiseState<T>) + Send + 'static) {
        let mut cell = self.shared.cell.lock();
        if cell.state.is_terminal() {
            let state = cell.state.clone();
            drop(cell);
            f(&state);
        } else {
            cell.continuations.push(Box::new(f));
        }
    }

    /// Copies a non-value outcome of an upstream promise into this one.
    pub(crate) fn settle_failure_from<U>(&self, upstream: &PromiseState<U>) -> bool {
        match upstream {
            PromiseState::Cancelled => self.settle(PromiseState::Cancelled),
            other => other.failure().is_some_and(|e| self.fail(e)),
        }
    }

    /// Runs a task body on the calling thread and settles with its result.
    ///
    /// Skipped if the promise was settled (typically cancelled) first.
    pub(crate) fn run(&self, body: impl FnOnce() -> Result<T>) {
        {
            let mut cell = self.shared.cell.lock();
            if cell.state.is_terminal() {
                return;
            }
            cell.runner = Some(InterruptHandle::current());
        }
        let outcome = panic::catch_unwind(AssertUnwindSafe(body));
        {
            let mut cell = self.shared.cell.lock();
            cell.runner = None;
            if matches!(cell.state, PromiseState::Cancelled) {
                // Drop an interrupt from `cancel(true)` the body never observed.
                interrupt::take_interrupt();
            }
        }
        self.settle_outcome(outcome);
    }

    /// Settles with the result of `body`, converting a panic into `Panicked`.
    ///
    /// Unlike [`run`](Self::run) the calling thread is not exposed to
    /// `cancel(true)`.
    pub(crate) fn settle_with(&self, body: impl FnOnce() -> Result<T>) {
        if self.is_done() {
            return;
        }
        self.settle_outcome(panic::catch_unwind(AssertUnwindSafe(body)));
    }

    fn settle_outcome(&self, outcome: std::thread::Result<Result<T>>) {
        match outcome {
            Ok(Ok(value)) => {
                self.complete(value);
            }
            Ok(Err(error)) => {
                self.fail(error);
            }
            Err(payload) => {
                let error = Error::from_panic(payload.as_ref());
                warn!(error = %error, "task panicked");
                self.fail(error);
            }
        }
    }

    fn settle(&self, next: PromiseState<T>) -> bool {
        self.settle_and(next, |_| {})
    }

    /// Settles with `next`, running `locked` on the still-pending cell first.
    fn settle_and(&self, next: PromiseState<T>, locked: impl FnOnce(&Cell<T>)) -> bool {
        let (state, continuations) = {
            let mut cell = self.shared.cell.lock();
            if cell.state.is_terminal() {
                return false;
            }
            locked(&*cell);
            cell.state = next;
            cell.runner = None;
            self.shared.settled.notify_all();
            (cell.state.clone(), std::mem::take(&mut cell.continuations))
        };
        trace!(
            continuations = continuations.len(),
            cancelled = matches!(state, PromiseState::Cancelled),
            "promise settled"
        );
        for continuation in continuations {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| continuation(&state))) {
                warn!(
                    error = %Error::from_panic(payload.as_ref()),
                    "promise continuation panicked"
                );
            }
        }
        true
    }
}

impl Promise<()> {
    /// Runs the side-effecting `f` on `executor`; the promise completes with
    /// `()` once it returns.
    pub fn run_async<F>(executor: &impl AsRef<ExecutorHandle>, f: F) -> Result<Self>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        executor.as_ref().submit(f)
    }
}

impl<T: Clone + Send + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cell = self.shared.cell.lock();
        f.debug_struct("Promise")
            .field("state", &cell.state)
            .field("continuations", &cell.continuations.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_test_logging, wait_until};
    use crate::ErrorKind;
    use std::thread;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn get_is_idempotent_after_completion() {
        init_test("get_is_idempotent_after_completion");
        let promise = Promise::new();
        let producer = {
            let promise = promise.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                promise.complete(String::from("done"))
            })
        };
        assert_eq!(promise.get().as_deref(), Ok("done"));
        assert_eq!(promise.get().as_deref(), Ok("done"));
        assert!(producer.join().expect("producer panicked"));
        crate::test_complete!("get_is_idempotent_after_completion");
    }

    #[test]
    fn settles_exactly_once() {
        init_test("settles_exactly_once");
        let promise = Promise::new();
        assert!(promise.complete(1));
        assert!(!promise.complete(2));
        assert!(!promise.fail(Error::user("late")));
        assert!(!promise.cancel(true));
        assert_eq!(promise.get(), Ok(1));
        assert!(!promise.is_cancelled());
        assert_eq!(promise.state(), PromiseState::Completed(1));
    }

    #[test]
    fn failure_surfaces_as_execution_error() {
        init_test("failure_surfaces_as_execution_error");
        let promise: Promise<u8> = Promise::new();
        promise.fail(Error::user("boom"));
        let err = promise.get().expect_err("failed promise");
        assert_eq!(err.kind(), ErrorKind::Execution);
        assert_eq!(err.cause().map(Error::kind), Some(ErrorKind::User));
        assert_eq!(err.root().message(), Some("boom"));
        // Unobserved failures remain queryable.
        assert!(promise.is_failed());
        assert!(promise.is_done());
    }

    #[test]
    fn cancel_only_while_pending() {
        init_test("cancel_only_while_pending");
        let promise: Promise<u8> = Promise::new();
        assert!(promise.cancel(false));
        assert!(promise.is_cancelled());
        assert!(!promise.complete(3));
        let err = promise.get().expect_err("cancelled");
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn get_timeout_and_non_blocking_reads() {
        init_test("get_timeout_and_non_blocking_reads");
        let promise: Promise<u8> = Promise::new();
        let err = promise
            .get_timeout(Duration::from_millis(10))
            .expect_err("pending");
        assert!(err.is_timeout());
        assert_eq!(promise.try_get(), None);
        assert_eq!(promise.get_now(9), Ok(9));
        promise.complete(4);
        assert_eq!(promise.get_now(9), Ok(4));
    }

    #[test]
    fn cancel_with_interrupt_reaches_runner() {
        init_test("cancel_with_interrupt_reaches_runner");
        let promise: Promise<&'static str> = Promise::new();
        let started = Arc::new(crate::sync::AtomicFlag::new(false));
        let runner = {
            let promise = promise.clone();
            let started = Arc::clone(&started);
            thread::spawn(move || {
                promise.run(|| {
                    started.set(true);
                    loop {
                        interrupt::check()?;
                        thread::sleep(Duration::from_millis(1));
                    }
                });
            })
        };
        assert!(wait_until(Duration::from_secs(2), || started.get()));
        assert!(promise.cancel(true));
        runner.join().expect("runner panicked");
        assert!(promise.is_cancelled());
    }

    #[test]
    fn unobserved_cancel_interrupt_does_not_leak() {
        init_test("unobserved_cancel_interrupt_does_not_leak");
        let promise: Promise<u8> = Promise::new();
        let handle = promise.clone();
        // Cancelled from inside the body, which returns without checking.
        promise.run(move || {
            handle.cancel(true);
            Ok(1)
        });
        assert!(promise.is_cancelled());
        let leaked = interrupt::is_interrupted();
        crate::assert_with_log!(!leaked, "interrupt cleared after run", false, leaked);
        crate::test_complete!("unobserved_cancel_interrupt_does_not_leak");
    }

    #[test]
    fn cancel_racing_completion_spares_next_job() {
        init_test("cancel_racing_completion_spares_next_job");
        let pool = crate::ThreadPoolExecutor::single_thread();
        for round in 0..50 {
            let (go_tx, go_rx) = std::sync::mpsc::channel::<()>();
            let first = pool
                .submit(move || {
                    let _ = go_rx.recv();
                    Ok(round)
                })
                .expect("submit first");
            let second = pool
                .submit(|| Ok(interrupt::is_interrupted()))
                .expect("submit second");
            go_tx.send(()).expect("release first");
            first.cancel(true);
            let interrupted = second.get().expect("second job");
            crate::assert_with_log!(
                !interrupted,
                "next job on the worker is not interrupted",
                false,
                interrupted
            );
        }
        pool.shutdown();
        crate::test_complete!("cancel_racing_completion_spares_next_job");
    }

    #[test]
    fn panicking_body_fails_promise() {
        init_test("panicking_body_fails_promise");
        let promise: Promise<u8> = Promise::new();
        promise.run(|| panic!("exploded"));
        let err = promise.get().expect_err("panicked");
        assert_eq!(err.root_kind(), ErrorKind::Panicked);
    }
}
