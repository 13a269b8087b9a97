//! Fixed-size thread pool consuming a shared FIFO [`TaskQueue`].
//!
//! # Lifecycle
//!
//! ```text
//! Running --shutdown()--> ShuttingDown --queue drained--> Terminated
//!    |                          ^
//!    +------shutdown_now()------+  (queued tasks cancelled, workers interrupted)
//! ```
//!
//! Workers are spawned eagerly at construction and never retired. After
//! `shutdown` new submissions fail with `Rejected`; already queued tasks still
//! run. `shutdown_now` additionally cancels every queued task (its promise
//! becomes `Cancelled`) and interrupts the workers, which running tasks may
//! observe through [`interrupt::check`](crate::interrupt::check).
//!
//! Dropping a [`ThreadPoolExecutor`] only initiates `shutdown`; it does not
//! wait for the workers.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::builder::ExecutorBuilder;
use super::queue::TaskQueue;
use crate::config::{ConfigError, ExecutorConfig, FullQueuePolicy};
use crate::error::{Error, ErrorKind, Result};
use crate::interrupt::{self, InterruptHandle, Wake};
use crate::promise::{Promise, PromiseState};
use crate::tracing_compat::{debug, debug_span, trace, warn};

type Thunk = Box<dyn FnOnce() + Send>;

/// A unit of queued work and what to do if it is discarded unrun.
struct Job {
    run: Thunk,
    cancel: Option<Thunk>,
}

struct Inner {
    queue: TaskQueue<Job>,
    policy: FullQueuePolicy,
    pool_size: usize,
    thread_name_prefix: String,
    on_thread_start: Option<Arc<dyn Fn() + Send + Sync>>,
    on_thread_stop: Option<Arc<dyn Fn() + Send + Sync>>,
    /// Workers that have not yet exited.
    live: Mutex<usize>,
    terminated: Condvar,
    workers: Mutex<Vec<InterruptHandle>>,
    active: AtomicUsize,
    completed: AtomicU64,
}

impl Inner {
    fn enqueue(&self, job: Job) -> Result<()> {
        match self.policy {
            FullQueuePolicy::Block => self.queue.push(job).map_err(|e| {
                if e.kind() == ErrorKind::Rejected {
                    Error::rejected("executor is shut down")
                } else {
                    e
                }
            }),
            FullQueuePolicy::Reject => self.queue.offer(job).map_err(|_| {
                if self.queue.is_closed() {
                    Error::rejected("executor is shut down")
                } else {
                    Error::rejected("task queue is full")
                }
            }),
        }
    }
}

/// A cloneable handle for submitting work to a [`ThreadPoolExecutor`].
///
/// Handles do not keep the pool running: once the owning executor is shut
/// down, submissions through any handle are rejected.
#[derive(Clone)]
pub struct ExecutorHandle {
    inner: Arc<Inner>,
}

impl ExecutorHandle {
    /// Queues `f` for execution without a result handle.
    ///
    /// A panic in `f` is logged and does not affect the worker.
    pub fn execute<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.enqueue(Job {
            run: Box::new(f),
            cancel: None,
        })
    }

    /// Queues `f` and returns a promise for its result.
    ///
    /// The promise fails with `f`'s error (or `Panicked`), and is cancelled if
    /// the task is discarded by `shutdown_now`.
    pub fn submit<T, F>(&self, f: F) -> Result<Promise<T>>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let promise = Promise::new();
        let runner = promise.clone();
        let canceller = promise.clone();
        self.dispatch(
            move || runner.run(f),
            move || {
                canceller.cancel(false);
            },
        )?;
        Ok(promise)
    }

    /// Queues `run`, with `on_cancel` invoked instead if the job is discarded.
    pub(crate) fn dispatch(
        &self,
        run: impl FnOnce() + Send + 'static,
        on_cancel: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        self.inner.enqueue(Job {
            run: Box::new(run),
            cancel: Some(Box::new(on_cancel)),
        })
    }

    /// Returns true once the pool stopped accepting work.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.queue.is_closed()
    }
}

impl AsRef<ExecutorHandle> for ExecutorHandle {
    fn as_ref(&self) -> &ExecutorHandle {
        self
    }
}

impl fmt::Debug for ExecutorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorHandle")
            .field("pool_size", &self.inner.pool_size)
            .field("queued", &self.inner.queue.len())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// A fixed set of worker threads pulling tasks from one FIFO queue.
pub struct ThreadPoolExecutor {
    handle: ExecutorHandle,
}

impl ThreadPoolExecutor {
    /// Creates a pool of `pool_size` workers with an unbounded queue.
    ///
    /// # Panics
    ///
    /// Panics if `pool_size` is zero.
    #[must_use]
    pub fn fixed(pool_size: usize) -> Self {
        assert!(pool_size > 0, "pool size must be at least 1");
        Self::with_config(ExecutorConfig {
            pool_size,
            ..ExecutorConfig::default()
        })
    }

    /// Like [`fixed`](Self::fixed), but rejects a zero `pool_size` with a
    /// [`ConfigError`] instead of panicking.
    pub fn try_fixed(pool_size: usize) -> std::result::Result<Self, ConfigError> {
        let config = ExecutorConfig {
            pool_size,
            ..ExecutorConfig::default()
        };
        config.validate()?;
        Ok(Self::with_config(config))
    }

    /// Creates a pool with a single worker; tasks run one at a time in
    /// submission order.
    #[must_use]
    pub fn single_thread() -> Self {
        Self::fixed(1)
    }

    /// Returns a builder for a custom pool.
    #[must_use]
    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder::new()
    }

    /// Creates a pool from an already validated configuration.
    pub(crate) fn with_config(config: ExecutorConfig) -> Self {
        let inner = Arc::new(Inner {
            queue: TaskQueue::with_capacity(config.queue_capacity),
            policy: config.full_queue_policy,
            pool_size: config.pool_size,
            thread_name_prefix: config.thread_name_prefix,
            on_thread_start: config.on_thread_start,
            on_thread_stop: config.on_thread_stop,
            live: Mutex::new(0),
            terminated: Condvar::new(),
            workers: Mutex::new(Vec::with_capacity(config.pool_size)),
            active: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
        });
        for index in 0..inner.pool_size {
            spawn_worker(&inner, index);
        }
        debug!(
            pool_size = inner.pool_size,
            capacity = ?inner.queue.capacity(),
            policy = ?inner.policy,
            "executor started"
        );
        Self {
            handle: ExecutorHandle { inner },
        }
    }

    /// Returns a cloneable submission handle.
    #[must_use]
    pub fn handle(&self) -> ExecutorHandle {
        self.handle.clone()
    }

    /// See [`ExecutorHandle::execute`].
    pub fn execute<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.execute(f)
    }

    /// See [`ExecutorHandle::submit`].
    pub fn submit<T, F>(&self, f: F) -> Result<Promise<T>>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        self.handle.submit(f)
    }

    /// Runs every task and returns their outcomes in submission order.
    ///
    /// Blocks until all tasks are terminal. A failed task contributes an
    /// `Execution` error to its slot without affecting the others. Fails as a
    /// whole only if a submission is rejected or the caller is interrupted;
    /// in both cases the tasks already submitted are cancelled.
    pub fn invoke_all<T, F>(&self, tasks: Vec<F>) -> Result<Vec<Result<T>>>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let promises = self.submit_all(tasks)?;
        let mut results = Vec::with_capacity(promises.len());
        for promise in &promises {
            match promise.get() {
                Err(e) if e.kind() == ErrorKind::Interrupted => {
                    cancel_all(&promises);
                    return Err(e);
                }
                outcome => results.push(outcome),
            }
        }
        Ok(results)
    }

    /// Runs the tasks and returns the first successful result.
    ///
    /// The remaining tasks are cancelled with interruption once a winner is
    /// known. Fails with `Execution` (wrapping the last failure) if every task
    /// fails, or `InvalidArgument` for an empty task list.
    pub fn invoke_any<T, F>(&self, tasks: Vec<F>) -> Result<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        if tasks.is_empty() {
            return Err(Error::invalid_argument("invoke_any requires at least one task"));
        }
        let total = tasks.len();
        let promises = self.submit_all(tasks)?;
        let winner: Promise<T> = Promise::new();
        let failures = Arc::new(AtomicUsize::new(0));
        for promise in &promises {
            let winner = winner.clone();
            let failures = Arc::clone(&failures);
            promise.on_settle(move |state| match state {
                PromiseState::Completed(v) => {
                    winner.complete(v.clone());
                }
                PromiseState::Failed(e) => {
                    if failures.fetch_add(1, Ordering::AcqRel) + 1 == total {
                        winner.fail(e.clone());
                    }
                }
                PromiseState::Cancelled => {
                    if failures.fetch_add(1, Ordering::AcqRel) + 1 == total {
                        winner.fail(Error::cancelled());
                    }
                }
                PromiseState::Pending => {}
            });
        }
        let outcome = winner.get();
        cancel_all(&promises);
        outcome
    }

    fn submit_all<T, F>(&self, tasks: Vec<F>) -> Result<Vec<Promise<T>>>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let mut promises = Vec::with_capacity(tasks.len());
        for task in tasks {
            match self.submit(task) {
                Ok(p) => promises.push(p),
                Err(e) => {
                    cancel_all(&promises);
                    return Err(e);
                }
            }
        }
        Ok(promises)
    }

    /// Stops accepting tasks; queued tasks still run.
    pub fn shutdown(&self) {
        let inner = &self.handle.inner;
        if !inner.queue.is_closed() {
            debug!(queued = inner.queue.len(), "executor shutdown requested");
        }
        inner.queue.close();
    }

    /// Stops accepting tasks, cancels every queued task, and interrupts the
    /// workers.
    ///
    /// Returns the number of queued tasks that were cancelled. Running tasks
    /// stop only if they poll their interrupt flag.
    pub fn shutdown_now(&self) -> usize {
        let inner = &self.handle.inner;
        inner.queue.close();
        let discarded = inner.queue.drain();
        let count = discarded.len();
        for job in discarded {
            if let Some(cancel) = job.cancel {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(cancel)) {
                    warn!(
                        error = %Error::from_panic(payload.as_ref()),
                        "cancel hook panicked"
                    );
                }
            }
        }
        for worker in inner.workers.lock().iter() {
            worker.interrupt();
        }
        debug!(cancelled = count, "executor shut down immediately");
        count
    }

    /// Blocks until every worker has exited after shutdown, or `timeout`
    /// elapses. Returns true if the pool terminated.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let inner = &self.handle.inner;
        let deadline = interrupt::deadline_after(Some(timeout));
        let mut live = inner.live.lock();
        while *live > 0 {
            if interrupt::park(&inner.terminated, &mut live, deadline, false) == Wake::TimedOut {
                return false;
            }
        }
        true
    }

    /// Returns true once shutdown was requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.handle.is_shutdown()
    }

    /// Returns true once shut down and every worker has exited.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.is_shutdown() && *self.handle.inner.live.lock() == 0
    }

    /// Number of workers currently running a task.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.handle.inner.active.load(Ordering::Acquire)
    }

    /// Number of tasks waiting in the queue.
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.handle.inner.queue.len()
    }

    /// Number of tasks that have finished running, successfully or not.
    #[must_use]
    pub fn completed_count(&self) -> u64 {
        self.handle.inner.completed.load(Ordering::Acquire)
    }

    /// Number of worker threads.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.handle.inner.pool_size
    }
}

impl AsRef<ExecutorHandle> for ThreadPoolExecutor {
    fn as_ref(&self) -> &ExecutorHandle {
        &self.handle
    }
}

impl Drop for ThreadPoolExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ThreadPoolExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPoolExecutor")
            .field("pool_size", &self.pool_size())
            .field("active", &self.active_count())
            .field("queued", &self.queued_count())
            .field("completed", &self.completed_count())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

fn cancel_all<T: Clone + Send + 'static>(promises: &[Promise<T>]) {
    for promise in promises {
        promise.cancel(true);
    }
}

fn spawn_worker(inner: &Arc<Inner>, index: usize) {
    let inner_clone = Arc::clone(inner);
    let name = format!("{}-{}", inner.thread_name_prefix, index);
    *inner.live.lock() += 1;

    let spawned = thread::Builder::new().name(name).spawn(move || {
        let _span = debug_span!("executor_worker", index).entered();
        inner_clone.workers.lock().push(InterruptHandle::current());
        if let Some(ref callback) = inner_clone.on_thread_start {
            callback();
        }

        worker_loop(&inner_clone);

        if let Some(ref callback) = inner_clone.on_thread_stop {
            callback();
        }
        worker_exited(&inner_clone);
    });

    if let Err(e) = spawned {
        warn!(index, error = %e, "failed to spawn executor worker");
        worker_exited(inner);
    }
}

fn worker_exited(inner: &Inner) {
    let mut live = inner.live.lock();
    *live -= 1;
    if *live == 0 {
        inner.terminated.notify_all();
        debug!("executor terminated");
    }
}

fn worker_loop(inner: &Inner) {
    // `pop` returns None only once the queue is closed and drained.
    while let Some(job) = inner.queue.pop() {
        inner.active.fetch_add(1, Ordering::AcqRel);
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job.run)) {
            warn!(
                error = %Error::from_panic(payload.as_ref()),
                "executed task panicked"
            );
        }
        inner.active.fetch_sub(1, Ordering::AcqRel);
        inner.completed.fetch_add(1, Ordering::AcqRel);
        trace!("task executed");
        // A stale interrupt aimed at the previous task must not leak into the next.
        interrupt::take_interrupt();
    }
}
