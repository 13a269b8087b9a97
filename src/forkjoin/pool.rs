//! The fork/join pool and its builder.

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::deque::LocalDeque;
use super::task::{run_task, ForkSlot, RecursiveTask};
use super::worker::{Job, Shared, WorkerContext};
use crate::config::{self, ConfigError, ForkJoinConfig};
use crate::error::{Error, Result};
use crate::interrupt::{self, Wake};
use crate::promise::Promise;
use crate::tracing_compat::{debug, debug_span, warn};

/// A work-stealing pool for divide-and-conquer [`RecursiveTask`]s.
///
/// Each worker owns a deque; tasks submitted from outside land in a shared
/// injector queue. Idle workers take from their own deque first, then the
/// injector, then steal from a randomly chosen victim.
pub struct ForkJoinPool {
    shared: Arc<Shared>,
    parallelism: usize,
}

impl ForkJoinPool {
    /// Creates a pool with `parallelism` workers.
    ///
    /// # Panics
    ///
    /// Panics if `parallelism` is zero.
    #[must_use]
    pub fn new(parallelism: usize) -> Self {
        assert!(parallelism > 0, "parallelism must be at least 1");
        Self::with_config(ForkJoinConfig {
            parallelism,
            ..ForkJoinConfig::default()
        })
    }

    /// Like [`new`](Self::new), but rejects zero `parallelism` with a
    /// [`ConfigError`] instead of panicking.
    pub fn try_new(parallelism: usize) -> std::result::Result<Self, ConfigError> {
        let config = ForkJoinConfig {
            parallelism,
            ..ForkJoinConfig::default()
        };
        config.validate()?;
        Ok(Self::with_config(config))
    }

    /// Returns a builder for a custom pool.
    #[must_use]
    pub fn builder() -> ForkJoinBuilder {
        ForkJoinBuilder::default()
    }

    pub(crate) fn with_config(config: ForkJoinConfig) -> Self {
        let deques: Vec<LocalDeque<Job>> = (0..config.parallelism).map(|_| LocalDeque::new()).collect();
        let shared = Arc::new(Shared::new(deques.iter().map(LocalDeque::stealer).collect()));
        for (index, local) in deques.into_iter().enumerate() {
            spawn_worker(&shared, &config, index, local);
        }
        debug!(
            parallelism = config.parallelism,
            seed = config.steal_seed,
            "fork/join pool started"
        );
        Self {
            shared,
            parallelism: config.parallelism,
        }
    }

    fn inject(&self, job: Job) -> Result<()> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(Error::rejected("fork/join pool is shut down"));
        }
        self.shared.injector.push(job);
        self.shared.notify_work();
        Ok(())
    }

    /// Runs `task` on the pool and blocks until it completes.
    ///
    /// Must not be called from inside a task of the same pool; use
    /// [`WorkerContext::fork`] and [`ForkHandle::join`](super::ForkHandle::join)
    /// there instead.
    pub fn invoke<T: RecursiveTask>(&self, task: T) -> Result<T::Output> {
        let slot = ForkSlot::new();
        let filled = Arc::clone(&slot);
        self.inject(Box::new(move |ctx: &WorkerContext| {
            filled.fill(run_task(task, ctx));
        }))?;
        slot.wait()
    }

    /// Queues `task` and returns a promise for its result.
    ///
    /// `cancel(true)` on the promise interrupts the worker running the root
    /// task; subtasks are not interrupted.
    pub fn submit<T>(&self, task: T) -> Result<Promise<T::Output>>
    where
        T: RecursiveTask,
        T::Output: Clone,
    {
        let promise = Promise::new();
        let runner = promise.clone();
        self.inject(Box::new(move |ctx: &WorkerContext| {
            runner.run(|| task.compute(ctx));
        }))?;
        Ok(promise)
    }

    /// Number of worker threads.
    #[must_use]
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Total number of tasks taken from another worker's deque.
    #[must_use]
    pub fn steal_count(&self) -> u64 {
        self.shared.steals.load(Ordering::Relaxed)
    }

    /// Stops accepting new tasks. Workers finish all queued work, then exit.
    pub fn shutdown(&self) {
        if !self.shared.shutdown.swap(true, Ordering::AcqRel) {
            debug!("fork/join pool shutdown requested");
        }
        self.shared.notify_all();
    }

    /// Returns true once shutdown was requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Blocks until every worker has exited after shutdown, or `timeout`
    /// elapses. Returns true if the pool terminated.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = interrupt::deadline_after(Some(timeout));
        let mut live = self.shared.live.lock();
        while *live > 0 {
            if interrupt::park(&self.shared.terminated, &mut live, deadline, false) == Wake::TimedOut {
                return false;
            }
        }
        true
    }
}

impl Drop for ForkJoinPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ForkJoinPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForkJoinPool")
            .field("parallelism", &self.parallelism)
            .field("steals", &self.steal_count())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

fn spawn_worker(shared: &Arc<Shared>, config: &ForkJoinConfig, index: usize, local: LocalDeque<Job>) {
    let name = format!("{}-{}", config.thread_name_prefix, index);
    let seed = config.steal_seed;
    let worker_shared = Arc::clone(shared);
    *shared.live.lock() += 1;

    let spawned = thread::Builder::new().name(name).spawn(move || {
        let _span = debug_span!("forkjoin_worker", index).entered();
        let ctx = WorkerContext::new(Arc::clone(&worker_shared), index, local, seed);
        ctx.run_loop();
        worker_shared.worker_exited();
    });
    if let Err(e) = spawned {
        warn!(index, error = %e, "failed to spawn fork/join worker");
        shared.worker_exited();
    }
}

/// Builder for [`ForkJoinPool`].
///
/// Programmatic values win over `STRAND_*` environment variables, which win
/// over the defaults.
#[derive(Debug, Default, Clone)]
pub struct ForkJoinBuilder {
    read_env: bool,
    parallelism: Option<usize>,
    thread_name_prefix: Option<String>,
    steal_seed: Option<u64>,
}

impl ForkJoinBuilder {
    /// Also read `STRAND_FORKJOIN_PARALLELISM` and `STRAND_THREAD_NAME_PREFIX`.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        self.read_env = true;
        self
    }

    /// Set the number of workers.
    #[must_use]
    pub fn parallelism(mut self, n: usize) -> Self {
        self.parallelism = Some(n);
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = Some(prefix.into());
        self
    }

    /// Seed victim selection.
    #[must_use]
    pub fn steal_seed(mut self, seed: u64) -> Self {
        self.steal_seed = Some(seed);
        self
    }

    /// Resolve the configuration without starting any thread.
    pub fn config(self) -> std::result::Result<ForkJoinConfig, ConfigError> {
        let mut config = ForkJoinConfig::default();
        if self.read_env {
            config::apply_forkjoin_env_overrides(&mut config)?;
        }
        if let Some(n) = self.parallelism {
            config.parallelism = n;
        }
        if let Some(prefix) = self.thread_name_prefix {
            config.thread_name_prefix = prefix;
        }
        if let Some(seed) = self.steal_seed {
            config.steal_seed = seed;
        }
        config.validate()?;
        Ok(config)
    }

    /// Build the pool and start its workers.
    pub fn build(self) -> std::result::Result<ForkJoinPool, ConfigError> {
        Ok(ForkJoinPool::with_config(self.config()?))
    }
}
