//! Worker thread logic.

use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::deque::{LocalDeque, Stealer};
use super::stealing;
use super::task::{run_task, ForkHandle, ForkSlot, RecursiveTask};
use crate::error::Result;
use crate::tracing_compat::{debug, trace};
use crate::util::DetRng;

/// Idle workers re-scan for work at least this often.
const IDLE_PARK: Duration = Duration::from_millis(50);

pub(crate) type Job = Box<dyn FnOnce(&WorkerContext) + Send>;

/// State shared by every worker of a pool.
pub(crate) struct Shared {
    pub(crate) injector: SegQueue<Job>,
    pub(crate) stealers: Vec<Stealer<Job>>,
    pub(crate) shutdown: AtomicBool,
    pub(crate) steals: AtomicU64,
    /// Bumped on every push so sleepers can re-check under the lock.
    sleep: Mutex<u64>,
    wake: Condvar,
    pub(crate) live: Mutex<usize>,
    pub(crate) terminated: Condvar,
}

impl Shared {
    pub(crate) fn new(stealers: Vec<Stealer<Job>>) -> Self {
        Self {
            injector: SegQueue::new(),
            stealers,
            shutdown: AtomicBool::new(false),
            steals: AtomicU64::new(0),
            sleep: Mutex::new(0),
            wake: Condvar::new(),
            live: Mutex::new(0),
            terminated: Condvar::new(),
        }
    }

    /// Wakes one sleeping worker after work was published.
    pub(crate) fn notify_work(&self) {
        *self.sleep.lock() += 1;
        self.wake.notify_one();
    }

    pub(crate) fn notify_all(&self) {
        *self.sleep.lock() += 1;
        self.wake.notify_all();
    }

    fn has_visible_work(&self) -> bool {
        !self.injector.is_empty() || self.stealers.iter().any(|s| !s.is_empty())
    }

    pub(crate) fn worker_exited(&self) {
        let mut live = self.live.lock();
        *live -= 1;
        if *live == 0 {
            self.terminated.notify_all();
            debug!("fork/join pool terminated");
        }
    }
}

/// A worker's view of its pool, handed to every
/// [`RecursiveTask::compute`] call.
pub struct WorkerContext {
    shared: Arc<Shared>,
    index: usize,
    local: LocalDeque<Job>,
    rng: RefCell<DetRng>,
}

impl WorkerContext {
    pub(crate) fn new(shared: Arc<Shared>, index: usize, local: LocalDeque<Job>, seed: u64) -> Self {
        Self {
            shared,
            index,
            local,
            rng: RefCell::new(DetRng::for_worker(seed, index)),
        }
    }

    /// Index of the worker running the current task.
    #[must_use]
    pub fn worker_index(&self) -> usize {
        self.index
    }

    /// Schedules `task` on this worker's deque without blocking.
    ///
    /// Idle workers may steal it. Its result is retrieved with
    /// [`ForkHandle::join`].
    pub fn fork<T: RecursiveTask>(&self, task: T) -> ForkHandle<T::Output> {
        let slot = ForkSlot::new();
        let filled = Arc::clone(&slot);
        self.local.push(Box::new(move |ctx: &WorkerContext| {
            filled.fill(run_task(task, ctx));
        }));
        self.shared.notify_work();
        ForkHandle::new(slot)
    }

    /// Runs `left` here and `right` in parallel, returning both results.
    ///
    /// Fails with the first error; `right` is still joined before returning
    /// so no subtask outlives the call.
    pub fn join2<A, B>(&self, left: A, right: B) -> Result<(A::Output, B::Output)>
    where
        A: RecursiveTask,
        B: RecursiveTask,
    {
        let right = self.fork(right);
        let left = run_task(left, self);
        let right = right.join(self);
        Ok((left?, right?))
    }

    /// Runs one pending task if any is available. Returns whether it did.
    pub(crate) fn help(&self) -> bool {
        match self.find_work() {
            Some(job) => {
                job(self);
                true
            }
            None => false,
        }
    }

    fn find_work(&self) -> Option<Job> {
        if let Some(job) = self.local.pop() {
            return Some(job);
        }
        if let Some(job) = self.shared.injector.pop() {
            return Some(job);
        }
        let stolen = stealing::steal_task(
            &self.shared.stealers,
            self.index,
            &mut self.rng.borrow_mut(),
        );
        if stolen.is_some() {
            self.shared.steals.fetch_add(1, Ordering::Relaxed);
            trace!(worker = self.index, "stole task");
        }
        stolen
    }

    /// Runs the worker scheduling loop until shutdown with no work left.
    pub(crate) fn run_loop(&self) {
        loop {
            // 1. local deque (LIFO), 2. shared injector, 3. steal (FIFO)
            if self.help() {
                continue;
            }

            let mut epoch = self.shared.sleep.lock();
            if self.shared.has_visible_work() {
                continue;
            }
            if self.shared.shutdown.load(Ordering::Acquire) {
                break;
            }
            let _ = self.shared.wake.wait_for(&mut epoch, IDLE_PARK);
        }
    }
}

impl fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("index", &self.index)
            .field("local", &self.local)
            .finish_non_exhaustive()
    }
}
