//! Reentrant mutual-exclusion lock with explicit ownership.
//!
//! [`ReentrantLock`] tracks `{owner thread, hold count}`. The owner may
//! acquire again; every acquire increments the hold count and every release
//! decrements it. The lock is free only when the count returns to zero.
//! Releasing from a thread that does not own the lock fails with
//! [`ErrorKind::NotOwner`](crate::ErrorKind::NotOwner).
//!
//! # Fairness
//!
//! | Mode | Contended `acquire` |
//! |------|---------------------|
//! | non-fair (default) | Any waiter, or a newly arriving thread, may take a freed lock (barging). Better throughput, no ordering promise. |
//! | fair | Waiters are granted strictly in arrival order (FIFO ticket queue). A free lock is not taken while others queue. |
//!
//! [`try_acquire`](ReentrantLock::try_acquire) barges in both modes: it takes
//! a free lock even when fair waiters are queued.
//!
//! # Non-reentrant mode
//!
//! With `reentrant: false` a second acquire by the owner would self-deadlock;
//! blocking acquires report it as `IllegalState` and `try_acquire*` returns
//! false instead.
//!
//! # Example
//!
//! ```
//! use strand::sync::ReentrantLock;
//!
//! let lock = ReentrantLock::new();
//! lock.acquire().unwrap();
//! lock.acquire().unwrap();
//! assert_eq!(lock.hold_count(), 2);
//! lock.release().unwrap();
//! assert!(lock.is_locked());
//! lock.release().unwrap();
//! assert!(!lock.is_locked());
//! ```

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::interrupt::{self, Wake};
use crate::sync::condition::Condition;
use crate::tracing_compat::trace;

/// Construction options for [`ReentrantLock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Grant contended acquisitions in FIFO order.
    pub fair: bool,
    /// Allow the owner to acquire again.
    pub reentrant: bool,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            fair: false,
            reentrant: true,
        }
    }
}

#[derive(Debug)]
struct LockState {
    owner: Option<ThreadId>,
    holds: usize,
    /// Blocked acquirers in arrival order.
    waiters: VecDeque<u64>,
    next_ticket: u64,
}

impl LockState {
    fn grant(&mut self, me: ThreadId, holds: usize) {
        self.owner = Some(me);
        self.holds = holds;
    }

    fn dequeue(&mut self, ticket: u64) {
        self.waiters.retain(|t| *t != ticket);
    }
}

/// A mutual-exclusion lock with owner tracking and optional reentrancy.
#[derive(Debug)]
pub struct ReentrantLock {
    options: LockOptions,
    state: Mutex<LockState>,
    cvar: Condvar,
}

impl ReentrantLock {
    /// Creates a non-fair reentrant lock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(LockOptions::default())
    }

    /// Creates a fair (FIFO) reentrant lock.
    #[must_use]
    pub fn fair() -> Self {
        Self::with_options(LockOptions {
            fair: true,
            reentrant: true,
        })
    }

    /// Creates a lock with explicit options.
    #[must_use]
    pub fn with_options(options: LockOptions) -> Self {
        Self {
            options,
            state: Mutex::new(LockState {
                owner: None,
                holds: 0,
                waiters: VecDeque::new(),
                next_ticket: 0,
            }),
            cvar: Condvar::new(),
        }
    }

    /// Returns true if this lock grants in FIFO order.
    #[must_use]
    pub fn is_fair(&self) -> bool {
        self.options.fair
    }

    /// Returns true if the owner may acquire again.
    #[must_use]
    pub fn is_reentrant(&self) -> bool {
        self.options.reentrant
    }

    /// Acquires the lock, blocking until it is available.
    ///
    /// Not interruptible. Fails only when a non-reentrant lock is acquired
    /// again by its owner.
    pub fn acquire(&self) -> Result<()> {
        self.acquire_inner(None, false, 1).map(|_| ())
    }

    /// Acquires the lock unless the calling thread is interrupted first.
    pub fn acquire_interruptibly(&self) -> Result<()> {
        self.acquire_inner(None, true, 1).map(|_| ())
    }

    /// Acquires the lock only if it is free (or already held by the caller).
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.state.lock();
        match state.owner {
            Some(owner) if owner == me => {
                if self.options.reentrant {
                    state.holds += 1;
                    true
                } else {
                    false
                }
            }
            Some(_) => false,
            None => {
                state.grant(me, 1);
                true
            }
        }
    }

    /// Acquires the lock, waiting at most `timeout`.
    ///
    /// Returns false if the timeout elapsed first. Not interruptible.
    #[must_use]
    pub fn try_acquire_timeout(&self, timeout: Duration) -> bool {
        if self.is_held_by_current_thread() && !self.options.reentrant {
            return false;
        }
        let deadline = interrupt::deadline_after(Some(timeout));
        self.acquire_inner(deadline, false, 1).unwrap_or(false)
    }

    /// Releases one hold of the lock.
    ///
    /// Fails with `NotOwner` if the calling thread does not hold the lock.
    pub fn release(&self) -> Result<()> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.owner != Some(me) {
            return Err(Error::not_owner("lock"));
        }
        state.holds -= 1;
        if state.holds == 0 {
            state.owner = None;
            self.wake_next();
        }
        Ok(())
    }

    /// Acquires the lock and returns a guard that releases it on drop.
    pub fn lock(&self) -> Result<LockGuard<'_>> {
        self.acquire()?;
        Ok(LockGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    /// Creates a condition variable bound to this lock.
    #[must_use]
    pub fn new_condition(self: &Arc<Self>) -> Condition {
        Condition::new(Arc::clone(self))
    }

    /// Returns true if any thread holds the lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state.lock().owner.is_some()
    }

    /// Returns true if the calling thread holds the lock.
    #[must_use]
    pub fn is_held_by_current_thread(&self) -> bool {
        self.state.lock().owner == Some(thread::current().id())
    }

    /// Returns the calling thread's hold count (zero if it does not own the lock).
    #[must_use]
    pub fn hold_count(&self) -> usize {
        let state = self.state.lock();
        if state.owner == Some(thread::current().id()) {
            state.holds
        } else {
            0
        }
    }

    /// Returns the number of threads blocked in a blocking acquire.
    #[must_use]
    pub fn queue_length(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Releases every hold of the calling thread, returning the count.
    pub(crate) fn release_fully(&self) -> Result<usize> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.owner != Some(me) {
            return Err(Error::not_owner("lock"));
        }
        let holds = state.holds;
        state.holds = 0;
        state.owner = None;
        self.wake_next();
        Ok(holds)
    }

    /// Re-acquires with a previously saved hold count.
    pub(crate) fn reacquire(&self, holds: usize) {
        // The caller released fully, so it cannot be the owner here.
        let _ = self.acquire_inner(None, false, holds);
    }

    fn acquire_inner(
        &self,
        deadline: Option<Instant>,
        interruptible: bool,
        holds: usize,
    ) -> Result<bool> {
        let me = thread::current().id();
        let mut state = self.state.lock();

        if state.owner == Some(me) {
            if !self.options.reentrant {
                return Err(Error::illegal_state(
                    "non-reentrant lock acquired again by its owner",
                ));
            }
            state.holds += holds;
            return Ok(true);
        }
        if interruptible && interrupt::take_interrupt() {
            return Err(Error::interrupted());
        }
        if state.owner.is_none() && (!self.options.fair || state.waiters.is_empty()) {
            state.grant(me, holds);
            return Ok(true);
        }

        let ticket = state.next_ticket;
        state.next_ticket = state.next_ticket.wrapping_add(1);
        state.waiters.push_back(ticket);
        trace!(ticket, queued = state.waiters.len(), "lock contended");

        loop {
            let my_turn = !self.options.fair || state.waiters.front() == Some(&ticket);
            if state.owner.is_none() && my_turn {
                state.dequeue(ticket);
                state.grant(me, holds);
                return Ok(true);
            }
            match interrupt::park(&self.cvar, &mut state, deadline, interruptible) {
                Wake::Signalled => {}
                Wake::TimedOut => {
                    state.dequeue(ticket);
                    self.cvar.notify_all();
                    return Ok(false);
                }
                Wake::Interrupted => {
                    state.dequeue(ticket);
                    self.cvar.notify_all();
                    return Err(Error::interrupted());
                }
            }
        }
    }

    fn wake_next(&self) {
        if self.options.fair {
            // Only the queue head may proceed; it has to be the one woken.
            self.cvar.notify_all();
        } else {
            self.cvar.notify_one();
        }
    }
}

impl Default for ReentrantLock {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII hold on a [`ReentrantLock`]; releases one hold on drop.
///
/// Guards stay on the acquiring thread.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    lock: &'a ReentrantLock,
    _not_send: PhantomData<*const ()>,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        let _ = self.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::atomic::AtomicCounter;
    use crate::test_utils::{init_test_logging, wait_until};
    use crate::ErrorKind;
    use std::sync::mpsc;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn reentrant_requires_matching_releases() {
        init_test("reentrant_requires_matching_releases");
        let lock = Arc::new(ReentrantLock::new());
        for _ in 0..3 {
            lock.acquire().expect("acquire");
        }
        assert_eq!(lock.hold_count(), 3);

        let acquired_elsewhere = {
            let lock = Arc::clone(&lock);
            move || {
                let lock = Arc::clone(&lock);
                thread::spawn(move || lock.try_acquire())
                    .join()
                    .expect("contender panicked")
            }
        };

        for remaining in (1..=3).rev() {
            assert!(!acquired_elsewhere(), "other thread acquired with {remaining} holds left");
            lock.release().expect("release");
        }
        assert!(!lock.is_locked());
        assert!(acquired_elsewhere(), "lock should be free after the last release");
        crate::test_complete!("reentrant_requires_matching_releases");
    }

    #[test]
    fn release_by_non_owner_fails() {
        init_test("release_by_non_owner_fails");
        let lock = Arc::new(ReentrantLock::new());
        let err = lock.release().expect_err("release without holding");
        assert_eq!(err.kind(), ErrorKind::NotOwner);

        lock.acquire().expect("acquire");
        let other = Arc::clone(&lock);
        let kind = thread::spawn(move || other.release().map_err(|e| e.kind()))
            .join()
            .expect("thread panicked");
        assert_eq!(kind, Err(ErrorKind::NotOwner));
        assert!(lock.is_held_by_current_thread());
        lock.release().expect("owner release");
    }

    #[test]
    fn non_reentrant_reports_self_deadlock() {
        init_test("non_reentrant_reports_self_deadlock");
        let lock = ReentrantLock::with_options(LockOptions {
            fair: false,
            reentrant: false,
        });
        lock.acquire().expect("first acquire");
        assert!(!lock.try_acquire());
        assert!(!lock.try_acquire_timeout(Duration::from_millis(5)));
        let err = lock.acquire().expect_err("second acquire");
        assert_eq!(err.kind(), ErrorKind::IllegalState);
        lock.release().expect("release");
        assert!(!lock.is_locked());
    }

    #[test]
    fn try_acquire_timeout_elapses_while_held() {
        init_test("try_acquire_timeout_elapses_while_held");
        let lock = Arc::new(ReentrantLock::new());
        let (held_tx, held_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let holder = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                lock.acquire().expect("acquire");
                held_tx.send(()).expect("send");
                let _ = done_rx.recv();
                lock.release().expect("release");
            })
        };
        held_rx.recv().expect("recv");

        let start = Instant::now();
        assert!(!lock.try_acquire_timeout(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(lock.queue_length(), 0);

        done_tx.send(()).expect("send");
        holder.join().expect("holder panicked");
        assert!(lock.try_acquire_timeout(Duration::from_secs(1)));
        lock.release().expect("release");
    }

    #[test]
    fn fair_lock_grants_in_arrival_order() {
        init_test("fair_lock_grants_in_arrival_order");
        let lock = Arc::new(ReentrantLock::fair());
        let order = Arc::new(Mutex::new(Vec::new()));
        lock.acquire().expect("acquire");

        let mut handles = Vec::new();
        for i in 0..4 {
            let lock_c = Arc::clone(&lock);
            let order = Arc::clone(&order);
            handles.push(thread::spawn(move || {
                lock_c.acquire().expect("acquire");
                order.lock().push(i);
                lock_c.release().expect("release");
            }));
            // Queue each waiter before starting the next one.
            assert!(wait_until(Duration::from_secs(2), || lock.queue_length() == i + 1));
        }

        lock.release().expect("release");
        for h in handles {
            h.join().expect("waiter panicked");
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn interruptible_acquire_fails_on_interrupt() {
        init_test("interruptible_acquire_fails_on_interrupt");
        let lock = Arc::new(ReentrantLock::new());
        lock.acquire().expect("acquire");
        let (tx, rx) = mpsc::channel();
        let waiter = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                tx.send(interrupt::InterruptHandle::current()).expect("send");
                lock.acquire_interruptibly().map_err(|e| e.kind())
            })
        };
        let handle = rx.recv().expect("recv");
        assert!(wait_until(Duration::from_secs(2), || lock.queue_length() == 1));
        handle.interrupt();
        let outcome = waiter.join().expect("waiter panicked");
        assert_eq!(outcome, Err(ErrorKind::Interrupted));
        assert_eq!(lock.queue_length(), 0);
        lock.release().expect("release");
    }

    #[test]
    fn guard_protects_counter() {
        init_test("guard_protects_counter");
        let lock = Arc::new(ReentrantLock::new());
        let counter = Arc::new(Mutex::new(0_u64));
        let observed_overlap = Arc::new(AtomicCounter::new(0));
        let inside = Arc::new(AtomicCounter::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let counter = Arc::clone(&counter);
                let inside = Arc::clone(&inside);
                let overlap = Arc::clone(&observed_overlap);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let _guard = lock.lock().expect("lock");
                        if inside.increment_and_get() > 1 {
                            overlap.increment_and_get();
                        }
                        *counter.lock() += 1;
                        inside.decrement_and_get();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("thread failed");
        }
        assert_eq!(*counter.lock(), 4000);
        assert_eq!(observed_overlap.get(), 0);
        assert!(!lock.is_locked());
    }
}
