//! Condition variable bound to a [`ReentrantLock`].
//!
//! A waiter must hold the lock. `wait` registers the waiter, releases every
//! hold the thread has, blocks until signalled, then re-acquires the lock
//! with the same hold count before returning. Because registration happens
//! before the lock is released, a signal issued after the waiter released the
//! lock can never be missed.
//!
//! Signals are not remembered: `signal_one` with no waiters does nothing.
//! Wakeups are only delivered through signals, but callers should still
//! re-check their predicate in a loop since another thread may have changed
//! the guarded state between the signal and the re-acquire.

use parking_lot::{Condvar, Mutex};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::interrupt::{self, InterruptHandle, Wake};
use crate::sync::lock::ReentrantLock;
use crate::tracing_compat::trace;

#[derive(Debug, Default)]
struct WaitSet {
    next_ticket: u64,
    waiting: VecDeque<u64>,
    signalled: HashSet<u64>,
}

/// A condition variable created by [`ReentrantLock::new_condition`].
#[derive(Debug)]
pub struct Condition {
    lock: Arc<ReentrantLock>,
    waiters: Mutex<WaitSet>,
    cvar: Condvar,
}

enum Outcome {
    Signalled,
    TimedOut,
    Interrupted,
}

impl Condition {
    pub(crate) fn new(lock: Arc<ReentrantLock>) -> Self {
        Self {
            lock,
            waiters: Mutex::new(WaitSet::default()),
            cvar: Condvar::new(),
        }
    }

    /// Returns the lock this condition is bound to.
    #[must_use]
    pub fn lock(&self) -> &Arc<ReentrantLock> {
        &self.lock
    }

    /// Waits until signalled or interrupted.
    ///
    /// The lock is held again when this returns, including on `Interrupted`.
    pub fn wait(&self) -> Result<()> {
        match self.wait_inner(None, true)? {
            Outcome::Interrupted => Err(Error::interrupted()),
            Outcome::Signalled | Outcome::TimedOut => Ok(()),
        }
    }

    /// Waits until signalled, interrupted, or `timeout` elapses.
    ///
    /// Returns `Ok(false)` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        match self.wait_inner(interrupt::deadline_after(Some(timeout)), true)? {
            Outcome::Signalled => Ok(true),
            Outcome::TimedOut => Ok(false),
            Outcome::Interrupted => Err(Error::interrupted()),
        }
    }

    /// Waits until signalled, ignoring interrupts.
    pub fn wait_uninterruptibly(&self) -> Result<()> {
        self.wait_inner(None, false).map(|_| ())
    }

    /// Wakes the longest-waiting thread, if any.
    ///
    /// The calling thread must hold the lock.
    pub fn signal_one(&self) -> Result<()> {
        self.ensure_owner()?;
        let mut set = self.waiters.lock();
        if let Some(ticket) = set.waiting.pop_front() {
            set.signalled.insert(ticket);
            trace!(ticket, "condition signal");
            self.cvar.notify_all();
        }
        Ok(())
    }

    /// Wakes every waiting thread.
    ///
    /// The calling thread must hold the lock.
    pub fn signal_all(&self) -> Result<()> {
        self.ensure_owner()?;
        let mut set = self.waiters.lock();
        let woken = set.waiting.len();
        while let Some(ticket) = set.waiting.pop_front() {
            set.signalled.insert(ticket);
        }
        if woken > 0 {
            trace!(woken, "condition broadcast");
            self.cvar.notify_all();
        }
        Ok(())
    }

    /// Returns the number of threads currently waiting.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().waiting.len()
    }

    fn ensure_owner(&self) -> Result<()> {
        if self.lock.is_held_by_current_thread() {
            Ok(())
        } else {
            Err(Error::not_owner("lock bound to this condition"))
        }
    }

    fn wait_inner(&self, deadline: Option<Instant>, interruptible: bool) -> Result<Outcome> {
        self.ensure_owner()?;
        if interruptible && interrupt::take_interrupt() {
            return Ok(Outcome::Interrupted);
        }

        let ticket = {
            let mut set = self.waiters.lock();
            let ticket = set.next_ticket;
            set.next_ticket = set.next_ticket.wrapping_add(1);
            set.waiting.push_back(ticket);
            ticket
        };
        let holds = self.lock.release_fully()?;

        let outcome = {
            let mut set = self.waiters.lock();
            loop {
                if set.signalled.remove(&ticket) {
                    break Outcome::Signalled;
                }
                match interrupt::park(&self.cvar, &mut set, deadline, interruptible) {
                    Wake::Signalled => {}
                    Wake::TimedOut => {
                        set.waiting.retain(|t| *t != ticket);
                        break if set.signalled.remove(&ticket) {
                            Outcome::Signalled
                        } else {
                            Outcome::TimedOut
                        };
                    }
                    Wake::Interrupted => {
                        set.waiting.retain(|t| *t != ticket);
                        if set.signalled.remove(&ticket) {
                            // The signal wins; keep the interrupt pending.
                            InterruptHandle::current().interrupt();
                            break Outcome::Signalled;
                        }
                        break Outcome::Interrupted;
                    }
                }
            }
        };

        self.lock.reacquire(holds);
        Ok(outcome)
    }
}
