//! Counting semaphore with fair or barging acquisition.
//!
//! A semaphore holds a count of permits. `acquire(n)` blocks until `n`
//! permits are available and takes them atomically; `release(n)` adds `n`
//! permits. Releases are not tied to earlier acquires: any thread may release,
//! and the count has no upper bound, which makes a zero-permit semaphore a
//! startup signal.
//!
//! # Fairness
//!
//! - **Fair**: waiters are served strictly in arrival order. A waiter asking
//!   for many permits holds back smaller requests queued behind it.
//! - **Non-fair** (default): any waiter whose request fits may proceed, and
//!   newly arriving threads may take permits ahead of queued ones.
//!
//! [`try_acquire`](Semaphore::try_acquire) barges in both modes. Timed
//! acquisition respects the fairness setting.
//!
//! # Example
//!
//! ```
//! use strand::sync::Semaphore;
//!
//! let sem = Semaphore::new(2);
//! {
//!     let _permit = sem.permit(2).unwrap();
//!     assert_eq!(sem.available_permits(), 0);
//!     assert!(!sem.try_acquire(1));
//! }
//! assert_eq!(sem.available_permits(), 2);
//! ```

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::interrupt::{self, Wake};
use crate::tracing_compat::trace;

#[derive(Debug)]
struct Waiter {
    ticket: u64,
    wants: usize,
}

#[derive(Debug)]
struct SemaphoreState {
    permits: usize,
    waiters: VecDeque<Waiter>,
    next_ticket: u64,
}

impl SemaphoreState {
    fn dequeue(&mut self, ticket: u64) {
        self.waiters.retain(|w| w.ticket != ticket);
    }
}

/// A counting semaphore.
#[derive(Debug)]
pub struct Semaphore {
    fair: bool,
    state: Mutex<SemaphoreState>,
    cvar: Condvar,
}

impl Semaphore {
    /// Creates a non-fair semaphore with `permits` initial permits.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self::with_fairness(permits, false)
    }

    /// Creates a fair (FIFO) semaphore.
    #[must_use]
    pub fn fair(permits: usize) -> Self {
        Self::with_fairness(permits, true)
    }

    /// Creates a semaphore with explicit fairness.
    #[must_use]
    pub fn with_fairness(permits: usize, fair: bool) -> Self {
        Self {
            fair,
            state: Mutex::new(SemaphoreState {
                permits,
                waiters: VecDeque::new(),
                next_ticket: 0,
            }),
            cvar: Condvar::new(),
        }
    }

    /// Returns true if permits are granted in FIFO order.
    #[must_use]
    pub fn is_fair(&self) -> bool {
        self.fair
    }

    /// Returns the number of currently available permits.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.state.lock().permits
    }

    /// Returns the number of threads blocked waiting for permits.
    #[must_use]
    pub fn queue_length(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Acquires `n` permits, blocking until they are available.
    ///
    /// Fails with `Interrupted` if the calling thread is interrupted while
    /// waiting; no permits are taken in that case.
    pub fn acquire(&self, n: usize) -> Result<()> {
        self.acquire_inner(n, None, true).map(|_| ())
    }

    /// Acquires `n` permits, ignoring interrupts.
    pub fn acquire_uninterruptibly(&self, n: usize) {
        let _ = self.acquire_inner(n, None, false);
    }

    /// Takes `n` permits if they are available right now.
    #[must_use]
    pub fn try_acquire(&self, n: usize) -> bool {
        let mut state = self.state.lock();
        if state.permits >= n {
            state.permits -= n;
            true
        } else {
            false
        }
    }

    /// Acquires `n` permits, waiting at most `timeout`.
    ///
    /// A timeout never rescinds permits already handed to other waiters.
    #[must_use]
    pub fn try_acquire_timeout(&self, n: usize, timeout: Duration) -> bool {
        self.acquire_inner(n, interrupt::deadline_after(Some(timeout)), false)
            .unwrap_or(false)
    }

    /// Acquires `n` permits and returns a guard that releases them on drop.
    pub fn permit(&self, n: usize) -> Result<SemaphorePermit<'_>> {
        self.acquire(n)?;
        Ok(SemaphorePermit {
            semaphore: self,
            count: n,
        })
    }

    /// Adds `n` permits.
    pub fn release(&self, n: usize) {
        if n == 0 {
            return;
        }
        let mut state = self.state.lock();
        state.permits = state.permits.saturating_add(n);
        if !state.waiters.is_empty() {
            // Waiters want different amounts; let each re-check.
            self.cvar.notify_all();
        }
    }

    /// Takes every available permit, returning how many were taken.
    pub fn drain_permits(&self) -> usize {
        std::mem::take(&mut self.state.lock().permits)
    }

    fn acquire_inner(&self, n: usize, deadline: Option<Instant>, interruptible: bool) -> Result<bool> {
        let mut state = self.state.lock();
        if interruptible && interrupt::take_interrupt() {
            return Err(Error::interrupted());
        }
        if state.permits >= n && (!self.fair || state.waiters.is_empty()) {
            state.permits -= n;
            return Ok(true);
        }

        let ticket = state.next_ticket;
        state.next_ticket = state.next_ticket.wrapping_add(1);
        state.waiters.push_back(Waiter { ticket, wants: n });
        trace!(ticket, wants = n, permits = state.permits, "semaphore wait");

        loop {
            let my_turn = !self.fair || state.waiters.front().map(|w| w.ticket) == Some(ticket);
            if my_turn && state.permits >= n {
                state.permits -= n;
                state.dequeue(ticket);
                if self.fair && state.permits > 0 && !state.waiters.is_empty() {
                    // The next head may be satisfiable too.
                    self.cvar.notify_all();
                }
                return Ok(true);
            }
            let wake = interrupt::park(&self.cvar, &mut state, deadline, interruptible);
            if wake == Wake::Signalled {
                continue;
            }
            state.dequeue(ticket);
            self.cvar.notify_all();
            return match wake {
                Wake::Interrupted => Err(Error::interrupted()),
                _ => Ok(false),
            };
        }
    }
}

/// Permits held from a [`Semaphore`]; released on drop.
#[derive(Debug)]
#[must_use = "permit will be immediately released if not held"]
pub struct SemaphorePermit<'a> {
    semaphore: &'a Semaphore,
    count: usize,
}

impl SemaphorePermit<'_> {
    /// Returns the number of permits held.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Forgets the permit without releasing it back to the semaphore.
    pub fn forget(mut self) {
        self.count = 0;
    }
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        self.semaphore.release(self.count);
    }
}
