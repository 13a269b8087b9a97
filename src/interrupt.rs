//! Cooperative thread interruption.
//!
//! Every thread owns an interrupt flag. [`InterruptHandle::interrupt`] sets
//! another thread's flag; the target observes it either by polling
//! ([`is_interrupted`], [`check`]) or by being inside an interruptible blocking
//! call, which then fails with [`ErrorKind::Interrupted`](crate::ErrorKind)
//! and clears the flag.
//!
//! Interruption never terminates a running thread. Long-running tasks that
//! want to honour `shutdown_now` or `cancel(true)` must poll [`check`] at
//! their own safe points.
//!
//! Interruptible waits park in slices of [`POLL_SLICE`] and re-check the flag
//! between slices, so an interrupt is observed within one slice.

use parking_lot::{Condvar, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Upper bound on how long an interruptible wait sleeps before re-checking
/// its thread's interrupt flag.
pub const POLL_SLICE: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct InterruptState {
    flag: AtomicBool,
}

thread_local! {
    static CURRENT: Arc<InterruptState> = Arc::new(InterruptState::default());
}

/// A handle that can interrupt a specific thread.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    state: Arc<InterruptState>,
    thread: Thread,
}

impl InterruptHandle {
    /// Returns the handle for the calling thread.
    #[must_use]
    pub fn current() -> Self {
        Self {
            state: CURRENT.with(Arc::clone),
            thread: thread::current(),
        }
    }

    /// Requests interruption of the target thread.
    pub fn interrupt(&self) {
        self.state.flag.store(true, Ordering::Release);
        // Wakes `thread::park` based waits; condvar waits notice within a slice.
        self.thread.unpark();
    }

    /// Returns true if the target thread has a pending interrupt.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.state.flag.load(Ordering::Acquire)
    }

    /// Returns the target thread's name, if any.
    #[must_use]
    pub fn thread_name(&self) -> Option<&str> {
        self.thread.name()
    }
}

/// Returns true if the calling thread has a pending interrupt. Does not clear it.
#[must_use]
pub fn is_interrupted() -> bool {
    CURRENT.with(|s| s.flag.load(Ordering::Acquire))
}

/// Clears the calling thread's interrupt flag, returning its previous value.
pub fn take_interrupt() -> bool {
    CURRENT.with(|s| s.flag.swap(false, Ordering::AcqRel))
}

/// Fails with `Interrupted` (clearing the flag) if an interrupt is pending.
pub fn check() -> Result<()> {
    if take_interrupt() {
        Err(Error::interrupted())
    } else {
        Ok(())
    }
}

/// Why a [`park`] call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    /// Woken by a notification, a slice expiring, or spuriously. The caller
    /// must re-check its predicate.
    Signalled,
    /// The deadline had passed before parking.
    TimedOut,
    /// An interrupt was pending; the flag has been cleared.
    Interrupted,
}

/// Parks on `cvar` with `guard` held, honouring an optional deadline and,
/// when `interruptible`, the calling thread's interrupt flag.
///
/// Callers loop: re-check the predicate, then call `park` again.
pub(crate) fn park<T>(
    cvar: &Condvar,
    guard: &mut MutexGuard<'_, T>,
    deadline: Option<Instant>,
    interruptible: bool,
) -> Wake {
    if interruptible && take_interrupt() {
        return Wake::Interrupted;
    }
    let now = Instant::now();
    if let Some(deadline) = deadline {
        if now >= deadline {
            return Wake::TimedOut;
        }
    }
    match (deadline, interruptible) {
        (None, false) => cvar.wait(guard),
        (Some(deadline), false) => {
            let _ = cvar.wait_until(guard, deadline);
        }
        (deadline, true) => {
            let slice_end = deadline.map_or(now + POLL_SLICE, |d| d.min(now + POLL_SLICE));
            let _ = cvar.wait_until(guard, slice_end);
            if take_interrupt() {
                return Wake::Interrupted;
            }
        }
    }
    Wake::Signalled
}

/// Converts an optional timeout into an absolute deadline.
pub(crate) fn deadline_after(timeout: Option<Duration>) -> Option<Instant> {
    timeout.map(|t| Instant::now().checked_add(t).unwrap_or_else(far_future))
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(60 * 60 * 24 * 365)
}
