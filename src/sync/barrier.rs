//! Cyclic barrier for N-way rendezvous with an optional trip action.
//!
//! The barrier trips when `parties` callers have arrived. The last arrival
//! runs the barrier action (if any) before anyone is released, then all
//! waiters return together and the barrier resets for the next generation.
//!
//! A party whose wait times out or is interrupted **breaks** the barrier:
//! every other waiter of that generation, and every later caller, fails with
//! `BrokenBarrier` until [`CyclicBarrier::reset`] is called. A panicking
//! action breaks the barrier too; the tripping thread gets the panic as a
//! `Panicked` error.
//!
//! The action runs while the barrier's internal state is locked, so it must
//! not call back into the same barrier.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::interrupt::{self, InterruptHandle, Wake};
use crate::tracing_compat::{debug, trace};

type BarrierAction = Box<dyn Fn() + Send + Sync>;

/// One trip cycle. Waiters keep their generation to tell a trip from a break.
#[derive(Debug, Default)]
struct Generation {
    broken: AtomicBool,
}

impl Generation {
    fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct BarrierState {
    arrived: usize,
    generation: Arc<Generation>,
    trips: u64,
}

/// Reusable barrier for a fixed number of parties.
pub struct CyclicBarrier {
    parties: usize,
    action: Option<BarrierAction>,
    state: Mutex<BarrierState>,
    cvar: Condvar,
}

impl CyclicBarrier {
    /// Creates a barrier that trips when `parties` have arrived.
    ///
    /// # Panics
    /// Panics if `parties == 0`.
    #[must_use]
    pub fn new(parties: usize) -> Self {
        Self::build(parties, None)
    }

    /// Creates a barrier that runs `action` once per trip, on the last
    /// arriving thread, before releasing the others.
    ///
    /// # Panics
    /// Panics if `parties == 0`.
    #[must_use]
    pub fn with_action(parties: usize, action: impl Fn() + Send + Sync + 'static) -> Self {
        Self::build(parties, Some(Box::new(action)))
    }

    /// Like [`new`](Self::new), but fails with `InvalidArgument` instead of
    /// panicking when `parties == 0`.
    pub fn try_new(parties: usize) -> Result<Self> {
        Self::check_parties(parties)?;
        Ok(Self::build(parties, None))
    }

    /// Like [`with_action`](Self::with_action), but fails with
    /// `InvalidArgument` instead of panicking when `parties == 0`.
    pub fn try_with_action(parties: usize, action: impl Fn() + Send + Sync + 'static) -> Result<Self> {
        Self::check_parties(parties)?;
        Ok(Self::build(parties, Some(Box::new(action))))
    }

    fn check_parties(parties: usize) -> Result<()> {
        if parties == 0 {
            return Err(Error::invalid_argument("barrier requires at least 1 party"));
        }
        Ok(())
    }

    fn build(parties: usize, action: Option<BarrierAction>) -> Self {
        assert!(parties > 0, "barrier requires at least 1 party");
        Self {
            parties,
            action,
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: Arc::new(Generation::default()),
                trips: 0,
            }),
            cvar: Condvar::new(),
        }
    }

    /// Returns the number of parties required to trip the barrier.
    #[must_use]
    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Returns how many parties are currently waiting.
    #[must_use]
    pub fn number_waiting(&self) -> usize {
        self.state.lock().arrived
    }

    /// Returns true if the current generation is broken.
    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.state.lock().generation.is_broken()
    }

    /// Returns how many times the barrier has tripped.
    #[must_use]
    pub fn trips(&self) -> u64 {
        self.state.lock().trips
    }

    /// Waits until all parties arrive.
    ///
    /// Returns the arrival index: `parties - 1` for the first arrival, `0`
    /// for the last (the one that ran the action).
    pub fn wait(&self) -> Result<usize> {
        self.wait_inner(None)
    }

    /// Waits until all parties arrive or `timeout` elapses.
    ///
    /// On timeout this call fails with `Timeout` and the barrier is broken.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<usize> {
        self.wait_inner(Some(timeout))
    }

    /// Breaks the current generation (failing its waiters) and starts a
    /// fresh, unbroken one.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        if state.arrived > 0 {
            self.break_barrier(&mut state);
        }
        Self::next_generation(&mut state);
        debug!(parties = self.parties, "barrier reset");
    }

    fn wait_inner(&self, timeout: Option<Duration>) -> Result<usize> {
        let deadline: Option<Instant> = interrupt::deadline_after(timeout);
        let mut state = self.state.lock();
        let generation = Arc::clone(&state.generation);

        if generation.is_broken() {
            return Err(Error::broken_barrier());
        }
        if interrupt::take_interrupt() {
            self.break_barrier(&mut state);
            return Err(Error::interrupted());
        }

        state.arrived += 1;
        let index = self.parties - state.arrived;
        trace!(index, parties = self.parties, "barrier arrival");

        if index == 0 {
            return self.trip(&mut state);
        }

        loop {
            if generation.is_broken() {
                return Err(Error::broken_barrier());
            }
            if !Arc::ptr_eq(&generation, &state.generation) {
                return Ok(index);
            }
            match interrupt::park(&self.cvar, &mut state, deadline, true) {
                Wake::Signalled => {}
                Wake::TimedOut => {
                    self.break_barrier(&mut state);
                    return Err(Error::timeout(timeout.unwrap_or_default()));
                }
                Wake::Interrupted => {
                    if !generation.is_broken() && !Arc::ptr_eq(&generation, &state.generation) {
                        // Tripped before the interrupt was seen; keep it pending.
                        InterruptHandle::current().interrupt();
                        return Ok(index);
                    }
                    if !generation.is_broken() {
                        self.break_barrier(&mut state);
                    }
                    return Err(Error::interrupted());
                }
            }
        }
    }

    fn trip(&self, state: &mut BarrierState) -> Result<usize> {
        if let Some(action) = &self.action {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| action())) {
                self.break_barrier(state);
                return Err(Error::from_panic(payload.as_ref()));
            }
        }
        Self::next_generation(state);
        state.trips += 1;
        self.cvar.notify_all();
        trace!(trips = state.trips, "barrier tripped");
        Ok(0)
    }

    fn break_barrier(&self, state: &mut BarrierState) {
        state.generation.broken.store(true, Ordering::Release);
        state.arrived = 0;
        self.cvar.notify_all();
        debug!(parties = self.parties, "barrier broken");
    }

    fn next_generation(state: &mut BarrierState) {
        state.arrived = 0;
        state.generation = Arc::new(Generation::default());
    }
}

impl fmt::Debug for CyclicBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CyclicBarrier")
            .field("parties", &self.parties)
            .field("has_action", &self.action.is_some())
            .field("state", &*self.state.lock())
            .finish()
    }
}
