//! Reusable barrier with a dynamic party count.
//!
//! A [`Phaser`] advances its phase number each time every registered party
//! has arrived. Parties may [`register`](Phaser::register) and
//! [`arrive_and_deregister`](Phaser::arrive_and_deregister) between or during
//! phases; a phase only advances when the arrivals match the registrations at
//! that moment, so a party joining mid-phase is waited for too.
//!
//! When the last registered party deregisters the phaser terminates. After
//! termination nothing blocks: waits return immediately and every
//! phase-reporting method returns `None`.
//!
//! An optional advance hook runs on the thread completing each phase with
//! `(phase, registered)` and returns true to terminate the phaser.
//!
//! ```
//! use strand::sync::Phaser;
//!
//! let phaser = Phaser::new(1);
//! assert_eq!(phaser.arrive().unwrap(), Some(0));
//! assert_eq!(phaser.phase(), Some(1));
//! assert_eq!(phaser.arrive_and_deregister().unwrap(), Some(1));
//! assert!(phaser.is_terminated());
//! ```

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::interrupt::{self, Wake};
use crate::tracing_compat::{debug, trace};

type AdvanceHook = Box<dyn Fn(u64, usize) -> bool + Send + Sync>;

#[derive(Debug, Default)]
struct PhaserState {
    phase: u64,
    registered: usize,
    arrived: usize,
    terminated: bool,
}

/// A barrier whose parties can change between phases.
pub struct Phaser {
    on_advance: Option<AdvanceHook>,
    state: Mutex<PhaserState>,
    cvar: Condvar,
}

impl Phaser {
    /// Creates a phaser with `parties` registered parties, at phase 0.
    #[must_use]
    pub fn new(parties: usize) -> Self {
        Self {
            on_advance: None,
            state: Mutex::new(PhaserState {
                registered: parties,
                ..PhaserState::default()
            }),
            cvar: Condvar::new(),
        }
    }

    /// Creates a phaser whose `hook(phase, registered)` runs at every advance
    /// and terminates the phaser by returning true.
    #[must_use]
    pub fn with_on_advance(
        parties: usize,
        hook: impl Fn(u64, usize) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_advance: Some(Box::new(hook)),
            ..Self::new(parties)
        }
    }

    /// Adds one party. Returns the phase it joins, or `None` if terminated.
    pub fn register(&self) -> Option<u64> {
        self.bulk_register(1)
    }

    /// Adds `parties` parties at once.
    pub fn bulk_register(&self, parties: usize) -> Option<u64> {
        let mut state = self.state.lock();
        if state.terminated {
            return None;
        }
        state.registered += parties;
        trace!(registered = state.registered, phase = state.phase, "phaser register");
        Some(state.phase)
    }

    /// Records an arrival without waiting.
    ///
    /// Returns the phase arrived at. Fails with `IllegalState` if every
    /// registered party has already arrived in this phase.
    pub fn arrive(&self) -> Result<Option<u64>> {
        let mut state = self.state.lock();
        self.arrive_locked(&mut state, false)
    }

    /// Records an arrival and removes the party.
    ///
    /// Terminates the phaser if no registered parties remain.
    pub fn arrive_and_deregister(&self) -> Result<Option<u64>> {
        let mut state = self.state.lock();
        self.arrive_locked(&mut state, true)
    }

    /// Records an arrival and waits for the phase to advance.
    ///
    /// Returns the new phase, or `None` if the phaser terminated. Not
    /// interruptible.
    pub fn arrive_and_await_advance(&self) -> Result<Option<u64>> {
        let mut state = self.state.lock();
        let Some(arrived_at) = self.arrive_locked(&mut state, false)? else {
            return Ok(None);
        };
        while !state.terminated && state.phase == arrived_at {
            self.cvar.wait(&mut state);
        }
        Ok(Self::current(&state))
    }

    /// Waits until the phaser leaves `phase`.
    ///
    /// Returns immediately if the current phase differs. Returns the phase
    /// after the wait, or `None` if terminated.
    pub fn await_advance(&self, phase: u64) -> Option<u64> {
        let mut state = self.state.lock();
        while !state.terminated && state.phase == phase {
            self.cvar.wait(&mut state);
        }
        Self::current(&state)
    }

    /// Like [`await_advance`](Self::await_advance), but fails with `Timeout`
    /// after `timeout` and with `Interrupted` if the thread is interrupted.
    pub fn await_advance_timeout(&self, phase: u64, timeout: Duration) -> Result<Option<u64>> {
        let deadline = interrupt::deadline_after(Some(timeout));
        let mut state = self.state.lock();
        while !state.terminated && state.phase == phase {
            match interrupt::park(&self.cvar, &mut state, deadline, true) {
                Wake::Signalled => {}
                Wake::TimedOut => return Err(Error::timeout(timeout)),
                Wake::Interrupted => return Err(Error::interrupted()),
            }
        }
        Ok(Self::current(&state))
    }

    /// Terminates the phaser, releasing every waiter.
    pub fn force_termination(&self) {
        let mut state = self.state.lock();
        if !state.terminated {
            self.terminate(&mut state);
        }
    }

    /// Returns the current phase, or `None` once terminated.
    #[must_use]
    pub fn phase(&self) -> Option<u64> {
        Self::current(&self.state.lock())
    }

    /// Returns true once the phaser has terminated.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.state.lock().terminated
    }

    /// Number of registered parties.
    #[must_use]
    pub fn registered_parties(&self) -> usize {
        self.state.lock().registered
    }

    /// Number of parties that arrived in the current phase.
    #[must_use]
    pub fn arrived_parties(&self) -> usize {
        self.state.lock().arrived
    }

    /// Number of parties yet to arrive in the current phase.
    #[must_use]
    pub fn unarrived_parties(&self) -> usize {
        let state = self.state.lock();
        state.registered - state.arrived
    }

    fn current(state: &PhaserState) -> Option<u64> {
        (!state.terminated).then_some(state.phase)
    }

    fn arrive_locked(&self, state: &mut PhaserState, deregister: bool) -> Result<Option<u64>> {
        if state.terminated {
            return Ok(None);
        }
        if state.arrived >= state.registered {
            return Err(Error::illegal_state(format!(
                "arrival with no unarrived parties in phase {}",
                state.phase
            )));
        }
        let phase = state.phase;
        if deregister {
            state.registered -= 1;
            if state.registered == 0 {
                self.terminate(state);
                return Ok(Some(phase));
            }
        } else {
            state.arrived += 1;
        }
        if state.arrived == state.registered {
            self.advance(state);
        }
        Ok(Some(phase))
    }

    fn advance(&self, state: &mut PhaserState) {
        let terminate = self
            .on_advance
            .as_ref()
            .is_some_and(|hook| hook(state.phase, state.registered));
        state.arrived = 0;
        if terminate {
            self.terminate(state);
            return;
        }
        state.phase = state.phase.wrapping_add(1);
        trace!(phase = state.phase, registered = state.registered, "phaser advanced");
        self.cvar.notify_all();
    }

    fn terminate(&self, state: &mut PhaserState) {
        state.terminated = true;
        debug!(phase = state.phase, "phaser terminated");
        self.cvar.notify_all();
    }
}

impl fmt::Debug for Phaser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Phaser")
            .field("state", &*self.state.lock())
            .field("has_on_advance", &self.on_advance.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::atomic::AtomicCounter;
    use crate::test_utils::{init_test_logging, wait_until};
    use crate::ErrorKind;
    use std::sync::Arc;
    use std::thread;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn parties_advance_together_across_phases() {
        init_test("parties_advance_together_across_phases");
        let phaser = Arc::new(Phaser::new(3));
        let progress = Arc::new(AtomicCounter::new(0));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let phaser = Arc::clone(&phaser);
                let progress = Arc::clone(&progress);
                thread::spawn(move || {
                    for round in 0..3_i64 {
                        progress.increment_and_get();
                        let next = phaser.arrive_and_await_advance().expect("arrive");
                        // Every party finished the round before anyone moved on.
                        assert!(progress.get() >= 3 * (round + 1));
                        assert_eq!(next, Some(u64::try_from(round + 1).expect("round")));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("party panicked");
        }
        assert_eq!(phaser.phase(), Some(3));
        crate::test_complete!("parties_advance_together_across_phases");
    }

    #[test]
    fn mid_phase_registration_is_waited_for() {
        init_test("mid_phase_registration_is_waited_for");
        let phaser = Arc::new(Phaser::new(1));
        assert_eq!(phaser.register(), Some(0));

        let first = {
            let phaser = Arc::clone(&phaser);
            thread::spawn(move || phaser.arrive_and_await_advance().expect("arrive"))
        };
        assert!(wait_until(Duration::from_secs(2), || phaser.arrived_parties() == 1));
        // A third party joins while the first is waiting.
        assert_eq!(phaser.register(), Some(0));
        assert_eq!(phaser.unarrived_parties(), 2);

        assert_eq!(phaser.arrive().expect("arrive"), Some(0));
        assert_eq!(phaser.phase(), Some(0), "phase advanced without the new party");
        assert_eq!(phaser.arrive().expect("arrive"), Some(0));
        assert_eq!(first.join().expect("panicked"), Some(1));
    }

    #[test]
    fn last_deregistration_terminates() {
        init_test("last_deregistration_terminates");
        let phaser = Phaser::new(2);
        assert_eq!(phaser.arrive_and_deregister().expect("deregister"), Some(0));
        assert_eq!(phaser.registered_parties(), 1);
        assert!(!phaser.is_terminated());
        assert_eq!(phaser.arrive_and_deregister().expect("deregister"), Some(0));
        assert!(phaser.is_terminated());
        assert_eq!(phaser.phase(), None);
        assert_eq!(phaser.register(), None);
        assert_eq!(phaser.await_advance(0), None);
        assert_eq!(phaser.arrive_and_await_advance().expect("terminated"), None);
    }

    #[test]
    fn deregistration_can_complete_a_phase() {
        init_test("deregistration_can_complete_a_phase");
        let phaser = Arc::new(Phaser::new(2));
        let waiter = {
            let phaser = Arc::clone(&phaser);
            thread::spawn(move || phaser.arrive_and_await_advance().expect("arrive"))
        };
        assert!(wait_until(Duration::from_secs(2), || phaser.arrived_parties() == 1));
        phaser.arrive_and_deregister().expect("deregister");
        assert_eq!(waiter.join().expect("panicked"), Some(1));
        assert_eq!(phaser.registered_parties(), 1);
    }

    #[test]
    fn await_advance_timeout_and_stale_phase() {
        init_test("await_advance_timeout_and_stale_phase");
        let phaser = Phaser::new(2);
        let err = phaser
            .await_advance_timeout(0, Duration::from_millis(20))
            .expect_err("should time out");
        assert_eq!(err.kind(), ErrorKind::Timeout);
        // A phase other than the current one returns immediately.
        assert_eq!(phaser.await_advance(7), Some(0));
    }

    #[test]
    fn over_arrival_is_rejected() {
        init_test("over_arrival_is_rejected");
        let phaser = Phaser::new(0);
        let err = phaser.arrive().expect_err("no parties");
        assert_eq!(err.kind(), ErrorKind::IllegalState);
    }

    #[test]
    fn on_advance_hook_can_terminate() {
        init_test("on_advance_hook_can_terminate");
        let phaser = Phaser::with_on_advance(1, |phase, _registered| phase >= 1);
        assert_eq!(phaser.arrive().expect("arrive"), Some(0));
        assert_eq!(phaser.phase(), Some(1));
        assert_eq!(phaser.arrive().expect("arrive"), Some(1));
        assert!(phaser.is_terminated());
    }

    #[test]
    fn force_termination_releases_waiters() {
        init_test("force_termination_releases_waiters");
        let phaser = Arc::new(Phaser::new(2));
        let waiter = {
            let phaser = Arc::clone(&phaser);
            thread::spawn(move || phaser.arrive_and_await_advance().expect("arrive"))
        };
        assert!(wait_until(Duration::from_secs(2), || phaser.arrived_parties() == 1));
        phaser.force_termination();
        assert_eq!(waiter.join().expect("panicked"), None);
    }
}
