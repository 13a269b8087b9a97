//! Shared deadline thread for promise timeouts.
//!
//! All `or_timeout`/`complete_on_timeout` deadlines live in one min-heap
//! served by a single thread, started on first use.

use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::Error;
use crate::tracing_compat::{debug, warn};

type Action = Box<dyn FnOnce() + Send>;

struct TimerEntry {
    deadline: Instant,
    /// Insertion order; breaks deadline ties first-come first-served.
    generation: u64,
    action: Action,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TimerEntry {}

#[derive(Default)]
struct TimerState {
    heap: BinaryHeap<TimerEntry>,
    next_generation: u64,
    running: bool,
}

#[derive(Default)]
struct Timer {
    state: Mutex<TimerState>,
    changed: Condvar,
}

fn timer() -> &'static Timer {
    static TIMER: OnceLock<Timer> = OnceLock::new();
    TIMER.get_or_init(Timer::default)
}

/// Runs `action` on the timer thread once `delay` has elapsed.
pub(crate) fn schedule(delay: Duration, action: impl FnOnce() + Send + 'static) {
    // Saturates far-future deadlines instead of overflowing.
    let now = Instant::now();
    let deadline = now.checked_add(delay).unwrap_or(now + Duration::from_secs(86_400 * 365));
    let timer = timer();
    let mut state = timer.state.lock();
    let generation = state.next_generation;
    state.next_generation += 1;
    state.heap.push(TimerEntry {
        deadline,
        generation,
        action: Box::new(action),
    });
    if !state.running {
        match thread::Builder::new()
            .name("strand-timer".into())
            .spawn(move || timer.serve())
        {
            Ok(_) => {
                state.running = true;
                debug!("timer thread started");
            }
            // Retried by the next `schedule`.
            Err(e) => warn!(error = %e, "failed to spawn timer thread"),
        }
    }
    timer.changed.notify_one();
}

impl Timer {
    fn serve(&self) {
        let mut state = self.state.lock();
        loop {
            let now = Instant::now();
            let mut due = Vec::new();
            while state.heap.peek().is_some_and(|e| e.deadline <= now) {
                if let Some(entry) = state.heap.pop() {
                    due.push(entry.action);
                }
            }
            if !due.is_empty() {
                drop(state);
                for action in due {
                    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(action)) {
                        warn!(error = %Error::from_panic(payload.as_ref()), "timeout action panicked");
                    }
                }
                state = self.state.lock();
                continue;
            }
            match state.heap.peek().map(|e| e.deadline) {
                Some(deadline) => {
                    self.changed.wait_until(&mut state, deadline);
                }
                None => self.changed.wait(&mut state),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_test_logging, wait_until};
    use std::sync::mpsc;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn earliest_deadline_fires_first() {
        init_test("earliest_deadline_fires_first");
        let (tx, rx) = mpsc::channel();
        for (label, ms) in [("late", 120u64), ("early", 20), ("middle", 60)] {
            let tx = tx.clone();
            schedule(Duration::from_millis(ms), move || {
                let _ = tx.send(label);
            });
        }
        let order: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).expect("timer fired"))
            .collect();
        crate::assert_with_log!(
            order == ["early", "middle", "late"],
            "deadline order",
            ["early", "middle", "late"],
            order
        );
        crate::test_complete!("earliest_deadline_fires_first");
    }

    #[test]
    fn many_deadlines_share_one_thread() {
        init_test("many_deadlines_share_one_thread");
        let threads = std::sync::Arc::new(Mutex::new(Vec::new()));
        for i in 0..200u64 {
            let threads = std::sync::Arc::clone(&threads);
            schedule(Duration::from_millis(i % 20), move || {
                threads.lock().push(thread::current().id());
            });
        }
        assert!(wait_until(Duration::from_secs(5), || threads.lock().len() == 200));
        let mut ids = threads.lock().clone();
        ids.dedup();
        crate::assert_with_log!(ids.len() == 1, "single timer thread", 1, ids.len());
        crate::test_complete!("many_deadlines_share_one_thread");
    }

    #[test]
    fn panicking_action_does_not_stop_the_timer() {
        init_test("panicking_action_does_not_stop_the_timer");
        schedule(Duration::ZERO, || panic!("timer action exploded"));
        let (tx, rx) = mpsc::channel();
        schedule(Duration::from_millis(5), move || {
            let _ = tx.send(());
        });
        rx.recv_timeout(Duration::from_secs(2)).expect("later action ran");
    }
}
