//! Per-subscriber delivery state.
//!
//! Each subscription owns a bounded buffer of items the subscriber has not
//! yet asked for, a demand counter, and at most one pending terminal signal.
//! Delivery happens in [`SubscriptionState::drain`], which is guarded by a
//! `draining` flag: whichever thread finds work while nobody else is
//! draining delivers everything deliverable, including items made
//! deliverable by `request` calls issued from inside `on_next`. Signals to
//! one subscriber are therefore never concurrent and never reentrant.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use super::Subscriber;
use crate::error::{Error, Result};
use crate::executor::ExecutorHandle;
use crate::interrupt::{self, Wake};
use crate::tracing_compat::{trace, warn};

/// Lifecycle of a subscription as seen by its subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    /// Items may still be delivered.
    Active,
    /// `on_complete` was delivered.
    Completed,
    /// `on_error` was delivered.
    Errored,
    /// Cancelled by the subscriber (or because it was dropped).
    Cancelled,
}

enum Terminal {
    Complete,
    Error(Error),
}

enum Step<T> {
    Next(T),
    Terminal(Terminal),
}

struct Slot<T> {
    status: SubscriptionStatus,
    demand: u64,
    buffer: VecDeque<T>,
    pending: Option<Terminal>,
    /// Set once `on_subscribe` has returned; nothing is delivered before.
    started: bool,
    draining: bool,
}

pub(crate) struct SubscriptionState<T> {
    subscriber: Weak<dyn Subscriber<T>>,
    capacity: usize,
    executor: Option<ExecutorHandle>,
    slot: Mutex<Slot<T>>,
    space: Condvar,
}

impl<T: Send + 'static> SubscriptionState<T> {
    pub(crate) fn new(
        subscriber: &Arc<dyn Subscriber<T>>,
        capacity: usize,
        executor: Option<ExecutorHandle>,
    ) -> Arc<Self> {
        Arc::new(Self {
            subscriber: Arc::downgrade(subscriber),
            capacity,
            executor,
            slot: Mutex::new(Slot {
                status: SubscriptionStatus::Active,
                demand: 0,
                buffer: VecDeque::new(),
                pending: None,
                started: false,
                draining: false,
            }),
            space: Condvar::new(),
        })
    }

    /// Marks `on_subscribe` as done and delivers anything already queued.
    pub(crate) fn start(self: &Arc<Self>) {
        self.slot.lock().started = true;
        self.schedule();
    }

    /// True while the publisher should keep feeding this subscription.
    ///
    /// A subscription whose subscriber was dropped is cancelled here.
    pub(crate) fn is_open(&self) -> bool {
        let mut slot = self.slot.lock();
        if self.cancel_if_abandoned(&mut slot) {
            return false;
        }
        slot.status == SubscriptionStatus::Active && slot.pending.is_none()
    }

    /// Cancels the subscription if nothing holds the subscriber any more.
    fn cancel_if_abandoned(&self, slot: &mut Slot<T>) -> bool {
        if self.subscriber.strong_count() > 0 {
            return false;
        }
        if slot.status == SubscriptionStatus::Active {
            warn!("subscriber dropped while subscribed; cancelling");
            self.cancel_locked(slot);
        }
        true
    }

    pub(crate) fn lag(&self) -> usize {
        self.slot.lock().buffer.len()
    }

    /// Buffers `item`, blocking while the buffer is full.
    ///
    /// Items for a closed subscription are dropped.
    pub(crate) fn push(self: &Arc<Self>, item: T) -> Result<()> {
        {
            let mut slot = self.slot.lock();
            loop {
                if self.cancel_if_abandoned(&mut slot)
                    || slot.status != SubscriptionStatus::Active
                    || slot.pending.is_some()
                {
                    return Ok(());
                }
                if slot.buffer.len() < self.capacity {
                    break;
                }
                // Interruptible parks wake every poll slice, so a subscriber
                // dropped meanwhile is noticed above.
                if interrupt::park(&self.space, &mut slot, None, true) == Wake::Interrupted {
                    return Err(Error::interrupted());
                }
            }
            slot.buffer.push_back(item);
        }
        self.schedule();
        Ok(())
    }

    /// Buffers `item` only if there is room. Returns false if it was dropped.
    pub(crate) fn offer(self: &Arc<Self>, item: T) -> bool {
        {
            let mut slot = self.slot.lock();
            if self.cancel_if_abandoned(&mut slot)
                || slot.status != SubscriptionStatus::Active
                || slot.pending.is_some()
            {
                return true;
            }
            if slot.buffer.len() >= self.capacity {
                return false;
            }
            slot.buffer.push_back(item);
        }
        self.schedule();
        true
    }

    /// Queues `on_complete` behind the buffered items.
    pub(crate) fn complete(self: &Arc<Self>) {
        self.terminate(Terminal::Complete, false);
    }

    /// Queues `on_error`, discarding buffered items.
    pub(crate) fn error(self: &Arc<Self>, error: Error) {
        self.terminate(Terminal::Error(error), true);
    }

    fn terminate(self: &Arc<Self>, signal: Terminal, discard: bool) {
        {
            let mut slot = self.slot.lock();
            if slot.status != SubscriptionStatus::Active || slot.pending.is_some() {
                return;
            }
            if discard {
                slot.buffer.clear();
            }
            slot.pending = Some(signal);
        }
        // A publisher blocked on this buffer must not wait for space forever.
        self.space.notify_all();
        self.schedule();
    }

    fn request(self: &Arc<Self>, n: u64) {
        if n == 0 {
            self.error(Error::invalid_argument(
                "request must be positive (non-positive subscription request)",
            ));
            return;
        }
        {
            let mut slot = self.slot.lock();
            if slot.status != SubscriptionStatus::Active {
                return;
            }
            slot.demand = slot.demand.saturating_add(n);
        }
        self.schedule();
    }

    fn cancel(&self) {
        let mut slot = self.slot.lock();
        self.cancel_locked(&mut slot);
    }

    fn cancel_locked(&self, slot: &mut Slot<T>) {
        if slot.status == SubscriptionStatus::Active {
            slot.status = SubscriptionStatus::Cancelled;
            slot.buffer.clear();
            slot.pending = None;
            self.space.notify_all();
            trace!("subscription cancelled");
        }
    }

    fn status(&self) -> SubscriptionStatus {
        self.slot.lock().status
    }

    fn schedule(self: &Arc<Self>) {
        if let Some(executor) = &self.executor {
            let this = Arc::clone(self);
            if executor.execute(move || this.drain()).is_ok() {
                return;
            }
        }
        self.drain();
    }

    /// Delivers everything currently deliverable.
    fn drain(&self) {
        {
            let mut slot = self.slot.lock();
            if slot.draining || !slot.started {
                return;
            }
            slot.draining = true;
        }
        loop {
            let step = {
                let mut slot = self.slot.lock();
                match self.next_step(&mut slot) {
                    Some(step) => step,
                    None => {
                        slot.draining = false;
                        return;
                    }
                }
            };
            let Some(subscriber) = self.subscriber.upgrade() else {
                let mut slot = self.slot.lock();
                self.cancel_if_abandoned(&mut slot);
                slot.draining = false;
                return;
            };
            match step {
                Step::Next(item) => {
                    let delivered =
                        panic::catch_unwind(AssertUnwindSafe(|| subscriber.on_next(item)));
                    if let Err(payload) = delivered {
                        let error = Error::from_panic(payload.as_ref());
                        warn!(error = %error, "on_next panicked; cancelling subscription");
                        self.cancel();
                        self.slot.lock().draining = false;
                        let notified =
                            panic::catch_unwind(AssertUnwindSafe(|| subscriber.on_error(error)));
                        if notified.is_err() {
                            warn!("on_error panicked after on_next panic");
                        }
                        return;
                    }
                }
                // The status is already terminal, so a panic here only needs
                // to be contained; the loop then finds nothing left to do.
                Step::Terminal(signal) => {
                    let delivered = panic::catch_unwind(AssertUnwindSafe(|| match signal {
                        Terminal::Complete => subscriber.on_complete(),
                        Terminal::Error(e) => subscriber.on_error(e),
                    }));
                    if let Err(payload) = delivered {
                        warn!(
                            error = %Error::from_panic(payload.as_ref()),
                            "terminal signal panicked in subscriber"
                        );
                    }
                }
            }
        }
    }

    fn next_step(&self, slot: &mut Slot<T>) -> Option<Step<T>> {
        if slot.status != SubscriptionStatus::Active {
            return None;
        }
        if slot.demand > 0 {
            if let Some(item) = slot.buffer.pop_front() {
                slot.demand -= 1;
                self.space.notify_one();
                return Some(Step::Next(item));
            }
        }
        if slot.buffer.is_empty() {
            if let Some(signal) = slot.pending.take() {
                slot.status = match signal {
                    Terminal::Complete => SubscriptionStatus::Completed,
                    Terminal::Error(_) => SubscriptionStatus::Errored,
                };
                return Some(Step::Terminal(signal));
            }
        }
        None
    }
}

/// The link between one publisher and one subscriber.
///
/// Handed to [`Subscriber::on_subscribe`]. The subscriber pulls items by
/// [`request`](Self::request)ing them; nothing is delivered beyond the
/// accumulated demand.
pub struct Subscription<T> {
    state: Arc<SubscriptionState<T>>,
}

impl<T> Clone for Subscription<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Send + 'static> Subscription<T> {
    pub(crate) fn new(state: Arc<SubscriptionState<T>>) -> Self {
        Self { state }
    }

    /// Adds `n` to the outstanding demand (saturating).
    ///
    /// `request(0)` is a protocol violation: the subscription is terminated
    /// with `on_error(InvalidArgument)`.
    pub fn request(&self, n: u64) {
        self.state.request(n);
    }

    /// Stops delivery and discards buffered items. No further signal is sent.
    pub fn cancel(&self) {
        self.state.cancel();
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> SubscriptionStatus {
        self.state.status()
    }

    /// Returns true once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.status() == SubscriptionStatus::Cancelled
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.state.slot.lock();
        f.debug_struct("Subscription")
            .field("status", &slot.status)
            .field("demand", &slot.demand)
            .field("buffered", &slot.buffer.len())
            .finish()
    }
}
