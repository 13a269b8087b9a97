//! Blocking FIFO task queue, optionally bounded.
//!
//! Producers block in [`push`](TaskQueue::push) while a bounded queue is
//! full; consumers block in [`pop`](TaskQueue::pop) while it is empty. Once
//! [`close`](TaskQueue::close)d, pushes are rejected and pops drain what is
//! left before returning `None`.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::interrupt::{self, Wake};

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A multi-producer multi-consumer blocking queue.
pub struct TaskQueue<T> {
    capacity: Option<usize>,
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> TaskQueue<T> {
    /// Creates an unbounded queue.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    /// Creates a queue holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be at least 1");
        Self::with_capacity(Some(capacity))
    }

    pub(crate) fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    fn is_full(&self, state: &QueueState<T>) -> bool {
        self.capacity.is_some_and(|cap| state.items.len() >= cap)
    }

    /// Appends `item`, blocking while the queue is full.
    ///
    /// Fails with `Rejected` once closed, or `Interrupted` if the calling
    /// thread is interrupted while blocked.
    pub fn push(&self, item: T) -> Result<()> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(Error::rejected("queue is closed"));
            }
            if !self.is_full(&state) {
                break;
            }
            match interrupt::park(&self.not_full, &mut state, None, true) {
                Wake::Interrupted => return Err(Error::interrupted()),
                Wake::Signalled | Wake::TimedOut => {}
            }
        }
        state.items.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Appends `item` without blocking. Hands the item back if the queue is
    /// full or closed.
    pub fn offer(&self, item: T) -> std::result::Result<(), T> {
        let mut state = self.state.lock();
        if state.closed || self.is_full(&state) {
            return Err(item);
        }
        state.items.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Removes the oldest item, blocking while empty.
    ///
    /// Returns `None` once the queue is closed and drained. Not interruptible;
    /// worker threads leave only through `close`.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            if state.closed {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Like [`pop`](Self::pop) but gives up after `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = interrupt::deadline_after(Some(timeout));
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            if state.closed {
                return None;
            }
            if interrupt::park(&self.not_empty, &mut state, deadline, false) == Wake::TimedOut {
                return None;
            }
        }
    }

    /// Removes the oldest item if one is present.
    pub fn try_pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        let item = state.items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Rejects further pushes and wakes every blocked producer and consumer.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Removes and returns every queued item.
    pub fn drain(&self) -> Vec<T> {
        let mut state = self.state.lock();
        let drained: Vec<T> = state.items.drain(..).collect();
        self.not_full.notify_all();
        drained
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Maximum number of items, or `None` if unbounded.
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Returns true once closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl<T> fmt::Debug for TaskQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TaskQueue")
            .field("len", &state.items.len())
            .field("capacity", &self.capacity)
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::InterruptHandle;
    use crate::test_utils::init_test_logging;
    use crate::ErrorKind;
    use std::sync::{mpsc, Arc};
    use std::thread;

    #[test]
    fn fifo_order() {
        init_test_logging();
        crate::test_phase!("fifo_order");
        let queue = TaskQueue::unbounded();
        for i in 0..5 {
            queue.push(i).expect("push");
        }
        let popped: Vec<_> = std::iter::from_fn(|| queue.try_pop()).collect();
        assert_eq!(popped, vec![0, 1, 2, 3, 4]);
        crate::test_complete!("fifo_order");
    }

    #[test]
    fn bounded_push_blocks_until_pop() {
        init_test_logging();
        let queue = Arc::new(TaskQueue::bounded(1));
        queue.push(1).expect("push");
        assert_eq!(queue.offer(2), Err(2));

        let (tx, rx) = mpsc::channel();
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                queue.push(2).expect("push");
                tx.send(()).expect("send");
            })
        };
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(queue.pop(), Some(1));
        rx.recv_timeout(Duration::from_secs(2)).expect("producer unblocked");
        producer.join().expect("producer panicked");
        assert_eq!(queue.pop(), Some(2));
    }

    #[test]
    fn close_drains_then_ends() {
        init_test_logging();
        let queue = TaskQueue::unbounded();
        queue.push("a").expect("push");
        queue.close();
        let err = queue.push("b").expect_err("closed");
        assert_eq!(err.kind(), ErrorKind::Rejected);
        assert_eq!(queue.pop(), Some("a"));
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.pop_timeout(Duration::from_millis(5)), None);
    }

    #[test]
    fn blocked_push_is_interruptible() {
        init_test_logging();
        let queue = Arc::new(TaskQueue::bounded(1));
        queue.push(0).expect("push");
        let (tx, rx) = mpsc::channel();
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                tx.send(InterruptHandle::current()).expect("send");
                queue.push(1)
            })
        };
        rx.recv().expect("handle").interrupt();
        let err = producer.join().expect("producer panicked").expect_err("interrupted");
        assert_eq!(err.kind(), ErrorKind::Interrupted);
        assert_eq!(queue.drain(), vec![0]);
    }
}
